//! Configuration validation.
//!
//! Structural checks run on every load; filesystem checks
//! ([`validate_credential_files`]) are run by `eabkit test` and before
//! the scheduler starts.

use std::collections::HashSet;
use std::fmt;

use crate::Config;

mod credentials;
mod lint;

pub use credentials::validate_credential_files;
pub use lint::lint_config;

/// Category of a validation error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Ca,
    Retry,
    Record,
    Credentials,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Ca => "ca",
            ErrorCategory::Retry => "retry",
            ErrorCategory::Record => "record",
            ErrorCategory::Credentials => "credentials",
        };
        f.write_str(name)
    }
}

/// A validation failure
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub category: ErrorCategory,
    pub message: String,
}

impl ValidationError {
    pub fn new(category: ErrorCategory, message: impl Into<String>) -> Self {
        Self {
            category,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.category, self.message)
    }
}

/// A non-fatal validation finding
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    pub message: String,
}

impl ValidationWarning {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Accumulated validation errors and warnings
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    pub fn merge(&mut self, other: ValidationResult) {
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Run structural validation and lints
pub fn validate_config(config: &Config) -> ValidationResult {
    let mut result = validate_structure(config);
    result.merge(lint_config(config));
    result
}

fn validate_structure(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    match url::Url::parse(&config.ca.base_url) {
        Ok(url) if url.scheme() == "http" || url.scheme() == "https" => {}
        Ok(url) => result.add_error(ValidationError::new(
            ErrorCategory::Ca,
            format!("base-url must use http or https, got scheme '{}'", url.scheme()),
        )),
        Err(e) => result.add_error(ValidationError::new(
            ErrorCategory::Ca,
            format!("base-url '{}' is not a valid URL: {}", config.ca.base_url, e),
        )),
    }

    if config.ca.request_timeout_secs == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Ca,
            "request-timeout-secs must be greater than 0",
        ));
    }

    if config.retry.max_attempts == 0 {
        result.add_error(ValidationError::new(
            ErrorCategory::Retry,
            "max-attempts must be at least 1",
        ));
    }

    if config.records.is_empty() {
        result.add_error(ValidationError::new(
            ErrorCategory::Record,
            "at least one record must be configured",
        ));
    }

    let mut seen = HashSet::new();
    for record in &config.records {
        if !seen.insert(record.name.as_str()) {
            result.add_error(ValidationError::new(
                ErrorCategory::Record,
                format!("record '{}' is defined more than once", record.name),
            ));
        }

        if config.credentials_file_for(record).is_none() {
            result.add_error(ValidationError::new(
                ErrorCategory::Credentials,
                format!(
                    "record '{}' has no credentials-file and no top-level credentials-file is set",
                    record.name
                ),
            ));
        }
    }

    result
}
