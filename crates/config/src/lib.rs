//! Configuration loading and validation for eabkit.
//!
//! Configuration is written in KDL:
//!
//! ```kdl
//! ca {
//!     base-url "https://publicca.googleapis.com"
//!     request-timeout-secs 30
//! }
//! retry {
//!     max-attempts 3
//!     initial-backoff-ms 500
//! }
//! storage "/var/lib/eabkit"
//! credentials-file "/etc/eabkit/service-account.json"
//! schedule {
//!     check-interval-secs 43200
//! }
//! record "default" {
//!     expires-after-days 60
//! }
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use eabkit_common::RecordName;

pub mod kdl;
pub mod validate;

pub use validate::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};

/// Default Google Public CA endpoint
pub const DEFAULT_CA_BASE_URL: &str = "https://publicca.googleapis.com";

/// Validity window applied when a record leaves `expires-after-days` unset or non-positive
pub const DEFAULT_EXPIRES_AFTER_DAYS: i64 = 60;

// ============================================================================
// Root Configuration
// ============================================================================

/// Root eabkit configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Certificate authority endpoint settings
    #[serde(default)]
    pub ca: CaConfig,

    /// Retry behaviour for transient network failures
    #[serde(default)]
    pub retry: RetryConfig,

    /// Background reconciliation schedule
    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Directory holding persisted records
    #[serde(default = "default_storage_path")]
    pub storage_path: PathBuf,

    /// Service-account key used by records without their own override
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,

    /// Managed EAB credential records
    #[serde(default)]
    pub records: Vec<RecordConfig>,
}

impl Config {
    /// Load configuration from a KDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path.display()))?;

        let config = Self::from_kdl(&content)
            .with_context(|| format!("Failed to parse configuration file {}", path.display()))?;

        info!(
            path = %path.display(),
            records = config.records.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Parse configuration from KDL source
    pub fn from_kdl(content: &str) -> Result<Self> {
        kdl::parse_config(content)
    }

    /// Validate the configuration, failing on the first set of errors.
    ///
    /// Warnings are logged but do not fail validation.
    pub fn validate(&self) -> Result<()> {
        let result = validate::validate_config(self);

        for warning in &result.warnings {
            warn!(warning = %warning.message, "Configuration warning");
        }

        if !result.errors.is_empty() {
            let messages: Vec<String> = result.errors.iter().map(|e| e.to_string()).collect();
            anyhow::bail!(
                "Configuration has {} error(s):\n  - {}",
                messages.len(),
                messages.join("\n  - ")
            );
        }

        debug!("Configuration validated");
        Ok(())
    }

    /// Find a record by name
    pub fn record(&self, name: &str) -> Option<&RecordConfig> {
        self.records.iter().find(|r| r.name.as_str() == name)
    }

    /// Resolve the service-account key file for a record
    pub fn credentials_file_for<'a>(&'a self, record: &'a RecordConfig) -> Option<&'a Path> {
        record
            .credentials_file
            .as_deref()
            .or(self.credentials_file.as_deref())
    }

    /// Minimal configuration for tests
    pub fn default_for_testing() -> Self {
        Self {
            ca: CaConfig::default(),
            retry: RetryConfig::default(),
            schedule: ScheduleConfig::default(),
            storage_path: default_storage_path(),
            credentials_file: Some(PathBuf::from("/tmp/service-account.json")),
            records: vec![RecordConfig::new(
                RecordName::new("default").expect("static record name is valid"),
            )],
        }
    }
}

fn default_storage_path() -> PathBuf {
    PathBuf::from("/var/lib/eabkit")
}

// ============================================================================
// Sections
// ============================================================================

/// Certificate authority endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaConfig {
    /// Base URL of the CA API, without a trailing path
    #[serde(default = "default_ca_base_url")]
    pub base_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for CaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ca_base_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

pub fn default_ca_base_url() -> String {
    DEFAULT_CA_BASE_URL.to_string()
}

pub fn default_request_timeout() -> u64 {
    30
}

/// Retry settings for transient network failures.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff after the first failed attempt; doubles after each subsequent one
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
        }
    }
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_initial_backoff_ms() -> u64 {
    500
}

/// Background reconciliation schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Seconds between reconciliation passes
    #[serde(default = "default_check_interval")]
    pub check_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: default_check_interval(),
        }
    }
}

pub fn default_check_interval() -> u64 {
    12 * 3600
}

/// One managed EAB credential record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordConfig {
    /// Record name (also the storage file stem)
    pub name: RecordName,

    /// Validity window in days. Echoed verbatim into the record; values
    /// that are absent or `<= 0` mean [`DEFAULT_EXPIRES_AFTER_DAYS`].
    #[serde(default)]
    pub expires_after_days: Option<i64>,

    /// Per-record service-account key override
    #[serde(default)]
    pub credentials_file: Option<PathBuf>,
}

impl RecordConfig {
    pub fn new(name: RecordName) -> Self {
        Self {
            name,
            expires_after_days: None,
            credentials_file: None,
        }
    }

    pub fn with_expires_after_days(mut self, days: i64) -> Self {
        self.expires_after_days = Some(days);
        self
    }
}
