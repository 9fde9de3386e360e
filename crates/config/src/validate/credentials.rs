//! Service-account key file validation
//!
//! Checks that every record's key file exists, is readable, and is not
//! readable by other users.

use super::{ErrorCategory, ValidationError, ValidationResult, ValidationWarning};
use crate::Config;
use std::collections::HashSet;
use std::path::Path;

/// Validate the service-account key files referenced by the configuration
pub fn validate_credential_files(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    let mut checked = HashSet::new();

    for record in &config.records {
        let Some(path) = config.credentials_file_for(record) else {
            continue;
        };
        if !checked.insert(path.to_path_buf()) {
            continue;
        }

        if !path.exists() {
            result.add_error(ValidationError::new(
                ErrorCategory::Credentials,
                format!("Credentials file not found: {:?}", path),
            ));
            continue;
        }

        match check_key_file(path) {
            Ok(Some(warning)) => result.add_warning(warning),
            Ok(None) => {}
            Err(e) => result.add_error(e),
        }
    }

    result
}

/// Read a key file and check its permissions
fn check_key_file(path: &Path) -> Result<Option<ValidationWarning>, ValidationError> {
    use std::fs;

    let metadata = fs::metadata(path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Credentials,
            format!("Failed to stat credentials file {:?}: {}", path, e),
        )
    })?;

    if !metadata.is_file() {
        return Err(ValidationError::new(
            ErrorCategory::Credentials,
            format!("Credentials path is not a file: {:?}", path),
        ));
    }

    fs::File::open(path).map_err(|e| {
        ValidationError::new(
            ErrorCategory::Credentials,
            format!("Credentials file {:?} is not readable: {}", path, e),
        )
    })?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        if metadata.permissions().mode() & 0o077 != 0 {
            return Ok(Some(ValidationWarning::new(format!(
                "Credentials file {:?} is accessible by group or others (recommend 0600)",
                path
            ))));
        }
    }

    Ok(None)
}
