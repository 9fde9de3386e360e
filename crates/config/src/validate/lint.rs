//! Configuration linting
//!
//! Flags settings that are legal but likely unintended.

use super::{ValidationResult, ValidationWarning};
use crate::{Config, DEFAULT_EXPIRES_AFTER_DAYS};

/// Lint configuration for likely mistakes
pub fn lint_config(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    for record in &config.records {
        match record.expires_after_days {
            None => {}
            Some(days) if days <= 0 => {
                result.add_warning(ValidationWarning::new(format!(
                    "Record '{}' sets expires-after-days {} which falls back to {} days",
                    record.name, days, DEFAULT_EXPIRES_AFTER_DAYS
                )));
            }
            Some(days) => {
                let window_secs = u64::try_from(days).unwrap_or(u64::MAX).saturating_mul(86_400);
                if config.schedule.check_interval_secs > window_secs {
                    result.add_warning(ValidationWarning::new(format!(
                        "Record '{}' rotates every {} day(s) but the schedule only checks every {}s",
                        record.name, days, config.schedule.check_interval_secs
                    )));
                }
            }
        }
    }

    if config.ca.base_url.starts_with("http://") {
        result.add_warning(ValidationWarning::new(format!(
            "CA base-url '{}' is not HTTPS; bearer tokens and MAC keys travel in clear text",
            config.ca.base_url
        )));
    }

    if config.retry.max_attempts > 10 {
        result.add_warning(ValidationWarning::new(format!(
            "retry max-attempts {} makes each operation block for a long time on outages",
            config.retry.max_attempts
        )));
    }

    result
}
