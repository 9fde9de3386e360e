//! Rotation-due decision for issued EAB credentials.

use eabkit_config::DEFAULT_EXPIRES_AFTER_DAYS;

const SECONDS_PER_DAY: i64 = 86_400;

/// Whole days elapsed between `created_at` and `now` (unix seconds), truncated
pub fn age_days(created_at: i64, now: i64) -> i64 {
    now.saturating_sub(created_at) / SECONDS_PER_DAY
}

/// Whether a credential created at `created_at` has outlived `validity_days`.
///
/// The window is used exactly as given. Callers resolve configured values
/// through [`resolve_validity_days`] first.
pub fn is_expired(created_at: i64, validity_days: i64, now: i64) -> bool {
    age_days(created_at, now) >= validity_days
}

/// Effective validity window for a configured value
pub fn resolve_validity_days(configured: Option<i64>) -> i64 {
    match configured {
        Some(days) if days > 0 => days,
        _ => DEFAULT_EXPIRES_AFTER_DAYS,
    }
}
