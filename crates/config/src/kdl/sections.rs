//! Section-level KDL parsing.

use anyhow::Result;
use std::path::PathBuf;
use tracing::trace;

use eabkit_common::RecordName;

use crate::{
    default_ca_base_url, default_check_interval, default_initial_backoff_ms,
    default_max_attempts, default_request_timeout, CaConfig, RecordConfig, RetryConfig,
    ScheduleConfig,
};

use super::helpers::{get_first_arg_string, get_int_entry, get_string_entry};

/// Read a non-negative integer entry, rejecting negative values
fn get_unsigned_entry(node: &kdl::KdlNode, name: &str) -> Result<Option<u64>> {
    match get_int_entry(node, name)? {
        Some(v) => u64::try_from(v).map(Some).map_err(|_| {
            anyhow::anyhow!(
                "'{}' in '{}' block must not be negative, got {}",
                name,
                node.name().value(),
                v
            )
        }),
        None => Ok(None),
    }
}

/// Parse the `ca { ... }` block
pub fn parse_ca_config(node: &kdl::KdlNode) -> Result<CaConfig> {
    trace!("Parsing CA configuration block");

    let config = CaConfig {
        base_url: get_string_entry(node, "base-url").unwrap_or_else(default_ca_base_url),
        request_timeout_secs: get_unsigned_entry(node, "request-timeout-secs")?
            .unwrap_or_else(default_request_timeout),
    };

    trace!(
        base_url = %config.base_url,
        request_timeout_secs = config.request_timeout_secs,
        "Parsed CA configuration"
    );

    Ok(config)
}

/// Parse the `retry { ... }` block
pub fn parse_retry_config(node: &kdl::KdlNode) -> Result<RetryConfig> {
    trace!("Parsing retry configuration block");

    let max_attempts = match get_unsigned_entry(node, "max-attempts")? {
        Some(v) => u32::try_from(v)
            .map_err(|_| anyhow::anyhow!("'max-attempts' is out of range: {}", v))?,
        None => default_max_attempts(),
    };

    let config = RetryConfig {
        max_attempts,
        initial_backoff_ms: get_unsigned_entry(node, "initial-backoff-ms")?
            .unwrap_or_else(default_initial_backoff_ms),
    };

    trace!(
        max_attempts = config.max_attempts,
        initial_backoff_ms = config.initial_backoff_ms,
        "Parsed retry configuration"
    );

    Ok(config)
}

/// Parse the `schedule { ... }` block
pub fn parse_schedule_config(node: &kdl::KdlNode) -> Result<ScheduleConfig> {
    trace!("Parsing schedule configuration block");

    Ok(ScheduleConfig {
        check_interval_secs: get_unsigned_entry(node, "check-interval-secs")?
            .unwrap_or_else(default_check_interval),
    })
}

/// Parse a top-level node of the form `name "value"`
pub fn parse_path_arg(node: &kdl::KdlNode) -> Result<PathBuf> {
    get_first_arg_string(node).map(PathBuf::from).ok_or_else(|| {
        anyhow::anyhow!(
            "'{}' requires a path argument, e.g., {} \"/var/lib/eabkit\"",
            node.name().value(),
            node.name().value()
        )
    })
}

/// Parse a `record "name" { ... }` block
pub fn parse_record(node: &kdl::KdlNode) -> Result<RecordConfig> {
    let raw_name = get_first_arg_string(node).ok_or_else(|| {
        anyhow::anyhow!("Record requires a name argument, e.g., record \"default\" {{ ... }}")
    })?;

    let name = RecordName::new(raw_name.clone())
        .map_err(|e| anyhow::anyhow!("Invalid record name '{}': {}", raw_name, e))?;

    trace!(record = %name, "Parsing record");

    let record = RecordConfig {
        name,
        expires_after_days: get_int_entry(node, "expires-after-days")?,
        credentials_file: get_string_entry(node, "credentials-file").map(PathBuf::from),
    };

    trace!(
        record = %record.name,
        expires_after_days = ?record.expires_after_days,
        has_credentials_override = record.credentials_file.is_some(),
        "Parsed record"
    );

    Ok(record)
}
