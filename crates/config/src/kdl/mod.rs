//! KDL configuration parsing.

use anyhow::Result;
use tracing::trace;

use crate::{CaConfig, Config, RetryConfig, ScheduleConfig};

mod helpers;
mod sections;

use sections::{parse_ca_config, parse_record, parse_retry_config, parse_schedule_config};

/// Parse a full configuration document
pub fn parse_config(content: &str) -> Result<Config> {
    let doc: kdl::KdlDocument = content
        .parse()
        .map_err(|e: kdl::KdlError| anyhow::anyhow!("{:?}", miette::Report::new(e)))?;

    let mut ca = CaConfig::default();
    let mut retry = RetryConfig::default();
    let mut schedule = ScheduleConfig::default();
    let mut storage_path = None;
    let mut credentials_file = None;
    let mut records = Vec::new();

    for node in doc.nodes() {
        match node.name().value() {
            "ca" => ca = parse_ca_config(node)?,
            "retry" => retry = parse_retry_config(node)?,
            "schedule" => schedule = parse_schedule_config(node)?,
            "storage" => storage_path = Some(sections::parse_path_arg(node)?),
            "credentials-file" => credentials_file = Some(sections::parse_path_arg(node)?),
            "record" => records.push(parse_record(node)?),
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown configuration block '{}'. Valid blocks: ca, retry, schedule, storage, credentials-file, record",
                    other
                ));
            }
        }
    }

    trace!(record_count = records.len(), "Finished parsing configuration");

    Ok(Config {
        ca,
        retry,
        schedule,
        storage_path: storage_path.unwrap_or_else(crate::default_storage_path),
        credentials_file,
        records,
    })
}
