//! Error types for EAB credential issuance and record storage.

use std::path::PathBuf;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors surfaced by the credential lifecycle.
///
/// Only [`EabError::TransientNetwork`] has been through the retry loop;
/// every other variant aborts the operation on first occurrence.
#[derive(Debug, Error)]
pub enum EabError {
    /// Service-account key material is not the expected JSON document
    #[error("invalid service-account credentials: {0}")]
    CredentialFormat(String),

    /// Service-account key file could not be read
    #[error("failed to read service-account credentials {path:?}: {source}")]
    CredentialsRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A JWT signing configuration cannot be derived from the key material
    #[error("failed to derive JWT signing configuration: {0}")]
    SigningConfig(String),

    /// Transient network failure that persisted through every attempt
    #[error("transient network error after {attempts} attempt(s): {source}")]
    TransientNetwork {
        attempts: u32,
        #[source]
        source: TransportError,
    },

    /// Network failure outside the transient set, not retried
    #[error("network error: {0}")]
    Network(#[source] TransportError),

    /// The CA answered with a non-200 status
    #[error("CA request failed: url: {url}, status: {status}, error: {body}")]
    CaApi {
        url: String,
        status: u16,
        body: String,
    },

    /// The CA's success response could not be decoded
    #[error("failed to decode CA response: {0}")]
    ResponseDecode(String),

    /// Record persistence failed
    #[error("record storage error: {0}")]
    Storage(#[from] StorageError),
}

impl EabError {
    /// Whether the failure was a transient network condition
    pub fn is_transient(&self) -> bool {
        matches!(self, EabError::TransientNetwork { .. })
    }
}

/// Record storage errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
