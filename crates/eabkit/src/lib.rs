//! eabkit
//!
//! Issues and rotates ACME External Account Binding (EAB) credentials from
//! Google Public CA.
//!
//! - **Signing**: service-account keys become bearer-authenticated clients
//! - **Issuance**: the `externalAccountKeys.create` call with bounded retry
//! - **Lifecycle**: create, refresh, scheduled rotation and local removal
//! - **Storage**: file-backed records with atomic writes
//! - **Scheduling**: periodic reconciliation of every configured record
//!
//! # Example
//!
//! ```ignore
//! use eabkit::{EabClient, LifecycleOrchestrator, PublicCaIssuer, RetryPolicy};
//! use std::time::Duration;
//!
//! let client = EabClient::new("https://publicca.googleapis.com", RetryPolicy::default());
//! let orchestrator = LifecycleOrchestrator::new(PublicCaIssuer::new(client, Duration::from_secs(30)));
//!
//! let key_material = std::fs::read("service-account.json")?;
//! let record = orchestrator.create(&key_material, &record_config).await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod client;
pub mod error;
pub mod lifecycle;
pub mod policy;
pub mod record;
pub mod scheduler;
pub mod signer;
pub mod storage;
pub mod transport;

// ============================================================================
// Public API Re-exports
// ============================================================================

pub use client::{EabClient, EabKey, MacKey, RetryPolicy};
pub use error::{EabError, StorageError};
pub use lifecycle::{
    AppliedAction, ApplyOutcome, Clock, DeleteOutcome, EabIssuer, LifecycleOrchestrator,
    PlannedAction, PublicCaIssuer, SystemClock,
};
pub use policy::{age_days, is_expired, resolve_validity_days};
pub use record::EabRecord;
pub use scheduler::{read_key_material, ReconcileReport, ReconcileScheduler, Reconciler};
pub use signer::{CredentialSigner, ServiceAccountKey, SignedClient, CLOUD_PLATFORM_SCOPE};
pub use storage::RecordStore;
pub use transport::{CaTransport, HttpReply, TransportError, TransportErrorKind};
