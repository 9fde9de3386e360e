//! Persisted EAB credential state

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::client::{EabKey, MacKey};
use crate::error::EabError;

/// The durable state of one managed EAB credential.
///
/// `name`, `key_id` and `hmac` describe the CA-issued key and are written
/// together through [`EabRecord::apply_issued`], which also stamps
/// `created_at`. `expires_after_days` belongs to the operator and is echoed
/// back unchanged.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EabRecord {
    /// CA resource name of the key
    #[serde(default)]
    pub name: String,
    /// EAB key identifier
    #[serde(default)]
    pub key_id: String,
    /// Decoded MAC key
    #[serde(default)]
    pub hmac: String,
    /// Unix seconds at which the current key was stored
    #[serde(default)]
    pub created_at: i64,
    /// Configured validity window, as supplied by the operator
    #[serde(default)]
    pub expires_after_days: Option<i64>,
}

impl EabRecord {
    /// A record carrying only the operator's configuration
    pub fn unissued(expires_after_days: Option<i64>) -> Self {
        Self {
            expires_after_days,
            ..Self::default()
        }
    }

    /// Whether the record has never been populated by a successful issuance
    pub fn is_unissued(&self) -> bool {
        self.name.is_empty() || self.key_id.is_empty() || self.hmac.is_empty()
    }

    /// Replace the identifying fields with a freshly issued key.
    ///
    /// The MAC key must be valid UTF-8; on error the record is untouched.
    pub fn apply_issued(&mut self, key: EabKey, now: i64) -> Result<(), EabError> {
        let hmac = String::from_utf8(key.mac_key.into_bytes()).map_err(|e| {
            EabError::ResponseDecode(format!("decoded b64MacKey is not valid UTF-8: {}", e))
        })?;

        self.name = key.name;
        self.key_id = key.key_id;
        self.hmac = hmac;
        self.created_at = now;
        Ok(())
    }

    /// Whether `key` carries the same identifying values as this record
    pub fn matches(&self, key: &EabKey) -> bool {
        self.name == key.name
            && self.key_id == key.key_id
            && self.hmac.as_bytes() == key.mac_key.as_bytes()
    }

    /// The stored key, as sent to the CA when rotating
    pub fn current_key(&self) -> EabKey {
        EabKey {
            name: self.name.clone(),
            key_id: self.key_id.clone(),
            mac_key: MacKey::from_bytes(self.hmac.as_bytes()),
        }
    }
}

impl fmt::Debug for EabRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EabRecord")
            .field("name", &self.name)
            .field("key_id", &self.key_id)
            .field("hmac", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_after_days", &self.expires_after_days)
            .finish()
    }
}
