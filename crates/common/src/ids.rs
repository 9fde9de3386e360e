//! Type-safe identifier newtypes for eabkit.
//!
//! These types keep record names and CA project identifiers from being
//! mixed up with each other or with arbitrary strings (e.g. passing a
//! key id where a record name is expected).

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum length of a record name.
pub const MAX_RECORD_NAME_LEN: usize = 64;

/// Errors raised when constructing a validated identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdError {
    #[error("identifier must not be empty")]
    Empty,

    #[error("record name '{name}' exceeds {max} characters")]
    TooLong { name: String, max: usize },

    #[error("record name '{name}' contains invalid character '{ch}' (allowed: a-z, A-Z, 0-9, '-', '_')")]
    InvalidChar { name: String, ch: char },
}

/// Managed record identifier.
///
/// Names a single EAB credential record. The name doubles as the file
/// stem in the record store, so it is restricted to `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordName(String);

impl RecordName {
    /// Create a validated record name
    pub fn new(name: impl Into<String>) -> Result<Self, IdError> {
        let name = name.into();
        if name.is_empty() {
            return Err(IdError::Empty);
        }
        if name.len() > MAX_RECORD_NAME_LEN {
            return Err(IdError::TooLong {
                name,
                max: MAX_RECORD_NAME_LEN,
            });
        }
        if let Some(ch) = name
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(IdError::InvalidChar { name, ch });
        }
        Ok(Self(name))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RecordName {
    type Error = IdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::new(s)
    }
}

impl From<RecordName> for String {
    fn from(name: RecordName) -> Self {
        name.0
    }
}

/// Cloud project identifier.
///
/// Taken from the `project_id` field of a service-account key and used as
/// the only variable segment of the CA endpoint path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Result<Self, IdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(IdError::Empty);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
