//! Record storage for managed EAB credentials
//!
//! # Directory Structure
//!
//! ```text
//! storage/
//! └── records/
//!     ├── default.json      # EabRecord for record "default"
//!     └── staging.json
//! ```
//!
//! Records hold MAC keys, so both the directories and the files are
//! created with owner-only permissions on Unix. Writes go to a temporary
//! sibling first and are renamed into place.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace, warn};

use eabkit_common::RecordName;

use crate::error::StorageError;
use crate::record::EabRecord;

/// File-backed store of [`EabRecord`]s keyed by record name.
#[derive(Debug)]
pub struct RecordStore {
    /// Base storage directory
    base_path: PathBuf,
}

impl RecordStore {
    /// Open (creating if needed) a record store at the given path
    ///
    /// # Errors
    ///
    /// Returns an error if the directories cannot be created or
    /// permissions cannot be set.
    pub fn new(base_path: &Path) -> Result<Self, StorageError> {
        let records_path = base_path.join("records");
        fs::create_dir_all(&records_path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o700);
            fs::set_permissions(base_path, perms.clone())?;
            fs::set_permissions(&records_path, perms)?;
        }

        debug!(
            storage_path = %base_path.display(),
            "Opened EAB record storage"
        );

        Ok(Self {
            base_path: base_path.to_path_buf(),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn record_path(&self, name: &RecordName) -> PathBuf {
        self.base_path
            .join("records")
            .join(format!("{}.json", name.as_str()))
    }

    /// Load a stored record
    pub fn load(&self, name: &RecordName) -> Result<Option<EabRecord>, StorageError> {
        let path = self.record_path(name);

        if !path.exists() {
            trace!(record = %name, "No stored EAB record found");
            return Ok(None);
        }

        let content = fs::read_to_string(&path)?;
        let record: EabRecord = serde_json::from_str(&content)?;

        debug!(
            record = %name,
            key_id = %record.key_id,
            created_at = record.created_at,
            "Loaded EAB record"
        );
        Ok(Some(record))
    }

    /// Save a record, replacing any previous version atomically
    pub fn save(&self, name: &RecordName, record: &EabRecord) -> Result<(), StorageError> {
        let path = self.record_path(name);
        let tmp_path = path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(record)?;

        fs::write(&tmp_path, content)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp_path, fs::Permissions::from_mode(0o600))?;
        }

        if let Err(e) = fs::rename(&tmp_path, &path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        info!(record = %name, key_id = %record.key_id, "Saved EAB record");
        Ok(())
    }

    /// Delete a stored record, returning whether one existed
    pub fn delete(&self, name: &RecordName) -> Result<bool, StorageError> {
        let path = self.record_path(name);

        if path.exists() {
            fs::remove_file(&path)?;
            info!(record = %name, "Deleted stored EAB record");
            Ok(true)
        } else {
            warn!(record = %name, "EAB record to delete not found");
            Ok(false)
        }
    }
}
