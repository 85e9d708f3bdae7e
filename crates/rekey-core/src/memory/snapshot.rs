//! JSON snapshots of a memory store

use crate::error::SnapshotError;
use crate::types::{StoredRecord, TableName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

/// Every table of a store, as lists of records
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Records per table
    pub tables: BTreeMap<TableName, Vec<StoredRecord>>,
}

impl Snapshot {
    /// Read a snapshot file
    ///
    /// # Errors
    /// Returns `SnapshotError::Io` or `SnapshotError::Format`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, SnapshotError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| SnapshotError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Write the snapshot atomically (temp file in the same directory, then rename)
    ///
    /// # Errors
    /// Returns `SnapshotError::Io` if any step fails.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), SnapshotError> {
        let path = path.as_ref();
        let io = |source: std::io::Error| SnapshotError::Io {
            path: path.to_path_buf(),
            source,
        };

        let bytes = serde_json::to_vec_pretty(self).map_err(|e| SnapshotError::Format {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(io)?;
        tmp.write_all(&bytes).map_err(io)?;
        tmp.flush().map_err(io)?;
        tmp.as_file().sync_all().map_err(io)?;
        tmp.persist(path).map_err(|e| io(e.error))?;
        Ok(())
    }
}
