//! Error types for backup and rollback operations

use crate::metadata::BackupId;
use std::path::PathBuf;

/// Errors raised while creating, storing or pruning backups
///
/// `rollback` never surfaces these; it reports failure as `false`.
#[derive(Debug, thiserror::Error)]
pub enum RollbackError {
    /// The source artifact could not be read before snapshotting
    #[error("cannot read source {path}: {source}")]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The backup store failed to read or write a snapshot or its index
    #[error("backup store io error at {path}: {source}")]
    StoreIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No snapshot is stored under this id
    #[error("backup not found: {0}")]
    NotFound(BackupId),

    /// The persisted index could not be encoded or decoded
    #[error("corrupt backup index: {0}")]
    Index(#[from] serde_json::Error),

    /// Stored content no longer matches the checksum taken at backup time
    #[error("checksum mismatch for backup {0}")]
    ChecksumMismatch(BackupId),
}

impl RollbackError {
    /// Create a store IO error for path
    pub fn store_io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StoreIo {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a backup IO failure (source unreadable or store unwritable)
    #[inline]
    #[must_use]
    pub fn is_io(&self) -> bool {
        matches!(self, Self::SourceRead { .. } | Self::StoreIo { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_classification() {
        let read = RollbackError::SourceRead {
            path: "src/lib.rs".into(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(read.is_io());
        assert!(read.to_string().contains("src/lib.rs"));

        let missing = RollbackError::NotFound(BackupId::new());
        assert!(!missing.is_io());
    }
}
