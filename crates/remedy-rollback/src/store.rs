//! Backup storage backends
//!
//! A [`BackupStore`] keeps snapshot content addressed by [`BackupId`] plus the
//! metadata index describing every snapshot. It knows nothing about sources
//! or retention; the [`RollbackManager`](crate::RollbackManager) owns that.

use crate::error::RollbackError;
use crate::metadata::{BackupId, BackupMetadata};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Snapshot storage addressed by backup id
#[async_trait]
pub trait BackupStore: Send + Sync + Debug {
    /// Persist snapshot content, returning where it was stored
    async fn write_snapshot(&self, id: BackupId, content: &[u8]) -> Result<PathBuf, RollbackError>;

    /// Load snapshot content
    async fn read_snapshot(&self, id: BackupId) -> Result<Vec<u8>, RollbackError>;

    /// Remove snapshot content; missing content is not an error
    async fn delete_snapshot(&self, id: BackupId) -> Result<(), RollbackError>;

    /// Load the persisted metadata index (empty when none exists yet)
    async fn load_index(&self) -> Result<Vec<BackupMetadata>, RollbackError>;

    /// Replace the persisted metadata index
    async fn save_index(&self, entries: &[BackupMetadata]) -> Result<(), RollbackError>;
}

/// Durable store: one file per snapshot plus a JSON index, under one directory
#[derive(Debug, Clone)]
pub struct FsBackupStore {
    root: PathBuf,
}

impl FsBackupStore {
    const INDEX_FILE: &'static str = "index.json";

    /// Store rooted at `root` (created lazily on first write)
    #[inline]
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory holding snapshots and index
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn snapshot_path(&self, id: BackupId) -> PathBuf {
        self.root.join(format!("{id}.bak"))
    }

    fn index_path(&self) -> PathBuf {
        self.root.join(Self::INDEX_FILE)
    }

    /// Write via temp file + rename so readers never see a torn file
    async fn write_atomic(&self, path: &Path, content: &[u8]) -> Result<(), RollbackError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| RollbackError::store_io(&self.root, e))?;

        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| RollbackError::store_io(&tmp, e))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| RollbackError::store_io(path, e))
    }
}

#[async_trait]
impl BackupStore for FsBackupStore {
    async fn write_snapshot(&self, id: BackupId, content: &[u8]) -> Result<PathBuf, RollbackError> {
        let path = self.snapshot_path(id);
        self.write_atomic(&path, content).await?;
        Ok(path)
    }

    async fn read_snapshot(&self, id: BackupId) -> Result<Vec<u8>, RollbackError> {
        let path = self.snapshot_path(id);
        match tokio::fs::read(&path).await {
            Ok(content) => Ok(content),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RollbackError::NotFound(id)),
            Err(e) => Err(RollbackError::store_io(path, e)),
        }
    }

    async fn delete_snapshot(&self, id: BackupId) -> Result<(), RollbackError> {
        let path = self.snapshot_path(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RollbackError::store_io(path, e)),
        }
    }

    async fn load_index(&self) -> Result<Vec<BackupMetadata>, RollbackError> {
        let path = self.index_path();
        match tokio::fs::read(&path).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(RollbackError::store_io(path, e)),
        }
    }

    async fn save_index(&self, entries: &[BackupMetadata]) -> Result<(), RollbackError> {
        let raw = serde_json::to_vec_pretty(entries)?;
        self.write_atomic(&self.index_path(), &raw).await
    }
}

/// Volatile store for tests and dry environments
///
/// Writes can be made to fail on demand to exercise backup IO failure paths.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    snapshots: Mutex<HashMap<BackupId, Vec<u8>>>,
    index: Mutex<Vec<BackupMetadata>>,
    fail_writes: AtomicBool,
}

impl MemoryBackupStore {
    /// Empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make subsequent snapshot writes fail (or succeed again)
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of stored snapshots
    #[must_use]
    pub fn snapshot_count(&self) -> usize {
        self.snapshots.lock().len()
    }

    /// Overwrite stored content without updating metadata
    pub fn corrupt(&self, id: BackupId, content: &[u8]) {
        self.snapshots.lock().insert(id, content.to_vec());
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn write_snapshot(&self, id: BackupId, content: &[u8]) -> Result<PathBuf, RollbackError> {
        let path = PathBuf::from(format!("memory/{id}.bak"));
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RollbackError::store_io(
                path,
                std::io::Error::new(ErrorKind::Other, "injected write failure"),
            ));
        }
        self.snapshots.lock().insert(id, content.to_vec());
        Ok(path)
    }

    async fn read_snapshot(&self, id: BackupId) -> Result<Vec<u8>, RollbackError> {
        self.snapshots
            .lock()
            .get(&id)
            .cloned()
            .ok_or(RollbackError::NotFound(id))
    }

    async fn delete_snapshot(&self, id: BackupId) -> Result<(), RollbackError> {
        self.snapshots.lock().remove(&id);
        Ok(())
    }

    async fn load_index(&self) -> Result<Vec<BackupMetadata>, RollbackError> {
        Ok(self.index.lock().clone())
    }

    async fn save_index(&self, entries: &[BackupMetadata]) -> Result<(), RollbackError> {
        *self.index.lock() = entries.to_vec();
        Ok(())
    }
}
