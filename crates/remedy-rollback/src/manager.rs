//! Rollback manager
//!
//! Owns the backup lifecycle on top of a [`BackupStore`]:
//! - Snapshot a source before it is mutated
//! - Restore a source from a snapshot
//! - Mark snapshots whose fix went live
//! - Evict the oldest snapshots once retention is exceeded
//!
//! Backups created through [`RollbackManager::create_held_backup`] are pinned
//! until their [`BackupLease`] is dropped and are never evicted while pinned.

use crate::error::RollbackError;
use crate::hash::Checksum;
use crate::metadata::{BackupId, BackupMetadata};
use crate::store::{BackupStore, FsBackupStore};
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Default number of backups kept by retention
pub const DEFAULT_MAX_BACKUPS: usize = 100;

/// Backup storage and retention settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackConfig {
    /// Directory of the filesystem store
    pub backup_dir: PathBuf,
    /// Retention limit
    pub max_backups: usize,
}

impl RollbackConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With backup directory
    #[inline]
    #[must_use]
    pub fn with_backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = dir.into();
        self
    }

    /// With retention limit
    #[inline]
    #[must_use]
    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.max_backups = max;
        self
    }
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(".remedy/backups"),
            max_backups: DEFAULT_MAX_BACKUPS,
        }
    }
}

/// Pin on a backup; eviction skips it until this is dropped
#[derive(Debug)]
#[must_use = "dropping the lease makes the backup evictable"]
pub struct BackupLease {
    id: BackupId,
    held: Arc<DashMap<BackupId, usize>>,
}

impl BackupLease {
    fn acquire(id: BackupId, held: Arc<DashMap<BackupId, usize>>) -> Self {
        *held.entry(id).or_insert(0) += 1;
        Self { id, held }
    }

    /// The pinned backup
    #[inline]
    #[must_use]
    pub fn id(&self) -> BackupId {
        self.id
    }
}

impl Drop for BackupLease {
    fn drop(&mut self) {
        self.held.remove_if_mut(&self.id, |_, count| {
            *count -= 1;
            *count == 0
        });
    }
}

#[derive(Debug, Default)]
struct Index {
    entries: Vec<BackupMetadata>,
    next_sequence: u64,
}

/// Creates, restores and prunes backups
#[derive(Debug)]
pub struct RollbackManager {
    store: Arc<dyn BackupStore>,
    max_backups: usize,
    index: Mutex<Index>,
    held: Arc<DashMap<BackupId, usize>>,
}

impl RollbackManager {
    /// Open a manager over `store`, reloading any persisted index
    ///
    /// # Errors
    /// Fails if the persisted index cannot be read or decoded
    pub async fn open(
        store: Arc<dyn BackupStore>,
        max_backups: usize,
    ) -> Result<Self, RollbackError> {
        let mut entries = store.load_index().await?;
        entries.sort_by_key(|e| e.sequence);
        let next_sequence = entries.last().map_or(0, |e| e.sequence + 1);

        tracing::debug!(backups = entries.len(), "backup index loaded");

        Ok(Self {
            store,
            max_backups,
            index: Mutex::new(Index {
                entries,
                next_sequence,
            }),
            held: Arc::new(DashMap::new()),
        })
    }

    /// Open the filesystem store described by `config`
    ///
    /// # Errors
    /// Fails if the persisted index cannot be read or decoded
    pub async fn from_config(config: &RollbackConfig) -> Result<Self, RollbackError> {
        let store = Arc::new(FsBackupStore::new(&config.backup_dir));
        Self::open(store, config.max_backups).await
    }

    /// Snapshot `source` under a fresh id
    ///
    /// # Errors
    /// - `RollbackError::SourceRead` if `source` cannot be read
    /// - `RollbackError::StoreIo` / `Index` if the snapshot cannot be persisted
    ///
    /// Callers must not mutate `source` when this fails.
    pub async fn create_backup(&self, source: impl AsRef<Path>) -> Result<BackupId, RollbackError> {
        self.snapshot(source.as_ref(), None).await
    }

    /// Snapshot `source` and pin it against eviction until the lease drops
    ///
    /// # Errors
    /// Same as [`create_backup`](Self::create_backup)
    pub async fn create_held_backup(
        &self,
        source: impl AsRef<Path>,
    ) -> Result<BackupLease, RollbackError> {
        let id = BackupId::new();
        // Pin before the entry becomes visible to eviction
        let lease = BackupLease::acquire(id, Arc::clone(&self.held));
        self.snapshot(source.as_ref(), Some(id)).await?;
        Ok(lease)
    }

    async fn snapshot(
        &self,
        source: &Path,
        id: Option<BackupId>,
    ) -> Result<BackupId, RollbackError> {
        let content = tokio::fs::read(source)
            .await
            .map_err(|e| RollbackError::SourceRead {
                path: source.to_path_buf(),
                source: e,
            })?;

        let id = id.unwrap_or_default();
        let checksum = Checksum::compute(&content);
        let backup_path = self.store.write_snapshot(id, &content).await?;

        {
            let mut index = self.index.lock().await;
            let sequence = index.next_sequence;
            index.next_sequence += 1;
            index.entries.push(BackupMetadata {
                id,
                source: source.to_path_buf(),
                backup_path,
                timestamp: Utc::now(),
                deployed: false,
                sequence,
                size: content.len() as u64,
                checksum,
            });

            let saved = self.store.save_index(&index.entries).await;
            if let Err(e) = saved {
                index.entries.pop();
                drop(index);
                if let Err(cleanup) = self.store.delete_snapshot(id).await {
                    tracing::warn!(backup_id = %id, error = %cleanup, "orphaned snapshot after index failure");
                }
                return Err(e);
            }
        }

        tracing::info!(
            backup_id = %id,
            source = %source.display(),
            checksum = %checksum.short(),
            "backup created"
        );

        if let Err(e) = self.clean_old_backups().await {
            tracing::warn!(error = %e, "retention pass failed");
        }

        Ok(id)
    }

    /// Restore the source recorded for `id` from its snapshot
    ///
    /// Returns `false` when the backup is unknown, unreadable, fails its
    /// checksum, or the source cannot be written. Never errors.
    pub async fn rollback(&self, id: BackupId) -> bool {
        let Some(meta) = self.get(id).await else {
            tracing::warn!(backup_id = %id, "rollback requested for unknown backup");
            return false;
        };

        let content = match self.store.read_snapshot(id).await {
            Ok(content) => content,
            Err(e) => {
                tracing::error!(backup_id = %id, error = %e, "cannot read snapshot");
                return false;
            }
        };

        if !meta.checksum.matches(&content) {
            tracing::error!(backup_id = %id, error = %RollbackError::ChecksumMismatch(id), "refusing to restore");
            return false;
        }

        match tokio::fs::write(&meta.source, &content).await {
            Ok(()) => {
                tracing::info!(backup_id = %id, source = %meta.source.display(), "source restored");
                true
            }
            Err(e) => {
                tracing::error!(backup_id = %id, source = %meta.source.display(), error = %e, "restore write failed");
                false
            }
        }
    }

    /// Flag the backup as belonging to a live fix (idempotent, unknown ids ignored)
    pub async fn mark_as_deployed(&self, id: BackupId) {
        let mut index = self.index.lock().await;
        let Some(entry) = index.entries.iter_mut().find(|e| e.id == id) else {
            tracing::debug!(backup_id = %id, "mark_as_deployed on unknown backup");
            return;
        };
        if entry.deployed {
            return;
        }
        entry.deployed = true;

        if let Err(e) = self.store.save_index(&index.entries).await {
            tracing::warn!(backup_id = %id, error = %e, "deployed flag not persisted");
        }
    }

    /// Metadata for one backup
    pub async fn get(&self, id: BackupId) -> Option<BackupMetadata> {
        self.index
            .lock()
            .await
            .entries
            .iter()
            .find(|e| e.id == id)
            .cloned()
    }

    /// All tracked backups in creation order
    pub async fn list_backups(&self) -> Vec<BackupMetadata> {
        self.index.lock().await.entries.clone()
    }

    /// Evict oldest backups until at most `max_backups` remain
    ///
    /// Held backups are skipped, so the count can stay above the limit until
    /// their leases drop. Returns the evicted ids, oldest first.
    ///
    /// # Errors
    /// Fails if the pruned index cannot be persisted
    pub async fn clean_old_backups(&self) -> Result<Vec<BackupId>, RollbackError> {
        let mut index = self.index.lock().await;
        let excess = index.entries.len().saturating_sub(self.max_backups);
        if excess == 0 {
            return Ok(Vec::new());
        }

        let mut by_age: Vec<&BackupMetadata> = index.entries.iter().collect();
        by_age.sort_by_key(|e| e.age_key());
        let victims: Vec<BackupId> = by_age
            .into_iter()
            .filter(|e| !self.held.contains_key(&e.id))
            .take(excess)
            .map(|e| e.id)
            .collect();

        let mut evicted = Vec::with_capacity(victims.len());
        for id in victims {
            match self.store.delete_snapshot(id).await {
                Ok(()) => evicted.push(id),
                Err(e) => tracing::warn!(backup_id = %id, error = %e, "snapshot not deleted, keeping entry"),
            }
        }

        index.entries.retain(|e| !evicted.contains(&e.id));
        self.store.save_index(&index.entries).await?;

        tracing::debug!(evicted = evicted.len(), remaining = index.entries.len(), "retention pass");
        Ok(evicted)
    }

    /// Number of backups currently pinned by leases
    #[inline]
    #[must_use]
    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    /// Retention limit
    #[inline]
    #[must_use]
    pub fn max_backups(&self) -> usize {
        self.max_backups
    }
}
