//! Backup identifiers and metadata

use crate::hash::Checksum;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use ulid::Ulid;

/// Unique backup identifier (ULID, so concurrent creators never collide)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BackupId(pub Ulid);

impl BackupId {
    /// Generate a fresh backup id
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for BackupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for BackupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for BackupId {
    type Err = ulid::DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s).map(Self)
    }
}

/// Record of one snapshot of one source artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupMetadata {
    /// Backup identifier
    pub id: BackupId,
    /// Path of the artifact this backup snapshots
    pub source: PathBuf,
    /// Where the store keeps the snapshot content
    pub backup_path: PathBuf,
    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
    /// Set once the associated fix is confirmed live
    pub deployed: bool,
    /// Insertion order, tie-break for equal timestamps
    pub sequence: u64,
    /// Snapshot size in bytes
    pub size: u64,
    /// Digest of the snapshot content
    pub checksum: Checksum,
}

impl BackupMetadata {
    /// Retention ordering key, oldest first
    #[inline]
    #[must_use]
    pub fn age_key(&self) -> (DateTime<Utc>, u64) {
        (self.timestamp, self.sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backup_id_round_trips_through_string() {
        let id = BackupId::new();
        let parsed: BackupId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn backup_ids_are_distinct() {
        let ids: std::collections::HashSet<_> = (0..1000).map(|_| BackupId::new()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn age_key_breaks_ties_by_sequence() {
        let now = Utc::now();
        let make = |sequence| BackupMetadata {
            id: BackupId::new(),
            source: "a.rs".into(),
            backup_path: "a.bak".into(),
            timestamp: now,
            deployed: false,
            sequence,
            size: 0,
            checksum: Checksum::compute(b""),
        };
        assert!(make(1).age_key() < make(2).age_key());
    }
}
