//! Remedy Rollback - backup store and rollback manager
//!
//! Every mutating fix attempt is preceded by a snapshot of the file it
//! touches. This crate provides:
//! - [`BackupStore`] backends (filesystem and in-memory)
//! - [`RollbackManager`] for create / restore / mark-deployed / retention
//! - [`BackupLease`] pins that keep in-flight backups out of eviction
//!
//! Rollback is per source path. A fix that touched several files needs one
//! backup per file.
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_rollback::{RollbackConfig, RollbackManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = RollbackManager::from_config(&RollbackConfig::new()).await?;
//! let lease = manager.create_held_backup("src/handler.rs").await?;
//! // ... mutate src/handler.rs ...
//! if !manager.rollback(lease.id()).await {
//!     eprintln!("restore failed");
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod error;
pub mod hash;
pub mod manager;
pub mod metadata;
pub mod store;

pub use error::RollbackError;
pub use hash::{Checksum, ChecksumError};
pub use manager::{BackupLease, RollbackConfig, RollbackManager, DEFAULT_MAX_BACKUPS};
pub use metadata::{BackupId, BackupMetadata};
pub use store::{BackupStore, FsBackupStore, MemoryBackupStore};
