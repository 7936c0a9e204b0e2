//! Audit sinks
//!
//! - [`TracingAuditSink`] emits one structured event per result
//! - [`JsonlAuditSink`] appends results to a JSON-lines file where every
//!   record carries the SHA-256 of its predecessor, so edits and deletions
//!   are detectable with [`verify_audit_log`]

use crate::collaborators::AuditSink;
use crate::types::RemediationResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Audit sink that only logs
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn log_remediation(&self, result: &RemediationResult) -> anyhow::Result<()> {
        tracing::info!(
            error_id = %result.error_id,
            success = result.success,
            fix_applied = result.fix_applied.as_deref().unwrap_or("-"),
            tests_run = result.tests_run,
            tests_passed = result.tests_passed,
            deployed = result.deployed,
            rollback_available = result.rollback_available,
            duration_ms = result.duration_ms,
            "remediation finished"
        );
        Ok(())
    }
}

/// One line of the audit file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Position in the chain, from 0
    pub sequence: u64,
    /// When the record was appended
    pub recorded_at: DateTime<Utc>,
    /// The audited result
    pub result: RemediationResult,
    /// Hash of the previous record (zeros for the first)
    pub prev_hash: String,
    /// Hash of this record
    pub hash: String,
}

/// Audit file errors
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// File could not be read or written
    #[error("audit log io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A line is not a valid record
    #[error("malformed audit record: {0}")]
    Json(#[from] serde_json::Error),

    /// The hash chain does not hold at this (1-based) line
    #[error("audit chain broken at line {line}")]
    IntegrityViolation { line: usize },
}

#[derive(Debug, Default)]
struct ChainHead {
    next_sequence: u64,
    last_hash: [u8; 32],
}

/// Append-only, hash-chained JSON-lines audit file
#[derive(Debug)]
pub struct JsonlAuditSink {
    path: PathBuf,
    head: Mutex<ChainHead>,
}

impl JsonlAuditSink {
    /// Open (or start) the audit file at `path`, continuing its chain
    ///
    /// # Errors
    /// Fails if an existing file cannot be read or its last record parsed
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, AuditError> {
        let path = path.into();
        let head = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => match raw.lines().rev().find(|l| !l.trim().is_empty()) {
                Some(last) => {
                    let record: AuditRecord = serde_json::from_str(last)?;
                    ChainHead {
                        next_sequence: record.sequence + 1,
                        last_hash: decode_hash(&record.hash).ok_or(AuditError::IntegrityViolation {
                            line: raw.lines().count(),
                        })?,
                    }
                }
                None => ChainHead::default(),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => ChainHead::default(),
            Err(e) => return Err(AuditError::Io { path, source: e }),
        };

        Ok(Self {
            path,
            head: Mutex::new(head),
        })
    }

    /// File being appended to
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn append(&self, result: &RemediationResult) -> Result<(), AuditError> {
        let mut head = self.head.lock().await;
        let recorded_at = Utc::now();
        let hash = compute_hash(head.next_sequence, &recorded_at, result, &head.last_hash)?;

        let record = AuditRecord {
            sequence: head.next_sequence,
            recorded_at,
            result: result.clone(),
            prev_hash: hex::encode(head.last_hash),
            hash: hex::encode(hash),
        };
        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');

        let io = |source| AuditError::Io {
            path: self.path.clone(),
            source,
        };
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(io)?;
        file.write_all(&line).await.map_err(io)?;
        file.flush().await.map_err(io)?;

        head.next_sequence += 1;
        head.last_hash = hash;
        Ok(())
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn log_remediation(&self, result: &RemediationResult) -> anyhow::Result<()> {
        self.append(result).await?;
        Ok(())
    }
}

/// Check the hash chain of an audit file, returning the record count
///
/// # Errors
/// `AuditError::IntegrityViolation` at the first record that does not chain
pub async fn verify_audit_log(path: impl AsRef<Path>) -> Result<usize, AuditError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| AuditError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

    let mut prev = [0u8; 32];
    let mut count = 0;
    for (idx, line) in raw.lines().enumerate().filter(|(_, l)| !l.trim().is_empty()) {
        let broken = AuditError::IntegrityViolation { line: idx + 1 };
        let record: AuditRecord = serde_json::from_str(line)?;

        if record.sequence != count as u64 || decode_hash(&record.prev_hash) != Some(prev) {
            return Err(broken);
        }
        let expected = compute_hash(record.sequence, &record.recorded_at, &record.result, &prev)?;
        if decode_hash(&record.hash) != Some(expected) {
            return Err(broken);
        }

        prev = expected;
        count += 1;
    }
    Ok(count)
}

fn compute_hash(
    sequence: u64,
    recorded_at: &DateTime<Utc>,
    result: &RemediationResult,
    prev_hash: &[u8; 32],
) -> Result<[u8; 32], serde_json::Error> {
    let mut hasher = Sha256::new();
    hasher.update(sequence.to_le_bytes());
    hasher.update(recorded_at.to_rfc3339().as_bytes());
    hasher.update([0]);
    hasher.update(serde_json::to_vec(result)?);
    hasher.update([0]);
    hasher.update(prev_hash);
    Ok(hasher.finalize().into())
}

fn decode_hash(raw: &str) -> Option<[u8; 32]> {
    hex::decode(raw).ok()?.try_into().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemediationFailure;
    use crate::types::{LogLine, RemediationOutcome};

    fn result(id: &str) -> RemediationResult {
        RemediationResult {
            error_id: id.into(),
            success: false,
            fix_applied: None,
            tests_run: 0,
            tests_passed: 0,
            deployed: false,
            duration_ms: 3,
            rollback_available: false,
            outcome: RemediationOutcome::Failed {
                reason: RemediationFailure::NoPatternFound,
            },
            logs: vec![LogLine::now("no fix pattern matched")],
        }
    }

    #[tokio::test]
    async fn chain_verifies_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonlAuditSink::open(&path).await.unwrap();
        sink.log_remediation(&result("a")).await.unwrap();
        sink.log_remediation(&result("b")).await.unwrap();
        drop(sink);

        let sink = JsonlAuditSink::open(&path).await.unwrap();
        sink.log_remediation(&result("c")).await.unwrap();

        assert_eq!(verify_audit_log(&path).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn tampering_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonlAuditSink::open(&path).await.unwrap();
        sink.log_remediation(&result("a")).await.unwrap();
        sink.log_remediation(&result("b")).await.unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        std::fs::write(&path, raw.replacen("\"error_id\":\"a\"", "\"error_id\":\"z\"", 1)).unwrap();

        assert!(matches!(
            verify_audit_log(&path).await,
            Err(AuditError::IntegrityViolation { line: 1 })
        ));
    }

    #[tokio::test]
    async fn deleted_record_breaks_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");

        let sink = JsonlAuditSink::open(&path).await.unwrap();
        for id in ["a", "b", "c"] {
            sink.log_remediation(&result(id)).await.unwrap();
        }

        let raw = std::fs::read_to_string(&path).unwrap();
        let kept: Vec<&str> = raw.lines().enumerate().filter(|(i, _)| *i != 1).map(|(_, l)| l).collect();
        std::fs::write(&path, kept.join("\n")).unwrap();

        assert!(matches!(
            verify_audit_log(&path).await,
            Err(AuditError::IntegrityViolation { line: 2 })
        ));
    }

    #[tokio::test]
    async fn tracing_sink_never_fails() {
        assert!(TracingAuditSink.log_remediation(&result("a")).await.is_ok());
    }
}
