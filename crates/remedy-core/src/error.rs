//! Error types for remediation
//!
//! Provides:
//! - The remediation failure taxonomy (per-candidate and terminal kinds)
//! - Orchestrator control errors
//! - Configuration loading errors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Why a candidate or a whole remediation failed
///
/// Per-candidate kinds only ever appear in the log trail; the loop moves on
/// to the next candidate. Terminal kinds end the remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemediationFailure {
    /// The pattern matcher returned no candidates
    #[error("no fix pattern matched")]
    NoPatternFound,

    /// Source could not be snapshotted, so the candidate was skipped unapplied
    #[error("backup failed before applying {candidate}: {message}")]
    BackupFailure { candidate: String, message: String },

    /// The fixer raised an error
    #[error("fix {candidate} could not be applied: {message}")]
    FixApplicationFailure { candidate: String, message: String },

    /// Tests failed or could not run
    #[error("tests failed after {candidate}: {message}")]
    TestFailure { candidate: String, message: String },

    /// Deployment raised or was declined
    #[error("deployment of {candidate} failed: {message}")]
    DeploymentFailure { candidate: String, message: String },

    /// The approval gate refused deployment
    #[error("deployment approval denied: {reason}")]
    ApprovalDenied { reason: String },

    /// Every attempted candidate failed
    #[error("all {attempted} candidate(s) exhausted")]
    AllCandidatesExhausted { attempted: usize },

    /// Candidates exist but automatic fixing is switched off
    #[error("automatic fixing is disabled")]
    AutoFixDisabled,

    /// Another remediation for the same error id was already running
    #[error("remediation already in flight for this error")]
    DuplicateInFlight,

    /// Unexpected failure inside the workflow
    #[error("critical error: {message}")]
    CriticalError { message: String },
}

impl RemediationFailure {
    /// Whether this failure ends the remediation
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            Self::BackupFailure { .. }
                | Self::FixApplicationFailure { .. }
                | Self::TestFailure { .. }
                | Self::DeploymentFailure { .. }
        )
    }

    /// Create critical error
    #[inline]
    pub fn critical(message: impl Into<String>) -> Self {
        Self::CriticalError {
            message: message.into(),
        }
    }
}

/// Errors from the orchestrator's control surface
#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    /// `start` called while already consuming errors
    #[error("orchestrator is already running")]
    AlreadyRunning,

    /// The intake task ended abnormally
    #[error("intake task failed: {0}")]
    Intake(String),
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File is not valid TOML for the schema
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range
    #[error("invalid config value for {field}: {message}")]
    Invalid { field: &'static str, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_candidate_failures_are_not_terminal() {
        let fix = RemediationFailure::FixApplicationFailure {
            candidate: "null-check".into(),
            message: "boom".into(),
        };
        assert!(!fix.is_terminal());
        assert!(RemediationFailure::NoPatternFound.is_terminal());
        assert!(RemediationFailure::AllCandidatesExhausted { attempted: 2 }.is_terminal());
        assert!(RemediationFailure::critical("x").is_terminal());
    }

    #[test]
    fn failure_display() {
        let denied = RemediationFailure::ApprovalDenied {
            reason: "severity medium".into(),
        };
        assert!(denied.to_string().contains("approval denied"));
    }

    #[test]
    fn failure_serializes_with_kind_tag() {
        let json = serde_json::to_value(RemediationFailure::AllCandidatesExhausted { attempted: 3 })
            .unwrap();
        assert_eq!(json["kind"], "all_candidates_exhausted");
        assert_eq!(json["attempted"], 3);
    }

    #[test]
    fn duplicate_is_terminal() {
        assert!(RemediationFailure::DuplicateInFlight.is_terminal());
        let json = serde_json::to_value(RemediationFailure::DuplicateInFlight).unwrap();
        assert_eq!(json["kind"], "duplicate_in_flight");
    }

    #[test]
    fn orchestrator_error_display() {
        assert!(OrchestratorError::AlreadyRunning.to_string().contains("already running"));
    }
}
