//! Core types for remediation
//!
//! Defines the values that flow through the orchestrator:
//! - Detected errors and their classification
//! - Fix candidates and applied fixes
//! - Test reports
//! - Remediation results and their log trail

use crate::error::RemediationFailure;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Error classification reported by the error source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Security finding
    Security,
    /// Syntax error
    Syntax,
    /// Runtime failure
    Runtime,
    /// Failing test
    Test,
    /// Dependency problem
    Dependency,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Security => "security",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Runtime => "runtime",
            ErrorCategory::Test => "test",
            ErrorCategory::Dependency => "dependency",
        };
        f.write_str(s)
    }
}

/// How bad a detected error is
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Critical and high severities qualify for automatic deployment approval
    #[inline]
    #[must_use]
    pub fn is_urgent(&self) -> bool {
        matches!(self, Severity::Critical | Severity::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// An error emitted by the error source
///
/// Re-detections of the same issue carry the same `id`, which is what the
/// orchestrator deduplicates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedError {
    /// Stable id of the logical error
    pub id: String,
    /// When it was detected
    pub timestamp: DateTime<Utc>,
    /// Classification
    pub category: ErrorCategory,
    /// Severity
    pub severity: Severity,
    /// Path of the affected artifact
    pub source: PathBuf,
    /// Human-readable message
    pub message: String,
    /// Stack trace, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    /// Free-form detector context
    #[serde(default)]
    pub context: BTreeMap<String, String>,
}

impl DetectedError {
    /// Create a new detected error stamped with the current time
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        category: ErrorCategory,
        severity: Severity,
        source: impl Into<PathBuf>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            timestamp: Utc::now(),
            category,
            severity,
            source: source.into(),
            message: message.into(),
            stack_trace: None,
            context: BTreeMap::new(),
        }
    }

    /// With stack trace
    #[inline]
    #[must_use]
    pub fn with_stack_trace(mut self, trace: impl Into<String>) -> Self {
        self.stack_trace = Some(trace.into());
        self
    }

    /// With a context entry
    #[inline]
    #[must_use]
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// One ranked remedy proposed by the pattern matcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixCandidate {
    /// Pattern name, reported as `fix_applied`
    pub name: String,
    /// Matcher confidence (0.0 - 1.0)
    pub confidence: f64,
    /// Matcher-specific details passed through to the fixer
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl FixCandidate {
    /// Create new candidate
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            name: name.into(),
            confidence: confidence.clamp(0.0, 1.0),
            details: BTreeMap::new(),
        }
    }

    /// With a detail entry
    #[inline]
    #[must_use]
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// What the fixer did, handed to the deployer and the logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppliedFix {
    /// Candidate that produced this fix
    pub candidate_name: String,
    /// Description of the change
    pub description: String,
    /// Files the fix touched
    pub artifact_paths: Vec<PathBuf>,
}

impl AppliedFix {
    /// Create new applied fix
    #[inline]
    #[must_use]
    pub fn new(candidate_name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            candidate_name: candidate_name.into(),
            description: description.into(),
            artifact_paths: Vec::new(),
        }
    }

    /// With touched paths
    #[inline]
    #[must_use]
    pub fn with_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.artifact_paths = paths;
        self
    }
}

/// Test run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TestReport {
    /// Tests executed
    pub total: u32,
    /// Tests passed
    pub passed: u32,
    /// Tests failed
    pub failed: u32,
}

impl TestReport {
    /// Create new report
    #[inline]
    #[must_use]
    pub fn new(total: u32, passed: u32, failed: u32) -> Self {
        Self {
            total,
            passed,
            failed,
        }
    }

    /// Report where every test passed
    #[inline]
    #[must_use]
    pub fn all(total: u32) -> Self {
        Self::new(total, total, 0)
    }

    /// Whether no test failed to pass
    #[inline]
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.passed >= self.total
    }
}

/// Timestamped line in a remediation log trail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    /// When the line was recorded
    pub at: DateTime<Utc>,
    /// Text
    pub message: String,
}

impl LogLine {
    /// Line stamped now
    #[inline]
    #[must_use]
    pub fn now(message: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            message: message.into(),
        }
    }
}

impl fmt::Display for LogLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.at.to_rfc3339(), self.message)
    }
}

/// Terminal state of one remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RemediationOutcome {
    /// A candidate was applied and validated
    Succeeded {
        /// Whether it also went live
        deployed: bool,
    },
    /// No candidate could be applied
    Failed {
        /// Why
        reason: RemediationFailure,
    },
}

impl RemediationOutcome {
    /// Whether the outcome is a success
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded { .. })
    }

    /// Whether the fix was deployed
    #[inline]
    #[must_use]
    pub fn is_deployed(&self) -> bool {
        matches!(self, Self::Succeeded { deployed: true })
    }
}

/// Final, immutable record of one remediation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemediationResult {
    /// The error this result is for
    pub error_id: String,
    /// Whether remediation succeeded
    pub success: bool,
    /// Candidate that succeeded, or the last one attempted
    pub fix_applied: Option<String>,
    /// Tests executed for the `fix_applied` candidate (0 if its run did not
    /// complete)
    pub tests_run: u32,
    /// Tests passed for the `fix_applied` candidate
    pub tests_passed: u32,
    /// Whether the fix was deployed
    pub deployed: bool,
    /// Wall time in milliseconds
    pub duration_ms: u64,
    /// Whether a backup exists that can restore the source
    ///
    /// On success or a critical error: a backup taken by this run has not
    /// been restored yet. On `ApprovalDenied` and `AllCandidatesExhausted`:
    /// at least one backup was taken, so this is `false` when every backup
    /// attempt failed. Always `false` when nothing was attempted.
    pub rollback_available: bool,
    /// Terminal state
    pub outcome: RemediationOutcome,
    /// Ordered log trail
    pub logs: Vec<LogLine>,
}

impl RemediationResult {
    /// Whether any log line contains `needle`
    #[must_use]
    pub fn log_contains(&self, needle: &str) -> bool {
        self.logs.iter().any(|line| line.message.contains(needle))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_urgency() {
        assert!(Severity::Critical.is_urgent());
        assert!(Severity::High.is_urgent());
        assert!(!Severity::Medium.is_urgent());
        assert!(!Severity::Low.is_urgent());
        assert!(Severity::Critical > Severity::Low);
    }

    #[test]
    fn detected_error_builder() {
        let error = DetectedError::new(
            "err-1",
            ErrorCategory::Runtime,
            Severity::High,
            "src/api.rs",
            "index out of bounds",
        )
        .with_stack_trace("at api.rs:10")
        .with_context("service", "gateway");

        assert_eq!(error.id, "err-1");
        assert_eq!(error.stack_trace.as_deref(), Some("at api.rs:10"));
        assert_eq!(error.context.get("service").map(String::as_str), Some("gateway"));
    }

    #[test]
    fn detected_error_json_uses_lowercase_enums() {
        let raw = r#"{
            "id": "e1",
            "timestamp": "2024-05-01T10:00:00Z",
            "category": "security",
            "severity": "critical",
            "source": "src/auth.rs",
            "message": "hardcoded secret"
        }"#;
        let error: DetectedError = serde_json::from_str(raw).unwrap();
        assert_eq!(error.category, ErrorCategory::Security);
        assert_eq!(error.severity, Severity::Critical);
        assert!(error.context.is_empty());
    }

    #[test]
    fn candidate_confidence_is_clamped() {
        assert_eq!(FixCandidate::new("a", 1.7).confidence, 1.0);
        assert_eq!(FixCandidate::new("a", -0.2).confidence, 0.0);
    }

    #[test]
    fn test_report_all_passed() {
        assert!(TestReport::all(5).all_passed());
        assert!(TestReport::default().all_passed());
        assert!(!TestReport::new(5, 4, 1).all_passed());
    }

    #[test]
    fn outcome_serializes_tagged() {
        let json = serde_json::to_value(RemediationOutcome::Succeeded { deployed: true }).unwrap();
        assert_eq!(json["status"], "succeeded");
        assert_eq!(json["deployed"], true);
    }
}
