//! Collaborator contracts
//!
//! The orchestrator sequences these; it never implements them. Failures are
//! reported as `anyhow::Error` and handled per candidate by the workflow.

use crate::audit::TracingAuditSink;
use crate::types::{AppliedFix, DetectedError, FixCandidate, RemediationResult, TestReport};
use async_trait::async_trait;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Ranks candidate fixes for an error
#[async_trait]
pub trait PatternMatcher: Send + Sync {
    /// Candidates best-first; empty means no match
    async fn find_matches(&self, error: &DetectedError) -> Vec<FixCandidate>;
}

/// Mutates the affected artifact
#[async_trait]
pub trait Fixer: Send + Sync {
    /// Apply `candidate` to the error's source
    async fn apply_fix(
        &self,
        candidate: &FixCandidate,
        error: &DetectedError,
    ) -> anyhow::Result<AppliedFix>;
}

/// Validates a fixed artifact
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the tests relevant to `source`; `Err` means the run itself broke
    async fn run_tests(&self, source: &Path) -> anyhow::Result<TestReport>;
}

/// Ships a validated fix
#[async_trait]
pub trait DeploymentManager: Send + Sync {
    /// `Ok(true)` when live, `Ok(false)` when declined
    async fn deploy(&self, source: &Path, fix: &AppliedFix) -> anyhow::Result<bool>;
}

/// Durable record of every result
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record a terminal result (best-effort)
    async fn log_remediation(&self, result: &RemediationResult) -> anyhow::Result<()>;
}

/// Fire-and-forget notification of terminal results
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Notify about a terminal result (best-effort)
    async fn notify(&self, result: &RemediationResult) -> anyhow::Result<()>;
}

/// The set of collaborators one orchestrator drives
#[derive(Clone)]
pub struct Collaborators {
    /// Candidate ranking
    pub matcher: Arc<dyn PatternMatcher>,
    /// Fix application
    pub fixer: Arc<dyn Fixer>,
    /// Test execution
    pub test_runner: Arc<dyn TestRunner>,
    /// Deployment
    pub deployer: Arc<dyn DeploymentManager>,
    /// Audit trail
    pub audit: Arc<dyn AuditSink>,
    /// Notification, overriding the configured webhook
    pub notifier: Option<Arc<dyn Notifier>>,
}

impl Collaborators {
    /// Collaborators with a tracing-only audit sink and no notifier
    #[must_use]
    pub fn new(
        matcher: Arc<dyn PatternMatcher>,
        fixer: Arc<dyn Fixer>,
        test_runner: Arc<dyn TestRunner>,
        deployer: Arc<dyn DeploymentManager>,
    ) -> Self {
        Self {
            matcher,
            fixer,
            test_runner,
            deployer,
            audit: Arc::new(TracingAuditSink),
            notifier: None,
        }
    }

    /// With audit sink
    #[inline]
    #[must_use]
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// With notifier
    #[inline]
    #[must_use]
    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("notifier", &self.notifier.is_some())
            .finish_non_exhaustive()
    }
}
