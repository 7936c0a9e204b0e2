//! Remedy Core - auto-remediation orchestrator
//!
//! Consumes detected errors and, per distinct error:
//! - Asks a pattern matcher for ranked fix candidates
//! - Snapshots the affected file, applies a candidate, runs tests
//! - Gates and performs deployment
//! - Rolls back and tries the next candidate on any failure
//! - Reports an immutable [`RemediationResult`] to the audit sink
//!
//! Matching, fixing, testing and deploying are collaborator traits; this
//! crate only sequences them.
//!
//! # Example
//!
//! ```rust,ignore
//! use remedy_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(collaborators: Collaborators) -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load("remedy.toml")?;
//! let rollback = Arc::new(RollbackManager::from_config(&settings.rollback).await?);
//! let orchestrator = RemediationOrchestrator::new(settings.remediation, rollback, collaborators)?;
//!
//! let (tx, rx) = tokio::sync::mpsc::channel(64);
//! orchestrator.start(rx).await?;
//! tx.send(DetectedError::new("e-1", ErrorCategory::Runtime, Severity::High, "src/api.rs", "panic")).await?;
//! orchestrator.stop().await?;
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod approval;
pub mod audit;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod notify;
pub mod orchestrator;
pub mod stage;
pub mod types;

mod workflow;

pub use approval::ApprovalDecision;
pub use audit::{verify_audit_log, AuditError, AuditRecord, JsonlAuditSink, TracingAuditSink};
pub use collaborators::{
    AuditSink, Collaborators, DeploymentManager, Fixer, Notifier, PatternMatcher, TestRunner,
};
pub use config::{RemediationConfig, Settings};
pub use error::{ConfigError, OrchestratorError, RemediationFailure};
pub use notify::WebhookNotifier;
pub use orchestrator::{ActiveStatus, OrchestratorStatus, RemediationOrchestrator};
pub use stage::{IllegalTransition, RemediationStage};
pub use types::{
    AppliedFix, DetectedError, ErrorCategory, FixCandidate, LogLine, RemediationOutcome,
    RemediationResult, Severity, TestReport,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for wiring an orchestrator
    pub use crate::{
        AppliedFix, AuditSink, Collaborators, DeploymentManager, DetectedError, ErrorCategory,
        FixCandidate, Fixer, PatternMatcher, RemediationConfig, RemediationOrchestrator,
        RemediationResult, Settings, Severity, TestReport, TestRunner,
    };
    pub use remedy_rollback::{RollbackConfig, RollbackManager};
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
