//! Remediation stages and their legal transitions
//!
//! Every step of a workflow is entered through [`validate_transition`]; an
//! illegal transition is a defect and ends the remediation as a critical
//! error.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Where a remediation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemediationStage {
    /// Claimed, nothing done yet
    Received,
    /// Asking the pattern matcher
    Matching,
    /// Snapshotting the source
    BackingUp,
    /// Applying a candidate
    Fixing,
    /// Running tests
    Testing,
    /// Waiting on the approval gate
    AwaitingApproval,
    /// Deploying
    Deploying,
    /// Restoring the source after a failed step
    RollingBack,
    /// Terminal success
    Succeeded,
    /// Terminal failure
    Failed,
}

impl RemediationStage {
    /// Whether no further transition is possible
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

impl fmt::Display for RemediationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Received => "received",
            Self::Matching => "matching",
            Self::BackingUp => "backing_up",
            Self::Fixing => "fixing",
            Self::Testing => "testing",
            Self::AwaitingApproval => "awaiting_approval",
            Self::Deploying => "deploying",
            Self::RollingBack => "rolling_back",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Attempted transition not in the table
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal stage transition {from} -> {to}")]
pub struct IllegalTransition {
    /// Current stage
    pub from: RemediationStage,
    /// Requested stage
    pub to: RemediationStage,
}

/// Validates a stage transition
///
/// # Errors
/// `IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(
    from: RemediationStage,
    to: RemediationStage,
) -> Result<(), IllegalTransition> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(IllegalTransition { from, to })
    }
}

/// Stages reachable in one step from `from`
#[must_use]
pub fn allowed_transitions(from: RemediationStage) -> &'static [RemediationStage] {
    use RemediationStage::*;
    match from {
        Received => &[Matching, Failed],
        Matching => &[BackingUp, Failed],
        // Dry run succeeds here; a failed backup moves to the next candidate
        BackingUp => &[Fixing, Succeeded, BackingUp, Failed],
        Fixing => &[Testing, AwaitingApproval, Deploying, Succeeded, RollingBack, Failed],
        Testing => &[AwaitingApproval, Deploying, Succeeded, RollingBack, Failed],
        AwaitingApproval => &[Deploying, RollingBack, Failed],
        Deploying => &[Succeeded, RollingBack, Failed],
        RollingBack => &[BackingUp, Failed],
        Succeeded | Failed => &[],
    }
}
