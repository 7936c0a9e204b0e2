//! Deployment approval gate
//!
//! Policy only: there is no wait-for-human mechanism. Urgent errors whose
//! tests all passed are approved, everything else is denied.

use crate::types::{DetectedError, TestReport};

/// Gate verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// Deployment may proceed
    Approved,
    /// Deployment refused
    Denied {
        /// Why
        reason: String,
    },
}

impl ApprovalDecision {
    /// Whether deployment may proceed
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approved)
    }
}

/// Decide whether a validated fix for `error` may be deployed
#[must_use]
pub fn evaluate(error: &DetectedError, tests: &TestReport) -> ApprovalDecision {
    if !error.severity.is_urgent() {
        return ApprovalDecision::Denied {
            reason: format!(
                "severity {} requires manual approval",
                error.severity
            ),
        };
    }
    if !tests.all_passed() {
        return ApprovalDecision::Denied {
            reason: format!("only {}/{} tests passed", tests.passed, tests.total),
        };
    }
    ApprovalDecision::Approved
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ErrorCategory, Severity};

    fn error(severity: Severity) -> DetectedError {
        DetectedError::new("e", ErrorCategory::Runtime, severity, "src/a.rs", "boom")
    }

    #[test]
    fn urgent_and_green_is_approved() {
        assert!(evaluate(&error(Severity::Critical), &TestReport::all(3)).is_approved());
        assert!(evaluate(&error(Severity::High), &TestReport::all(3)).is_approved());
    }

    #[test]
    fn untested_urgent_fix_is_approved() {
        // Tests disabled reports 0/0, which counts as all passed
        assert!(evaluate(&error(Severity::High), &TestReport::default()).is_approved());
    }

    #[test]
    fn medium_and_low_are_denied() {
        for severity in [Severity::Medium, Severity::Low] {
            let decision = evaluate(&error(severity), &TestReport::all(3));
            assert!(matches!(decision, ApprovalDecision::Denied { ref reason } if reason.contains(&severity.to_string())));
        }
    }

    #[test]
    fn failing_tests_are_denied() {
        let decision = evaluate(&error(Severity::Critical), &TestReport::new(4, 3, 1));
        assert_eq!(
            decision,
            ApprovalDecision::Denied {
                reason: "only 3/4 tests passed".into()
            }
        );
    }
}
