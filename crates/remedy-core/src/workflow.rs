//! Per-error remediation workflow
//!
//! One [`Workflow`] runs for each claimed error:
//!
//! ```text
//! Matching -> for each candidate (rank order, up to the budget):
//!     BackingUp -> Fixing -> [Testing] -> [AwaitingApproval] -> [Deploying]
//!         any step fails -> RollingBack -> next candidate
//! ```
//!
//! Everything observable about the run is recorded in a shared [`Trace`], so
//! a result can still be assembled when the workflow itself blows up.

use crate::approval::{self, ApprovalDecision};
use crate::collaborators::Collaborators;
use crate::config::RemediationConfig;
use crate::error::RemediationFailure;
use crate::stage::{validate_transition, RemediationStage};
use crate::types::{
    AppliedFix, DetectedError, FixCandidate, LogLine, RemediationOutcome, RemediationResult,
    TestReport,
};
use parking_lot::Mutex;
use remedy_rollback::{BackupId, BackupLease, RollbackManager};
use std::sync::Arc;
use std::time::Instant;

/// Unexpected condition that ends the workflow as a critical error
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Abort(pub(crate) String);

/// Result of trying one candidate
enum Attempt {
    /// Stop here with this outcome
    Terminal(RemediationOutcome),
    /// Candidate failed and was rolled back
    Next(RemediationFailure),
}

#[derive(Debug)]
struct TraceState {
    stage: RemediationStage,
    logs: Vec<LogLine>,
    fix_applied: Option<String>,
    last_tests: TestReport,
    /// Pins on every backup this run took, released when the trace drops
    leases: Vec<BackupLease>,
    /// Backup whose snapshot has not been restored over the source
    live_backup: Option<BackupId>,
}

/// Shared, append-only record of one remediation
#[derive(Debug)]
pub(crate) struct Trace {
    error_id: String,
    started: Instant,
    state: Mutex<TraceState>,
}

impl Trace {
    pub(crate) fn new(error_id: impl Into<String>) -> Self {
        Self {
            error_id: error_id.into(),
            started: Instant::now(),
            state: Mutex::new(TraceState {
                stage: RemediationStage::Received,
                logs: Vec::new(),
                fix_applied: None,
                last_tests: TestReport::default(),
                leases: Vec::new(),
                live_backup: None,
            }),
        }
    }

    pub(crate) fn log(&self, message: impl Into<String>) {
        let line = LogLine::now(message);
        tracing::debug!(error_id = %self.error_id, "{}", line.message);
        self.state.lock().logs.push(line);
    }

    fn enter(&self, next: RemediationStage) -> Result<(), Abort> {
        let mut state = self.state.lock();
        validate_transition(state.stage, next).map_err(|e| Abort(e.to_string()))?;
        state.stage = next;
        state.logs.push(LogLine::now(format!("stage: {next}")));
        Ok(())
    }

    pub(crate) fn stage(&self) -> RemediationStage {
        self.state.lock().stage
    }

    /// Test counts always belong to the candidate named in `fix_applied`
    fn attempting(&self, candidate: &FixCandidate) {
        let mut state = self.state.lock();
        state.fix_applied = Some(candidate.name.clone());
        state.last_tests = TestReport::default();
    }

    fn hold(&self, lease: BackupLease) {
        let mut state = self.state.lock();
        state.live_backup = Some(lease.id());
        state.leases.push(lease);
    }

    fn restored(&self, id: BackupId) {
        let mut state = self.state.lock();
        if state.live_backup == Some(id) {
            state.live_backup = None;
        }
    }

    fn record_tests(&self, report: TestReport) {
        self.state.lock().last_tests = report;
    }

    /// Assemble the immutable result for `outcome`
    pub(crate) fn finish(&self, outcome: RemediationOutcome) -> RemediationResult {
        let mut state = self.state.lock();
        let backups_taken = !state.leases.is_empty();

        let rollback_available = match &outcome {
            RemediationOutcome::Succeeded { .. } => state.live_backup.is_some(),
            RemediationOutcome::Failed { reason } => match reason {
                RemediationFailure::NoPatternFound
                | RemediationFailure::AutoFixDisabled
                | RemediationFailure::DuplicateInFlight => false,
                RemediationFailure::CriticalError { .. } => state.live_backup.is_some(),
                _ => backups_taken,
            },
        };

        let summary = match &outcome {
            RemediationOutcome::Succeeded { deployed: true } => "remediation succeeded, fix deployed".to_string(),
            RemediationOutcome::Succeeded { deployed: false } => "remediation succeeded, fix not deployed".to_string(),
            RemediationOutcome::Failed { reason } => format!("remediation failed: {reason}"),
        };
        state.logs.push(LogLine::now(summary));

        let duration_ms = u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX);

        RemediationResult {
            error_id: self.error_id.clone(),
            success: outcome.is_success(),
            fix_applied: state.fix_applied.clone(),
            tests_run: state.last_tests.total,
            tests_passed: state.last_tests.passed,
            deployed: outcome.is_deployed(),
            duration_ms,
            rollback_available,
            outcome,
            logs: state.logs.clone(),
        }
    }
}

/// The remediation state machine for one error
pub(crate) struct Workflow {
    config: RemediationConfig,
    rollback: Arc<RollbackManager>,
    collaborators: Collaborators,
    error: DetectedError,
    trace: Arc<Trace>,
}

impl Workflow {
    pub(crate) fn new(
        config: RemediationConfig,
        rollback: Arc<RollbackManager>,
        collaborators: Collaborators,
        error: DetectedError,
        trace: Arc<Trace>,
    ) -> Self {
        Self {
            config,
            rollback,
            collaborators,
            error,
            trace,
        }
    }

    /// Drive the workflow to a terminal outcome
    ///
    /// # Errors
    /// `Abort` on an illegal transition or a rollback that did not restore
    /// the source
    pub(crate) async fn run(self) -> Result<RemediationOutcome, Abort> {
        let trace = &self.trace;
        trace.log(format!(
            "remediating {} error ({}) in {}: {}",
            self.error.severity,
            self.error.category,
            self.error.source.display(),
            self.error.message
        ));

        trace.enter(RemediationStage::Matching)?;
        let candidates = self.collaborators.matcher.find_matches(&self.error).await;

        if candidates.is_empty() {
            trace.log("no fix pattern matched");
            trace.enter(RemediationStage::Failed)?;
            return Ok(failed(RemediationFailure::NoPatternFound));
        }

        let names: Vec<&str> = candidates.iter().map(|c| c.name.as_str()).collect();
        trace.log(format!("{} candidate(s): {}", candidates.len(), names.join(", ")));

        if !self.config.auto_fix_enabled {
            trace.log("automatic fixing disabled, not applying any candidate");
            trace.enter(RemediationStage::Failed)?;
            return Ok(failed(RemediationFailure::AutoFixDisabled));
        }

        let budget = self.config.candidate_budget();
        if candidates.len() > budget {
            trace.log(format!(
                "retry budget allows {budget} of {} candidates",
                candidates.len()
            ));
        }

        let mut attempted = 0;
        for (rank, candidate) in candidates.iter().take(budget).enumerate() {
            attempted += 1;
            trace.log(format!(
                "attempt {}: {} (confidence {:.2})",
                rank + 1,
                candidate.name,
                candidate.confidence
            ));

            match self.attempt(candidate).await? {
                Attempt::Terminal(outcome) => return Ok(outcome),
                Attempt::Next(failure) => {
                    tracing::info!(error_id = %self.error.id, candidate = %candidate.name, %failure, "candidate failed");
                    trace.log(failure.to_string());
                }
            }
        }

        trace.enter(RemediationStage::Failed)?;
        Ok(failed(RemediationFailure::AllCandidatesExhausted { attempted }))
    }

    async fn attempt(&self, candidate: &FixCandidate) -> Result<Attempt, Abort> {
        let trace = &self.trace;
        let name = candidate.name.clone();

        trace.enter(RemediationStage::BackingUp)?;
        trace.attempting(candidate);

        if self.config.dry_run {
            trace.log(format!("dry run: would apply {name} to {}", self.error.source.display()));
            trace.enter(RemediationStage::Succeeded)?;
            return Ok(Attempt::Terminal(RemediationOutcome::Succeeded { deployed: false }));
        }

        let backup = match self.rollback.create_held_backup(&self.error.source).await {
            Ok(lease) => lease,
            Err(e) => {
                return Ok(Attempt::Next(RemediationFailure::BackupFailure {
                    candidate: name,
                    message: e.to_string(),
                }));
            }
        };
        let backup_id = backup.id();
        trace.hold(backup);
        trace.log(format!("backup {backup_id} created"));

        trace.enter(RemediationStage::Fixing)?;
        let fix = match self.collaborators.fixer.apply_fix(candidate, &self.error).await {
            Ok(fix) => fix,
            Err(e) => {
                self.roll_back(backup_id).await?;
                return Ok(Attempt::Next(RemediationFailure::FixApplicationFailure {
                    candidate: name,
                    message: format!("{e:#}"),
                }));
            }
        };
        trace.log(format!("fix applied: {}", fix.description));
        self.warn_uncovered_paths(&fix);

        let report = if self.config.auto_test_enabled {
            trace.enter(RemediationStage::Testing)?;
            match self.collaborators.test_runner.run_tests(&self.error.source).await {
                Ok(report) => {
                    trace.record_tests(report);
                    trace.log(format!("tests: {}/{} passed", report.passed, report.total));
                    if !report.all_passed() {
                        self.roll_back(backup_id).await?;
                        return Ok(Attempt::Next(RemediationFailure::TestFailure {
                            candidate: name,
                            message: format!("{} of {} tests failed", report.total - report.passed, report.total),
                        }));
                    }
                    report
                }
                Err(e) => {
                    self.roll_back(backup_id).await?;
                    return Ok(Attempt::Next(RemediationFailure::TestFailure {
                        candidate: name,
                        message: format!("test run failed: {e:#}"),
                    }));
                }
            }
        } else {
            trace.log("automatic testing disabled, treating as passed");
            TestReport::default()
        };

        if !self.config.auto_deploy_enabled {
            trace.log(format!("automatic deployment disabled, keeping backup {backup_id}"));
            trace.enter(RemediationStage::Succeeded)?;
            return Ok(Attempt::Terminal(RemediationOutcome::Succeeded { deployed: false }));
        }

        if self.config.require_approval {
            trace.enter(RemediationStage::AwaitingApproval)?;
            match approval::evaluate(&self.error, &report) {
                ApprovalDecision::Approved => trace.log("deployment auto-approved"),
                ApprovalDecision::Denied { reason } => {
                    trace.log(format!("deployment denied: {reason}"));
                    self.roll_back(backup_id).await?;
                    trace.enter(RemediationStage::Failed)?;
                    return Ok(Attempt::Terminal(failed(RemediationFailure::ApprovalDenied { reason })));
                }
            }
        }

        trace.enter(RemediationStage::Deploying)?;
        let declined = match self.collaborators.deployer.deploy(&self.error.source, &fix).await {
            Ok(true) => None,
            Ok(false) => Some("deployment manager declined".to_string()),
            Err(e) => Some(format!("{e:#}")),
        };
        if let Some(message) = declined {
            self.roll_back(backup_id).await?;
            return Ok(Attempt::Next(RemediationFailure::DeploymentFailure {
                candidate: name,
                message,
            }));
        }

        self.rollback.mark_as_deployed(backup_id).await;
        trace.log(format!("deployed {name}, backup {backup_id} marked deployed"));
        trace.enter(RemediationStage::Succeeded)?;
        Ok(Attempt::Terminal(RemediationOutcome::Succeeded { deployed: true }))
    }

    /// Restore the source; a failed restore leaves it untrusted, so abort
    async fn roll_back(&self, backup_id: BackupId) -> Result<(), Abort> {
        self.trace.enter(RemediationStage::RollingBack)?;
        if self.rollback.rollback(backup_id).await {
            self.trace.restored(backup_id);
            self.trace.log(format!("rolled back to backup {backup_id}"));
            Ok(())
        } else {
            Err(Abort(format!(
                "rollback to backup {backup_id} failed, {} may be left modified",
                self.error.source.display()
            )))
        }
    }

    fn warn_uncovered_paths(&self, fix: &AppliedFix) {
        for path in fix.artifact_paths.iter().filter(|p| **p != self.error.source) {
            tracing::warn!(error_id = %self.error.id, path = %path.display(), "fix touched a path outside the backup");
            self.trace
                .log(format!("warning: {} is not covered by the backup", path.display()));
        }
    }
}

fn failed(reason: RemediationFailure) -> RemediationOutcome {
    RemediationOutcome::Failed { reason }
}
