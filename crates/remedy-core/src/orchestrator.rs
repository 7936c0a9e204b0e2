//! Remediation orchestrator
//!
//! Consumes detected errors and runs one [`Workflow`] task per distinct
//! error id. Duplicates arriving while an id is in flight are dropped.
//!
//! `stop()` drains: it stops reading the channel and then waits for every
//! task spawned from it. No step has a timeout, so a collaborator that never
//! returns keeps `stop()` pending.

use crate::collaborators::{Collaborators, Notifier};
use crate::config::RemediationConfig;
use crate::error::{ConfigError, OrchestratorError, RemediationFailure};
use crate::notify::WebhookNotifier;
use crate::stage::RemediationStage;
use crate::types::{DetectedError, RemediationOutcome, RemediationResult, Severity};
use crate::workflow::{Abort, Trace, Workflow};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::FutureExt;
use parking_lot::Mutex;
use remedy_rollback::RollbackManager;
use serde::Serialize;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle, JoinSet};

/// One in-flight remediation
#[derive(Debug, Clone)]
struct ActiveRemediation {
    severity: Severity,
    started_at: DateTime<Utc>,
    trace: Arc<Trace>,
}

/// Snapshot of one in-flight remediation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveStatus {
    /// Error being remediated
    pub error_id: String,
    /// Its severity
    pub severity: Severity,
    /// Current stage
    pub stage: RemediationStage,
    /// When the remediation was claimed
    pub started_at: DateTime<Utc>,
}

/// Snapshot returned by [`RemediationOrchestrator::status`]
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    /// Whether the error channel is being consumed
    pub running: bool,
    /// In-flight remediations, ordered by error id
    pub active_remediations: Vec<ActiveStatus>,
    /// Active configuration
    pub config: RemediationConfig,
}

/// Releases an in-flight claim when the owning task ends, panics included
struct InFlightClaim {
    active: Arc<DashMap<String, ActiveRemediation>>,
    error_id: String,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.active.remove(&self.error_id);
    }
}

struct Intake {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

struct Inner {
    config: RemediationConfig,
    rollback: Arc<RollbackManager>,
    collaborators: Collaborators,
    notifier: Option<Arc<dyn Notifier>>,
    active: Arc<DashMap<String, ActiveRemediation>>,
}

/// Drives detected errors through fix, test, deploy and rollback
pub struct RemediationOrchestrator {
    inner: Arc<Inner>,
    intake: Mutex<Option<Intake>>,
}

impl RemediationOrchestrator {
    /// Create a stopped orchestrator
    ///
    /// A notifier in `collaborators` takes precedence over the configured
    /// webhook.
    ///
    /// # Errors
    /// `ConfigError::Invalid` if the configuration does not validate or the
    /// webhook client cannot be built
    pub fn new(
        config: RemediationConfig,
        rollback: Arc<RollbackManager>,
        collaborators: Collaborators,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let notifier = match (&collaborators.notifier, &config.notification_webhook) {
            (Some(notifier), _) => Some(Arc::clone(notifier)),
            (None, Some(raw)) => Some(Arc::new(webhook(raw)?) as Arc<dyn Notifier>),
            (None, None) => None,
        };

        if config.dry_run {
            tracing::info!("dry run enabled, no source will be modified");
        }

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                rollback,
                collaborators,
                notifier,
                active: Arc::new(DashMap::new()),
            }),
            intake: Mutex::new(None),
        })
    }

    /// Start consuming `errors`, one task per distinct error id
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    /// `OrchestratorError::AlreadyRunning` if already started
    pub async fn start(
        &self,
        errors: mpsc::Receiver<DetectedError>,
    ) -> Result<(), OrchestratorError> {
        let mut intake = self.intake.lock();
        if intake.is_some() {
            return Err(OrchestratorError::AlreadyRunning);
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let handle = tokio::spawn(intake_loop(Arc::clone(&self.inner), errors, shutdown_rx));
        *intake = Some(Intake { shutdown, handle });

        tracing::info!("remediation orchestrator started");
        Ok(())
    }

    /// Stop consuming errors and wait for in-flight remediations to finish
    ///
    /// No-op when not running.
    ///
    /// # Errors
    /// `OrchestratorError::Intake` if the intake task panicked
    pub async fn stop(&self) -> Result<(), OrchestratorError> {
        let intake = self.intake.lock().take();
        let Some(Intake { shutdown, handle }) = intake else {
            return Ok(());
        };

        // The loop may already have exited on a closed channel
        let _ = shutdown.send(());
        tracing::info!(in_flight = self.inner.active.len(), "stopping, draining remediations");
        handle
            .await
            .map_err(|e| OrchestratorError::Intake(e.to_string()))?;

        tracing::info!("remediation orchestrator stopped");
        Ok(())
    }

    /// Remediate one error outside the stream
    ///
    /// Always yields exactly one result, audited like any other. If the id
    /// is already in flight nothing is attempted and the result is
    /// `Failed: DuplicateInFlight`.
    pub async fn manual_remediate(&self, error: DetectedError) -> RemediationResult {
        let trace = Arc::new(Trace::new(error.id.clone()));
        match self.inner.claim(&error, &trace) {
            Some(claim) => self.inner.remediate(error, claim, trace).await,
            None => self.inner.reject_duplicate(&error, &trace).await,
        }
    }

    /// Current state
    #[must_use]
    pub fn status(&self) -> OrchestratorStatus {
        let mut active_remediations: Vec<ActiveStatus> = self
            .inner
            .active
            .iter()
            .map(|entry| ActiveStatus {
                error_id: entry.key().clone(),
                severity: entry.severity,
                stage: entry.trace.stage(),
                started_at: entry.started_at,
            })
            .collect();
        active_remediations.sort_by(|a, b| a.error_id.cmp(&b.error_id));

        OrchestratorStatus {
            running: self.intake.lock().is_some(),
            active_remediations,
            config: self.inner.config.clone(),
        }
    }

    /// Backup manager shared with the workflows
    #[inline]
    #[must_use]
    pub fn rollback_manager(&self) -> &Arc<RollbackManager> {
        &self.inner.rollback
    }
}

impl fmt::Debug for RemediationOrchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemediationOrchestrator")
            .field("config", &self.inner.config)
            .field("active", &self.inner.active.len())
            .field("running", &self.intake.lock().is_some())
            .finish_non_exhaustive()
    }
}

impl Inner {
    /// Atomically claim `error.id`; `None` if it is already in flight
    fn claim(&self, error: &DetectedError, trace: &Arc<Trace>) -> Option<InFlightClaim> {
        match self.active.entry(error.id.clone()) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(ActiveRemediation {
                    severity: error.severity,
                    started_at: Utc::now(),
                    trace: Arc::clone(trace),
                });
                Some(InFlightClaim {
                    active: Arc::clone(&self.active),
                    error_id: error.id.clone(),
                })
            }
        }
    }

    fn dispatch(self: &Arc<Self>, error: DetectedError, tasks: &mut JoinSet<()>) {
        let trace = Arc::new(Trace::new(error.id.clone()));
        let Some(claim) = self.claim(&error, &trace) else {
            tracing::warn!(error_id = %error.id, "remediation already in flight, dropping duplicate");
            return;
        };

        tracing::info!(error_id = %error.id, severity = %error.severity, category = %error.category, "remediation claimed");
        let inner = Arc::clone(self);
        tasks.spawn(async move {
            inner.remediate(error, claim, trace).await;
        });
    }

    async fn remediate(
        &self,
        error: DetectedError,
        claim: InFlightClaim,
        trace: Arc<Trace>,
    ) -> RemediationResult {
        let workflow = Workflow::new(
            self.config.clone(),
            Arc::clone(&self.rollback),
            self.collaborators.clone(),
            error,
            Arc::clone(&trace),
        );

        let outcome = match AssertUnwindSafe(workflow.run()).catch_unwind().await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(Abort(message))) => {
                tracing::error!(error_id = %claim.error_id, %message, "remediation aborted");
                trace.log(format!("aborted in stage {}: {message}", trace.stage()));
                RemediationOutcome::Failed {
                    reason: RemediationFailure::critical(message),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                tracing::error!(error_id = %claim.error_id, %message, "remediation panicked");
                trace.log(format!("panicked in stage {}: {message}", trace.stage()));
                RemediationOutcome::Failed {
                    reason: RemediationFailure::critical(format!("panic: {message}")),
                }
            }
        };

        let result = trace.finish(outcome);
        self.report(&result).await;

        // Release the claim and the backup pins before retention runs
        drop(claim);
        drop(trace);
        if let Err(e) = self.rollback.clean_old_backups().await {
            tracing::warn!(error = %e, "backup retention failed");
        }

        result
    }

    async fn reject_duplicate(&self, error: &DetectedError, trace: &Trace) -> RemediationResult {
        tracing::warn!(error_id = %error.id, "remediation already in flight, not starting another");
        trace.log(format!("remediation for {} already in flight, nothing attempted", error.id));
        let result = trace.finish(RemediationOutcome::Failed {
            reason: RemediationFailure::DuplicateInFlight,
        });
        self.report(&result).await;
        result
    }

    async fn report(&self, result: &RemediationResult) {
        if let Err(e) = self.collaborators.audit.log_remediation(result).await {
            tracing::warn!(error_id = %result.error_id, error = %e, "audit sink failed");
        }
        if let Some(notifier) = &self.notifier {
            if let Err(e) = notifier.notify(result).await {
                tracing::warn!(error_id = %result.error_id, error = %e, "notification failed");
            }
        }
    }
}

async fn intake_loop(
    inner: Arc<Inner>,
    mut errors: mpsc::Receiver<DetectedError>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut tasks = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => break,
            received = errors.recv() => match received {
                Some(error) => inner.dispatch(error, &mut tasks),
                None => {
                    tracing::info!("error channel closed");
                    break;
                }
            },
            Some(joined) = tasks.join_next(), if !tasks.is_empty() => log_join(joined),
        }
    }

    while let Some(joined) = tasks.join_next().await {
        log_join(joined);
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        tracing::error!(error = %e, "remediation task ended abnormally");
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn webhook(raw: &str) -> Result<WebhookNotifier, ConfigError> {
    let invalid = |message: String| ConfigError::Invalid {
        field: "notification_webhook",
        message,
    };
    let url = reqwest::Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    WebhookNotifier::new(url).map_err(|e| invalid(e.to_string()))
}
