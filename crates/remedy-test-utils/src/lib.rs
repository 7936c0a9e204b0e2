//! Testing utilities for the remedy workspace
//!
//! Scripted collaborators, recording sinks, and fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use remedy_core::{
    AppliedFix, AuditSink, Collaborators, DeploymentManager, DetectedError, ErrorCategory,
    FixCandidate, Fixer, Notifier, PatternMatcher, RemediationResult, Severity, TestReport,
    TestRunner,
};
use remedy_rollback::{MemoryBackupStore, RollbackManager};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

// ----------------------------------------------------------------------------
// Fixtures
// ----------------------------------------------------------------------------

pub fn detected_error(id: &str, severity: Severity, source: impl Into<PathBuf>) -> DetectedError {
    DetectedError::new(id, ErrorCategory::Runtime, severity, source, "attempt to unwrap a None value")
}

/// Write `content` to `dir/name` and return the path
pub fn source_file(dir: &Path, name: &str, content: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

pub fn read(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

pub async fn memory_rollback(max_backups: usize) -> (Arc<RollbackManager>, Arc<MemoryBackupStore>) {
    let store = Arc::new(MemoryBackupStore::new());
    let manager = RollbackManager::open(store.clone(), max_backups).await.unwrap();
    (Arc::new(manager), store)
}

pub fn candidates(names: &[&str]) -> Vec<FixCandidate> {
    names
        .iter()
        .enumerate()
        .map(|(rank, name)| FixCandidate::new(*name, 0.9 - rank as f64 * 0.1))
        .collect()
}

/// Poll `condition` every few milliseconds for up to two seconds
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

// ----------------------------------------------------------------------------
// Pattern matcher
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ScriptedMatcher {
    candidates: Vec<FixCandidate>,
    calls: AtomicUsize,
}

impl ScriptedMatcher {
    pub fn new(candidates: Vec<FixCandidate>) -> Self {
        Self {
            candidates,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PatternMatcher for ScriptedMatcher {
    async fn find_matches(&self, _error: &DetectedError) -> Vec<FixCandidate> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.candidates.clone()
    }
}

// ----------------------------------------------------------------------------
// Fixer
// ----------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum FixBehavior {
    /// Overwrite the source with this content
    Write(String),
    /// Return an error without touching the source
    Fail(String),
    /// Overwrite the source, then return an error
    WriteThenFail(String, String),
    /// Overwrite the source, then panic
    WriteThenPanic(String),
}

/// Fixer that edits the real source file per candidate script
///
/// Unscripted candidates write `fixed by <name>`.
#[derive(Debug, Default)]
pub struct FileFixer {
    script: HashMap<String, FixBehavior>,
    applied: Mutex<Vec<String>>,
}

impl FileFixer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, candidate: &str, behavior: FixBehavior) -> Self {
        self.script.insert(candidate.to_string(), behavior);
        self
    }

    pub fn applied(&self) -> Vec<String> {
        self.applied.lock().clone()
    }
}

pub fn fixed_content(candidate: &str) -> String {
    format!("fixed by {candidate}\n")
}

#[async_trait]
impl Fixer for FileFixer {
    async fn apply_fix(
        &self,
        candidate: &FixCandidate,
        error: &DetectedError,
    ) -> anyhow::Result<AppliedFix> {
        self.applied.lock().push(candidate.name.clone());
        let behavior = self
            .script
            .get(&candidate.name)
            .cloned()
            .unwrap_or_else(|| FixBehavior::Write(fixed_content(&candidate.name)));

        match behavior {
            FixBehavior::Write(content) => {
                tokio::fs::write(&error.source, content).await?;
                Ok(AppliedFix::new(&candidate.name, format!("rewrote with {}", candidate.name))
                    .with_paths(vec![error.source.clone()]))
            }
            FixBehavior::Fail(message) => anyhow::bail!(message),
            FixBehavior::WriteThenFail(content, message) => {
                tokio::fs::write(&error.source, content).await?;
                anyhow::bail!(message)
            }
            FixBehavior::WriteThenPanic(content) => {
                tokio::fs::write(&error.source, content).await?;
                panic!("fixer blew up on {}", candidate.name)
            }
        }
    }
}

/// Fixer that blocks until released
#[derive(Debug, Default)]
pub struct GatedFixer {
    entered: Notify,
    release: Notify,
    calls: AtomicUsize,
}

impl GatedFixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until some call is blocked in `apply_fix`
    pub async fn wait_entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_waiters();
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fixer for GatedFixer {
    async fn apply_fix(
        &self,
        candidate: &FixCandidate,
        error: &DetectedError,
    ) -> anyhow::Result<AppliedFix> {
        // Registered before the call is counted, so `calls()` implies waiting
        let released = self.release.notified();
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.entered.notify_one();
        released.await;
        tokio::fs::write(&error.source, fixed_content(&candidate.name)).await?;
        Ok(AppliedFix::new(&candidate.name, "gated fix").with_paths(vec![error.source.clone()]))
    }
}

// ----------------------------------------------------------------------------
// Test runner
// ----------------------------------------------------------------------------

/// Test runner answering from a queue; all-green 5/5 once it runs dry
#[derive(Debug, Default)]
pub struct ScriptedTestRunner {
    queue: Mutex<VecDeque<Result<TestReport, String>>>,
    calls: AtomicUsize,
}

impl ScriptedTestRunner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn then(self, outcome: Result<TestReport, &str>) -> Self {
        self.queue.lock().push_back(outcome.map_err(str::to_string));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestRunner for ScriptedTestRunner {
    async fn run_tests(&self, _source: &Path) -> anyhow::Result<TestReport> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.queue.lock().pop_front() {
            Some(Ok(report)) => Ok(report),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(TestReport::all(5)),
        }
    }
}

// ----------------------------------------------------------------------------
// Deployer
// ----------------------------------------------------------------------------

#[derive(Debug)]
pub struct ScriptedDeployer {
    queue: Mutex<VecDeque<Result<bool, String>>>,
    deployed: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl Default for ScriptedDeployer {
    fn default() -> Self {
        Self::accepting()
    }
}

impl ScriptedDeployer {
    /// Deploys everything it is given
    pub fn accepting() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            deployed: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn then(self, outcome: Result<bool, &str>) -> Self {
        self.queue.lock().push_back(outcome.map_err(str::to_string));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Candidate names that went live
    pub fn deployed(&self) -> Vec<String> {
        self.deployed.lock().clone()
    }
}

#[async_trait]
impl DeploymentManager for ScriptedDeployer {
    async fn deploy(&self, _source: &Path, fix: &AppliedFix) -> anyhow::Result<bool> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.queue.lock().pop_front().unwrap_or(Ok(true));
        match outcome {
            Ok(true) => {
                self.deployed.lock().push(fix.candidate_name.clone());
                Ok(true)
            }
            Ok(false) => Ok(false),
            Err(message) => Err(anyhow::anyhow!(message)),
        }
    }
}

// ----------------------------------------------------------------------------
// Audit and notification
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct RecordingAuditSink {
    results: Mutex<Vec<RemediationResult>>,
    fail: bool,
}

impl RecordingAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that records and then reports failure
    pub fn failing() -> Self {
        Self {
            results: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn results(&self) -> Vec<RemediationResult> {
        self.results.lock().clone()
    }
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn log_remediation(&self, result: &RemediationResult) -> anyhow::Result<()> {
        self.results.lock().push(result.clone());
        if self.fail {
            anyhow::bail!("audit store unavailable");
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    error_ids: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn error_ids(&self) -> Vec<String> {
        self.error_ids.lock().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, result: &RemediationResult) -> anyhow::Result<()> {
        self.error_ids.lock().push(result.error_id.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Harness
// ----------------------------------------------------------------------------

/// Scripted collaborators with handles kept for assertions
#[derive(Debug)]
pub struct Harness {
    pub matcher: Arc<ScriptedMatcher>,
    pub fixer: Arc<FileFixer>,
    pub tests: Arc<ScriptedTestRunner>,
    pub deployer: Arc<ScriptedDeployer>,
    pub audit: Arc<RecordingAuditSink>,
    pub notifier: Arc<RecordingNotifier>,
}

impl Harness {
    pub fn new(candidates: Vec<FixCandidate>) -> Self {
        Self {
            matcher: Arc::new(ScriptedMatcher::new(candidates)),
            fixer: Arc::new(FileFixer::new()),
            tests: Arc::new(ScriptedTestRunner::passing()),
            deployer: Arc::new(ScriptedDeployer::accepting()),
            audit: Arc::new(RecordingAuditSink::new()),
            notifier: Arc::new(RecordingNotifier::new()),
        }
    }

    pub fn with_fixer(mut self, fixer: FileFixer) -> Self {
        self.fixer = Arc::new(fixer);
        self
    }

    pub fn with_tests(mut self, tests: ScriptedTestRunner) -> Self {
        self.tests = Arc::new(tests);
        self
    }

    pub fn with_deployer(mut self, deployer: ScriptedDeployer) -> Self {
        self.deployer = Arc::new(deployer);
        self
    }

    pub fn collaborators(&self) -> Collaborators {
        Collaborators::new(
            self.matcher.clone(),
            self.fixer.clone(),
            self.tests.clone(),
            self.deployer.clone(),
        )
        .with_audit_sink(self.audit.clone())
        .with_notifier(self.notifier.clone())
    }

    /// Same collaborators with a different fixer
    pub fn collaborators_with_fixer(&self, fixer: Arc<dyn Fixer>) -> Collaborators {
        Collaborators {
            fixer,
            ..self.collaborators()
        }
    }
}
