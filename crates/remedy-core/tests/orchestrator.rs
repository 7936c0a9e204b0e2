//! Stream intake, dedup, lifecycle and retention

use pretty_assertions::assert_eq;
use remedy_core::{
    verify_audit_log, Collaborators, JsonlAuditSink, OrchestratorError, RemediationConfig,
    RemediationOrchestrator, Severity,
};
use remedy_rollback::{FsBackupStore, RollbackManager, DEFAULT_MAX_BACKUPS};
use remedy_test_utils::*;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

async fn orchestrator_with(collaborators: Collaborators) -> RemediationOrchestrator {
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;
    RemediationOrchestrator::new(RemediationConfig::new(), rollback, collaborators).unwrap()
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let harness = Harness::new(Vec::new());
    let orch = orchestrator_with(harness.collaborators()).await;

    let (_tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    assert!(orch.status().running);

    let (_tx2, rx2) = mpsc::channel(8);
    assert!(matches!(orch.start(rx2).await, Err(OrchestratorError::AlreadyRunning)));

    orch.stop().await.unwrap();
    assert!(!orch.status().running);

    let (_tx3, rx3) = mpsc::channel(8);
    orch.start(rx3).await.unwrap();
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn stop_when_stopped_is_a_no_op() {
    let harness = Harness::new(Vec::new());
    let orch = orchestrator_with(harness.collaborators()).await;
    orch.stop().await.unwrap();
    orch.stop().await.unwrap();
}

#[tokio::test]
async fn streamed_errors_are_all_remediated() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(candidates(&["null-check"]));
    let orch = orchestrator_with(harness.collaborators()).await;

    let (tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    for id in ["e-1", "e-2", "e-3"] {
        let source = source_file(dir.path(), &format!("{id}.rs"), "broken\n");
        tx.send(detected_error(id, Severity::High, source)).await.unwrap();
    }
    drop(tx);
    orch.stop().await.unwrap();

    let mut ids: Vec<String> = harness.audit.results().into_iter().map(|r| r.error_id).collect();
    ids.sort();
    assert_eq!(ids, vec!["e-1", "e-2", "e-3"]);
    assert!(harness.audit.results().iter().all(|r| r.success));
    assert_eq!(harness.notifier.error_ids().len(), 3);
}

#[tokio::test]
async fn duplicates_in_flight_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(candidates(&["null-check"]));
    let gated = Arc::new(GatedFixer::new());
    let orch = orchestrator_with(harness.collaborators_with_fixer(gated.clone())).await;

    let first = source_file(dir.path(), "a.rs", "broken\n");
    let second = source_file(dir.path(), "b.rs", "broken\n");

    let (tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    tx.send(detected_error("e-1", Severity::High, &first)).await.unwrap();
    gated.wait_entered().await;

    tx.send(detected_error("e-1", Severity::High, &first)).await.unwrap();
    tx.send(detected_error("e-1", Severity::Critical, &first)).await.unwrap();
    // Channel order: once e-2 is in flight both duplicates were seen
    tx.send(detected_error("e-2", Severity::High, &second)).await.unwrap();
    assert!(eventually(|| gated.calls() == 2).await);

    let active: Vec<String> = orch
        .status()
        .active_remediations
        .into_iter()
        .map(|a| a.error_id)
        .collect();
    assert_eq!(active, vec!["e-1", "e-2"]);

    gated.release();
    drop(tx);
    orch.stop().await.unwrap();

    assert_eq!(gated.calls(), 2);
    assert_eq!(harness.audit.results().len(), 2);
    assert!(orch.status().active_remediations.is_empty());
}

#[tokio::test]
async fn same_id_can_be_remediated_again_after_completion() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(candidates(&["null-check"]));
    let orch = orchestrator_with(harness.collaborators()).await;
    let source = source_file(dir.path(), "a.rs", "broken\n");

    let (tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    tx.send(detected_error("e-1", Severity::High, &source)).await.unwrap();
    assert!(eventually(|| harness.audit.results().len() == 1).await);
    tx.send(detected_error("e-1", Severity::High, &source)).await.unwrap();
    drop(tx);
    orch.stop().await.unwrap();

    assert_eq!(harness.audit.results().len(), 2);
}

#[tokio::test]
async fn stop_waits_for_stuck_collaborator() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(candidates(&["null-check"]));
    let gated = Arc::new(GatedFixer::new());
    let orch = Arc::new(orchestrator_with(harness.collaborators_with_fixer(gated.clone())).await);
    let source = source_file(dir.path(), "a.rs", "broken\n");

    let (tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    tx.send(detected_error("e-1", Severity::High, &source)).await.unwrap();
    gated.wait_entered().await;

    let stopper = tokio::spawn({
        let orch = orch.clone();
        async move { orch.stop().await }
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!stopper.is_finished(), "stop returned while a fix was still running");
    assert!(!orch.status().running);
    assert_eq!(orch.status().active_remediations.len(), 1);

    gated.release();
    tokio::time::timeout(Duration::from_secs(5), stopper)
        .await
        .expect("stop did not finish after release")
        .unwrap()
        .unwrap();
    assert_eq!(harness.audit.results().len(), 1);
}

#[tokio::test]
async fn errors_after_stop_are_not_consumed() {
    let harness = Harness::new(candidates(&["null-check"]));
    let orch = orchestrator_with(harness.collaborators()).await;

    let (tx, rx) = mpsc::channel(8);
    orch.start(rx).await.unwrap();
    orch.stop().await.unwrap();

    // Receiver was dropped with the intake loop
    assert!(tx
        .send(detected_error("e-1", Severity::High, "src/a.rs"))
        .await
        .is_err());
    assert!(harness.audit.results().is_empty());
}

#[tokio::test]
async fn retention_prunes_after_each_remediation() {
    let dir = tempfile::tempdir().unwrap();
    let harness = Harness::new(candidates(&["null-check"]));
    let (rollback, _store) = memory_rollback(2).await;
    let orch =
        RemediationOrchestrator::new(RemediationConfig::new(), rollback.clone(), harness.collaborators())
            .unwrap();

    for id in ["e-1", "e-2", "e-3", "e-4"] {
        let source = source_file(dir.path(), &format!("{id}.rs"), "broken\n");
        let result = orch
            .manual_remediate(detected_error(id, Severity::High, &source))
            .await;
        assert!(result.success);
    }

    let survivors: Vec<String> = rollback
        .list_backups()
        .await
        .into_iter()
        .map(|m| m.source.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(survivors, vec!["e-3.rs", "e-4.rs"]);
}

#[tokio::test]
async fn jsonl_audit_chain_survives_real_runs() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.jsonl");
    let harness = Harness::new(candidates(&["null-check"]));
    let audit = Arc::new(JsonlAuditSink::open(&audit_path).await.unwrap());
    let store = Arc::new(FsBackupStore::new(dir.path().join("backups")));
    let rollback = Arc::new(RollbackManager::open(store, DEFAULT_MAX_BACKUPS).await.unwrap());
    let orch = RemediationOrchestrator::new(
        RemediationConfig::new(),
        rollback.clone(),
        harness.collaborators().with_audit_sink(audit),
    )
    .unwrap();

    for id in ["e-1", "e-2"] {
        let source = source_file(dir.path(), &format!("{id}.rs"), "broken\n");
        let result = orch
            .manual_remediate(detected_error(id, Severity::High, &source))
            .await;
        assert!(result.success);
    }

    assert_eq!(verify_audit_log(&audit_path).await.unwrap(), 2);

    // Backups persisted on disk survive a reopen
    let reopened = RollbackManager::open(
        Arc::new(FsBackupStore::new(dir.path().join("backups"))),
        DEFAULT_MAX_BACKUPS,
    )
    .await
    .unwrap();
    assert_eq!(reopened.list_backups().await.len(), 2);
}

#[tokio::test]
async fn invalid_webhook_is_rejected_at_construction() {
    let harness = Harness::new(Vec::new());
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;
    let config = RemediationConfig::new().with_webhook("ftp://example.com/hook");

    assert!(RemediationOrchestrator::new(config, rollback, harness.collaborators()).is_err());
}
