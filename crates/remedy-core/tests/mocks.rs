//! Collaborator call contracts, checked with mockall

use async_trait::async_trait;
use mockall::mock;
use remedy_core::{
    AppliedFix, Collaborators, DeploymentManager, DetectedError, FixCandidate, Fixer,
    PatternMatcher, RemediationConfig, RemediationFailure, RemediationOrchestrator,
    RemediationOutcome, Severity, TestReport, TestRunner,
};
use remedy_test_utils::{candidates, detected_error, memory_rollback, read, source_file};
use remedy_rollback::DEFAULT_MAX_BACKUPS;
use std::path::Path;
use std::sync::Arc;

mock! {
    pub Matcher {}

    #[async_trait]
    impl PatternMatcher for Matcher {
        async fn find_matches(&self, error: &DetectedError) -> Vec<FixCandidate>;
    }
}

mock! {
    pub Fix {}

    #[async_trait]
    impl Fixer for Fix {
        async fn apply_fix(&self, candidate: &FixCandidate, error: &DetectedError) -> anyhow::Result<AppliedFix>;
    }
}

mock! {
    pub Tests {}

    #[async_trait]
    impl TestRunner for Tests {
        async fn run_tests(&self, source: &Path) -> anyhow::Result<TestReport>;
    }
}

mock! {
    pub Deployer {}

    #[async_trait]
    impl DeploymentManager for Deployer {
        async fn deploy(&self, source: &Path, fix: &AppliedFix) -> anyhow::Result<bool>;
    }
}

fn matcher_returning(names: &'static [&'static str]) -> MockMatcher {
    let mut matcher = MockMatcher::new();
    matcher
        .expect_find_matches()
        .times(1)
        .returning(move |_| candidates(names));
    matcher
}

fn untouched_collaborators(matcher: MockMatcher) -> Collaborators {
    let mut fixer = MockFix::new();
    fixer.expect_apply_fix().times(0);
    let mut tests = MockTests::new();
    tests.expect_run_tests().times(0);
    let mut deployer = MockDeployer::new();
    deployer.expect_deploy().times(0);

    Collaborators::new(
        Arc::new(matcher),
        Arc::new(fixer),
        Arc::new(tests),
        Arc::new(deployer),
    )
}

#[tokio::test]
async fn dry_run_calls_nothing_after_matching() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_file(dir.path(), "a.rs", "broken\n");
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;
    let config = RemediationConfig::new().with_dry_run(true).with_auto_deploy(true);
    let orch = RemediationOrchestrator::new(
        config,
        rollback.clone(),
        untouched_collaborators(matcher_returning(&["null-check", "default-value"])),
    )
    .unwrap();

    let result = orch
        .manual_remediate(detected_error("e-1", Severity::Critical, &source))
        .await;

    assert!(result.success);
    assert!(!result.deployed);
    assert!(!result.rollback_available);
    assert_eq!(result.fix_applied.as_deref(), Some("null-check"));
    assert!(result.log_contains("dry run: would apply null-check"));
    assert!(rollback.list_backups().await.is_empty());
    assert_eq!(read(&source), "broken\n");
}

#[tokio::test]
async fn auto_fix_disabled_stops_after_matching() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_file(dir.path(), "a.rs", "broken\n");
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;
    let orch = RemediationOrchestrator::new(
        RemediationConfig::new().with_auto_fix(false),
        rollback.clone(),
        untouched_collaborators(matcher_returning(&["null-check"])),
    )
    .unwrap();

    let result = orch
        .manual_remediate(detected_error("e-1", Severity::High, &source))
        .await;

    assert_eq!(
        result.outcome,
        RemediationOutcome::Failed {
            reason: RemediationFailure::AutoFixDisabled
        }
    );
    assert!(!result.rollback_available);
    assert!(result.log_contains("null-check"));
    assert!(rollback.list_backups().await.is_empty());
}

#[tokio::test]
async fn fixer_receives_ranked_candidate_and_error() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_file(dir.path(), "a.rs", "broken\n");
    let other = dir.path().join("b.rs");
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;

    let mut fixer = MockFix::new();
    let touched = vec![source.clone(), other.clone()];
    fixer
        .expect_apply_fix()
        .withf(|candidate, error| candidate.name == "null-check" && error.id == "e-1")
        .times(1)
        .returning(move |candidate, _| {
            Ok(AppliedFix::new(&candidate.name, "guarded lookup").with_paths(touched.clone()))
        });

    let mut tests = MockTests::new();
    let expected = source.clone();
    tests
        .expect_run_tests()
        .withf(move |path| path == expected.as_path())
        .times(1)
        .returning(|_| Ok(TestReport::all(3)));

    let mut deployer = MockDeployer::new();
    deployer
        .expect_deploy()
        .withf(|_, fix| fix.candidate_name == "null-check")
        .times(1)
        .returning(|_, _| Ok(true));

    let orch = RemediationOrchestrator::new(
        RemediationConfig::new().with_auto_deploy(true),
        rollback,
        Collaborators::new(
            Arc::new(matcher_returning(&["null-check"])),
            Arc::new(fixer),
            Arc::new(tests),
            Arc::new(deployer),
        ),
    )
    .unwrap();

    let result = orch
        .manual_remediate(detected_error("e-1", Severity::High, &source))
        .await;

    assert!(result.deployed);
    assert_eq!((result.tests_run, result.tests_passed), (3, 3));
    // Only the error's own source is covered by the backup
    assert!(result.log_contains("b.rs is not covered by the backup"));
}

#[tokio::test]
async fn deployment_error_is_retried_with_next_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let source = source_file(dir.path(), "a.rs", "broken\n");
    let (rollback, _store) = memory_rollback(DEFAULT_MAX_BACKUPS).await;

    let mut fixer = MockFix::new();
    fixer
        .expect_apply_fix()
        .times(2)
        .returning(|candidate, _| Ok(AppliedFix::new(&candidate.name, "edit")));

    let mut tests = MockTests::new();
    tests.expect_run_tests().times(2).returning(|_| Ok(TestReport::all(1)));

    let mut deployer = MockDeployer::new();
    let mut seq = mockall::Sequence::new();
    deployer
        .expect_deploy()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Err(anyhow::anyhow!("cluster unreachable")));
    deployer
        .expect_deploy()
        .times(1)
        .in_sequence(&mut seq)
        .returning(|_, _| Ok(true));

    let orch = RemediationOrchestrator::new(
        RemediationConfig::new().with_auto_deploy(true),
        rollback,
        Collaborators::new(
            Arc::new(matcher_returning(&["null-check", "default-value"])),
            Arc::new(fixer),
            Arc::new(tests),
            Arc::new(deployer),
        ),
    )
    .unwrap();

    let result = orch
        .manual_remediate(detected_error("e-1", Severity::Critical, &source))
        .await;

    assert!(result.deployed);
    assert_eq!(result.fix_applied.as_deref(), Some("default-value"));
    assert!(result.log_contains("cluster unreachable"));
}
