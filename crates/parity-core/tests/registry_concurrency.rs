//! Build-once guarantees under concurrent callers.

use std::sync::Arc;
use std::time::Duration;

use parity_core::fakes::FakeBuilder;
use parity_core::{BuildError, BuildRegistry, BuildStatus};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_trigger_exactly_one_build() {
    let builder = Arc::new(FakeBuilder::new().with_delay(Duration::from_millis(50)));
    let registry = Arc::new(BuildRegistry::new(["Dockerfile_test_run"], builder.clone()));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry.ensure_built("Dockerfile_test_run").await
        }));
    }

    for task in tasks {
        task.await.expect("task panicked").expect("build failed");
    }

    assert_eq!(builder.build_count("Dockerfile_test_run"), 1);
    assert_eq!(
        registry.status("Dockerfile_test_run"),
        Some(BuildStatus::Built)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_failure() {
    let builder = Arc::new(
        FakeBuilder::new()
            .failing("Dockerfile_test_bad")
            .with_delay(Duration::from_millis(30)),
    );
    let registry = Arc::new(BuildRegistry::new(["Dockerfile_test_bad"], builder.clone()));

    let results = futures::future::join_all((0..8).map(|_| {
        let registry = Arc::clone(&registry);
        async move { registry.ensure_built("Dockerfile_test_bad").await }
    }))
    .await;

    let direct = results
        .iter()
        .filter(|r| matches!(r, Err(BuildError::Failed { .. })))
        .count();
    let inherited = results
        .iter()
        .filter(|r| matches!(r, Err(BuildError::PreviouslyFailed { .. })))
        .count();

    assert_eq!(direct, 1, "the failure is reported once");
    assert_eq!(inherited, 7);
    assert_eq!(builder.build_count("Dockerfile_test_bad"), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_distinct_artifacts_build_independently() {
    let builder = Arc::new(FakeBuilder::new().with_delay(Duration::from_millis(200)));
    let artifacts: Vec<String> = (0..6).map(|i| format!("Dockerfile_test_{i}")).collect();
    let registry = Arc::new(BuildRegistry::new(artifacts.clone(), builder.clone()));

    let started = std::time::Instant::now();
    let results = futures::future::join_all(artifacts.iter().map(|id| {
        let registry = Arc::clone(&registry);
        let id = id.clone();
        tokio::spawn(async move { registry.ensure_built(&id).await })
    }))
    .await;

    for result in results {
        result.expect("task panicked").expect("build failed");
    }
    assert_eq!(builder.total_builds(), 6);
    // Serialized builds would take 1.2s.
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_failing_artifact_does_not_affect_others() {
    let builder = Arc::new(FakeBuilder::new().failing("Dockerfile_test_bad"));
    let registry = Arc::new(BuildRegistry::new(
        ["Dockerfile_test_bad", "Dockerfile_test_good"],
        builder.clone(),
    ));

    let bad = registry.ensure_built("Dockerfile_test_bad").await;
    let good = registry.ensure_built("Dockerfile_test_good").await;

    assert!(bad.is_err());
    assert!(good.is_ok());
    assert_eq!(
        registry.status("Dockerfile_test_good"),
        Some(BuildStatus::Built)
    );
}
