mod common;

use common::{cluster_config, engine, test_config};
use converge_cloud::resources::autonomous_vm_cluster;
use converge_cloud::{
    ApiError, BackoffPolicy, CloudApiClient, CreateRequest, Engine, EngineConfig, PollOptions,
    ReconcileError, WorkRequestStatus,
};
use converge_cloud_memory::{InMemoryCloud, Operation, WorkRequestScript};
use std::sync::Arc;
use std::time::Duration;

/// Start a create directly against the platform and return its work request id
async fn accepted_work_request(cloud: &InMemoryCloud) -> String {
    let attributes = autonomous_vm_cluster::descriptor()
        .validate_create(&cluster_config())
        .unwrap();
    let response = cloud
        .create(&CreateRequest::new(autonomous_vm_cluster::KIND, attributes))
        .await
        .unwrap();
    response.work_request.unwrap().id
}

/// ACCEPTED, IN_PROGRESS, SUCCEEDED ends after exactly three reads
#[tokio::test(start_paused = true)]
async fn test_poll_three_reads() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::standard()).await;
    let wr_id = accepted_work_request(&cloud).await;
    let engine = engine(&cloud);

    let wr = engine
        .poll(
            &wr_id,
            PollOptions::new(Duration::from_secs(60), Duration::from_secs(1)),
        )
        .await
        .unwrap();

    assert_eq!(wr.status, WorkRequestStatus::Succeeded);
    assert_eq!(wr.percent_complete, 100.0);
    assert!(wr.time_finished.is_some());
    assert_eq!(cloud.calls(Operation::GetWorkRequest).await, 3);
}

/// A request that never settles times out with bounded reads
#[tokio::test(start_paused = true)]
async fn test_poll_timeout_bounds_reads() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::never_finishes()).await;
    let wr_id = accepted_work_request(&cloud).await;
    let engine = engine(&cloud);

    let timeout = Duration::from_secs(10);
    let interval = Duration::from_secs(1);
    let started = tokio::time::Instant::now();
    let err = engine
        .poll(&wr_id, PollOptions::new(timeout, interval))
        .await
        .unwrap_err();

    let max_reads = (timeout.as_secs() / interval.as_secs()) as u32 + 1;
    match err {
        ReconcileError::PollTimeout {
            work_request_id,
            last_status,
            reads,
            ..
        } => {
            assert_eq!(work_request_id, wr_id);
            assert_eq!(last_status, WorkRequestStatus::InProgress);
            assert!(reads <= max_reads, "{} reads", reads);
            assert!(reads + 1 >= max_reads, "{} reads", reads);
        }
        other => panic!("expected poll timeout, got {:?}", other),
    }
    assert!(started.elapsed() >= timeout);
    assert!(started.elapsed() < timeout + interval);
}

/// Timeouts not divisible by the interval still stop at the deadline
#[tokio::test(start_paused = true)]
async fn test_poll_sleep_capped_at_deadline() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::never_finishes()).await;
    let wr_id = accepted_work_request(&cloud).await;
    let engine = engine(&cloud);

    let started = tokio::time::Instant::now();
    let result = engine
        .poll(
            &wr_id,
            PollOptions::new(Duration::from_millis(2500), Duration::from_secs(1)),
        )
        .await;

    assert!(matches!(result, Err(ReconcileError::PollTimeout { reads: 4, .. })));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(2500));
    assert!(elapsed < Duration::from_secs(3));
}

/// Status reads failing transiently are retried inside the poll
#[tokio::test(start_paused = true)]
async fn test_poll_absorbs_transient_reads() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::standard()).await;
    let wr_id = accepted_work_request(&cloud).await;
    cloud
        .inject_faults(
            Operation::GetWorkRequest,
            2,
            ApiError::new(500, "InternalServerError", "oops"),
        )
        .await;
    let engine = engine(&cloud);

    let wr = engine
        .poll(
            &wr_id,
            PollOptions::new(Duration::from_secs(60), Duration::from_secs(1)),
        )
        .await
        .unwrap();
    assert_eq!(wr.status, WorkRequestStatus::Succeeded);
    assert_eq!(cloud.calls(Operation::GetWorkRequest).await, 5);
}

#[tokio::test(start_paused = true)]
async fn test_poll_transient_exhausted() {
    let cloud = Arc::new(InMemoryCloud::new());
    let wr_id = accepted_work_request(&cloud).await;
    let attempts = test_config().retry.max_attempts;
    cloud
        .inject_faults(
            Operation::GetWorkRequest,
            attempts as usize,
            ApiError::network("timeout"),
        )
        .await;
    let engine = engine(&cloud);

    let err = engine
        .poll(
            &wr_id,
            PollOptions::new(Duration::from_secs(60), Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ReconcileError::TransientFailure { attempts: a, .. } if a == attempts
    ));
}

/// Backoff between retried status reads never outlasts the poll budget
#[tokio::test(start_paused = true)]
async fn test_poll_retry_backoff_capped_at_deadline() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::never_finishes()).await;
    let wr_id = accepted_work_request(&cloud).await;
    cloud
        .inject_faults(
            Operation::GetWorkRequest,
            10,
            ApiError::new(503, "ServiceUnavailable", "busy"),
        )
        .await;
    let engine = Engine::new(
        cloud.clone(),
        EngineConfig {
            retry: BackoffPolicy {
                base_delay: Duration::from_secs(5),
                max_delay: Duration::from_secs(5),
                max_attempts: 5,
                ..test_config().retry
            },
            ..test_config()
        },
    );

    let started = tokio::time::Instant::now();
    let err = engine
        .poll(
            &wr_id,
            PollOptions::new(Duration::from_secs(3), Duration::from_secs(1)),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReconcileError::TransientFailure { attempts: 2, .. }
    ));
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_secs(4));
}

/// Create through the engine times out under the configured create timeout
#[tokio::test(start_paused = true)]
async fn test_create_poll_timeout() {
    let cloud = Arc::new(InMemoryCloud::new());
    cloud.push_script(WorkRequestScript::never_finishes()).await;
    let engine = engine(&cloud);

    let err = engine
        .create(&autonomous_vm_cluster::descriptor(), &cluster_config())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "poll_timeout");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_work_request() {
    let cloud = Arc::new(InMemoryCloud::new());
    let engine = engine(&cloud);

    let err = engine
        .poll(
            "ocid1.workrequest.missing",
            PollOptions::new(Duration::from_secs(5), Duration::from_secs(1)),
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
