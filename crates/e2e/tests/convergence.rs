//! Convergence behavior under delayed visibility.
//!
//! Every effect in the simulated cloud lands after a delay; these tests
//! pin down that the harness keeps probing until the delay passes and
//! spends its full budget when nothing ever arrives.

use std::time::{Duration, Instant};

use serde_json::json;

use vigil_e2e::{init_tracing, SimCloud, SimConfig};
use vigil_harness::activity::ActivityService;
use vigil_harness::error::Error;
use vigil_harness::invoke::ResourceInvoker;
use vigil_harness::queue::{wait_for_message, MessageSource};
use vigil_harness::stack::StackLifecycle;
use vigil_harness::workflow::{wait_for_status, ExecutionStatus, WorkflowObserver};

fn cloud_with(delay: Duration) -> SimCloud {
    init_tracing();
    SimCloud::new(SimConfig {
        visibility_delay: delay,
        poll_wait: Duration::from_millis(100),
        ..SimConfig::default()
    })
}

async fn deployed_queue(cloud: &SimCloud, name: &str) {
    cloud.plan_queue(name);
    cloud.deploy().await.unwrap();
}

/// A message sent before its visibility deadline is invisible to an
/// immediate receive and arrives once the deadline passes.
#[tokio::test]
async fn delayed_message_arrives_after_its_deadline() {
    let delay = Duration::from_millis(60);
    let cloud = cloud_with(delay);
    deployed_queue(&cloud, "orders").await;

    // Anchor before the send: the visibility deadline starts there, and
    // the elapsed check below must measure from the same origin.
    let started = Instant::now();
    cloud
        .send_message("orders", "{\"guid\":\"1234\"}", None, None)
        .await
        .unwrap();

    let queue = cloud.queue("orders");
    let early = queue.receive(Duration::from_millis(1)).await.unwrap();
    assert!(early.is_none(), "message visible before its deadline");

    let message = wait_for_message(&queue, Duration::from_secs(2))
        .await
        .unwrap();
    assert!(started.elapsed() >= delay, "received before the deadline");
    assert_eq!(message.body, "{\"guid\":\"1234\"}");
    assert_eq!(message.receive_count, 1);
}

/// An empty queue consumes the entire receive budget before failing.
#[tokio::test]
async fn an_empty_queue_spends_the_whole_timeout() {
    let cloud = cloud_with(Duration::ZERO);
    deployed_queue(&cloud, "orders").await;

    let timeout = Duration::from_millis(100);
    let started = Instant::now();
    let err = wait_for_message(&cloud.queue("orders"), timeout)
        .await
        .unwrap_err();

    assert!(started.elapsed() >= timeout, "gave up early");
    match err {
        Error::ReceiveTimeout { queue, receives, .. } => {
            assert_eq!(queue, "orders");
            assert_eq!(receives, 1, "sub-cap timeout needs a single chunk");
        }
        other => panic!("expected ReceiveTimeout, got {}", other),
    }
}

/// Receives do not consume: the same message is redelivered with an
/// incremented count and a fresh receipt handle.
#[tokio::test]
async fn receive_counts_accumulate_per_delivery() {
    let cloud = cloud_with(Duration::ZERO);
    deployed_queue(&cloud, "orders").await;
    cloud.send_message("orders", "hello", None, None).await.unwrap();

    let queue = cloud.queue("orders");
    let first = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();
    let second = queue.receive(Duration::from_millis(50)).await.unwrap().unwrap();

    assert_eq!(first.receive_count, 1);
    assert_eq!(second.receive_count, 2);
    assert_ne!(first.receipt_handle, second.receipt_handle);
    assert_eq!(first.body, second.body);
}

/// A terminal report stays invisible until the delay passes; the status
/// wait keeps retrying through the stale Running reads.
#[tokio::test]
async fn status_transitions_respect_the_visibility_delay() {
    init_tracing();
    let delay = Duration::from_millis(200);
    // The poll bound must outlast the delay or the parked task is never
    // handed out.
    let cloud = SimCloud::new(SimConfig {
        visibility_delay: delay,
        poll_wait: Duration::from_secs(2),
        ..SimConfig::default()
    });
    cloud.plan_workflow("order-flow", "order-tasks");
    cloud.deploy().await.unwrap();

    let execution = cloud
        .start_execution("order-flow", &json!({ "guid": "1234" }))
        .await
        .unwrap();
    let handoff = cloud
        .poll_task("order-tasks", "conformance-worker")
        .await
        .unwrap()
        .unwrap();
    cloud
        .record_success(&handoff.token, "\"SUCCEEDED\"")
        .await
        .unwrap();

    let stale = cloud.describe_execution(&execution).await.unwrap();
    assert_eq!(
        stale.status,
        ExecutionStatus::Running,
        "terminal status visible before its deadline"
    );

    let reported = Instant::now();
    let snapshot = wait_for_status(
        &cloud,
        &execution,
        ExecutionStatus::Succeeded,
        200,
        Duration::from_millis(10),
    )
    .await
    .unwrap();
    assert!(reported.elapsed() >= delay / 2, "converged implausibly fast");
    assert_eq!(snapshot.output.as_deref(), Some("\"SUCCEEDED\""));
}

/// A status outside the in-flight set aborts the wait on the first probe
/// instead of burning the retry budget.
#[tokio::test]
async fn a_dead_execution_fails_fast() {
    let cloud = cloud_with(Duration::ZERO);
    cloud.plan_workflow("order-flow", "order-tasks");
    cloud.deploy().await.unwrap();

    let execution = cloud
        .start_execution("order-flow", &json!({}))
        .await
        .unwrap();
    cloud.stop_execution(&execution).await.unwrap();

    let started = Instant::now();
    let err = wait_for_status(
        &cloud,
        &execution,
        ExecutionStatus::Succeeded,
        1000,
        Duration::from_millis(50),
    )
    .await
    .unwrap_err();

    assert!(
        started.elapsed() < Duration::from_secs(5),
        "fatal status must not burn the budget"
    );
    match err {
        Error::Fatal { attempt, source, .. } => {
            assert_eq!(attempt, 1);
            let message = source.to_string();
            assert!(message.contains("bad status: ABORTED"), "got: {}", message);
            assert!(message.contains("stopped by caller"), "got: {}", message);
        }
        other => panic!("expected Fatal, got {}", other),
    }
}
