//! Scenarios run through the async driver on a paused clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use meshwork_consensus::TaskId;
use meshwork_integration_tests::workers;
use meshwork_node::{
    handler_fn, Error, HandlerError, HandlerTable, MeshDriver, MeshHandle, NodeConfig, TaskOutcome,
};
use meshwork_tasks::{FailureReason, Task, TaskError, TaskStatus};
use meshwork_topology::NodeId;
use tokio::time::{sleep, timeout};

fn echo() -> HandlerTable {
    HandlerTable::builder()
        .register("render", handler_fn(|_, task: &Task| Ok(task.params.clone())))
        .build()
}

async fn start(n: u64, handlers: HandlerTable) -> MeshHandle {
    meshwork_logging::init_for_tests();
    let mesh = MeshDriver::spawn(NodeConfig::default(), handlers, workers(1..=n, &["render"]))
        .expect("driver starts");
    sleep(Duration::from_secs(10)).await;
    mesh
}

async fn finish(mesh: &MeshHandle, task: Task, within: Duration) -> TaskOutcome {
    let handle = mesh.submit(task).await.expect("submitted");
    timeout(within, handle.outcome())
        .await
        .expect("outcome in time")
        .expect("driver alive")
}

#[tokio::test(start_paused = true)]
async fn a_forging_node_is_flagged_after_the_honest_value_commits() {
    let handlers = HandlerTable::builder()
        .register(
            "render",
            handler_fn(|node, task: &Task| {
                if node == NodeId(4) {
                    Ok(b"forged".to_vec())
                } else {
                    Ok(task.params.clone())
                }
            }),
        )
        .build();
    let mesh = start(4, handlers).await;

    let outcome = finish(
        &mesh,
        Task::new("ledger", "render").with_params(b"balance=10".to_vec()),
        Duration::from_secs(60),
    )
    .await;
    assert_eq!(outcome.value(), Some(&b"balance=10"[..]));

    sleep(Duration::from_secs(5)).await;
    let health = mesh.health().await.unwrap();
    assert!(health.node(NodeId(4)).is_some_and(|n| n.flagged));
    assert!(health
        .nodes
        .iter()
        .filter(|n| n.id != NodeId(4))
        .all(|n| !n.flagged));

    mesh.clear_flag(NodeId(4)).await.unwrap();
    let health = mesh.health().await.unwrap();
    assert!(health.node(NodeId(4)).is_some_and(|n| !n.flagged));
    mesh.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn the_majority_side_keeps_committing_through_a_partition() {
    let mesh = start(7, echo()).await;
    mesh.partition(vec![vec![NodeId(5), NodeId(6), NodeId(7)]])
        .await
        .unwrap();

    let outcome = finish(
        &mesh,
        Task::new("during-split", "render").with_params(vec![1]),
        Duration::from_secs(120),
    )
    .await;
    assert_eq!(outcome.value(), Some(&[1u8][..]));

    mesh.heal().await.unwrap();
    sleep(Duration::from_secs(40)).await;
    let health = mesh.health().await.unwrap();
    assert_eq!(health.active_count(), 7);
    assert!(!health.fragmented);

    let outcome = finish(
        &mesh,
        Task::new("after-heal", "render").with_params(vec![2]),
        Duration::from_secs(60),
    )
    .await;
    assert!(outcome.is_committed());
    mesh.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn a_dependency_chain_runs_in_order() {
    let seen: Arc<Mutex<Vec<TaskId>>> = Arc::default();
    let log = Arc::clone(&seen);
    let handlers = HandlerTable::builder()
        .register(
            "render",
            handler_fn(move |_, task: &Task| {
                if let Ok(mut seen) = log.lock() {
                    seen.push(task.id.clone());
                }
                Ok(task.id.as_str().as_bytes().to_vec())
            }),
        )
        .build();
    let mesh = start(4, handlers).await;

    let mut handles = Vec::new();
    for (stage, dep) in [("fetch", None), ("decode", Some("fetch")), ("store", Some("decode"))] {
        let mut task = Task::new(stage, "render");
        if let Some(dep) = dep {
            task = task.depends_on(dep);
        }
        handles.push(mesh.submit(task).await.unwrap());
    }
    for handle in handles {
        let outcome = timeout(Duration::from_secs(120), handle.outcome())
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_committed());
    }

    let seen = seen.lock().unwrap();
    let first = |id: &str| seen.iter().position(|t| t.as_str() == id).unwrap();
    let last = |id: &str| seen.iter().rposition(|t| t.as_str() == id).unwrap();
    assert!(last("fetch") < first("decode"));
    assert!(last("decode") < first("store"));
}

#[tokio::test(start_paused = true)]
async fn dependents_of_a_failed_task_fail_too() {
    let handlers = HandlerTable::builder()
        .register(
            "render",
            handler_fn(|_, task: &Task| {
                if task.id.as_str() == "corrupt" {
                    Err(HandlerError::from("checksum mismatch"))
                } else {
                    Ok(vec![1])
                }
            }),
        )
        .build();
    let mesh = start(4, handlers).await;

    let parent = mesh.submit(Task::new("corrupt", "render")).await.unwrap();
    let child = mesh
        .submit(Task::new("derived", "render").depends_on("corrupt"))
        .await
        .unwrap();

    let parent = timeout(Duration::from_secs(300), parent.outcome())
        .await
        .unwrap()
        .unwrap();
    assert!(matches!(parent, TaskOutcome::Failed(_)));

    let child = timeout(Duration::from_secs(10), child.outcome())
        .await
        .unwrap()
        .unwrap();
    let TaskOutcome::Failed(report) = child else {
        panic!("expected failure, got {child:?}");
    };
    assert_eq!(
        report.last_reason(),
        Some(&FailureReason::DependencyFailed(TaskId::new("corrupt")))
    );
    assert_eq!(mesh.status("derived").await.unwrap(), Some(TaskStatus::Failed));
}

#[tokio::test(start_paused = true)]
async fn an_unserved_capability_fails_without_a_route() {
    let mesh = start(4, echo()).await;

    let outcome = finish(&mesh, Task::new("warp", "teleport"), Duration::from_secs(300)).await;
    let TaskOutcome::Failed(report) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert!(!report.attempts.is_empty());
    assert!(report
        .attempts
        .iter()
        .all(|a| a.reason == FailureReason::NoRoute));
}

#[tokio::test(start_paused = true)]
async fn cyclic_submissions_are_refused() {
    let mesh = start(4, echo()).await;

    let _a = mesh
        .submit(Task::new("left", "render").depends_on("right"))
        .await
        .unwrap();
    let refused = mesh
        .submit(Task::new("right", "render").depends_on("left"))
        .await;
    assert!(matches!(
        refused,
        Err(Error::Task(TaskError::CyclicDependency { .. }))
    ));
    assert_eq!(mesh.status("right").await.unwrap(), None);
}
