//! End-to-end scenarios across mesh, router and consensus.

use std::time::{Duration, Instant};

use meshwork_consensus::{ConsensusConfig, LocalCluster, Proposal, TaskId};
use meshwork_integration_tests::{settled_mesh, workers, Pipeline};
use meshwork_mesh::{MeshConfig, RouteRequest, RoutingStrategy};
use meshwork_tasks::{
    DelegationStrategy, FailureReason, RouterConfig, RouterEvent, Task, TaskError, TaskStatus,
};
use meshwork_topology::{ClusterId, NodeDescriptor, NodeId, Role};

fn honest(task: &TaskId) -> impl FnMut(NodeId) -> Option<Proposal> + '_ {
    move |_| Some(Proposal::new(task.clone(), b"result".to_vec()))
}

fn render_pipeline(n: u64, config: RouterConfig) -> Pipeline {
    let now = Instant::now();
    let mesh = settled_mesh(MeshConfig::default(), workers(1..=n, &["render"]), now);
    Pipeline::new(mesh, NodeId(1), config, now)
}

#[test]
fn three_honest_validators_decide_the_matching_proposal() {
    meshwork_logging::init_for_tests();
    let task = TaskId::new("scenario-a");
    let mut cluster = LocalCluster::new(3, ConsensusConfig::default());
    cluster.start(&task, 1, 1, honest(&task)).unwrap();

    for id in cluster.validators() {
        let result = cluster.decision_of(id, &task).expect("decided");
        assert!(result.decided);
        assert_eq!(result.view, 0);
        assert_eq!(result.votes, 3);
        assert_eq!(result.value.as_deref(), Some(&b"result"[..]));
    }
}

#[test]
fn a_forged_result_is_outvoted_and_its_node_flagged() {
    meshwork_logging::init_for_tests();
    let mut pipeline = render_pipeline(4, RouterConfig::default());
    let id = pipeline
        .router
        .submit(Task::new("scenario-b", "render"), pipeline.now)
        .unwrap();
    let events = pipeline.router.assign_ready(&mut pipeline.mesh, pipeline.now);
    assert!(matches!(&events[..], [RouterEvent::Assigned(a)] if a.assignees.len() == 4));

    let played = pipeline.play(&id, |node| {
        if node == NodeId(4) {
            b"forged".to_vec()
        } else {
            b"result".to_vec()
        }
    });

    assert_eq!(played.committed_value(), Some(&b"result"[..]));
    assert_eq!(pipeline.router.status(&id), Some(TaskStatus::Committed));
    assert!(played.flagged.contains(&NodeId(4)));
    let health = pipeline.mesh.health();
    assert!(health.node(NodeId(4)).is_some_and(|n| n.flagged));
    assert!(health.node(NodeId(1)).is_some_and(|n| !n.flagged));
}

#[test]
fn a_silent_primary_is_replaced_by_the_next_id() {
    meshwork_logging::init_for_tests();
    let task = TaskId::new("scenario-c");
    let mut cluster = LocalCluster::new(4, ConsensusConfig::default());
    cluster.crash(NodeId(1));
    cluster.start(&task, 1, 1, honest(&task)).unwrap();
    assert!(cluster.decisions().is_empty());

    assert!(cluster.settle(&task, Duration::from_millis(250), 80));
    for id in [NodeId(2), NodeId(3), NodeId(4)] {
        let result = cluster.decision_of(id, &task).expect("decided after view change");
        assert!(result.view >= 1);
        assert_eq!(result.value.as_deref(), Some(&b"result"[..]));
    }
}

#[test]
fn a_dependency_cycle_never_reaches_pending() {
    meshwork_logging::init_for_tests();
    let mut pipeline = render_pipeline(4, RouterConfig::default());
    pipeline
        .router
        .submit(Task::new("a", "render").depends_on("b"), pipeline.now)
        .unwrap();
    let err = pipeline
        .router
        .submit(Task::new("b", "render").depends_on("a"), pipeline.now)
        .unwrap_err();

    assert!(matches!(err, TaskError::CyclicDependency { .. }));
    assert_eq!(pipeline.router.status(&TaskId::new("b")), None);
    assert_eq!(pipeline.router.status(&TaskId::new("a")), Some(TaskStatus::Pending));
}

#[test]
fn an_oversized_cluster_splits_and_tasks_cross_gateways() {
    meshwork_logging::init_for_tests();
    let now = Instant::now();
    let mut nodes = workers(1..=24, &["render"]);
    nodes.extend(workers([25], &["encode"]));
    let mesh = settled_mesh(MeshConfig::default(), nodes, now);

    let clusters: Vec<_> = mesh.clusters().cloned().collect();
    assert_eq!(clusters.len(), 2);
    assert!(clusters.iter().all(|c| c.len() <= 20));
    assert_ne!(clusters[0].coordinator, clusters[1].coordinator);

    let home = mesh.node(NodeId(25)).unwrap().cluster;
    let away = clusters.iter().find(|c| c.id != home).unwrap().clone();
    let origin = away.coordinator.unwrap();

    let route = mesh
        .route(
            origin,
            &RouteRequest::new("encode").with_strategy(RoutingStrategy::Hierarchical),
        )
        .unwrap();
    assert_eq!(route[0].via, away.gateway);
    let gateways = route[0]
        .path
        .iter()
        .filter(|n| mesh.node(**n).is_some_and(|node| node.role == Role::Gateway))
        .count();
    assert_eq!(gateways, 2);

    let config = RouterConfig::default().with_routing(RoutingStrategy::Hierarchical);
    let mut pipeline = Pipeline::new(mesh, origin, config, now);
    let id = pipeline
        .router
        .submit(
            Task::new("transcode", "encode")
                .from_origin(origin)
                .single_assignee(),
            now,
        )
        .unwrap();
    let events = pipeline.router.assign_ready(&mut pipeline.mesh, now);
    assert!(matches!(&events[..], [RouterEvent::Assigned(a)] if a.assignees == vec![NodeId(25)]));

    let played = pipeline.play(&id, |_| b"h264".to_vec());
    assert_eq!(played.committed_value(), Some(&b"h264"[..]));
}

#[test]
fn a_short_cluster_borrows_validators_across_the_gateway() {
    meshwork_logging::init_for_tests();
    let now = Instant::now();
    let nodes = (1..=20u64).map(|id| {
        let capabilities: &[&str] = match id {
            1 | 2 | 11..=14 => &["encode"],
            _ => &["render"],
        };
        let cluster = if id <= 10 { ClusterId(0) } else { ClusterId(1) };
        NodeDescriptor::worker(NodeId(id), capabilities.iter().copied()).in_cluster(cluster)
    });
    let mesh = settled_mesh(MeshConfig::default(), nodes.collect(), now);
    let mut pipeline = Pipeline::new(mesh, NodeId(1), RouterConfig::default(), now);

    let id = pipeline
        .router
        .submit(Task::new("transcode", "encode"), now)
        .unwrap();
    let events = pipeline.router.assign_ready(&mut pipeline.mesh, now);
    let [RouterEvent::Assigned(assignment)] = &events[..] else {
        panic!("expected an assignment, got {events:?}");
    };
    assert_eq!(assignment.assignees.len(), 4);
    assert!(assignment.assignees.iter().any(|n| n.0 >= 11));

    let played = pipeline.play(&id, |_| b"h264".to_vec());
    assert_eq!(played.committed_value(), Some(&b"h264"[..]));
}

#[test]
fn a_rejected_round_is_retried_with_more_validators() {
    meshwork_logging::init_for_tests();
    let config = RouterConfig::default().with_delegation(DelegationStrategy::RoundRobin);
    let mut pipeline = render_pipeline(7, config);
    let id = pipeline
        .router
        .submit(Task::new("contested", "render"), pipeline.now)
        .unwrap();
    pipeline.router.assign_ready(&mut pipeline.mesh, pipeline.now);
    assert_eq!(pipeline.router.assignees(&id).len(), 4);

    let first = pipeline.play(&id, |node| format!("opinion-{}", node.0).into_bytes());
    assert!(first.events.iter().any(|e| matches!(
        e,
        RouterEvent::Retrying { reason: FailureReason::Rejected { .. }, .. }
    )));
    assert_eq!(pipeline.router.fault_tolerance(&id), Some(2));

    pipeline.advance(Duration::from_secs(1));
    pipeline.router.assign_ready(&mut pipeline.mesh, pipeline.now);
    assert_eq!(pipeline.router.assignees(&id).len(), 7);

    let second = pipeline.play(&id, |_| b"agreed".to_vec());
    assert_eq!(second.committed_value(), Some(&b"agreed"[..]));
    assert_eq!(pipeline.router.attempt(&id), Some(2));
}

#[test]
fn dependents_wait_for_commit_and_fail_with_their_dependency() {
    meshwork_logging::init_for_tests();
    let config = RouterConfig::default().with_max_retries(0);
    let mut pipeline = render_pipeline(4, config);
    let now = pipeline.now;
    let parent = pipeline
        .router
        .submit(Task::new("parent", "render").single_assignee(), now)
        .unwrap();
    let child = pipeline
        .router
        .submit(Task::new("child", "render").depends_on("parent"), now)
        .unwrap();

    pipeline.router.assign_ready(&mut pipeline.mesh, now);
    assert_eq!(pipeline.router.status(&child), Some(TaskStatus::Pending));
    assert!(pipeline.router.assignees(&child).is_empty());

    let node = pipeline.router.assignees(&parent)[0];
    let events = pipeline
        .router
        .assignee_failed(&parent, 1, node, "disk full", &mut pipeline.mesh, now)
        .unwrap();

    assert_eq!(pipeline.router.status(&parent), Some(TaskStatus::Failed));
    assert_eq!(pipeline.router.status(&child), Some(TaskStatus::Failed));
    let child_report = events.iter().find_map(|e| match e {
        RouterEvent::Failed(r) if r.task == child => Some(r),
        _ => None,
    });
    assert!(matches!(
        child_report.and_then(|r| r.last_reason()),
        Some(FailureReason::DependencyFailed(dep)) if *dep == parent
    ));
}
