//! Mesh Node
//!
//! Starts an in-process mesh, runs a small dependent pipeline through it
//! and prints the outcome of each stage followed by a health snapshot.
//!
//! Configuration comes from `MESHWORK_*` variables; `MESHWORK_NODES` sets
//! how many workers to start (default 7).

use std::time::Duration;

use meshwork_node::{handler_fn, HandlerTable, MeshDriver, NodeConfig, TaskOutcome};
use meshwork_tasks::{Priority, Task};
use meshwork_topology::{NodeDescriptor, NodeId};
use tracing::{info, warn};

const STAGES: [&str; 3] = ["ingest", "transform", "publish"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    meshwork_logging::init();

    let config = NodeConfig::from_env()?;
    let workers: u64 = match std::env::var("MESHWORK_NODES") {
        Ok(value) => value.trim().parse()?,
        Err(_) => 7,
    };
    let settle = config.mesh.discovery_interval * 5;

    let handlers = HandlerTable::builder()
        .register(
            "pipeline",
            handler_fn(|_, task: &Task| {
                let mut out = task.id.as_str().as_bytes().to_vec();
                out.extend(task.params.iter().rev());
                Ok(out)
            }),
        )
        .build();
    let nodes = (1..=workers).map(|i| NodeDescriptor::worker(NodeId(i), ["pipeline"]));

    info!(workers, "starting mesh");
    let mesh = MeshDriver::spawn(config, handlers, nodes)?;
    tokio::time::sleep(settle).await;

    let mut handles = Vec::new();
    let mut previous: Option<&str> = None;
    for stage in STAGES {
        let mut task = Task::new(stage, "pipeline")
            .with_params(stage.as_bytes().to_vec())
            .with_priority(Priority::High);
        if let Some(dep) = previous {
            task = task.depends_on(dep);
        }
        handles.push(mesh.submit(task).await?);
        previous = Some(stage);
    }

    for handle in handles {
        let id = handle.id().clone();
        match tokio::time::timeout(Duration::from_secs(60), handle.outcome()).await {
            Ok(Ok(TaskOutcome::Committed(result))) => info!(
                task = %id,
                votes = result.votes,
                view = result.view,
                digest = ?result.digest,
                "committed"
            ),
            Ok(Ok(other)) => warn!(task = %id, outcome = ?other, "did not commit"),
            Ok(Err(e)) => warn!(task = %id, error = %e, "outcome lost"),
            Err(_) => warn!(task = %id, "timed out"),
        }
    }

    let health = mesh.health().await?;
    println!("{}", health.to_json()?);

    mesh.shutdown().await?;
    Ok(())
}
