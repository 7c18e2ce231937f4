//! Meshwork Node
//!
//! Runs a mesh inside one process: an actor per node, a driver that owns
//! the registry and the task router, and an in-memory transport between
//! them that frames every message through the protocol bridge.
//!
//! # Architecture
//!
//! ```text
//!             ┌────────────── MeshDriver ──────────────┐
//!  MeshHandle │ MeshNetwork  TaskRouter  accusations   │
//!  ─────────► │     ▲ heartbeats, gossip, reports      │
//!             └─────┼──────────────────────────────────┘
//!                   │ MemoryTransport (ProtocolBridge frames)
//!        ┌──────────┼──────────┬─────────────────┐
//!   NodeActor(1) NodeActor(2) ...            NodeActor(n)
//!     │ lanes: one per task, each with its own ConsensusEngine
//! ```
//!
//! - Nodes heartbeat the driver; silence is what the failure detector
//!   sees, so a crashed actor is noticed exactly like a dead host.
//! - Discovery pushes travel over the transport and respect partitions.
//! - A node runs the capability's [`TaskHandler`], then joins the PBFT
//!   round for the task if one is needed. Validators report verdicts back
//!   to the driver, which commits once `f + 1` agree.
//!
//! # Example
//!
//! ```rust,no_run
//! use meshwork_node::{handler_fn, HandlerTable, MeshDriver, NodeConfig};
//! use meshwork_tasks::Task;
//! use meshwork_topology::{NodeDescriptor, NodeId};
//!
//! # async fn demo() -> meshwork_node::Result<()> {
//! let handlers = HandlerTable::builder()
//!     .register("hash", handler_fn(|_, task: &Task| Ok(task.params.clone())))
//!     .build();
//! let nodes = (1..=4).map(|i| NodeDescriptor::worker(NodeId(i), ["hash"]));
//! let mesh = MeshDriver::spawn(NodeConfig::from_env()?, handlers, nodes)?;
//!
//! let handle = mesh.submit(Task::new("t-1", "hash").with_params(b"abc".to_vec())).await?;
//! println!("{:?}", handle.outcome().await?);
//! # Ok(())
//! # }
//! ```

mod accusations;
mod actor;
pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod gossip;
pub mod handle;
pub mod handler;
mod lane;
pub mod transport;

pub use config::NodeConfig;
pub use context::{MeshContext, DRIVER_ADDRESS};
pub use driver::MeshDriver;
pub use error::{Error, Result};
pub use gossip::GossipQueue;
pub use handle::{MeshHandle, TaskHandle, TaskOutcome};
pub use handler::{handler_fn, FnHandler, HandlerError, HandlerTable, HandlerTableBuilder, TaskHandler};
pub use transport::{MemoryTransport, Transport};
