//! Shared, read-only state handed to every actor.

use std::sync::Arc;

use meshwork_topology::NodeId;

use crate::config::NodeConfig;
use crate::handler::HandlerTable;
use crate::transport::MemoryTransport;

/// Address the driver receives on.
pub const DRIVER_ADDRESS: NodeId = NodeId(0);

/// Built once per mesh and passed to each actor; nothing here changes
/// after startup.
#[derive(Debug)]
pub struct MeshContext {
    pub config: NodeConfig,
    pub handlers: HandlerTable,
    pub transport: Arc<MemoryTransport>,
    /// Where nodes send heartbeats and task reports.
    pub driver: NodeId,
}

impl MeshContext {
    pub fn new(config: NodeConfig, handlers: HandlerTable, transport: Arc<MemoryTransport>) -> Self {
        Self {
            config,
            handlers,
            transport,
            driver: DRIVER_ADDRESS,
        }
    }
}
