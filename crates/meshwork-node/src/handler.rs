//! Capability handlers.
//!
//! The table is wired once at startup and never changes while the mesh
//! runs. Each node looks up the handler for a task's capability and runs
//! it to produce its proposal.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use meshwork_tasks::Task;
use meshwork_topology::{Capability, NodeId};
use thiserror::Error;

/// A handler's failure, reported back to the router.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl From<&str> for HandlerError {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for HandlerError {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Business logic for one capability.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Produce `node`'s result for `task`.
    async fn execute(&self, node: NodeId, task: &Task) -> Result<Vec<u8>, HandlerError>;
}

/// Adapts a synchronous closure into a [`TaskHandler`].
pub struct FnHandler<F>(F);

/// Wrap a closure as a handler.
pub fn handler_fn<F>(f: F) -> FnHandler<F>
where
    F: Fn(NodeId, &Task) -> Result<Vec<u8>, HandlerError> + Send + Sync,
{
    FnHandler(f)
}

#[async_trait]
impl<F> TaskHandler for FnHandler<F>
where
    F: Fn(NodeId, &Task) -> Result<Vec<u8>, HandlerError> + Send + Sync,
{
    async fn execute(&self, node: NodeId, task: &Task) -> Result<Vec<u8>, HandlerError> {
        (self.0)(node, task)
    }
}

/// Immutable capability → handler map.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<HashMap<Capability, Arc<dyn TaskHandler>>>,
}

impl HandlerTable {
    pub fn builder() -> HandlerTableBuilder {
        HandlerTableBuilder::default()
    }

    pub fn get(&self, capability: &Capability) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(capability).cloned()
    }

    pub fn capabilities(&self) -> impl Iterator<Item = &Capability> {
        self.handlers.keys()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl fmt::Debug for HandlerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut caps: Vec<&str> = self.handlers.keys().map(Capability::as_str).collect();
        caps.sort_unstable();
        f.debug_struct("HandlerTable").field("capabilities", &caps).finish()
    }
}

/// Collects handlers before the table is frozen.
#[derive(Default)]
pub struct HandlerTableBuilder {
    handlers: HashMap<Capability, Arc<dyn TaskHandler>>,
}

impl HandlerTableBuilder {
    /// Register `handler` for `capability`, replacing any earlier one.
    #[must_use]
    pub fn register(
        mut self,
        capability: impl Into<Capability>,
        handler: impl TaskHandler + 'static,
    ) -> Self {
        self.handlers.insert(capability.into(), Arc::new(handler));
        self
    }

    pub fn build(self) -> HandlerTable {
        HandlerTable {
            handlers: Arc::new(self.handlers),
        }
    }
}
