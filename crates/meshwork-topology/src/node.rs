//! Nodes, roles and capabilities.

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use crate::cluster::ClusterId;
use crate::edge::LinkCost;
use crate::error::DescriptorError;
use crate::DEFAULT_LINK_COST;

/// Globally unique node identifier.
///
/// Ordering matters: ties in routing break toward the lowest id, and the
/// consensus primary rotates through validators in id order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeId(pub u64);

impl NodeId {
    /// Create from a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

/// The role a node plays in its cluster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Leads a cluster; owns membership decisions for it.
    Coordinator,
    /// Bridges its cluster to the gateways of other clusters.
    Gateway,
    /// Executes work.
    Worker,
    /// Forwards traffic but never executes work.
    Relay,
    /// Watches the mesh; never executes work or leads.
    Observer,
}

impl Role {
    /// Whether nodes in this role run task handlers.
    pub const fn executes_work(&self) -> bool {
        matches!(self, Self::Coordinator | Self::Gateway | Self::Worker)
    }

    /// Whether nodes in this role can be elected Coordinator or Gateway.
    pub const fn leader_eligible(&self) -> bool {
        matches!(self, Self::Coordinator | Self::Gateway | Self::Worker)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Coordinator => write!(f, "Coordinator"),
            Self::Gateway => write!(f, "Gateway"),
            Self::Worker => write!(f, "Worker"),
            Self::Relay => write!(f, "Relay"),
            Self::Observer => write!(f, "Observer"),
        }
    }
}

/// Liveness of a node as seen by the membership failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum NodeStatus {
    /// Heartbeating normally.
    Active,
    /// Missed heartbeats, or flagged for review.
    Degraded,
    /// Missed heartbeats past the timeout.
    Unreachable,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Unreachable => write!(f, "Unreachable"),
        }
    }
}

/// A named unit of work a node can perform (e.g. `"summarize"`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Capability(String);

impl Capability {
    /// Create a capability, rejecting empty names and whitespace.
    pub fn new(name: impl Into<String>) -> Result<Self, DescriptorError> {
        let name = name.into();
        if name.is_empty() {
            return Err(DescriptorError::EmptyCapability);
        }
        if name.chars().any(char::is_whitespace) {
            return Err(DescriptorError::InvalidCapability(name));
        }
        Ok(Self(name))
    }

    /// The capability name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// Unchecked: validation happens in `NodeDescriptor::validate`.
impl From<&str> for Capability {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// What a node presents when it asks to join the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeDescriptor {
    /// Requested id; must be unique mesh-wide.
    pub id: NodeId,
    /// Requested role.
    pub role: Role,
    /// Capabilities this node can execute.
    pub capabilities: BTreeSet<Capability>,
    /// Concurrent tasks this node accepts.
    pub capacity: u32,
    /// Measured cost of the node's link into its cluster.
    pub link_cost: LinkCost,
    /// Cluster to join, if the node has a preference.
    pub cluster_hint: Option<ClusterId>,
}

impl NodeDescriptor {
    /// Create a descriptor with default capacity and link cost.
    pub fn new<I, C>(id: NodeId, role: Role, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        Self {
            id,
            role,
            capabilities: capabilities.into_iter().map(Into::into).collect(),
            capacity: 4,
            link_cost: DEFAULT_LINK_COST,
            cluster_hint: None,
        }
    }

    /// Worker descriptor.
    pub fn worker<I, C>(id: NodeId, capabilities: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<Capability>,
    {
        Self::new(id, Role::Worker, capabilities)
    }

    /// Set concurrent task capacity.
    #[must_use]
    pub fn with_capacity(mut self, capacity: u32) -> Self {
        self.capacity = capacity;
        self
    }

    /// Set the measured link cost.
    #[must_use]
    pub fn with_link_cost(mut self, cost: LinkCost) -> Self {
        self.link_cost = cost;
        self
    }

    /// Ask to be placed in a particular cluster.
    #[must_use]
    pub fn in_cluster(mut self, cluster: ClusterId) -> Self {
        self.cluster_hint = Some(cluster);
        self
    }

    /// Check the descriptor is internally consistent.
    ///
    /// - capability names are non-empty and contain no whitespace
    /// - Workers declare at least one capability
    /// - Observers and Relays declare none
    /// - roles that execute work have non-zero capacity
    pub fn validate(&self) -> Result<(), DescriptorError> {
        for cap in &self.capabilities {
            if cap.0.is_empty() {
                return Err(DescriptorError::EmptyCapability);
            }
            if cap.0.chars().any(char::is_whitespace) {
                return Err(DescriptorError::InvalidCapability(cap.0.clone()));
            }
        }

        match self.role {
            Role::Worker if self.capabilities.is_empty() => {
                return Err(DescriptorError::MissingCapabilities(self.role));
            }
            Role::Observer | Role::Relay if !self.capabilities.is_empty() => {
                return Err(DescriptorError::NonExecutingWithCapabilities(self.role));
            }
            _ => {}
        }

        if self.role.executes_work() && !self.capabilities.is_empty() && self.capacity == 0 {
            return Err(DescriptorError::ZeroCapacity(self.role));
        }

        Ok(())
    }
}

/// A member of the mesh as tracked by the membership registry.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    /// Current role (changes only through elections).
    pub role: Role,
    /// Role the node asked for at join time.
    pub declared_role: Role,
    pub capabilities: BTreeSet<Capability>,
    pub capacity: u32,
    pub link_cost: LinkCost,
    pub status: NodeStatus,
    pub cluster: ClusterId,
    pub last_heartbeat: Instant,
    pub joined_at: Instant,
    /// Tasks currently assigned to this node.
    pub active_tasks: u32,
    /// Flagged for a digest mismatch, pending operator review.
    pub flagged: bool,
    /// Set once the node leaves or is declared dead.
    pub tombstoned_at: Option<Instant>,
    /// Bumped every time the id re-joins after eviction.
    pub incarnation: u64,
}

impl Node {
    /// Create a registry record for a validated descriptor.
    ///
    /// The node starts as a Worker (or its declared non-leader role);
    /// leadership is granted by elections.
    pub fn from_descriptor(desc: &NodeDescriptor, cluster: ClusterId, now: Instant) -> Self {
        let role = match desc.role {
            Role::Coordinator | Role::Gateway => Role::Worker,
            other => other,
        };
        Self {
            id: desc.id,
            role,
            declared_role: desc.role,
            capabilities: desc.capabilities.clone(),
            capacity: desc.capacity,
            link_cost: desc.link_cost,
            status: NodeStatus::Active,
            cluster,
            last_heartbeat: now,
            joined_at: now,
            active_tasks: 0,
            flagged: false,
            tombstoned_at: None,
            incarnation: 0,
        }
    }

    /// Time since the node joined.
    pub fn uptime(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.joined_at)
    }

    /// Fraction of capacity in use (1.0 when capacity is zero).
    pub fn load(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        f64::from(self.active_tasks) / f64::from(self.capacity)
    }

    /// Active and not tombstoned.
    pub fn is_live(&self) -> bool {
        self.tombstoned_at.is_none() && self.status != NodeStatus::Unreachable
    }

    /// Whether this node can be handed work right now.
    pub fn is_assignable(&self) -> bool {
        self.tombstoned_at.is_none() && self.status == NodeStatus::Active
    }

    /// Whether the node advertises a capability.
    pub fn has_capability(&self, cap: &Capability) -> bool {
        self.capabilities.contains(cap)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capability_rejects_bad_names() {
        assert!(matches!(Capability::new(""), Err(DescriptorError::EmptyCapability)));
        assert!(matches!(
            Capability::new("two words"),
            Err(DescriptorError::InvalidCapability(_))
        ));
        assert_eq!(Capability::new("summarize").unwrap().as_str(), "summarize");
    }

    #[test]
    fn worker_needs_capabilities() {
        let desc = NodeDescriptor::worker(NodeId(1), Vec::<&str>::new());
        assert_eq!(
            desc.validate(),
            Err(DescriptorError::MissingCapabilities(Role::Worker))
        );
    }

    #[test]
    fn observer_must_not_execute() {
        let desc = NodeDescriptor::new(NodeId(1), Role::Observer, ["render"]);
        assert_eq!(
            desc.validate(),
            Err(DescriptorError::NonExecutingWithCapabilities(Role::Observer))
        );

        let desc = NodeDescriptor::new(NodeId(1), Role::Observer, Vec::<&str>::new());
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn zero_capacity_rejected_for_executing_roles() {
        let desc = NodeDescriptor::worker(NodeId(1), ["render"]).with_capacity(0);
        assert_eq!(desc.validate(), Err(DescriptorError::ZeroCapacity(Role::Worker)));
    }

    #[test]
    fn whitespace_capability_rejected_in_descriptor() {
        let desc = NodeDescriptor::worker(NodeId(1), ["bad name"]);
        assert!(matches!(
            desc.validate(),
            Err(DescriptorError::InvalidCapability(_))
        ));
    }

    #[test]
    fn leaders_start_as_workers() {
        let now = Instant::now();
        let desc = NodeDescriptor::new(NodeId(7), Role::Coordinator, ["plan"]);
        let node = Node::from_descriptor(&desc, ClusterId(0), now);
        assert_eq!(node.role, Role::Worker);
        assert_eq!(node.declared_role, Role::Coordinator);
        assert!(node.is_assignable());
    }

    #[test]
    fn load_fraction() {
        let now = Instant::now();
        let desc = NodeDescriptor::worker(NodeId(1), ["a"]).with_capacity(4);
        let mut node = Node::from_descriptor(&desc, ClusterId(0), now);
        node.active_tasks = 2;
        assert!((node.load() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn node_id_orders_numerically() {
        let mut ids = vec![NodeId(10), NodeId(2), NodeId(7)];
        ids.sort();
        assert_eq!(ids, vec![NodeId(2), NodeId(7), NodeId(10)]);
        assert_eq!(format!("{}", NodeId(3)), "node-3");
    }
}
