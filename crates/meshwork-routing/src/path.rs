//! Shortest-path search over a routing table's adjacency.
//!
//! Plain Dijkstra on a binary heap. Equal-cost frontiers pop lowest id
//! first, so the resulting tree (and every route built on it) is
//! deterministic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use meshwork_topology::{LinkCost, NodeId};

/// Adjacency list: node → (neighbour → cost).
pub type Adjacency = BTreeMap<NodeId, BTreeMap<NodeId, LinkCost>>;

/// Distances and predecessors from one source.
#[derive(Debug, Clone, Default)]
pub struct ShortestPaths {
    pub source: NodeId,
    dist: BTreeMap<NodeId, u64>,
    prev: BTreeMap<NodeId, NodeId>,
}

impl ShortestPaths {
    /// Run Dijkstra from `source`.
    pub fn compute(adj: &Adjacency, source: NodeId) -> Self {
        let mut dist: BTreeMap<NodeId, u64> = BTreeMap::new();
        let mut prev: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        let mut heap = BinaryHeap::new();

        dist.insert(source, 0);
        heap.push(Reverse((0u64, source)));

        while let Some(Reverse((cost, node))) = heap.pop() {
            if dist.get(&node).is_some_and(|&d| cost > d) {
                continue;
            }
            let Some(neighbours) = adj.get(&node) else {
                continue;
            };
            for (&next, &weight) in neighbours {
                let candidate = cost + u64::from(weight);
                let better = match dist.get(&next) {
                    None => true,
                    Some(&d) => {
                        candidate < d
                            || (candidate == d && prev.get(&next).is_some_and(|p| node < *p))
                    }
                };
                if better {
                    dist.insert(next, candidate);
                    prev.insert(next, node);
                    heap.push(Reverse((candidate, next)));
                }
            }
        }

        Self { source, dist, prev }
    }

    /// Cost to reach `node`, if reachable.
    pub fn cost(&self, node: &NodeId) -> Option<u64> {
        self.dist.get(node).copied()
    }

    /// Whether `node` is reachable.
    pub fn reaches(&self, node: &NodeId) -> bool {
        self.dist.contains_key(node)
    }

    /// Every reachable node with its cost, in id order.
    pub fn reachable(&self) -> impl Iterator<Item = (NodeId, u64)> + '_ {
        self.dist.iter().map(|(n, d)| (*n, *d))
    }

    /// Full path `source ..= node`, or `None` if unreachable.
    pub fn path_to(&self, node: NodeId) -> Option<Vec<NodeId>> {
        if !self.dist.contains_key(&node) {
            return None;
        }
        let mut path = vec![node];
        let mut cur = node;
        while cur != self.source {
            cur = *self.prev.get(&cur)?;
            path.push(cur);
        }
        path.reverse();
        Some(path)
    }

    /// Number of hops to `node`.
    pub fn hops(&self, node: NodeId) -> Option<usize> {
        self.path_to(node).map(|p| p.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph(edges: &[(u64, u64, LinkCost)]) -> Adjacency {
        let mut adj = Adjacency::new();
        for &(a, b, c) in edges {
            adj.entry(NodeId(a)).or_default().insert(NodeId(b), c);
            adj.entry(NodeId(b)).or_default().insert(NodeId(a), c);
        }
        adj
    }

    #[test]
    fn finds_cheapest_path() {
        // 1 -10- 2 -10- 4
        //  \           /
        //   5 - 3 - 30
        let adj = graph(&[(1, 2, 10), (2, 4, 10), (1, 3, 5), (3, 4, 30)]);
        let sp = ShortestPaths::compute(&adj, NodeId(1));
        assert_eq!(sp.cost(&NodeId(4)), Some(20));
        assert_eq!(
            sp.path_to(NodeId(4)),
            Some(vec![NodeId(1), NodeId(2), NodeId(4)])
        );
        assert_eq!(sp.hops(NodeId(4)), Some(2));
    }

    #[test]
    fn equal_cost_paths_go_through_lowest_id() {
        let adj = graph(&[(1, 3, 5), (3, 4, 5), (1, 2, 5), (2, 4, 5)]);
        let sp = ShortestPaths::compute(&adj, NodeId(1));
        assert_eq!(
            sp.path_to(NodeId(4)),
            Some(vec![NodeId(1), NodeId(2), NodeId(4)])
        );
    }

    #[test]
    fn unreachable_nodes_have_no_path() {
        let adj = graph(&[(1, 2, 1), (3, 4, 1)]);
        let sp = ShortestPaths::compute(&adj, NodeId(1));
        assert!(!sp.reaches(&NodeId(3)));
        assert_eq!(sp.path_to(NodeId(4)), None);
        assert_eq!(sp.path_to(NodeId(1)), Some(vec![NodeId(1)]));
    }
}
