//! Per-namespace partition matrix, and the cluster-wide topology map held
//! behind a single `ArcSwap` pointer so readers never observe a half-built
//! update.

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use kv_core::partition::PARTITION_COUNT;

use crate::node::Node;

/// `replicas[row][partition]` plus the regime each partition was last
/// updated at. A `None` cell means no node has claimed that partition yet.
#[derive(Clone)]
pub struct Partitions {
    pub replica_count: usize,
    pub replicas: Vec<Vec<Option<Arc<Node>>>>,
    pub regimes: Vec<u32>,
    pub sc_mode: bool,
}

impl Partitions {
    pub fn new(replica_count: usize, sc_mode: bool) -> Self {
        Self {
            replica_count,
            replicas: vec![vec![None; PARTITION_COUNT as usize]; replica_count],
            regimes: vec![0; PARTITION_COUNT as usize],
            sc_mode,
        }
    }

    /// Assign `node` as the owner of `partition` at replica row `row`,
    /// honoring the higher-regime-wins rule; a lower or equal regime for an
    /// already-assigned partition is ignored.
    pub fn set_owner(&mut self, row: usize, partition: u16, regime: u32, node: Arc<Node>) -> bool {
        let idx = partition as usize;
        if regime < self.regimes[idx] {
            return false;
        }
        if row >= self.replicas.len() {
            self.replicas.resize(row + 1, vec![None; PARTITION_COUNT as usize]);
        }
        self.replicas[row][idx] = Some(node);
        self.regimes[idx] = regime;
        true
    }

    pub fn owner(&self, row: usize, partition: u16) -> Option<Arc<Node>> {
        self.replicas.get(row)?.get(partition as usize)?.clone()
    }
}

/// The cluster-wide mapping from namespace to its partition matrix, swapped
/// atomically by the tend thread and read lock-free everywhere else.
pub struct Topology {
    inner: ArcSwap<HashMap<String, Arc<Partitions>>>,
}

impl Topology {
    pub fn new() -> Self {
        Self { inner: ArcSwap::from_pointee(HashMap::new()) }
    }

    pub fn load(&self) -> Arc<HashMap<String, Arc<Partitions>>> {
        self.inner.load_full()
    }

    pub fn namespace(&self, namespace: &str) -> Option<Arc<Partitions>> {
        self.inner.load().get(namespace).cloned()
    }

    /// Publish a new namespace's partition matrix. Builds a shallow copy of
    /// the current map with one entry replaced, then swaps the pointer.
    pub fn publish_namespace(&self, namespace: String, partitions: Partitions) {
        let partitions = Arc::new(partitions);
        self.inner.rcu(|current| {
            let mut next = (**current).clone();
            next.insert(namespace.clone(), partitions.clone());
            next
        });
    }
}

impl Default for Topology {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kv_core::Host;
    use kv_pool::NodePool;
    use std::time::Duration;

    fn test_node(name: &str) -> Arc<Node> {
        Arc::new(Node::new(
            name,
            Host::new("127.0.0.1", 3000),
            NodePool::new(1, 0, 4, Duration::from_secs(60)),
        ))
    }

    #[test]
    fn set_owner_assigns_chosen_partitions() {
        let mut partitions = Partitions::new(2, false);
        let node = test_node("A");
        assert!(partitions.set_owner(0, 10, 1, node.clone()));
        assert_eq!(partitions.owner(0, 10).unwrap().name, "A");
        assert!(partitions.owner(0, 11).is_none());
    }

    #[test]
    fn lower_regime_update_is_ignored() {
        let mut partitions = Partitions::new(1, false);
        let a = test_node("A");
        let b = test_node("B");
        assert!(partitions.set_owner(0, 5, 3, a.clone()));
        assert!(!partitions.set_owner(0, 5, 2, b));
        assert_eq!(partitions.owner(0, 5).unwrap().name, "A");
    }

    #[test]
    fn equal_regime_update_overwrites() {
        let mut partitions = Partitions::new(1, false);
        let a = test_node("A");
        let b = test_node("B");
        assert!(partitions.set_owner(0, 5, 3, a.clone()));
        assert!(partitions.set_owner(0, 5, 3, b.clone()));
        assert_eq!(partitions.owner(0, 5).unwrap().name, "B");
    }

    #[test]
    fn higher_regime_overwrites() {
        let mut partitions = Partitions::new(1, false);
        let a = test_node("A");
        let b = test_node("B");
        partitions.set_owner(0, 5, 3, a);
        assert!(partitions.set_owner(0, 5, 4, b.clone()));
        assert_eq!(partitions.owner(0, 5).unwrap().name, "B");
    }

    #[test]
    fn topology_publish_is_atomic_and_additive() {
        let topology = Topology::new();
        let mut ns1 = Partitions::new(1, false);
        ns1.set_owner(0, 0, 1, test_node("A"));
        topology.publish_namespace("ns1".to_string(), ns1);

        let mut ns2 = Partitions::new(1, false);
        ns2.set_owner(0, 0, 1, test_node("B"));
        topology.publish_namespace("ns2".to_string(), ns2);

        let snapshot = topology.load();
        assert_eq!(snapshot.len(), 2);
        assert!(snapshot.contains_key("ns1"));
        assert!(snapshot.contains_key("ns2"));
    }
}
