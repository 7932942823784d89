//! Node selection (§4.2): map a partition id and replica policy to a live
//! node, retrying across replica rows on a miss.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use kv_core::policy::ReplicaPolicy;

use crate::error::ClusterError;
use crate::node::Node;
use crate::partitions::Partitions;

/// Cluster-wide rotating counters shared by `MASTER_PROLES` and `RANDOM`.
/// These live outside any single command because the rotation is meant to
/// spread load across calls, not across retries of one command.
#[derive(Default)]
pub struct SharedCounters {
    master_proles: AtomicU32,
    random: AtomicU32,
}

impl SharedCounters {
    pub fn new() -> Self {
        Self::default()
    }
}

fn scan_rows(
    partitions: &Partitions,
    partition_id: u16,
    start_row: usize,
    sequence: &mut u32,
) -> Option<Arc<Node>> {
    let replica_count = partitions.replica_count.max(1);
    for attempt in 0..replica_count {
        let row = (start_row + attempt) % replica_count;
        if let Some(node) = partitions.owner(row, partition_id) {
            if node.is_active() {
                return Some(node);
            }
        }
        *sequence = sequence.wrapping_add(1);
    }
    None
}

#[allow(clippy::too_many_arguments)]
pub fn select_node(
    partitions: &Partitions,
    partition_id: u16,
    policy: ReplicaPolicy,
    sequence: &mut u32,
    rack_ids: &[i32],
    namespace: &str,
    all_nodes: &[Arc<Node>],
    counters: &SharedCounters,
    previous: Option<&Arc<Node>>,
) -> Result<Arc<Node>, ClusterError> {
    let replica_count = partitions.replica_count.max(1);

    let found = match policy {
        ReplicaPolicy::Master => scan_rows(partitions, partition_id, 0, sequence),
        ReplicaPolicy::MasterProles => {
            let start = counters.master_proles.fetch_add(1, Ordering::Relaxed) as usize % replica_count;
            scan_rows(partitions, partition_id, start, sequence)
        }
        ReplicaPolicy::Sequence => {
            let start = *sequence as usize % replica_count;
            scan_rows(partitions, partition_id, start, sequence)
        }
        ReplicaPolicy::PreferRack => {
            select_prefer_rack(partitions, partition_id, sequence, rack_ids, namespace, previous)
        }
        ReplicaPolicy::Random => select_random(all_nodes, counters),
    };

    found.ok_or(ClusterError::InvalidNode)
}

fn select_prefer_rack(
    partitions: &Partitions,
    partition_id: u16,
    sequence: &mut u32,
    rack_ids: &[i32],
    namespace: &str,
    previous: Option<&Arc<Node>>,
) -> Option<Arc<Node>> {
    let replica_count = partitions.replica_count.max(1);
    let start = *sequence as usize % replica_count;

    for &rack in rack_ids {
        for attempt in 0..replica_count {
            let row = (start + attempt) % replica_count;
            if let Some(node) = partitions.owner(row, partition_id) {
                if node.is_active()
                    && node.rack_id(namespace) == Some(rack)
                    && previous.is_none_or(|p| !Arc::ptr_eq(p, &node))
                {
                    return Some(node);
                }
            }
        }
    }

    // No on-rack, not-previous candidate: fall back to the best off-rack
    // node, then finally to the previous node if nothing else is live.
    if let Some(node) = scan_rows(partitions, partition_id, start, sequence) {
        return Some(node);
    }
    previous.cloned()
}

fn select_random(all_nodes: &[Arc<Node>], counters: &SharedCounters) -> Option<Arc<Node>> {
    if all_nodes.is_empty() {
        return None;
    }
    let start = counters.random.fetch_add(1, Ordering::Relaxed) as usize % all_nodes.len();
    for offset in 0..all_nodes.len() {
        let idx = (start + offset) % all_nodes.len();
        if all_nodes[idx].is_active() {
            return Some(all_nodes[idx].clone());
        }
    }
    None
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
    fn master_picks_row_zero() {
        let mut partitions = Partitions::new(2, false);
        let master = test_node("master");
        let prole = test_node("prole");
        partitions.set_owner(0, 10, 1, master.clone());
        partitions.set_owner(1, 10, 1, prole);

        let counters = SharedCounters::new();
        let mut sequence = 0;
        let node = select_node(
            &partitions, 10, ReplicaPolicy::Master, &mut sequence, &[], "ns1", &[], &counters, None,
        )
        .unwrap();
        assert_eq!(node.name, "master");
    }

    #[test]
    fn sequence_falls_through_to_next_row_on_inactive_master() {
        let mut partitions = Partitions::new(2, false);
        let master = test_node("master");
        let prole = test_node("prole");
        master.mark_inactive();
        partitions.set_owner(0, 10, 1, master);
        partitions.set_owner(1, 10, 1, prole.clone());

        let counters = SharedCounters::new();
        let mut sequence = 0;
        let node = select_node(
            &partitions, 10, ReplicaPolicy::Sequence, &mut sequence, &[], "ns1", &[], &counters, None,
        )
        .unwrap();
        assert_eq!(node.name, "prole");
        assert!(sequence > 0, "a miss must advance the sequence counter");
    }

    #[test]
    fn invalid_node_when_all_rows_miss() {
        let partitions = Partitions::new(2, false);
        let counters = SharedCounters::new();
        let mut sequence = 0;
        let result = select_node(
            &partitions, 10, ReplicaPolicy::Sequence, &mut sequence, &[], "ns1", &[], &counters, None,
        );
        assert!(matches!(result, Err(ClusterError::InvalidNode)));
    }

    #[test]
    fn prefer_rack_chooses_on_rack_node() {
        let mut partitions = Partitions::new(2, false);
        let on_rack = test_node("on-rack");
        let off_rack = test_node("off-rack");
        on_rack.racks.write().unwrap().insert("ns1".to_string(), 7);
        partitions.set_owner(0, 5, 1, off_rack);
        partitions.set_owner(1, 5, 1, on_rack.clone());

        let counters = SharedCounters::new();
        let mut sequence = 0;
        let node = select_node(
            &partitions,
            5,
            ReplicaPolicy::PreferRack,
            &mut sequence,
            &[7],
            "ns1",
            &[],
            &counters,
            None,
        )
        .unwrap();
        assert_eq!(node.name, "on-rack");
    }

    #[test]
    fn random_skips_inactive_nodes() {
        let active = test_node("active");
        let inactive = test_node("inactive");
        inactive.mark_inactive();
        let counters = SharedCounters::new();
        let mut sequence = 0;
        let nodes = vec![inactive, active];
        let node = select_node(
            &Partitions::new(1, false),
            0,
            ReplicaPolicy::Random,
            &mut sequence,
            &[],
            "ns1",
            &nodes,
            &counters,
            None,
        )
        .unwrap();
        assert_eq!(node.name, "active");
    }
}
