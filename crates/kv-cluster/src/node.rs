//! A single server process: identity, capabilities, connection pools, and
//! the running health/error counters the tend loop and eviction policy
//! consult.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::RwLock;

use kv_core::Host;
use kv_pool::NodePool;

/// Capability bitmask reported via the `features` info name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities(u8);

impl Capabilities {
    pub const PARTITION_SCAN: Capabilities = Capabilities(0b0001);
    pub const QUERY_SHOW: Capabilities = Capabilities(0b0010);
    pub const BATCH_ANY: Capabilities = Capabilities(0b0100);
    pub const PARTITION_QUERY: Capabilities = Capabilities(0b1000);

    pub fn empty() -> Self {
        Capabilities(0)
    }

    pub fn insert(&mut self, other: Capabilities) {
        self.0 |= other.0;
    }

    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn from_feature_names(names: &[String]) -> Self {
        let mut caps = Capabilities::empty();
        for name in names {
            match name.as_str() {
                "partition-scan" => caps.insert(Capabilities::PARTITION_SCAN),
                "query-show" => caps.insert(Capabilities::QUERY_SHOW),
                "batch-any" => caps.insert(Capabilities::BATCH_ANY),
                "partition-query" => caps.insert(Capabilities::PARTITION_QUERY),
                _ => {}
            }
        }
        caps
    }
}

/// Generation counters a node reports on each tend refresh.
#[derive(Debug, Default, Clone, Copy)]
pub struct Generations {
    pub peers: u32,
    pub partition: u32,
    pub rebalance: u32,
}

#[derive(Debug, Default)]
pub struct NodeStats {
    pub conns_opened: AtomicU64,
    pub conns_closed: AtomicU64,
    pub bytes_in: AtomicU64,
    pub bytes_out: AtomicU64,
    pub errors: AtomicU32,
    pub timeouts: AtomicU32,
    pub consecutive_refresh_failures: AtomicU32,
}

pub struct Node {
    pub name: String,
    pub host: Host,
    pub pool: NodePool,
    pub capabilities: Capabilities,
    pub racks: RwLock<std::collections::HashMap<String, i32>>,
    pub generations: RwLock<Generations>,
    pub stats: NodeStats,
    pub active: AtomicBool,
    /// Reset to 0 at the start of each tend iteration; bumped by every
    /// partition cell and peer descriptor that still references this node.
    pub reference_count: AtomicU32,
    /// Iterations since this node last had a nonzero `reference_count`.
    pub unreferenced_refreshes: AtomicU32,
    pub partition_changed: AtomicBool,
    pub rebalance_changed: AtomicBool,
    /// Set when a command observes an auth-failure result code; the tend
    /// thread performs the login out-of-band instead of racing it.
    pub login_required: AtomicBool,
    pub session_token: RwLock<Option<std::sync::Arc<str>>>,
}

impl Node {
    pub fn new(name: impl Into<String>, host: Host, pool: NodePool) -> Self {
        Self {
            name: name.into(),
            host,
            pool,
            capabilities: Capabilities::empty(),
            racks: RwLock::new(std::collections::HashMap::new()),
            generations: RwLock::new(Generations::default()),
            stats: NodeStats::default(),
            active: AtomicBool::new(true),
            reference_count: AtomicU32::new(0),
            unreferenced_refreshes: AtomicU32::new(0),
            partition_changed: AtomicBool::new(false),
            rebalance_changed: AtomicBool::new(false),
            login_required: AtomicBool::new(false),
            session_token: RwLock::new(None),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn mark_inactive(&self) {
        self.active.store(false, Ordering::Release);
    }

    pub fn reset_tend_flags(&self) {
        self.reference_count.store(0, Ordering::Relaxed);
        self.partition_changed.store(false, Ordering::Relaxed);
        self.rebalance_changed.store(false, Ordering::Relaxed);
    }

    pub fn add_reference(&self) {
        self.reference_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.stats.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timeout(&self) {
        self.stats.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn rack_id(&self, namespace: &str) -> Option<i32> {
        self.racks.read().unwrap().get(namespace).copied()
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("name", &self.name)
            .field("host", &self.host)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_node(name: &str) -> Node {
        Node::new(name, Host::new("127.0.0.1", 3000), NodePool::new(1, 0, 4, Duration::from_secs(60)))
    }

    #[test]
    fn new_node_is_active_by_default() {
        let node = test_node("A");
        assert!(node.is_active());
    }

    #[test]
    fn mark_inactive_flips_flag() {
        let node = test_node("A");
        node.mark_inactive();
        assert!(!node.is_active());
    }

    #[test]
    fn capabilities_parsed_from_feature_names() {
        let names = vec!["batch-any".to_string(), "query-show".to_string()];
        let caps = Capabilities::from_feature_names(&names);
        assert!(caps.contains(Capabilities::BATCH_ANY));
        assert!(caps.contains(Capabilities::QUERY_SHOW));
        assert!(!caps.contains(Capabilities::PARTITION_QUERY));
    }

    #[test]
    fn reset_tend_flags_clears_reference_count() {
        let node = test_node("A");
        node.add_reference();
        node.add_reference();
        assert_eq!(node.reference_count.load(Ordering::Relaxed), 2);
        node.reset_tend_flags();
        assert_eq!(node.reference_count.load(Ordering::Relaxed), 0);
    }
}
