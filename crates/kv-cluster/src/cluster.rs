//! Cluster: seed validation, the tend thread, and node lookup.
//!
//! The tend loop runs on a plain OS thread rather than a tokio task: every
//! step is blocking DNS/socket I/O with its own deadline, and the thread
//! sleeps between iterations on a `Condvar` so `close()` and a login signal
//! can both wake it early.

use std::collections::HashMap;
use std::io::Write as _;
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use arc_swap::ArcSwap;
use tracing::{debug, info, warn};

use kv_core::{ClientPolicy, Host};
use kv_pool::NodePool;
use kv_wire::framing::{Header, TYPE_INFO, VERSION_INFO};
use kv_wire::info;
use kv_wire::partitions::parse_replicas;
use kv_wire::racks::parse_racks;

use crate::error::ClusterError;
use crate::node::{Capabilities, Node};
use crate::partitions::{Partitions, Topology};
use crate::peers::{parse_peers, PeersView};
use crate::selection::SharedCounters;

struct Wakeable {
    mutex: Mutex<bool>,
    condvar: Condvar,
}

impl Wakeable {
    fn new() -> Self {
        Self { mutex: Mutex::new(false), condvar: Condvar::new() }
    }

    fn sleep(&self, duration: Duration) {
        let guard = self.mutex.lock().unwrap();
        let _ = self.condvar.wait_timeout_while(guard, duration, |woken| !*woken);
        *self.mutex.lock().unwrap() = false;
    }

    fn wake(&self) {
        *self.mutex.lock().unwrap() = true;
        self.condvar.notify_all();
    }
}

pub struct Cluster {
    policy: ClientPolicy,
    nodes: ArcSwap<Vec<Arc<Node>>>,
    topology: Arc<Topology>,
    tend_valid: Arc<AtomicBool>,
    wake: Arc<Wakeable>,
    stabilized: Arc<(Mutex<bool>, Condvar)>,
    counters: Arc<SharedCounters>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

impl Cluster {
    pub fn connect(policy: ClientPolicy) -> Result<Arc<Self>, ClusterError> {
        if policy.seed_hosts.is_empty() {
            return Err(ClusterError::NoValidSeeds);
        }

        let cluster = Arc::new(Self {
            policy: policy.clone(),
            nodes: ArcSwap::from_pointee(Vec::new()),
            topology: Arc::new(Topology::new()),
            tend_valid: Arc::new(AtomicBool::new(true)),
            wake: Arc::new(Wakeable::new()),
            stabilized: Arc::new((Mutex::new(false), Condvar::new())),
            counters: Arc::new(SharedCounters::new()),
            thread: Mutex::new(None),
        });

        let worker = cluster.clone();
        let handle = std::thread::Builder::new()
            .name("cluster-tend".into())
            .spawn(move || worker.tend_loop())
            .expect("failed to spawn tend thread");
        *cluster.thread.lock().unwrap() = Some(handle);

        if policy.fail_if_not_connected {
            let (lock, condvar) = &*cluster.stabilized;
            let guard = lock.lock().unwrap();
            let (guard, timed_out) = condvar
                .wait_timeout_while(guard, policy.connect_timeout.max(Duration::from_secs(5)), |s| !*s)
                .unwrap();
            drop(guard);
            if timed_out.timed_out() && cluster.nodes.load().is_empty() {
                cluster.close();
                return Err(ClusterError::NoValidSeeds);
            }
        }

        Ok(cluster)
    }

    pub fn topology(&self) -> Arc<Topology> {
        self.topology.clone()
    }

    pub fn counters(&self) -> Arc<SharedCounters> {
        self.counters.clone()
    }

    pub fn active_nodes(&self) -> Arc<Vec<Arc<Node>>> {
        self.nodes.load_full()
    }

    pub fn close(&self) {
        self.tend_valid.store(false, Ordering::Release);
        self.wake.wake();
        if let Some(handle) = self.thread.lock().unwrap().take() {
            let _ = handle.join();
        }
        for node in self.nodes.load().iter() {
            node.mark_inactive();
        }
    }

    fn tend_loop(self: Arc<Self>) {
        while self.tend_valid.load(Ordering::Acquire) {
            if let Err(err) = self.tend_once() {
                warn!(error = %err, "tend iteration failed");
            }
            let (lock, condvar) = &*self.stabilized;
            *lock.lock().unwrap() = true;
            condvar.notify_all();
            self.wake.sleep(self.policy.tend_interval);
        }
    }

    fn tend_once(&self) -> Result<(), ClusterError> {
        let mut nodes = (*self.nodes.load_full()).clone();

        // Step 1: seed if there are no active nodes.
        if nodes.iter().all(|n| !n.is_active()) {
            nodes = self.seed_nodes()?;
        }

        // Step 2: reset per-node tend flags.
        for node in &nodes {
            node.reset_tend_flags();
        }

        // Step 3: refresh each active node.
        let mut peers_changed = false;
        let mut partition_changed_namespaces: Vec<Arc<Node>> = Vec::new();
        let mut rebalance_changed_nodes: Vec<Arc<Node>> = Vec::new();
        for node in nodes.iter().filter(|n| n.is_active()) {
            match self.refresh_node(node) {
                Ok((peers_gen_changed, partition_gen_changed)) => {
                    peers_changed |= peers_gen_changed;
                    if partition_gen_changed {
                        partition_changed_namespaces.push(node.clone());
                    }
                    if self.policy.rack_aware && node.rebalance_changed.load(Ordering::Relaxed) {
                        rebalance_changed_nodes.push(node.clone());
                    }
                }
                Err(err) => {
                    node.stats.consecutive_refresh_failures.fetch_add(1, Ordering::Relaxed);
                    debug!(node = %node.name, error = %err, "refresh failed");
                }
            }
        }

        // Step 4: refresh peers if any node's peers-generation changed.
        let mut discovered = Vec::new();
        if peers_changed {
            discovered = self.refresh_peers(&nodes)?;
        }

        // Step 5: refresh partitions from any node whose generation changed.
        for node in &partition_changed_namespaces {
            if let Err(err) = self.refresh_partitions(node) {
                warn!(node = %node.name, error = %err, "partition refresh failed");
            }
        }

        // Rack-aware: refresh the per-namespace rack map from any node
        // whose rebalance-generation changed, so `PreferRack` selection has
        // real rack ids to match against instead of always falling through
        // to the off-rack scan.
        for node in &rebalance_changed_nodes {
            if let Err(err) = self.refresh_racks(node) {
                warn!(node = %node.name, error = %err, "rack refresh failed");
            }
        }

        nodes.extend(discovered);

        // Step 6 + 7: eviction and publish.
        let live_count = nodes.iter().filter(|n| n.is_active()).count();
        let survivors: Vec<Arc<Node>> =
            nodes.into_iter().filter(|n| !self.should_evict(n, live_count)).collect();
        for node in &survivors {
            if node.reference_count.load(Ordering::Relaxed) == 0 {
                node.unreferenced_refreshes.fetch_add(1, Ordering::Relaxed);
            } else {
                node.unreferenced_refreshes.store(0, Ordering::Relaxed);
            }
        }
        self.nodes.store(Arc::new(survivors));

        Ok(())
    }

    fn should_evict(&self, node: &Node, live_count: usize) -> bool {
        if !node.is_active() {
            return true;
        }
        let unresponsive = node.stats.consecutive_refresh_failures.load(Ordering::Relaxed) > 0;
        let unreferenced = node.reference_count.load(Ordering::Relaxed) == 0;
        match live_count {
            0 | 1 => unresponsive,
            2 => unresponsive && unreferenced,
            _ => {
                (unreferenced && node.unreferenced_refreshes.load(Ordering::Relaxed) >= 2)
                    || (unresponsive && unreferenced)
            }
        }
    }

    fn seed_nodes(&self) -> Result<Vec<Arc<Node>>, ClusterError> {
        let mut by_name: HashMap<String, Arc<Node>> = HashMap::new();
        for seed in &self.policy.seed_hosts {
            match self.validate_host(seed) {
                Ok((name, feature_names)) => {
                    by_name.entry(name.clone()).or_insert_with(|| {
                        Arc::new(build_node(&name, seed.clone(), &feature_names, &self.policy))
                    });
                }
                Err(err) => {
                    debug!(host = %seed, error = %err, "seed validation failed");
                }
            }
        }
        if by_name.is_empty() {
            return Err(ClusterError::NoValidSeeds);
        }
        Ok(by_name.into_values().collect())
    }

    /// Open a connection, request `node` + `features`, and return the
    /// reported node name and capability names.
    fn validate_host(&self, host: &Host) -> Result<(String, Vec<String>), ClusterError> {
        let addr = (host.name.as_str(), host.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClusterError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "dns resolution returned no addresses")))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.policy.connect_timeout)?;
        stream.set_read_timeout(Some(self.policy.connect_timeout))?;
        stream.set_write_timeout(Some(self.policy.connect_timeout))?;

        let body = info::build_request(&["node", "features"]);
        write_info_request(&mut stream, &body)?;
        let response = read_info_response(&mut stream)?;
        let parsed = info::parse_response(&response)?;

        let name = parsed.get("node").cloned().ok_or_else(|| {
            kv_wire::WireError::MalformedInfo("missing 'node' in response".into())
        })?;
        let features = parsed.get("features").map(|v| info::parse_features(v)).unwrap_or_default();
        Ok((name, features))
    }

    fn refresh_node(&self, node: &Node) -> Result<(bool, bool), ClusterError> {
        let addr = (node.host.name.as_str(), node.host.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClusterError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "dns resolution returned no addresses")))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.policy.connect_timeout)?;
        stream.set_read_timeout(Some(self.policy.connect_timeout))?;
        stream.set_write_timeout(Some(self.policy.connect_timeout))?;

        let mut names = vec!["node", "peers-generation", "partition-generation"];
        if self.policy.rack_aware {
            names.push("rebalance-generation");
        }
        let body = info::build_request(&names);
        write_info_request(&mut stream, &body)?;
        let response = read_info_response(&mut stream)?;
        let parsed = info::parse_response(&response)?;

        if let Some(reported_name) = parsed.get("node") {
            if reported_name != &node.name {
                warn!(old = %node.name, new = %reported_name, "node identity changed at stable address; evicting");
                node.mark_inactive();
                return Ok((false, false));
            }
        }

        let mut generations = node.generations.write().unwrap();
        let mut peers_changed = false;
        let mut partition_changed = false;

        if let Some(peers_gen) = parsed.get("peers-generation").and_then(|v| v.parse::<u32>().ok()) {
            if peers_gen < generations.peers {
                info!(node = %node.name, "peers generation went backward; treating as quick restart");
                node.stats.errors.store(0, Ordering::Relaxed);
            }
            peers_changed = peers_gen != generations.peers;
            generations.peers = peers_gen;
        }
        if let Some(partition_gen) = parsed.get("partition-generation").and_then(|v| v.parse::<u32>().ok()) {
            partition_changed = partition_gen != generations.partition;
            generations.partition = partition_gen;
        }
        if let Some(rebalance_gen) = parsed.get("rebalance-generation").and_then(|v| v.parse::<u32>().ok()) {
            node.rebalance_changed.store(rebalance_gen != generations.rebalance, Ordering::Relaxed);
            generations.rebalance = rebalance_gen;
        }

        node.stats.consecutive_refresh_failures.store(0, Ordering::Relaxed);
        Ok((peers_changed, partition_changed))
    }

    fn refresh_peers(&self, known: &[Arc<Node>]) -> Result<Vec<Arc<Node>>, ClusterError> {
        let mut view = PeersView::default();
        let mut discovered = Vec::new();
        let known_names: std::collections::HashSet<_> = known.iter().map(|n| n.name.clone()).collect();
        let known_by_name: std::collections::HashMap<&str, &Arc<Node>> =
            known.iter().map(|n| (n.name.as_str(), n)).collect();

        for node in known.iter().filter(|n| n.is_active()) {
            let addr = match (node.host.name.as_str(), node.host.port).to_socket_addrs() {
                Ok(mut addrs) => match addrs.next() {
                    Some(a) => a,
                    None => continue,
                },
                Err(_) => continue,
            };
            let Ok(mut stream) = TcpStream::connect_timeout(&addr, self.policy.connect_timeout) else {
                continue;
            };
            let name = if self.policy.use_tls { "peers-tls-std" } else { "peers-clear-std" };
            let body = info::build_request(&[name]);
            if write_info_request(&mut stream, &body).is_err() {
                continue;
            }
            let Ok(response) = read_info_response(&mut stream) else { continue };
            let Ok(parsed) = info::parse_response(&response) else { continue };
            let Some(value) = parsed.get(name) else { continue };

            for peer in parse_peers(value) {
                // A node still listed as a peer is live independent of
                // client command traffic; keep it referenced so an idle
                // cluster doesn't evict nodes that simply have no in-flight
                // commands.
                if let Some(existing) = known_by_name.get(peer.node_name.as_str()) {
                    existing.add_reference();
                    continue;
                }
                if view.validated.contains(&peer.node_name) {
                    continue;
                }
                match self.validate_host(&peer.host) {
                    Ok((reported_name, features)) if reported_name == peer.node_name => {
                        view.validated.insert(peer.node_name.clone());
                        let new_node = Arc::new(build_node(
                            &peer.node_name,
                            peer.host,
                            &features,
                            &self.policy,
                        ));
                        new_node.add_reference();
                        discovered.push(new_node);
                    }
                    _ => {
                        view.failed_hosts.push(peer.host);
                    }
                }
            }
            view.refresh_count += 1;
        }
        view.generation_changed = !discovered.is_empty();
        Ok(discovered)
    }

    fn refresh_partitions(&self, node: &Arc<Node>) -> Result<(), ClusterError> {
        let addr = (node.host.name.as_str(), node.host.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClusterError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "dns resolution returned no addresses")))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.policy.connect_timeout)?;
        let body = info::build_request(&["replicas"]);
        write_info_request(&mut stream, &body)?;
        let response = read_info_response(&mut stream)?;
        let parsed = info::parse_response(&response)?;
        let Some(value) = parsed.get("replicas") else { return Ok(()) };

        for (namespace, ns_replicas) in parse_replicas(value)? {
            let current = self.topology.namespace(&namespace);
            let replica_count = ns_replicas.bitmaps.len();
            let mut partitions = current
                .as_ref()
                .map(|p| (**p).clone())
                .unwrap_or_else(|| Partitions::new(replica_count, false));

            let mut owns_any = false;
            for row in 0..replica_count {
                for partition in 0..kv_core::partition::PARTITION_COUNT {
                    if ns_replicas.owns(row, partition) {
                        owns_any = true;
                        if !partitions.set_owner(row, partition, ns_replicas.regime, node.clone()) {
                            warn!(namespace = %namespace, partition, "partition regime decreased; ignoring update");
                        }
                    }
                }
            }
            // A node reporting ownership of at least one partition appears
            // in the partition map and must stay referenced independent of
            // whether any command is currently in flight to it (§4.1 step 6).
            if owns_any {
                node.add_reference();
            }
            self.topology.publish_namespace(namespace, partitions);
        }
        Ok(())
    }

    /// Fetch and apply the `racks:` info response: the per-namespace rack
    /// id this node currently belongs to.
    fn refresh_racks(&self, node: &Node) -> Result<(), ClusterError> {
        let addr = (node.host.name.as_str(), node.host.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| ClusterError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "dns resolution returned no addresses")))?;
        let mut stream = TcpStream::connect_timeout(&addr, self.policy.connect_timeout)?;
        let body = info::build_request(&["racks:"]);
        write_info_request(&mut stream, &body)?;
        let response = read_info_response(&mut stream)?;
        let parsed = info::parse_response(&response)?;
        let Some(value) = parsed.get("racks:") else { return Ok(()) };

        let mut racks = node.racks.write().unwrap();
        racks.clear();
        for (namespace, rack_id) in parse_racks(value)? {
            racks.insert(namespace, rack_id);
        }
        Ok(())
    }
}

fn build_node(name: &str, host: Host, feature_names: &[String], policy: &ClientPolicy) -> Node {
    let idle_cutoff = Duration::from_secs(55);
    let pool = NodePool::new(
        policy.conn_pools_per_node as usize,
        policy.min_conns_per_node,
        policy.max_conns_per_node,
        idle_cutoff,
    );
    let mut node = Node::new(name, host, pool);
    node.capabilities = Capabilities::from_feature_names(feature_names);
    node
}

fn write_info_request(stream: &mut TcpStream, body: &[u8]) -> Result<(), ClusterError> {
    let header = Header::new(VERSION_INFO, TYPE_INFO, body.len() as u64);
    stream.write_all(&header.encode())?;
    stream.write_all(body)?;
    Ok(())
}

fn read_info_response(stream: &mut TcpStream) -> Result<Vec<u8>, ClusterError> {
    use std::io::Read;
    let mut header_buf = [0u8; kv_wire::framing::HEADER_LEN];
    stream.read_exact(&mut header_buf)?;
    let header = Header::decode(&header_buf)?;
    let mut body = vec![0u8; header.length as usize];
    stream.read_exact(&mut body)?;
    Ok(body)
}
