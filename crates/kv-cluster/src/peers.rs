//! Peer descriptor parsing and the per-tend-iteration `PeersView`.
//!
//! The wire format for `peers-clear-std` / `peers-tls-std` is not pinned
//! down further than "peer descriptors" in the interface notes; this driver
//! treats the value as `node-name,host,port` triples separated by `;`,
//! which is sufficient to drive validation and eviction.

use std::collections::HashSet;

use kv_core::Host;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerDescriptor {
    pub node_name: String,
    pub host: Host,
}

pub fn parse_peers(value: &str) -> Vec<PeerDescriptor> {
    let mut out = Vec::new();
    for entry in value.split(';') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }
        let mut parts = entry.splitn(3, ',');
        let (Some(name), Some(host), Some(port)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else { continue };
        out.push(PeerDescriptor { node_name: name.to_string(), host: Host::new(host, port) });
    }
    out
}

/// Transient per-tend-iteration bookkeeping. Recreated every pass.
#[derive(Default)]
pub struct PeersView {
    pub validated: HashSet<String>,
    pub to_evict: HashSet<String>,
    pub failed_hosts: Vec<Host>,
    pub generation_changed: bool,
    pub refresh_count: u32,
}
