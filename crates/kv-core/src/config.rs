//! Client configuration: a programmatic [`ClientPolicy`] plus an optional
//! TOML-deserializable [`ClientConfig`] that mirrors it, loaded the way the
//! teacher's `WarpConfig::from_file` loads `warp.toml`.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::host::Host;
use crate::policy::RetryPolicy;

/// Fully-resolved, programmatic client policy. This is what `Cluster` and
/// the command pipeline actually consume.
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    pub seed_hosts: Vec<Host>,
    pub tend_interval: Duration,
    pub connect_timeout: Duration,
    pub login_timeout: Duration,
    pub min_conns_per_node: u32,
    pub max_conns_per_node: u32,
    pub conn_pools_per_node: u32,
    pub rack_aware: bool,
    pub rack_ids: Vec<i32>,
    pub fail_if_not_connected: bool,
    pub use_tls: bool,
    pub retry: RetryPolicy,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            seed_hosts: Vec::new(),
            tend_interval: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(1),
            login_timeout: Duration::from_secs(1),
            min_conns_per_node: 0,
            max_conns_per_node: 100,
            conn_pools_per_node: 1,
            rack_aware: false,
            rack_ids: Vec::new(),
            fail_if_not_connected: true,
            use_tls: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl ClientPolicy {
    pub fn with_seed_hosts(mut self, hosts: Vec<Host>) -> Self {
        self.seed_hosts = hosts;
        self
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let mut policy = ClientPolicy::default();
        policy.seed_hosts = config
            .client
            .seeds
            .iter()
            .map(|s| parse_seed(s))
            .collect();
        if let Some(tend) = &config.client.tend_interval_ms {
            policy.tend_interval = Duration::from_millis(*tend);
        }
        if let Some(p) = &config.policy {
            if let Some(v) = p.min_conns_per_node {
                policy.min_conns_per_node = v;
            }
            if let Some(v) = p.max_conns_per_node {
                policy.max_conns_per_node = v;
            }
            if let Some(v) = p.conn_pools_per_node {
                policy.conn_pools_per_node = v;
            }
            if let Some(v) = p.rack_aware {
                policy.rack_aware = v;
            }
            if let Some(v) = &p.rack_ids {
                policy.rack_ids = v.clone();
            }
        }
        if let Some(r) = &config.retry {
            if let Some(v) = r.max_retries {
                policy.retry.max_retries = v;
            }
            if let Some(v) = r.total_timeout_ms {
                policy.retry.total_timeout = Duration::from_millis(v);
            }
            if let Some(v) = r.socket_timeout_ms {
                policy.retry.socket_timeout = Duration::from_millis(v);
            }
        }
        if let Some(t) = &config.tls {
            policy.use_tls = t.enabled.unwrap_or(false);
        }
        policy
    }
}

fn parse_seed(s: &str) -> Host {
    match s.rsplit_once(':') {
        Some((name, port)) => Host::new(name, port.parse().unwrap_or(3000)),
        None => Host::new(s, 3000),
    }
}

/// TOML document shape: `[client]`, `[policy]`, `[retry]`, `[tls]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client: ClientSection,
    pub policy: Option<PolicySection>,
    pub retry: Option<RetrySection>,
    pub tls: Option<TlsSection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSection {
    pub seeds: Vec<String>,
    pub tend_interval_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySection {
    pub min_conns_per_node: Option<u32>,
    pub max_conns_per_node: Option<u32>,
    pub conn_pools_per_node: Option<u32>,
    pub rack_aware: Option<bool>,
    pub rack_ids: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySection {
    pub max_retries: Option<u32>,
    pub total_timeout_ms: Option<u64>,
    pub socket_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TlsSection {
    pub enabled: Option<bool>,
}

impl ClientConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: ClientConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let policy = ClientPolicy::default();
        assert_eq!(policy.conn_pools_per_node, 1);
        assert!(policy.fail_if_not_connected);
    }

    #[test]
    fn parse_seed_with_port() {
        let host = parse_seed("10.0.0.1:3100");
        assert_eq!(host.name, "10.0.0.1");
        assert_eq!(host.port, 3100);
    }

    #[test]
    fn parse_seed_without_port_defaults_to_3000() {
        let host = parse_seed("10.0.0.1");
        assert_eq!(host.port, 3000);
    }

    #[test]
    fn from_config_overrides_defaults() {
        let toml_str = r#"
[client]
seeds = ["10.0.0.1:3000", "10.0.0.2:3000"]
tend_interval_ms = 500

[policy]
min_conns_per_node = 2
max_conns_per_node = 50
rack_aware = true
rack_ids = [1, 2]

[retry]
max_retries = 5
total_timeout_ms = 2000
socket_timeout_ms = 300

[tls]
enabled = true
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        let policy = ClientPolicy::from_config(&config);

        assert_eq!(policy.seed_hosts.len(), 2);
        assert_eq!(policy.tend_interval, Duration::from_millis(500));
        assert_eq!(policy.min_conns_per_node, 2);
        assert_eq!(policy.max_conns_per_node, 50);
        assert!(policy.rack_aware);
        assert_eq!(policy.rack_ids, vec![1, 2]);
        assert!(policy.use_tls);
        assert_eq!(policy.retry.max_retries, 5);
        assert_eq!(policy.retry.total_timeout, Duration::from_millis(2000));
        assert_eq!(policy.retry.socket_timeout, Duration::from_millis(300));
    }

    #[test]
    fn minimal_config_parses() {
        let toml_str = r#"
[client]
seeds = ["localhost:3000"]
"#;
        let config: ClientConfig = toml::from_str(toml_str).unwrap();
        let policy = ClientPolicy::from_config(&config);
        assert_eq!(policy.seed_hosts[0].name, "localhost");
        assert_eq!(policy.tend_interval, Duration::from_secs(1));
    }
}
