//! Replica selection, consistency, and retry policies.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Replica selection strategy (§4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicaPolicy {
    /// Always row 0 (the master).
    Master,
    /// Round-robin over all replica rows.
    MasterProles,
    /// `replicas[sequence mod replicaCount]`; sequence advances on retry.
    Sequence,
    /// Prefer the caller's configured rack ids, falling back off-rack.
    PreferRack,
    /// Any active node cluster-wide, chosen by a rotating index.
    Random,
}

impl Default for ReplicaPolicy {
    fn default() -> Self {
        ReplicaPolicy::Sequence
    }
}

/// Read-consistency mode for strong-consistency namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReadModeSc {
    /// Read from any replica that is caught up (default AP-style behavior).
    Session,
    /// Force `Sequence` semantics using the dedicated `sequenceSC` counter.
    Linearize,
    /// Allow reads from replicas that may be behind.
    AllowReplica,
}

impl Default for ReadModeSc {
    fn default() -> Self {
        ReadModeSc::Session
    }
}

/// Non-strong-consistency cluster visibility level (kept for completeness;
/// most clusters run AP namespaces exclusively).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsistencyLevel {
    One,
    All,
}

impl Default for ConsistencyLevel {
    fn default() -> Self {
        ConsistencyLevel::One
    }
}

/// Per-command retry and deadline policy (§4.4, §7).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub total_timeout: Duration,
    pub socket_timeout: Duration,
    pub replica_policy: ReplicaPolicy,
    pub read_mode_sc: ReadModeSc,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            total_timeout: Duration::from_secs(1),
            socket_timeout: Duration::from_millis(0), // 0 == derive from deadline remainder
            replica_policy: ReplicaPolicy::default(),
            read_mode_sc: ReadModeSc::default(),
        }
    }
}

impl RetryPolicy {
    /// The replica policy actually used for node selection, after applying
    /// the read-consistency override: `Linearize` forces `Sequence`.
    pub fn effective_replica_policy(&self) -> ReplicaPolicy {
        if self.read_mode_sc == ReadModeSc::Linearize {
            ReplicaPolicy::Sequence
        } else {
            self.replica_policy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linearize_forces_sequence() {
        let policy = RetryPolicy {
            replica_policy: ReplicaPolicy::PreferRack,
            read_mode_sc: ReadModeSc::Linearize,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.effective_replica_policy(), ReplicaPolicy::Sequence);
    }

    #[test]
    fn non_linearize_keeps_configured_policy() {
        let policy = RetryPolicy {
            replica_policy: ReplicaPolicy::PreferRack,
            read_mode_sc: ReadModeSc::Session,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.effective_replica_policy(), ReplicaPolicy::PreferRack);
    }

    #[test]
    fn defaults_are_sane() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_retries, 2);
        assert_eq!(policy.replica_policy, ReplicaPolicy::Sequence);
    }
}
