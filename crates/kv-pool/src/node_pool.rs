//! A node's `connPoolsPerNode` independent stacks, checked out round-robin
//! with backwards-then-forwards overflow into neighboring pools.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tracing::warn;

use crate::connection::Connection;
use crate::error::PoolError;
use crate::stack::ConnPool;

pub struct NodePool {
    pools: Vec<ConnPool>,
    next: AtomicUsize,
    idle_cutoff: Duration,
}

/// Split `total` evenly across `count` pools, handing the remainder to the
/// lowest-indexed pools.
fn distribute(total: u32, count: usize) -> Vec<u32> {
    if count == 0 {
        return Vec::new();
    }
    let base = total / count as u32;
    let remainder = total % count as u32;
    (0..count).map(|i| base + if (i as u32) < remainder { 1 } else { 0 }).collect()
}

impl NodePool {
    pub fn new(pool_count: usize, min_size: u32, capacity: u32, idle_cutoff: Duration) -> Self {
        let mins = distribute(min_size, pool_count);
        let caps = distribute(capacity, pool_count);
        let pools = mins.into_iter().zip(caps).map(|(min, cap)| ConnPool::new(min, cap)).collect();
        Self { pools, next: AtomicUsize::new(0), idle_cutoff }
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    pub fn total_connections(&self) -> u32 {
        self.pools.iter().map(|p| p.total()).sum()
    }

    /// Check out a connection, opening a new one via `open` if no current
    /// connection is stacked anywhere reachable from the round-robin start.
    pub fn checkout(
        &self,
        open: impl Fn(usize) -> Result<Connection, PoolError>,
    ) -> Result<Connection, PoolError> {
        let n = self.pools.len();
        let start = self.next.fetch_add(1, Ordering::Relaxed) % n;

        if let Some(conn) = self.pools[start].try_pop_current(self.idle_cutoff) {
            return Ok(conn);
        }
        if self.pools[start].has_room() {
            self.pools[start].account_open()?;
            return open(start).inspect_err(|_| self.pools[start].discard());
        }

        // Scan backwards then forwards across neighboring pools.
        for offset in 1..n {
            let backward = (start + n - offset) % n;
            if let Some(conn) = self.pools[backward].try_pop_current(self.idle_cutoff) {
                return Ok(conn);
            }
            if self.pools[backward].has_room() {
                self.pools[backward].account_open()?;
                return open(backward).inspect_err(|_| self.pools[backward].discard());
            }
        }
        for offset in 1..n {
            let forward = (start + offset) % n;
            if let Some(conn) = self.pools[forward].try_pop_current(self.idle_cutoff) {
                return Ok(conn);
            }
            if self.pools[forward].has_room() {
                self.pools[forward].account_open()?;
                return open(forward).inspect_err(|_| self.pools[forward].discard());
            }
        }
        warn!(pool_count = n, "all pools exhausted on checkout, no neighbor had room");
        Err(PoolError::NoMoreConnections)
    }

    pub fn return_connection(&self, conn: Connection) {
        self.pools[conn.pool_index].push(conn);
    }

    pub fn discard_checked_out(&self, pool_index: usize) {
        self.pools[pool_index].discard();
    }

    /// Periodic rebalancing: trim excess idle connections from every pool's
    /// tail. Opening replacements for a deficit is the caller's job (it
    /// needs the node's dial/auth context, which this crate doesn't have).
    pub fn trim_excess(&self) -> u32 {
        let mut closed = 0;
        for pool in &self.pools {
            let excess = pool.excess();
            if excess > 0 {
                closed += pool.trim_tail(excess as u32);
            }
        }
        closed
    }

    pub fn deficits(&self) -> Vec<(usize, u32)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(i, p)| {
                let excess = p.excess();
                if excess < 0 {
                    Some((i, (-excess) as u32))
                } else {
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribute_hands_remainder_to_lowest_indices() {
        assert_eq!(distribute(10, 3), vec![4, 3, 3]);
        assert_eq!(distribute(9, 3), vec![3, 3, 3]);
        assert_eq!(distribute(0, 3), vec![0, 0, 0]);
    }

    #[test]
    fn checkout_opens_new_connection_when_empty() {
        let pool = NodePool::new(2, 0, 4, Duration::from_secs(60));
        let opened = std::sync::Mutex::new(Vec::new());
        let conn = pool
            .checkout(|idx| {
                opened.lock().unwrap().push(idx);
                use std::net::{TcpListener, TcpStream};
                let listener = TcpListener::bind("127.0.0.1:0").unwrap();
                let addr = listener.local_addr().unwrap();
                Ok(Connection::new_plain(TcpStream::connect(addr).unwrap(), idx))
            })
            .unwrap();
        assert_eq!(pool.total_connections(), 1);
        pool.return_connection(conn);
        assert_eq!(pool.total_connections(), 1);
    }

    #[test]
    fn checkout_fails_when_all_pools_full() {
        let pool = NodePool::new(1, 0, 0, Duration::from_secs(60));
        let result = pool.checkout(|idx| {
            use std::net::{TcpListener, TcpStream};
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            let addr = listener.local_addr().unwrap();
            Ok(Connection::new_plain(TcpStream::connect(addr).unwrap(), idx))
        });
        assert!(matches!(result, Err(PoolError::NoMoreConnections)));
    }

    #[test]
    fn deficits_reports_pools_below_min_size() {
        let pool = NodePool::new(2, 4, 10, Duration::from_secs(60));
        let deficits = pool.deficits();
        assert_eq!(deficits.len(), 2);
        assert_eq!(deficits[0].1, 2);
    }
}
