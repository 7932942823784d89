//! A single bounded LIFO connection stack: push/pop from the head for
//! checkout and return, pop from the tail for idle rebalancing.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use tracing::debug;

use crate::connection::Connection;
use crate::error::PoolError;

pub struct ConnPool {
    entries: Mutex<VecDeque<Connection>>,
    /// Connections stacked or checked out right now.
    pub min_size: u32,
    pub capacity: u32,
    outstanding: Mutex<u32>,
}

impl ConnPool {
    pub fn new(min_size: u32, capacity: u32) -> Self {
        Self { entries: Mutex::new(VecDeque::new()), min_size, capacity, outstanding: Mutex::new(0) }
    }

    pub fn total(&self) -> u32 {
        *self.outstanding.lock().unwrap()
    }

    pub fn stacked(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    /// Pop a current connection off the head, if one exists.
    pub fn try_pop_current(&self, idle_cutoff: Duration) -> Option<Connection> {
        let mut entries = self.entries.lock().unwrap();
        while let Some(conn) = entries.pop_front() {
            if conn.is_current(idle_cutoff) {
                return Some(conn);
            }
            // stale: drop it and account for the closed connection.
            debug!(idle_for = ?conn.last_used.elapsed(), "discarding stale pooled connection");
            drop(conn);
            *self.outstanding.lock().unwrap() -= 1;
        }
        None
    }

    /// Whether opening one more connection would stay within capacity.
    pub fn has_room(&self) -> bool {
        self.total() < self.capacity
    }

    /// Account for a freshly opened connection. Call before handing the
    /// connection to the caller, so concurrent checkouts see the updated
    /// outstanding count immediately.
    pub fn account_open(&self) -> Result<(), PoolError> {
        let mut outstanding = self.outstanding.lock().unwrap();
        if *outstanding >= self.capacity {
            return Err(PoolError::NoMoreConnections);
        }
        *outstanding += 1;
        Ok(())
    }

    /// Return a connection to the head of the stack.
    pub fn push(&self, mut conn: Connection) {
        conn.touch();
        self.entries.lock().unwrap().push_front(conn);
    }

    /// A checked-out connection failed or was discarded: release its slot
    /// without returning it to the stack.
    pub fn discard(&self) {
        let mut outstanding = self.outstanding.lock().unwrap();
        *outstanding = outstanding.saturating_sub(1);
    }

    /// `total - minSize`, used by the tend loop's rebalancing pass.
    pub fn excess(&self) -> i64 {
        self.total() as i64 - self.min_size as i64
    }

    /// Close up to `count` idle connections from the tail (the oldest).
    pub fn trim_tail(&self, count: u32) -> u32 {
        let mut entries = self.entries.lock().unwrap();
        let mut closed = 0;
        for _ in 0..count {
            if entries.pop_back().is_some() {
                closed += 1;
            } else {
                break;
            }
        }
        drop(entries);
        if closed > 0 {
            let mut outstanding = self.outstanding.lock().unwrap();
            *outstanding = outstanding.saturating_sub(closed);
            debug!(closed, "trimmed idle connections from pool tail");
        }
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{TcpListener, TcpStream};

    fn dummy_connection() -> Connection {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let stream = TcpStream::connect(addr).unwrap();
        Connection::new_plain(stream, 0)
    }

    #[test]
    fn account_open_respects_capacity() {
        let pool = ConnPool::new(0, 1);
        assert!(pool.has_room());
        pool.account_open().unwrap();
        assert!(!pool.has_room());
        assert!(matches!(pool.account_open(), Err(PoolError::NoMoreConnections)));
    }

    #[test]
    fn push_then_pop_returns_same_connection() {
        let pool = ConnPool::new(0, 2);
        pool.account_open().unwrap();
        pool.push(dummy_connection());
        assert_eq!(pool.stacked(), 1);
        let popped = pool.try_pop_current(Duration::from_secs(60));
        assert!(popped.is_some());
        assert_eq!(pool.stacked(), 0);
    }

    #[test]
    fn stale_connections_are_dropped_and_accounted() {
        let pool = ConnPool::new(0, 2);
        pool.account_open().unwrap();
        pool.push(dummy_connection());
        assert_eq!(pool.total(), 1);
        let popped = pool.try_pop_current(Duration::from_secs(0));
        assert!(popped.is_none());
        assert_eq!(pool.total(), 0);
    }

    #[test]
    fn excess_reflects_min_size() {
        let pool = ConnPool::new(1, 5);
        pool.account_open().unwrap();
        pool.account_open().unwrap();
        assert_eq!(pool.excess(), 1);
    }

    #[test]
    fn trim_tail_closes_oldest_first() {
        let pool = ConnPool::new(0, 5);
        for _ in 0..3 {
            pool.account_open().unwrap();
            pool.push(dummy_connection());
        }
        let closed = pool.trim_tail(2);
        assert_eq!(closed, 2);
        assert_eq!(pool.stacked(), 1);
        assert_eq!(pool.total(), 1);
    }

    #[test]
    fn discard_decrements_outstanding_without_touching_stack() {
        let pool = ConnPool::new(0, 2);
        pool.account_open().unwrap();
        pool.discard();
        assert_eq!(pool.total(), 0);
    }
}
