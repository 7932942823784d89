//! A pooled connection: either a plain TCP stream or a `rustls`-wrapped one,
//! tagged with the last-used instant so the pool can apply its idle cutoff.

use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

use rustls::{ClientConnection, StreamOwned};

pub enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Read for Transport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Transport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

impl Transport {
    pub fn set_timeouts(&self, timeout: Option<std::time::Duration>) -> io::Result<()> {
        let socket = match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => s.get_ref(),
        };
        socket.set_read_timeout(timeout)?;
        socket.set_write_timeout(timeout)
    }
}

/// A single connection plus the bookkeeping the pool and command pipeline
/// need: when it was last returned, which of a node's parallel pools owns
/// it, and a session token snapshot used to skip re-authentication.
pub struct Connection {
    pub transport: Transport,
    pub last_used: Instant,
    pub pool_index: usize,
    pub session_token: Option<Arc<str>>,
}

impl Connection {
    pub fn new_plain(stream: TcpStream, pool_index: usize) -> Self {
        Self {
            transport: Transport::Plain(stream),
            last_used: Instant::now(),
            pool_index,
            session_token: None,
        }
    }

    pub fn new_tls(stream: StreamOwned<ClientConnection, TcpStream>, pool_index: usize) -> Self {
        Self {
            transport: Transport::Tls(Box::new(stream)),
            last_used: Instant::now(),
            pool_index,
            session_token: None,
        }
    }

    /// Whether this connection is still "current": not idle longer than
    /// `idle_cutoff`.
    pub fn is_current(&self, idle_cutoff: std::time::Duration) -> bool {
        self.last_used.elapsed() <= idle_cutoff
    }

    pub fn touch(&mut self) {
        self.last_used = Instant::now();
    }
}
