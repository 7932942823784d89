//! Connection recovery (§4.7): when a read times out mid-response, the
//! socket cannot simply be closed — the response bytes may still be in
//! flight and would desynchronize the next request on a freshly opened
//! connection over the same node. Instead the abandoned read is handed to a
//! drainer that keeps reading (with a short timeout) until the response is
//! fully consumed or a deadline passes, at which point the connection is
//! actually closed.

use std::time::{Duration, Instant};

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use kv_wire::record::{RecordHeader, RECORD_HEADER_LEN};

/// Where in the response the abandoned read had gotten to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    AuthHeader,
    Header,
    Detail,
}

/// How long to keep draining before giving up and closing the connection.
const DRAIN_SOCKET_TIMEOUT: Duration = Duration::from_millis(1);

/// A connection whose read was abandoned mid-response, captured so a
/// background drainer can try to consume the rest of the stream and return
/// it to the pool instead of closing it outright.
pub struct RecoverableConnection {
    pub stream: TcpStream,
    pub state: ReadState,
    pub bytes_so_far: usize,
    pub target_len: usize,
    /// Multi-record responses (scan, batch) are drained group by group
    /// until a header's `INFO3_LAST` bit is observed. A response known to
    /// be compressed cannot be drained this way and is abandoned outright.
    pub multi_record: bool,
    pub compressed: bool,
    deadline: Instant,
}

pub enum DrainOutcome {
    /// The response was fully consumed; the connection can be reused.
    Recovered(TcpStream),
    /// Draining is not finished; call `drain` again.
    StillDraining(RecoverableConnection),
    /// The deadline passed, or the response is structurally undrainable
    /// (compressed multi-record); the connection must be closed.
    Abandoned,
}

impl RecoverableConnection {
    pub fn new(
        stream: TcpStream,
        state: ReadState,
        bytes_so_far: usize,
        target_len: usize,
        multi_record: bool,
        compressed: bool,
        timeout_delay: Duration,
    ) -> Self {
        Self {
            stream,
            state,
            bytes_so_far,
            target_len,
            multi_record,
            compressed,
            deadline: Instant::now() + timeout_delay,
        }
    }

    /// One drain attempt: read whatever is available within a 1ms socket
    /// timeout. Per §9, a compressed multi-record response can't be safely
    /// resynchronized and is abandoned immediately.
    pub async fn drain(mut self) -> DrainOutcome {
        if self.multi_record && self.compressed {
            warn!("abandoning compressed multi-record response; cannot resynchronize stream");
            return DrainOutcome::Abandoned;
        }

        if Instant::now() >= self.deadline {
            debug!(bytes_so_far = self.bytes_so_far, target_len = self.target_len, "drain deadline expired");
            return DrainOutcome::Abandoned;
        }

        let mut scratch = vec![0u8; 4096];
        loop {
            let remaining = self.target_len.saturating_sub(self.bytes_so_far);
            if remaining == 0 {
                if self.multi_record && !self.last_group_seen(&scratch) {
                    // Still expect another record group; caller resets
                    // target_len for the next header and keeps draining.
                    return DrainOutcome::StillDraining(self);
                }
                return DrainOutcome::Recovered(self.stream);
            }

            let read_len = remaining.min(scratch.len());
            match tokio::time::timeout(DRAIN_SOCKET_TIMEOUT, self.stream.read(&mut scratch[..read_len])).await {
                Ok(Ok(0)) => return DrainOutcome::Abandoned,
                Ok(Ok(n)) => self.bytes_so_far += n,
                Ok(Err(_)) => return DrainOutcome::Abandoned,
                Err(_) => {
                    if Instant::now() >= self.deadline {
                        return DrainOutcome::Abandoned;
                    }
                    return DrainOutcome::StillDraining(self);
                }
            }
        }
    }

    fn last_group_seen(&self, scratch: &[u8]) -> bool {
        if scratch.len() < RECORD_HEADER_LEN {
            return false;
        }
        match RecordHeader::decode(&scratch[..RECORD_HEADER_LEN]) {
            Ok(header) => header.is_last(),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn loopback_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connect = TcpStream::connect(addr);
        let (server, _) = listener.accept().await.unwrap();
        let client = connect.await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn fully_available_response_is_recovered() {
        let (mut client, server) = loopback_pair().await;
        client.try_write(&[0u8; 16]).unwrap();
        drop(client);

        let recovery = RecoverableConnection::new(server, ReadState::Detail, 0, 16, false, false, Duration::from_secs(1));
        match recovery.drain().await {
            DrainOutcome::Recovered(_) => {}
            _ => panic!("expected recovery"),
        }
    }

    #[tokio::test]
    async fn compressed_multi_record_is_abandoned_immediately() {
        let (_client, server) = loopback_pair().await;
        let recovery = RecoverableConnection::new(server, ReadState::Header, 0, 16, true, true, Duration::from_secs(1));
        match recovery.drain().await {
            DrainOutcome::Abandoned => {}
            _ => panic!("expected abandonment"),
        }
    }

    #[tokio::test]
    async fn expired_deadline_abandons_connection() {
        let (_client, server) = loopback_pair().await;
        let recovery = RecoverableConnection::new(server, ReadState::Detail, 0, 16, false, false, Duration::from_millis(0));
        match recovery.drain().await {
            DrainOutcome::Abandoned => {}
            _ => panic!("expected abandonment on expired deadline"),
        }
    }
}
