//! Error kinds shared across the cluster runtime.
//!
//! Every crate in the workspace defines its own `thiserror` enum for the
//! errors it can raise directly, and wraps the lower layer's error with
//! `#[from]`. This module holds the one piece every layer needs to agree
//! on: the retry classification (`ErrorKind`) used by the command loop to
//! decide whether a failure is worth retrying.

use thiserror::Error;

/// Coarse classification of a failure, independent of which crate raised it.
///
/// This mirrors §7 of the design: the retry loop only needs to know the
/// *kind* of failure, not its exact source, to decide whether to retry,
/// advance the sequence counter, or mark the result in-doubt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// DNS failure, connect refusal, TLS handshake failure, unexpected EOF,
    /// or a socket read/write error. Retryable unless the deadline is reached.
    Connection,
    /// Total-deadline or socket-idle-deadline expired.
    Timeout,
    /// No live node satisfies the replica policy for this key.
    InvalidNode,
    /// Node-local error rate exceeded; retry on a different node.
    Backoff,
    /// Malformed info response or partition payload. Non-retryable.
    Parse,
    /// Non-zero server result code.
    ServerResult,
    /// The async scheduler rejected the request outright.
    CommandRejected,
}

impl ErrorKind {
    /// Whether a failure of this kind is worth retrying at all, ignoring the
    /// retry budget and deadline (those are enforced by the caller).
    pub fn is_retryable(self) -> bool {
        !matches!(self, ErrorKind::Parse | ErrorKind::InvalidNode | ErrorKind::CommandRejected)
    }
}

/// A general-purpose error carrying a classification, a message, and an
/// in-doubt flag for writes that may have reached the server.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct Error {
    pub kind: ErrorKind,
    pub message: String,
    pub in_doubt: bool,
}

impl Error {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into(), in_doubt: false }
    }

    pub fn in_doubt(mut self) -> Self {
        self.in_doubt = true;
        self
    }

    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Connection, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn invalid_node(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidNode, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds() {
        assert!(ErrorKind::Connection.is_retryable());
        assert!(ErrorKind::Timeout.is_retryable());
        assert!(ErrorKind::Backoff.is_retryable());
        assert!(ErrorKind::ServerResult.is_retryable());
    }

    #[test]
    fn non_retryable_kinds() {
        assert!(!ErrorKind::Parse.is_retryable());
        assert!(!ErrorKind::InvalidNode.is_retryable());
        assert!(!ErrorKind::CommandRejected.is_retryable());
    }

    #[test]
    fn in_doubt_flag_is_sticky() {
        let err = Error::connection("write failed").in_doubt();
        assert!(err.in_doubt);
        assert!(err.to_string().contains("write failed"));
    }
}
