use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("no more connections available for this node")]
    NoMoreConnections,

    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("tls handshake failed: {0}")]
    Tls(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&PoolError> for kv_core::ErrorKind {
    fn from(err: &PoolError) -> Self {
        match err {
            PoolError::NoMoreConnections => kv_core::ErrorKind::Backoff,
            _ => kv_core::ErrorKind::Connection,
        }
    }
}
