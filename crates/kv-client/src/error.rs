use thiserror::Error;

/// Aggregated error surface across every lower layer, plus the
/// `kv_core::ErrorKind` classification each variant carries for callers
/// that want to decide retryability themselves rather than relying on the
/// already-exhausted retry loop underneath.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Cluster(#[from] kv_cluster::ClusterError),

    #[error(transparent)]
    Exec(#[from] kv_exec::ExecError),

    #[error(transparent)]
    Async(#[from] kv_async::AsyncError),

    #[error(transparent)]
    Wire(#[from] kv_wire::WireError),

    #[error(transparent)]
    Config(#[from] anyhow::Error),
}

impl ClientError {
    pub fn kind(&self) -> kv_core::ErrorKind {
        match self {
            ClientError::Cluster(e) => kv_core::ErrorKind::from(e),
            ClientError::Exec(e) => e.kind(),
            ClientError::Async(e) => e.kind(),
            ClientError::Wire(e) => kv_core::ErrorKind::from(e),
            ClientError::Config(_) => kv_core::ErrorKind::Parse,
        }
    }
}
