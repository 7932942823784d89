use thiserror::Error;

#[derive(Debug, Error)]
pub enum AsyncError {
    #[error(transparent)]
    Exec(#[from] kv_exec::ExecError),

    #[error(transparent)]
    Cluster(#[from] kv_cluster::ClusterError),

    #[error("async scheduler rejected the command")]
    Rejected,

    #[error("async command queue is full")]
    QueueFull,

    #[error("total timeout expired while queued or in flight")]
    TotalTimeout,

    #[error("command dropped before completion (scheduler shut down)")]
    Dropped,
}

impl AsyncError {
    pub fn kind(&self) -> kv_core::ErrorKind {
        match self {
            AsyncError::Exec(e) => e.kind(),
            AsyncError::Cluster(e) => kv_core::ErrorKind::from(e),
            AsyncError::Rejected | AsyncError::QueueFull => kv_core::ErrorKind::CommandRejected,
            AsyncError::TotalTimeout => kv_core::ErrorKind::Timeout,
            AsyncError::Dropped => kv_core::ErrorKind::Connection,
        }
    }
}
