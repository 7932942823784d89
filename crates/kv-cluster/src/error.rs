use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("no live node satisfies the replica policy for this key")]
    InvalidNode,

    #[error("no seed host could be validated")]
    NoValidSeeds,

    #[error("cluster is closed")]
    Closed,

    #[error(transparent)]
    Wire(#[from] kv_wire::WireError),

    #[error(transparent)]
    Pool(#[from] kv_pool::PoolError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&ClusterError> for kv_core::ErrorKind {
    fn from(err: &ClusterError) -> Self {
        match err {
            ClusterError::InvalidNode => kv_core::ErrorKind::InvalidNode,
            ClusterError::NoValidSeeds => kv_core::ErrorKind::InvalidNode,
            ClusterError::Closed => kv_core::ErrorKind::InvalidNode,
            ClusterError::Wire(e) => kv_core::ErrorKind::from(e),
            ClusterError::Pool(e) => kv_core::ErrorKind::from(e),
            ClusterError::Io(_) => kv_core::ErrorKind::Connection,
        }
    }
}
