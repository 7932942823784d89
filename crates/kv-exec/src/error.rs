use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Cluster(#[from] kv_cluster::ClusterError),

    #[error(transparent)]
    Pool(#[from] kv_pool::PoolError),

    #[error(transparent)]
    Wire(#[from] kv_wire::WireError),

    #[error("i/o error: {0}")]
    Io(#[source] std::io::Error),

    #[error("total timeout exceeded after {iterations} attempt(s)")]
    TotalTimeout { iterations: u32, in_doubt: bool },

    #[error("socket timeout on attempt {iteration}")]
    SocketTimeout { iteration: u32, in_doubt: bool },

    #[error("server returned non-zero result code {code}")]
    ServerResult { code: u8, retryable: bool },

    #[error("UDF failure: {0}")]
    UdfBadResponse(String),

    #[error("async scheduler rejected the command")]
    CommandRejected,
}

impl ExecError {
    pub fn in_doubt(&self) -> bool {
        matches!(
            self,
            ExecError::TotalTimeout { in_doubt: true, .. } | ExecError::SocketTimeout { in_doubt: true, .. }
        )
    }

    pub fn kind(&self) -> kv_core::ErrorKind {
        use kv_core::ErrorKind;
        match self {
            ExecError::Cluster(e) => kv_core::ErrorKind::from(e),
            ExecError::Pool(e) => kv_core::ErrorKind::from(e),
            ExecError::Wire(e) => kv_core::ErrorKind::from(e),
            ExecError::Io(_) => ErrorKind::Connection,
            ExecError::TotalTimeout { .. } | ExecError::SocketTimeout { .. } => ErrorKind::Timeout,
            ExecError::ServerResult { .. } => ErrorKind::ServerResult,
            ExecError::UdfBadResponse(_) => ErrorKind::Parse,
            ExecError::CommandRejected => ErrorKind::CommandRejected,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ExecError::ServerResult { retryable, .. } => *retryable,
            _ => self.kind().is_retryable(),
        }
    }
}

impl From<std::io::Error> for ExecError {
    fn from(err: std::io::Error) -> Self {
        ExecError::Io(err)
    }
}

/// Server result codes that are retryable per §7 (a defined subset).
pub const RESULT_OK: u8 = 0;
pub const RESULT_TIMEOUT: u8 = 9;
pub const RESULT_DEVICE_OVERLOAD: u8 = 18;
pub const RESULT_UDF_BAD_RESPONSE: u8 = 100;

pub fn is_retryable_result_code(code: u8) -> bool {
    matches!(code, RESULT_TIMEOUT | RESULT_DEVICE_OVERLOAD)
}
