use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("frame too short: need {need} bytes, have {have}")]
    FrameTooShort { need: usize, have: usize },

    #[error("unsupported message version {0}")]
    UnsupportedVersion(u8),

    #[error("malformed info response: {0}")]
    MalformedInfo(String),

    #[error("malformed partition payload: {0}")]
    MalformedPartitions(String),

    #[error("malformed racks payload: {0}")]
    MalformedRacks(String),

    #[error("base64 decode failed: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("bitmap length mismatch: expected {expected} bytes, got {got}")]
    BitmapLength { expected: usize, got: usize },

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<&WireError> for kv_core::ErrorKind {
    fn from(_: &WireError) -> Self {
        kv_core::ErrorKind::Parse
    }
}
