pub mod error;
pub mod framing;
pub mod info;
pub mod partitions;
pub mod racks;
pub mod record;

pub use error::WireError;
pub use framing::{Header, HEADER_LEN};
pub use partitions::NamespaceReplicas;
pub use record::RecordHeader;
