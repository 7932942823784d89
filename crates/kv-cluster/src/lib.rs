pub mod cluster;
pub mod error;
pub mod node;
pub mod partitions;
pub mod peers;
pub mod selection;

pub use cluster::Cluster;
pub use error::ClusterError;
pub use node::Node;
pub use partitions::{Partitions, Topology};
pub use selection::{select_node, SharedCounters};
