pub mod connection;
pub mod error;
pub mod node_pool;
pub mod stack;

pub use connection::{Connection, Transport};
pub use error::PoolError;
pub use node_pool::NodePool;
pub use stack::ConnPool;
