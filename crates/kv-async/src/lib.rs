pub mod buffer_pool;
pub mod error;
pub mod pipeline;
pub mod recovery;
pub mod scheduler;
pub mod timeout_queue;

pub use buffer_pool::{BufferPool, Segment};
pub use error::AsyncError;
pub use pipeline::execute;
pub use scheduler::{AsyncScheduler, SchedulerPermit, Strategy};
pub use timeout_queue::{CommandSlot, TimeoutQueue};
