pub mod batch;
pub mod command;
pub mod error;

pub use batch::{plan, BatchKey, BatchState, SubCommand};
pub use command::{execute, CommandState};
pub use error::ExecError;

// `batch::execute` is reached as `kv_exec::batch::execute` rather than
// re-exported at the crate root, since the name collides with the
// single-key `command::execute` pipeline above.
