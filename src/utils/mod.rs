pub mod retry;
pub mod shutdown;

pub use retry::{RetryError, RetryPolicy};
pub use shutdown::{Shutdown, ShutdownTrigger};
