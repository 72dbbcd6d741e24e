//! Building blocks shared by the pod runner: retry policy, cancellation
//! context and logging setup.

pub mod context;
pub mod logging;
pub mod retry;

pub use context::CommandContext;
pub use retry::{retry, RetryPolicy, DEFAULT_RETRY_DELAY};
