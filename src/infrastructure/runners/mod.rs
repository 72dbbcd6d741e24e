//! Pod runner: builds a pod, waits for it, copies files in, runs one
//! command and streams its output back.

mod command_executor;
mod file_transfer;
pub mod interrupt;
pub mod log_stream;
pub mod pod_manager;
pub mod pod_spec;

pub use command_executor::TERMINATE_RETRY_DELAY;
pub use interrupt::{InterruptHandler, SignalSource};
pub use log_stream::{LogCursor, LOG_RETRY_DELAY};
pub use pod_manager::PodManager;
pub use pod_spec::{build_pod, build_pod_spec, SCRIPT_NAME, TIMEOUT_ENV};
