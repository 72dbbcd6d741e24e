//! podrunner - run a command inside a short-lived Kubernetes pod
//!
//! A pod is created per invocation, local files are copied into it, the
//! command runs under the pod's entrypoint and its output is streamed back.
//! Pods are labelled with the creating host so they can always be found and
//! removed again.

pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod infrastructure;

pub use config::RunnerConfig;
pub use core::CommandContext;
pub use domain::{ExecutionOptions, PodHandle, PurgeOptions};
pub use error::{AppError, Result};
pub use infrastructure::kubernetes::{ClusterClient, KubeClusterClient};
pub use infrastructure::runners::PodManager;
