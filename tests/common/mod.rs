#![allow(dead_code)]

use futures::channel::mpsc::{self, UnboundedSender};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use podrunner::infrastructure::runners::InterruptHandler;
use podrunner::{PodManager, RunnerConfig};

pub mod mocks;

pub use mocks::*;

pub const TEST_HOST: &str = "ci-host";

/// Default configuration with a short readiness timeout.
pub fn test_config() -> RunnerConfig {
    RunnerConfig {
        hostname: TEST_HOST.to_string(),
        readiness_timeout: Duration::from_secs(10),
        ..Default::default()
    }
}

/// A manager over `cluster` whose interrupts come from the returned sender.
pub fn test_manager(cluster: &FakeCluster) -> (PodManager, UnboundedSender<()>) {
    test_manager_with_config(cluster, test_config())
}

pub fn test_manager_with_config(
    cluster: &FakeCluster,
    config: RunnerConfig,
) -> (PodManager, UnboundedSender<()>) {
    let (tx, rx) = mpsc::unbounded();
    let manager = PodManager::with_interrupt_handler(
        Arc::new(cluster.clone()),
        Arc::new(config),
        InterruptHandler::with_source(rx.boxed()),
    );
    (manager, tx)
}
