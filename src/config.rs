use serde::Deserialize;
use std::time::Duration;

use crate::error::{AppError, Result};

pub const DEFAULT_NAMESPACE: &str = "podrunner";

/// Process-wide settings, built once at start-up and shared by reference.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Namespace all pods live in
    pub namespace: String,
    /// Name of the single container in every pod
    pub container_name: String,
    /// Service account the pod runs as
    pub service_account: String,
    /// Identity of this process, stored in the `host` label
    pub hostname: String,
    /// File the container creates once its entrypoint is set up
    pub readiness_sentinel: String,
    pub readiness_timeout: Duration,
    pub readiness_interval: Duration,
    pub phase_confirmation_timeout: Duration,
    pub phase_confirmation_interval: Duration,
    pub termination_grace_period_seconds: i64,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            namespace: DEFAULT_NAMESPACE.to_string(),
            container_name: DEFAULT_NAMESPACE.to_string(),
            service_account: DEFAULT_NAMESPACE.to_string(),
            hostname: "localhost".to_string(),
            readiness_sentinel: "/tmp/ready".to_string(),
            readiness_timeout: Duration::from_secs(5 * 60),
            readiness_interval: Duration::from_secs(1),
            phase_confirmation_timeout: Duration::from_secs(60),
            phase_confirmation_interval: Duration::from_millis(100),
            termination_grace_period_seconds: 300,
        }
    }
}

impl RunnerConfig {
    /// Reads `PODRUNNER_*` variables (after loading `.env`), falling back to
    /// defaults. The hostname comes from the OS unless overridden.
    pub fn init() -> Result<RunnerConfig> {
        dotenv::dotenv().ok();

        let mut config = RunnerConfig::default();

        config.hostname = match std::env::var("PODRUNNER_HOSTNAME") {
            Ok(hostname) => hostname,
            Err(_) => hostname::get()
                .map_err(|e| AppError::ConfigError(format!("Failed to read hostname: {}", e)))?
                .to_string_lossy()
                .into_owned(),
        };
        if let Ok(namespace) = std::env::var("PODRUNNER_NAMESPACE") {
            config.namespace = namespace;
        }
        if let Ok(container) = std::env::var("PODRUNNER_CONTAINER") {
            config.container_name = container;
        }
        if let Ok(service_account) = std::env::var("PODRUNNER_SERVICE_ACCOUNT") {
            config.service_account = service_account;
        }
        if let Ok(seconds) = std::env::var("PODRUNNER_READINESS_TIMEOUT_SECONDS") {
            let seconds = seconds.parse::<u64>().map_err(|_| {
                AppError::ConfigError(
                    "PODRUNNER_READINESS_TIMEOUT_SECONDS must be a number".to_string(),
                )
            })?;
            config.readiness_timeout = Duration::from_secs(seconds);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("namespace", &self.namespace),
            ("container_name", &self.container_name),
            ("hostname", &self.hostname),
        ] {
            if value.trim().is_empty() {
                return Err(AppError::ConfigError(format!("{} must not be empty", name)));
            }
        }
        Ok(())
    }
}
