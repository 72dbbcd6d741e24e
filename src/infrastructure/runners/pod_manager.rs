//! Pod lifecycle: creation, readiness, remote commands and teardown.

use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::interrupt::InterruptHandler;
use super::pod_spec::build_pod;
use crate::config::RunnerConfig;
use crate::core::retry;
use crate::domain::{
    label_selector, ownership_labels, ExecutionOptions, PodHandle, PurgeOptions, UserInfo,
};
use crate::error::{AppError, ErrorList, Result};
use crate::infrastructure::kubernetes::{ClusterClient, ExecOutput};

const USER_INFO_COMMAND: &str = r#"echo "${HOME}:::$(whoami):::$(id)""#;
const USER_INFO_ATTEMPTS: u32 = 3;

/// Creates, drives and removes the pods owned by this process.
///
/// Every pod carries the `host` label so that a later invocation from the
/// same host, or the interrupt handler, can find and remove it.
pub struct PodManager {
    pub(crate) client: Arc<dyn ClusterClient>,
    pub(crate) config: Arc<RunnerConfig>,
    interrupts: InterruptHandler,
}

impl PodManager {
    pub fn new(client: Arc<dyn ClusterClient>, config: Arc<RunnerConfig>) -> Self {
        Self::with_interrupt_handler(client, config, InterruptHandler::new())
    }

    pub fn with_interrupt_handler(
        client: Arc<dyn ClusterClient>,
        config: Arc<RunnerConfig>,
        interrupts: InterruptHandler,
    ) -> Self {
        Self {
            client,
            config,
            interrupts,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Cancelled once an interrupt has been received.
    pub fn interrupted(&self) -> CancellationToken {
        self.interrupts.token()
    }

    /// Creates a fresh pod and waits until its entrypoint is ready.
    ///
    /// Pods left over from an earlier run on this host are removed first.
    /// On a readiness failure the pod is left in place; callers remove it
    /// with [`delete_pods`](Self::delete_pods).
    pub async fn create_pod(&self, options: &ExecutionOptions) -> Result<PodHandle> {
        options.validate()?;
        let labels = ownership_labels(&self.config.hostname, &options.labels);
        let pod = build_pod(&self.config, options, labels)?;

        self.delete_pods(options, PurgeOptions::default()).await?;

        info!(side = "host", image = %options.image, "Creating pod");
        let handle = self.client.create_pod(&pod).await?;
        info!(side = "host", pod = %handle, "Pod created");

        self.install_interrupt_handler(options)?;
        self.wait_until_running(&handle).await?;

        Ok(handle)
    }

    fn install_interrupt_handler(&self, options: &ExecutionOptions) -> Result<()> {
        let client = self.client.clone();
        let selector = label_selector(&ownership_labels(&self.config.hostname, &options.labels));

        self.interrupts.install(move || async move {
            if let Err(e) = delete_matching(client.as_ref(), &selector).await {
                warn!("Failed to destroy pods after interrupt: {}", e);
            }
        })?;
        Ok(())
    }

    /// Polls the readiness sentinel until it exists.
    ///
    /// Gives up when the readiness timeout elapses, reporting every probe
    /// error seen, or as soon as an interrupt has been received.
    pub async fn wait_until_running(&self, pod: &PodHandle) -> Result<()> {
        info!(side = "host", pod = %pod, "Waiting for pod to be ready");
        let probe = format!("[ -f {} ] && echo ready", self.config.readiness_sentinel);
        let started = Instant::now();
        let mut errors = ErrorList::new();

        loop {
            match self.run_in_pod(pod, &probe, None).await {
                Ok(output) if output.stdout.contains("ready") => {
                    info!(side = "pod", pod = %pod, "Pod is ready");
                    return Ok(());
                }
                Ok(output) => errors.push(AppError::RemoteCommandFailed {
                    pod: pod.name.clone(),
                    command: probe.clone(),
                    output: output.combined(),
                }),
                Err(e) => {
                    debug!(pod = %pod, error = %e, "Readiness probe failed");
                    errors.push(e);
                }
            }

            if self.interrupts.is_interrupted() {
                return Err(AppError::Interrupted(pod.name.clone()));
            }
            if started.elapsed() >= self.config.readiness_timeout {
                return Err(AppError::ReadinessTimeout {
                    pod: pod.name.clone(),
                    timeout: self.config.readiness_timeout,
                    errors,
                });
            }

            let interrupted = self.interrupts.token();
            tokio::select! {
                _ = interrupted.cancelled() => {
                    return Err(AppError::Interrupted(pod.name.clone()));
                }
                _ = sleep(self.config.readiness_interval) => {}
            }
        }
    }

    /// Deletes owned pods, or every pod in the namespace with `purge.all`.
    ///
    /// A pod that is already gone counts as deleted.
    pub async fn delete_pods(&self, options: &ExecutionOptions, purge: PurgeOptions) -> Result<()> {
        let selector = if purge.all {
            String::new()
        } else {
            label_selector(&ownership_labels(&self.config.hostname, &options.labels))
        };
        delete_matching(self.client.as_ref(), &selector).await
    }

    /// Home directory, login name and `id` output of the container user.
    pub async fn get_pod_user_info(&self, pod: &PodHandle) -> Result<UserInfo> {
        let output = retry(USER_INFO_ATTEMPTS, |_| {
            self.run_in_pod(pod, USER_INFO_COMMAND, None)
        })
        .await?;
        let info = parse_user_info(&output.stdout)?;
        debug!(pod = %pod, home = %info.home_directory, whoami = %info.whoami, "Resolved pod user");
        Ok(info)
    }

    /// `mkdir -p` inside the pod, retried.
    pub async fn prepare_directory(&self, pod: &PodHandle, path: &str, attempts: u32) -> Result<()> {
        let command = format!("mkdir -p {}", shell_quote(path));
        retry(attempts, |_| self.run_in_pod(pod, &command, None)).await?;
        Ok(())
    }

    /// Runs a caller-supplied command in the pod, retried.
    pub async fn run_remote_update(&self, pod: &PodHandle, command: &str, attempts: u32) -> Result<()> {
        info!(pod = %pod, "Running remote update");
        retry(attempts, |attempt| async move {
            debug!(attempt, "Running remote update command");
            self.run_in_pod(pod, command, None).await
        })
        .await?;
        Ok(())
    }

    /// Runs `script` with `sh -c`. A non-zero exit becomes
    /// [`AppError::RemoteCommandFailed`] carrying the combined output.
    pub(crate) async fn run_in_pod(
        &self,
        pod: &PodHandle,
        script: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        self.run_shell(pod, "-c", script, stdin).await
    }

    pub(crate) async fn run_shell(
        &self,
        pod: &PodHandle,
        flags: &str,
        script: &str,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let command = vec!["sh".to_string(), flags.to_string(), script.to_string()];
        let output = self
            .client
            .exec(&pod.name, &self.config.container_name, command, stdin)
            .await?;
        if output.success {
            Ok(output)
        } else {
            Err(AppError::RemoteCommandFailed {
                pod: pod.name.clone(),
                command: script.to_string(),
                output: output.combined(),
            })
        }
    }
}

async fn delete_matching(client: &dyn ClusterClient, selector: &str) -> Result<()> {
    let names = client.list_pods(selector).await?;
    let mut errors = ErrorList::new();

    for name in names {
        info!(pod = %name, "Deleting pod");
        match client.delete_pod(&name).await {
            Ok(()) => {}
            Err(e) if e.is_not_found() => debug!(pod = %name, "Pod already gone"),
            Err(e) => {
                warn!("Failed to delete pod {}: {}", name, e);
                errors.push(e);
            }
        }
    }

    errors.into_result()
}

/// Parses `home:::whoami:::id`.
pub(crate) fn parse_user_info(stdout: &str) -> Result<UserInfo> {
    let mut parts = stdout.trim().splitn(3, ":::");
    let home = parts.next().unwrap_or_default().trim();
    let whoami = parts.next().map(str::trim).filter(|s| !s.is_empty());
    let id = parts.next().map(str::trim).filter(|s| !s.is_empty());

    let whoami = whoami.unwrap_or("unknown").to_string();
    let id = id.unwrap_or("unknown").to_string();

    let home_directory = match home.trim_end_matches('/') {
        "" if home == "/" => "/".to_string(),
        "" => return Err(AppError::MissingHomeDirectory { id, whoami }),
        trimmed => trimmed.to_string(),
    };

    Ok(UserInfo {
        home_directory,
        whoami,
        id,
    })
}

/// Single-quotes `value` for `sh`.
pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
