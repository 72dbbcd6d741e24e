//! Running a user command inside a ready pod.

use chrono::Utc;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tempfile::NamedTempFile;
use tokio::io::AsyncWrite;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use super::log_stream::LogCursor;
use super::pod_manager::PodManager;
use super::pod_spec::SCRIPT_NAME;
use crate::core::CommandContext;
use crate::domain::{ExecutionOptions, PodHandle, PodPhase, PurgeOptions};
use crate::error::{AppError, ErrorList, Result};
use crate::infrastructure::kubernetes::ClusterClient;

/// Pause between two attempts to signal the pod's init process.
pub const TERMINATE_RETRY_DELAY: Duration = Duration::from_millis(50);

impl PodManager {
    /// Runs `command` in `pod` and streams its output to `output`.
    ///
    /// The command is wrapped in a `set -eu` script copied to
    /// `<home_directory>/wrapped-script.sh`, where the pod's entrypoint picks
    /// it up. Cancelling `ctx` sends SIGTERM to the pod's init process until
    /// the pod stops running; the result is then the cancellation error.
    pub async fn execute_command<W>(
        &self,
        ctx: &CommandContext,
        pod: &PodHandle,
        command: &str,
        home_directory: &str,
        options: &ExecutionOptions,
        output: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let script = write_script(command)?;
        let remote_path = format!("{}/{}", home_directory.trim_end_matches('/'), SCRIPT_NAME);

        let mut cursor = LogCursor::new(Utc::now());
        self.copy_file(pod, script.path(), &remote_path, options.copy_attempts)
            .await?;
        drop(script);

        // Copying is not cancellable; the entrypoint may already be starting
        // the script.
        if let Some(err) = ctx.err() {
            warn!(side = "host", pod = %pod, "Command cancelled during script delivery, terminating pod process");
            let stop = signal_until_stopped(self.client.as_ref(), &pod.name, &self.config.container_name);
            let bound = self.config.phase_confirmation_timeout;
            if tokio::time::timeout(bound, stop).await.is_err() {
                warn!(pod = %pod, "Pod process did not stop after cancellation");
            }
            return Err(err);
        }

        info!(side = "host", pod = %pod, "Running command");
        let _watcher = AbortOnDrop(tokio::spawn(terminate_on_cancel(
            self.client.clone(),
            pod.name.clone(),
            self.config.container_name.clone(),
            ctx.clone(),
        )));

        self.stream_pod_output(pod, &mut cursor, output).await?;

        match self.confirm_terminal_phase(pod).await? {
            PodPhase::Succeeded => {
                info!(side = "pod", pod = %pod, "Command succeeded");
                Ok(())
            }
            PodPhase::Failed => Err(ctx
                .err()
                .unwrap_or_else(|| AppError::PodFailed(pod.name.clone()))),
            phase => Err(AppError::UnexpectedPhase(phase.to_string())),
        }
    }

    /// The whole flow for one command: fresh pod, user lookup, file copies,
    /// update commands, execution. Owned pods are deleted afterwards whatever happened; a
    /// cleanup failure is appended to the primary error.
    pub async fn run_command<W>(
        &self,
        ctx: &CommandContext,
        options: &ExecutionOptions,
        command: &str,
        output: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let result = self.run_in_new_pod(ctx, options, command, output).await;
        let cleanup = self.delete_pods(options, PurgeOptions::default()).await;

        match (result, cleanup) {
            (Ok(()), cleanup) => cleanup,
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(cleanup)) => Err(e.append(cleanup)),
        }
    }

    async fn run_in_new_pod<W>(
        &self,
        ctx: &CommandContext,
        options: &ExecutionOptions,
        command: &str,
        output: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let pod = self.create_pod(options).await?;
        let user = self.get_pod_user_info(&pod).await?;
        self.copy_user_files(&pod, options).await?;
        for update in &options.update_commands {
            self.run_remote_update(&pod, update, options.update_attempts)
                .await?;
        }
        self.execute_command(ctx, &pod, command, &user.home_directory, options, output)
            .await
    }

    /// Polls until the pod leaves `Running`. A pod that no longer exists
    /// counts as failed.
    async fn confirm_terminal_phase(&self, pod: &PodHandle) -> Result<PodPhase> {
        let timeout = self.config.phase_confirmation_timeout;
        let started = Instant::now();
        let mut errors = ErrorList::new();
        let mut last = PodPhase::Unknown;

        while started.elapsed() < timeout {
            match self.client.pod_phase(&pod.name).await {
                Ok(PodPhase::Running) => last = PodPhase::Running,
                Ok(phase) => return Ok(phase),
                Err(e) if e.is_not_found() => return Ok(PodPhase::Failed),
                Err(e) => errors.push(e),
            }
            sleep(self.config.phase_confirmation_interval).await;
        }

        if errors.is_empty() {
            Ok(last)
        } else {
            Err(AppError::PhaseConfirmationTimeout {
                pod: pod.name.clone(),
                timeout,
                errors,
            })
        }
    }
}

fn write_script(command: &str) -> Result<NamedTempFile> {
    let mut file = tempfile::Builder::new()
        .prefix("podrunner-")
        .suffix(".sh")
        .tempfile()?;
    file.write_all(format!("set -eu\n{}", command).as_bytes())?;
    file.flush()?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.as_file()
            .set_permissions(std::fs::Permissions::from_mode(0o777))?;
    }

    Ok(file)
}

struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Waits for `ctx` to end, then stops the pod's init process.
async fn terminate_on_cancel(
    client: Arc<dyn ClusterClient>,
    pod: String,
    container: String,
    ctx: CommandContext,
) {
    ctx.done().await;
    warn!(side = "host", pod = %pod, "Command cancelled, terminating pod process");
    signal_until_stopped(client.as_ref(), &pod, &container).await;
}

/// Sends SIGTERM to PID 1 until the pod is no longer running.
///
/// A delivered signal is not enough: the process may not have a handler
/// installed yet.
async fn signal_until_stopped(client: &dyn ClusterClient, pod: &str, container: &str) {
    let command = vec!["sh".to_string(), "-c".to_string(), "kill -term 1".to_string()];
    loop {
        match client.exec(pod, container, command.clone(), None).await {
            Ok(output) if output.success => debug!(pod, "Termination signal delivered"),
            Ok(output) => debug!(pod, output = %output.combined(), "Failed to signal pod process"),
            Err(e) if e.is_not_found() => return,
            Err(e) => debug!(pod, error = %e, "Failed to signal pod process"),
        }

        match client.pod_phase(pod).await {
            Ok(phase) if phase.is_terminal() => return,
            Ok(_) => {}
            Err(e) if e.is_not_found() => return,
            Err(e) => debug!(pod, error = %e, "Failed to read pod phase"),
        }
        sleep(TERMINATE_RETRY_DELAY).await;
    }
}
