use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use k8s_openapi::api::core::v1::Pod;

use crate::domain::{LogLine, PodHandle, PodPhase};
use crate::error::Result;

/// Lazily read container output, one line per item.
pub type LogStream<'a> = BoxStream<'a, Result<LogLine>>;

/// Result of a command run through the remote command channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// Whether the remote side reported success (exit code 0)
    pub success: bool,
    /// Failure detail reported by the remote side, if any
    pub message: Option<String>,
}

impl ExecOutput {
    /// Stdout and stderr joined, for diagnostics.
    pub fn combined(&self) -> String {
        let mut parts = Vec::new();
        for part in [&self.stdout, &self.stderr] {
            let part = part.trim();
            if !part.is_empty() {
                parts.push(part);
            }
        }
        if let Some(message) = &self.message {
            parts.push(message.as_str());
        }
        parts.join("\n")
    }
}

/// Client interface describing the cluster operations the pod runner needs.
///
/// Implementations are bound to one namespace. A missing pod is reported as
/// [`AppError::PodNotFound`](crate::error::AppError::PodNotFound) so callers
/// can tell it apart from transport failures.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Namespace every call operates in.
    fn namespace(&self) -> &str;

    /// Submits `pod` and returns a handle to the created object.
    async fn create_pod(&self, pod: &Pod) -> Result<PodHandle>;

    /// Names of pods matching `label_selector`; an empty selector matches all.
    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>>;

    async fn delete_pod(&self, name: &str) -> Result<()>;

    async fn pod_phase(&self, name: &str) -> Result<PodPhase>;

    /// Follows the container's output starting at `since`.
    ///
    /// The stream ends when the container stops or the connection drops; it
    /// does not tell the two apart.
    async fn stream_logs<'a>(
        &'a self,
        name: &'a str,
        container: &'a str,
        since: DateTime<Utc>,
    ) -> Result<LogStream<'a>>;

    /// Runs `command` in the container, optionally feeding `stdin`, and
    /// waits for it to exit.
    ///
    /// `Err` means the channel itself failed; a command that ran and exited
    /// non-zero is `Ok` with `success == false`.
    async fn exec(
        &self,
        name: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput>;
}
