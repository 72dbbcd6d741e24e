//! [`ClusterClient`] backed by the `kube` crate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::{AsyncBufReadExt, StreamExt, TryStreamExt};
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Status;
use kube::{
    api::{AttachParams, DeleteParams, ListParams, LogParams, PostParams},
    Api, Client,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use super::client::{ClusterClient, ExecOutput, LogStream};
use crate::domain::{LogLine, PodHandle, PodPhase};
use crate::error::{AppError, Result};

/// Talks to the cluster using the ambient configuration (in-cluster or
/// `~/.kube/config`).
#[derive(Clone)]
pub struct KubeClusterClient {
    pods: Api<Pod>,
    namespace: String,
}

impl KubeClusterClient {
    /// Create a new client from the default kubeconfig
    pub async fn try_default(namespace: &str) -> Result<Self> {
        let client = Client::try_default().await.map_err(|e| {
            AppError::KubeError(format!("Failed to create Kubernetes client: {}", e))
        })?;
        info!(namespace, "Created Kubernetes client");
        Ok(Self::new(client, namespace))
    }

    pub fn new(client: Client, namespace: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            namespace: namespace.to_string(),
        }
    }
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_pod(&self, pod: &Pod) -> Result<PodHandle> {
        let created = self.pods.create(&PostParams::default(), pod).await?;
        let name = created
            .metadata
            .name
            .ok_or_else(|| AppError::KubeError("Created pod has no name".to_string()))?;

        Ok(PodHandle {
            name,
            namespace: created
                .metadata
                .namespace
                .unwrap_or_else(|| self.namespace.clone()),
            labels: created.metadata.labels.unwrap_or_default(),
            annotations: created.metadata.annotations.unwrap_or_default(),
        })
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>> {
        let mut params = ListParams::default();
        if !label_selector.is_empty() {
            params = params.labels(label_selector);
        }
        let pods = self.pods.list(&params).await?;
        Ok(pods
            .items
            .into_iter()
            .filter_map(|pod| pod.metadata.name)
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.pods.delete(name, &DeleteParams::default()).await?;
        Ok(())
    }

    async fn pod_phase(&self, name: &str) -> Result<PodPhase> {
        let pod = self.pods.get(name).await?;
        Ok(pod
            .status
            .and_then(|status| status.phase)
            .map(|phase| PodPhase::from(phase.as_str()))
            .unwrap_or(PodPhase::Unknown))
    }

    async fn stream_logs<'a>(
        &'a self,
        name: &'a str,
        container: &'a str,
        since: DateTime<Utc>,
    ) -> Result<LogStream<'a>> {
        let params = LogParams {
            container: Some(container.to_string()),
            follow: true,
            since_time: Some(since),
            timestamps: true,
            ..Default::default()
        };
        let reader = self.pods.log_stream(name, &params).await?;

        Ok(reader
            .lines()
            .map_err(|e| AppError::KubeError(format!("Log stream interrupted: {}", e)))
            .map(|line| line.map(|line| parse_timestamped_line(&line)))
            .boxed())
    }

    async fn exec(
        &self,
        name: &str,
        container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        let params = AttachParams::default()
            .container(container)
            .stdin(stdin.is_some())
            .stdout(true)
            .stderr(true);

        debug!(pod = name, ?command, "Opening exec channel");
        let sends_stdin = stdin.is_some();
        let mut process = self.pods.exec(name, command, &params).await?;

        let status = process.take_status();
        let writer = process.stdin();
        let stdout = process.stdout();
        let stderr = process.stderr();

        let (written, stdout, stderr) = tokio::join!(
            write_input(writer, stdin),
            read_output(stdout),
            read_output(stderr)
        );
        written?;

        let status = match status {
            Some(status) => status.await,
            None => None,
        };
        process
            .join()
            .await
            .map_err(|e| AppError::KubeError(format!("Exec channel failed: {}", e)))?;

        if status.is_none() && sends_stdin {
            debug!(pod = name, "Exec channel closed with stdin, no exit status");
        }
        let success = exec_succeeded(status.as_ref(), sends_stdin);
        let message = if success {
            None
        } else {
            status.and_then(|s| s.message)
        };

        Ok(ExecOutput {
            stdout: stdout?,
            stderr: stderr?,
            success,
            message,
        })
    }
}

/// Whether an exec finished successfully.
///
/// The `v4.channel.k8s.io` protocol cannot half-close, so closing stdin
/// closes the whole channel before the remote status arrives. A missing
/// status is only trusted on that path; callers that send stdin confirm the
/// effect with a second command.
pub(crate) fn exec_succeeded(status: Option<&Status>, sent_stdin: bool) -> bool {
    match status.and_then(|s| s.status.as_deref()) {
        Some(outcome) => outcome == "Success",
        None => sent_stdin,
    }
}

async fn write_input<W: AsyncWrite + Unpin>(writer: Option<W>, input: Option<Vec<u8>>) -> Result<()> {
    if let (Some(mut writer), Some(input)) = (writer, input) {
        writer.write_all(&input).await?;
        writer.shutdown().await?;
    }
    Ok(())
}

async fn read_output<R: AsyncRead + Unpin>(reader: Option<R>) -> Result<String> {
    let mut buffer = Vec::new();
    if let Some(mut reader) = reader {
        reader.read_to_end(&mut buffer).await?;
    }
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Splits the RFC 3339 prefix the API adds when `timestamps` is requested.
///
/// Lines without a parsable prefix are kept whole, without a timestamp.
pub(crate) fn parse_timestamped_line(line: &str) -> LogLine {
    if let Some((stamp, content)) = line.split_once(' ') {
        if let Ok(timestamp) = DateTime::parse_from_rfc3339(stamp) {
            return LogLine {
                timestamp: Some(timestamp.with_timezone(&Utc)),
                content: content.to_string(),
            };
        }
    }
    LogLine {
        timestamp: None,
        content: line.to_string(),
    }
}
