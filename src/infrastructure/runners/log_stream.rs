//! Resumable following of a pod's output.
//!
//! The log API restarts a stream from a `sinceTime` with second precision,
//! so a reconnect replays lines that were already written. [`LogCursor`]
//! remembers the timestamp of the last delivered line and how many lines
//! carried it, then skips exactly that many on the next stream.

use chrono::{DateTime, Utc};
use futures::StreamExt;
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::time::sleep;
use tracing::{debug, info};

use super::pod_manager::PodManager;
use crate::domain::{LogLine, PodHandle};
use crate::error::{AppError, Result};

/// Pause between two stream attempts and after a failed phase lookup.
pub const LOG_RETRY_DELAY: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCursor {
    start: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
    /// Lines delivered so far that carry `last`
    delivered_at_last: usize,
    /// Lines carrying `last` seen in the current stream
    seen_at_last: usize,
}

impl LogCursor {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            start,
            last: None,
            delivered_at_last: 0,
            seen_at_last: 0,
        }
    }

    /// Where the next stream should start.
    pub fn since(&self) -> DateTime<Utc> {
        self.last.unwrap_or(self.start)
    }

    /// Called before reading a new stream.
    pub fn begin_stream(&mut self) {
        self.seen_at_last = 0;
    }

    /// Records `line` and returns whether it is new.
    ///
    /// A line without a timestamp counts as written at the last delivered
    /// timestamp.
    pub fn accept(&mut self, line: &LogLine) -> bool {
        let stamp = match (line.timestamp, self.last) {
            (Some(stamp), _) => stamp,
            (None, Some(last)) => last,
            (None, None) => self.start,
        };

        match self.last {
            Some(last) if stamp < last => false,
            Some(last) if stamp == last => {
                self.seen_at_last += 1;
                if self.seen_at_last <= self.delivered_at_last {
                    return false;
                }
                self.delivered_at_last += 1;
                true
            }
            _ => {
                self.last = Some(stamp);
                self.delivered_at_last = 1;
                self.seen_at_last = 1;
                true
            }
        }
    }
}

impl PodManager {
    /// Copies the pod's output to `output` until the pod reaches a terminal
    /// phase or disappears.
    ///
    /// Dropped streams are reopened from the cursor. Only a failure to write
    /// to `output` ends the loop with an error.
    pub async fn stream_pod_output<W>(
        &self,
        pod: &PodHandle,
        cursor: &mut LogCursor,
        output: &mut W,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        loop {
            match self.client.pod_phase(&pod.name).await {
                Ok(phase) if phase.is_terminal() => {
                    debug!(side = "pod", pod = %pod, %phase, "Pod finished, stopping log stream");
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(pod = %pod, "Pod is gone, stopping log stream");
                    return Ok(());
                }
                Err(e) => {
                    debug!(pod = %pod, error = %e, "Failed to read pod phase");
                    sleep(LOG_RETRY_DELAY).await;
                    continue;
                }
            }

            match self.follow_logs(pod, cursor, output).await {
                Ok(()) => debug!(pod = %pod, "Log stream ended"),
                Err(e @ AppError::Io(_)) => return Err(e),
                Err(e) => info!("Got an error from streaming pod logs: {}", e),
            }
            sleep(LOG_RETRY_DELAY).await;
        }
    }

    async fn follow_logs<W>(&self, pod: &PodHandle, cursor: &mut LogCursor, output: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let mut lines = self
            .client
            .stream_logs(&pod.name, &self.config.container_name, cursor.since())
            .await?;
        cursor.begin_stream();

        while let Some(line) = lines.next().await {
            let line = line?;
            if !cursor.accept(&line) {
                continue;
            }
            output.write_all(line.content.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        Ok(())
    }
}
