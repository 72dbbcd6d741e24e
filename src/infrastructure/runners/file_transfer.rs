//! Copying local files and directories into a pod.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::pod_manager::{shell_quote, PodManager};
use crate::core::RetryPolicy;
use crate::domain::{expand_local_path, ExecutionOptions, PodHandle};
use crate::error::{AppError, Result};
use crate::infrastructure::archive;

impl PodManager {
    /// Copies `src` into the pod so that it ends up at `dest`.
    ///
    /// The archive is built once and streamed into `tar zxf - -C /` on every
    /// attempt. The exec channel closes with stdin, before the exit status
    /// arrives, so each attempt then checks that `dest` exists. Failed
    /// attempts are reported together with the remote output.
    pub async fn copy_file(
        &self,
        pod: &PodHandle,
        src: &Path,
        dest: &str,
        attempts: u32,
    ) -> Result<()> {
        let source = src.to_path_buf();
        let target = PathBuf::from(dest);
        let payload = tokio::task::spawn_blocking(move || archive::compress(&source, &target))
            .await
            .map_err(|e| AppError::ArchiveError(format!("Archive task failed: {}", e)))??;

        let parent = Path::new(dest)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| "/".to_string());
        let script = format!("mkdir -p {}\ntar zxf - -C /", shell_quote(&parent));
        let check = format!("test -e {}", shell_quote(dest));

        debug!(
            src = %src.display(),
            dest,
            bytes = payload.len(),
            "Prepared archive"
        );

        RetryPolicy::new(attempts)
            .run(|attempt| {
                let payload = payload.clone();
                let script = script.as_str();
                let check = check.as_str();
                async move {
                    info!(attempt, src = %src.display(), dest, pod = %pod, "Copying into pod");
                    self.run_shell(pod, "-ceu", script, Some(payload)).await?;
                    self.run_in_pod(pod, check, None)
                        .await
                        .map_err(|e| match e {
                            AppError::RemoteCommandFailed { pod, command, .. } => {
                                AppError::RemoteCommandFailed {
                                    pod,
                                    command,
                                    output: format!("{} is missing after extraction", dest),
                                }
                            }
                            other => other,
                        })
                }
            })
            .await?;
        Ok(())
    }

    /// Copies every `files` entry of `options`, expanding a leading `~` in
    /// local paths.
    pub async fn copy_user_files(&self, pod: &PodHandle, options: &ExecutionOptions) -> Result<()> {
        for (local, remote) in &options.files {
            let src = expand_local_path(local)?;
            self.copy_file(pod, &src, remote, options.copy_attempts)
                .await?;
        }
        Ok(())
    }
}
