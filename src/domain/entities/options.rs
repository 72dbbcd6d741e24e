//! Per-invocation execution options.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{AppError, Result};

/// Sentinel for "leave the image's user/group alone".
pub const UNSET_ID: i64 = -1;

pub const DEFAULT_IMAGE: &str = "docker.io/noksa/kubectl-helm:v1.34.2-v4.0.4";
pub const DEFAULT_PULL_POLICY: &str = "IfNotPresent";
pub const DEFAULT_CPU: &str = "1100m";
pub const DEFAULT_MEMORY: &str = "500Mi";
pub const DEFAULT_ATTEMPTS: u32 = 3;
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 2 * 60 * 60;

/// Everything needed to build and drive one pod.
///
/// Built once per invocation and only read after the pod spec has been
/// derived from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionOptions {
    /// Container image
    pub image: String,
    /// Image pull policy
    pub pull_policy: String,
    /// Secret used to pull `image` from a private registry
    pub image_pull_secret: Option<String>,
    /// CPU request/limit, skipped when empty or "0"
    pub cpu: String,
    /// Memory request/limit, skipped when empty or "0"
    pub memory: String,
    /// Run as user ID, [`UNSET_ID`] keeps the image default
    pub run_as_user: i64,
    /// Run as group ID, [`UNSET_ID`] keeps the image default
    pub run_as_group: i64,
    /// Extra pod labels, also part of the ownership selector
    pub labels: BTreeMap<String, String>,
    /// Extra pod annotations
    pub annotations: BTreeMap<String, String>,
    /// Use the node's network namespace
    pub host_network: bool,
    /// Raw tolerations in `key=value:effect:operator` form
    pub tolerations: Vec<String>,
    /// Node selector labels
    pub node_selector: BTreeMap<String, String>,
    /// Explicit environment variables
    pub env: BTreeMap<String, String>,
    /// Environment variable names whose values come from the host
    pub subst_env: Vec<String>,
    /// Local path to remote path
    pub files: BTreeMap<String, String>,
    /// Attempts for every copy into the pod
    pub copy_attempts: u32,
    /// Remote commands run before the user command, e.g. `helm repo update`
    pub update_commands: Vec<String>,
    /// Attempts for every remote update command
    pub update_attempts: u32,
    /// Command timeout in seconds
    pub timeout_seconds: u64,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self {
            image: DEFAULT_IMAGE.to_string(),
            pull_policy: DEFAULT_PULL_POLICY.to_string(),
            image_pull_secret: None,
            cpu: DEFAULT_CPU.to_string(),
            memory: DEFAULT_MEMORY.to_string(),
            run_as_user: UNSET_ID,
            run_as_group: UNSET_ID,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            host_network: false,
            tolerations: Vec::new(),
            node_selector: BTreeMap::new(),
            env: BTreeMap::new(),
            subst_env: Vec::new(),
            files: BTreeMap::new(),
            copy_attempts: DEFAULT_ATTEMPTS,
            update_commands: Vec::new(),
            update_attempts: DEFAULT_ATTEMPTS,
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
        }
    }
}

impl ExecutionOptions {
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let options: ExecutionOptions = serde_yaml::from_str(content)?;
        options.validate()?;
        Ok(options)
    }

    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AppError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    /// Rejects settings that must never reach the cluster.
    pub fn validate(&self) -> Result<()> {
        if self.copy_attempts < 1 {
            return Err(AppError::InvalidAttempts {
                name: "copy-attempts".to_string(),
                value: i64::from(self.copy_attempts),
            });
        }
        if self.update_attempts < 1 {
            return Err(AppError::InvalidAttempts {
                name: "update-attempts".to_string(),
                value: i64::from(self.update_attempts),
            });
        }
        if self.image.trim().is_empty() {
            return Err(AppError::ConfigError("image must not be empty".to_string()));
        }
        Ok(())
    }

    /// Parses `local:remote` pairs; each spec may hold several pairs
    /// separated by commas.
    pub fn parse_copy_specs<S: AsRef<str>>(specs: &[S]) -> Result<BTreeMap<String, String>> {
        let mut files = BTreeMap::new();
        for spec in specs {
            for entry in spec.as_ref().split(',').filter(|e| !e.is_empty()) {
                match entry.split_once(':') {
                    Some((local, remote)) if !local.is_empty() && !remote.is_empty() => {
                        files.insert(local.to_string(), remote.to_string());
                    }
                    _ => {
                        return Err(AppError::ConfigError(format!(
                            "copy entry {:?} must look like /local/path:/remote/path",
                            entry
                        )))
                    }
                }
            }
        }
        Ok(files)
    }
}

/// Expands a leading `~` to the local user's home directory.
pub fn expand_local_path(path: &str) -> Result<PathBuf> {
    let Some(rest) = path.strip_prefix('~') else {
        return Ok(PathBuf::from(path));
    };
    let home = std::env::var_os("HOME")
        .ok_or_else(|| AppError::ConfigError(format!("cannot expand {:?}: HOME is not set", path)))?;
    Ok(PathBuf::from(home).join(rest.trim_start_matches('/')))
}

/// Options for pod deletion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PurgeOptions {
    /// Ignore ownership and delete every pod in the namespace
    pub all: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let options = ExecutionOptions::default();
        assert_eq!(options.image, DEFAULT_IMAGE);
        assert_eq!(options.run_as_user, UNSET_ID);
        assert_eq!(options.copy_attempts, 3);
        assert_eq!(options.timeout(), Duration::from_secs(7200));
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_attempts() {
        let options = ExecutionOptions {
            copy_attempts: 0,
            ..Default::default()
        };
        assert!(matches!(
            options.validate(),
            Err(AppError::InvalidAttempts { value: 0, .. })
        ));
    }

    #[test]
    fn test_from_yaml_fills_defaults() {
        let yaml = r#"
image: alpine:3.20
cpu: "0"
labels:
  team: platform
tolerations:
  - "::Exists"
files:
  ./values.yaml: /tmp/values.yaml
timeout_seconds: 60
"#;
        let options = ExecutionOptions::from_yaml_str(yaml).unwrap();

        assert_eq!(options.image, "alpine:3.20");
        assert_eq!(options.cpu, "0");
        assert_eq!(options.memory, DEFAULT_MEMORY);
        assert_eq!(options.labels.get("team").map(String::as_str), Some("platform"));
        assert_eq!(options.tolerations, vec!["::Exists".to_string()]);
        assert_eq!(options.files.len(), 1);
        assert_eq!(options.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_yaml_rejects_bad_attempts() {
        let err = ExecutionOptions::from_yaml_str("update_attempts: 0").unwrap_err();
        assert!(matches!(err, AppError::InvalidAttempts { .. }));
    }

    #[test]
    fn test_parse_copy_specs() {
        let specs = vec![
            "/a.yaml:/remote/a.yaml,/b:/remote/b".to_string(),
            "/c:/remote/c".to_string(),
        ];
        let files = ExecutionOptions::parse_copy_specs(&specs).unwrap();

        assert_eq!(files.len(), 3);
        assert_eq!(files["/a.yaml"], "/remote/a.yaml");
        assert_eq!(files["/c"], "/remote/c");
    }

    #[test]
    fn test_parse_copy_specs_rejects_missing_destination() {
        assert!(ExecutionOptions::parse_copy_specs(&["/only/local"]).is_err());
    }

    #[test]
    fn test_expand_local_path() {
        assert_eq!(
            expand_local_path("/abs/path").unwrap(),
            PathBuf::from("/abs/path")
        );

        if let Some(home) = std::env::var_os("HOME") {
            assert_eq!(
                expand_local_path("~/values.yaml").unwrap(),
                PathBuf::from(home).join("values.yaml")
            );
        }
    }
}
