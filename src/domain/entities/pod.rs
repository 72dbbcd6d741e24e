use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt;

/// Label carrying the identity of the process that created the pod.
pub const HOST_LABEL: &str = "host";

/// A pod created by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodHandle {
    pub name: String,
    pub namespace: String,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
}

impl PodHandle {
    /// The owning host recorded at creation time.
    pub fn host(&self) -> Option<&str> {
        self.labels.get(HOST_LABEL).map(String::as_str)
    }
}

impl fmt::Display for PodHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Labels identifying pods owned by this invocation: the host label plus
/// any caller labels. Caller labels win on a key clash.
pub fn ownership_labels(
    hostname: &str,
    extra: &BTreeMap<String, String>,
) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(HOST_LABEL.to_string(), hostname.to_string())]);
    labels.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Renders labels as an equality-based selector, `k1=v1,k2=v2`.
pub fn label_selector(labels: &BTreeMap<String, String>) -> String {
    labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(",")
}

/// A simplified view of a pod phase.
///
/// Unknown values map to [`PodPhase::Unknown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl PodPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PodPhase::Succeeded | PodPhase::Failed)
    }
}

impl From<&str> for PodPhase {
    fn from(value: &str) -> Self {
        match value {
            "Pending" => PodPhase::Pending,
            "Running" => PodPhase::Running,
            "Succeeded" => PodPhase::Succeeded,
            "Failed" => PodPhase::Failed,
            _ => PodPhase::Unknown,
        }
    }
}

impl fmt::Display for PodPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            PodPhase::Pending => "Pending",
            PodPhase::Running => "Running",
            PodPhase::Succeeded => "Succeeded",
            PodPhase::Failed => "Failed",
            PodPhase::Unknown => "Unknown",
        };
        f.write_str(phase)
    }
}

/// The user the container runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserInfo {
    pub home_directory: String,
    pub whoami: String,
    pub id: String,
}

/// One line of container output with the time the runtime recorded it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    /// `None` when the runtime prefix could not be parsed
    pub timestamp: Option<DateTime<Utc>>,
    pub content: String,
}
