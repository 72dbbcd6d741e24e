use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use podrunner::domain::{LogLine, PodHandle, PodPhase};
use podrunner::infrastructure::archive::read_entries;
use podrunner::infrastructure::kubernetes::{ClusterClient, ExecOutput, LogStream};
use podrunner::{AppError, Result};

/// How the fake cluster reacts to the commands it receives.
#[derive(Debug, Clone)]
pub struct FakeBehavior {
    /// Failed readiness probes before the sentinel shows up; `None` never
    pub ready_after_probes: Option<u32>,
    /// Output of the user info command
    pub user_info: String,
    /// Lines printed by the wrapped script
    pub output: Vec<String>,
    /// Whether the script exits zero
    pub succeeds: bool,
    /// The first log stream ends after this many lines, pod still running
    pub drop_stream_after: Option<usize>,
    /// The script never finishes on its own
    pub hold_running: bool,
    /// Archive extractions that fail before one succeeds
    pub copy_failures: u32,
    /// Other commands that fail before one succeeds
    pub command_failures: u32,
    /// Archive extractions that report success without writing anything
    pub lost_uploads: u32,
    /// Time every archive extraction takes
    pub copy_delay: Duration,
    /// Termination signals delivered before a handler is in place
    pub ignored_kills: u32,
    /// Pod deletions that fail before one succeeds
    pub delete_failures: u32,
    /// What phase lookups report once a finished phase has been seen
    pub after_finish: Option<AfterFinish>,
}

/// Status reported after the pod was first seen finished.
#[derive(Debug, Clone, Copy)]
pub enum AfterFinish {
    Phase(PodPhase),
    ApiError,
}

impl Default for FakeBehavior {
    fn default() -> Self {
        Self {
            ready_after_probes: Some(0),
            user_info: "/home/runner:::runner:::uid=1000(runner) gid=1000(runner)".to_string(),
            output: Vec::new(),
            succeeds: true,
            drop_stream_after: None,
            hold_running: false,
            copy_failures: 0,
            command_failures: 0,
            lost_uploads: 0,
            copy_delay: Duration::ZERO,
            ignored_kills: 0,
            delete_failures: 0,
            after_finish: None,
        }
    }
}

/// A pod tracked by the fake cluster.
#[derive(Debug, Clone)]
pub struct FakePod {
    pub labels: BTreeMap<String, String>,
    pub phase: PodPhase,
    pub files: BTreeMap<String, Vec<u8>>,
    pub logs: Vec<LogLine>,
    pub streams_opened: usize,
    finish_seen: bool,
}

impl FakePod {
    fn new(labels: BTreeMap<String, String>) -> Self {
        Self {
            labels,
            phase: PodPhase::Running,
            files: BTreeMap::new(),
            logs: Vec::new(),
            streams_opened: 0,
            finish_seen: false,
        }
    }
}

#[derive(Default)]
struct ClusterState {
    pods: BTreeMap<String, FakePod>,
    created: Vec<Pod>,
    calls: Vec<String>,
    commands: Vec<String>,
    probes: u32,
    kills: u32,
    copy_failures_left: u32,
    command_failures_left: u32,
    lost_uploads_left: u32,
    ignored_kills_left: u32,
    delete_failures_left: u32,
    next_id: u32,
}

/// In-memory [`ClusterClient`] driving a scripted pod.
#[derive(Clone)]
pub struct FakeCluster {
    namespace: String,
    behavior: Arc<FakeBehavior>,
    state: Arc<RwLock<ClusterState>>,
}

impl FakeCluster {
    pub fn new(behavior: FakeBehavior) -> Self {
        let state = ClusterState {
            copy_failures_left: behavior.copy_failures,
            command_failures_left: behavior.command_failures,
            lost_uploads_left: behavior.lost_uploads,
            ignored_kills_left: behavior.ignored_kills,
            delete_failures_left: behavior.delete_failures,
            ..Default::default()
        };
        Self {
            namespace: "podrunner".to_string(),
            behavior: Arc::new(behavior),
            state: Arc::new(RwLock::new(state)),
        }
    }

    pub async fn add_pod(&self, name: &str, labels: &[(&str, &str)]) {
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        self.state
            .write()
            .await
            .pods
            .insert(name.to_string(), FakePod::new(labels));
    }

    pub async fn pod_names(&self) -> Vec<String> {
        self.state.read().await.pods.keys().cloned().collect()
    }

    pub async fn get_pod(&self, name: &str) -> Option<FakePod> {
        self.state.read().await.pods.get(name).cloned()
    }

    pub async fn set_phase(&self, name: &str, phase: PodPhase) {
        if let Some(pod) = self.state.write().await.pods.get_mut(name) {
            pod.phase = phase;
        }
    }

    /// Pod objects submitted through `create_pod`.
    pub async fn created(&self) -> Vec<Pod> {
        self.state.read().await.created.clone()
    }

    /// Names of the trait methods called so far, in order.
    pub async fn calls(&self) -> Vec<String> {
        self.state.read().await.calls.clone()
    }

    /// Shell scripts passed to `exec`, in order.
    pub async fn commands(&self) -> Vec<String> {
        self.state.read().await.commands.clone()
    }

    pub async fn kills(&self) -> u32 {
        self.state.read().await.kills
    }

    async fn record(&self, call: &str) {
        self.state.write().await.calls.push(call.to_string());
    }

    fn script_output(&self) -> Vec<LogLine> {
        let base = Utc::now();
        self.behavior
            .output
            .iter()
            .enumerate()
            .map(|(i, content)| LogLine {
                timestamp: Some(base + ChronoDuration::milliseconds(100 * i as i64)),
                content: content.clone(),
            })
            .collect()
    }

    fn finished_phase(&self) -> PodPhase {
        if self.behavior.succeeds {
            PodPhase::Succeeded
        } else {
            PodPhase::Failed
        }
    }
}

fn matches_selector(labels: &BTreeMap<String, String>, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|term| !term.is_empty())
        .all(|term| match term.split_once('=') {
            Some((k, v)) => labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

fn ok(stdout: &str) -> ExecOutput {
    ExecOutput {
        stdout: stdout.to_string(),
        success: true,
        ..Default::default()
    }
}

fn failed(stderr: &str) -> ExecOutput {
    ExecOutput {
        stderr: stderr.to_string(),
        success: false,
        message: Some("command terminated with non-zero exit code".to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl ClusterClient for FakeCluster {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn create_pod(&self, pod: &Pod) -> Result<PodHandle> {
        self.record("create_pod").await;
        let mut state = self.state.write().await;
        state.next_id += 1;
        let prefix = pod.metadata.generate_name.clone().unwrap_or_default();
        let name = format!("{}{}", prefix, state.next_id);
        let labels = pod.metadata.labels.clone().unwrap_or_default();

        state.created.push(pod.clone());
        state.pods.insert(name.clone(), FakePod::new(labels.clone()));

        Ok(PodHandle {
            name,
            namespace: self.namespace.clone(),
            labels,
            annotations: pod.metadata.annotations.clone().unwrap_or_default(),
        })
    }

    async fn list_pods(&self, label_selector: &str) -> Result<Vec<String>> {
        self.record("list_pods").await;
        let state = self.state.read().await;
        Ok(state
            .pods
            .iter()
            .filter(|(_, pod)| matches_selector(&pod.labels, label_selector))
            .map(|(name, _)| name.clone())
            .collect())
    }

    async fn delete_pod(&self, name: &str) -> Result<()> {
        self.record("delete_pod").await;
        let mut state = self.state.write().await;
        if state.delete_failures_left > 0 {
            state.delete_failures_left -= 1;
            return Err(AppError::KubeError("etcdserver: request timed out".to_string()));
        }
        match state.pods.remove(name) {
            Some(_) => Ok(()),
            None => Err(AppError::PodNotFound(name.to_string())),
        }
    }

    async fn pod_phase(&self, name: &str) -> Result<PodPhase> {
        let mut state = self.state.write().await;
        let pod = state
            .pods
            .get_mut(name)
            .ok_or_else(|| AppError::PodNotFound(name.to_string()))?;

        if pod.finish_seen {
            match self.behavior.after_finish {
                Some(AfterFinish::Phase(phase)) => return Ok(phase),
                Some(AfterFinish::ApiError) => {
                    return Err(AppError::KubeError("connection refused".to_string()))
                }
                None => {}
            }
        }
        if pod.phase.is_terminal() {
            pod.finish_seen = true;
        }
        Ok(pod.phase)
    }

    async fn stream_logs<'a>(
        &'a self,
        name: &'a str,
        _container: &'a str,
        since: DateTime<Utc>,
    ) -> Result<LogStream<'a>> {
        let finished = self.finished_phase();
        let mut state = self.state.write().await;
        let pod = state
            .pods
            .get_mut(name)
            .ok_or_else(|| AppError::PodNotFound(name.to_string()))?;
        pod.streams_opened += 1;

        // The API only honours whole seconds.
        let since = since
            .duration_trunc(ChronoDuration::seconds(1))
            .unwrap_or(since);
        let mut lines: Vec<LogLine> = pod
            .logs
            .iter()
            .filter(|line| line.timestamp.map_or(true, |t| t >= since))
            .cloned()
            .collect();

        match self.behavior.drop_stream_after {
            Some(limit) if pod.streams_opened == 1 && lines.len() > limit => lines.truncate(limit),
            _ if !pod.logs.is_empty() && !self.behavior.hold_running => pod.phase = finished,
            _ => {}
        }

        Ok(futures::stream::iter(lines.into_iter().map(Ok)).boxed())
    }

    async fn exec(
        &self,
        name: &str,
        _container: &str,
        command: Vec<String>,
        stdin: Option<Vec<u8>>,
    ) -> Result<ExecOutput> {
        self.record("exec").await;
        let script = command.last().cloned().unwrap_or_default();
        let output = self.script_output();
        let finished = self.finished_phase();

        let mut state = self.state.write().await;
        state.commands.push(script.clone());
        if !state.pods.contains_key(name) {
            return Err(AppError::PodNotFound(name.to_string()));
        }

        if script.contains("echo ready") {
            state.probes += 1;
            return Ok(match self.behavior.ready_after_probes {
                Some(after) if state.probes > after => ok("ready\n"),
                _ => failed(""),
            });
        }

        if script.contains(":::$(whoami)") {
            return Ok(ok(&format!("{}\n", self.behavior.user_info)));
        }

        if script == "kill -term 1" {
            state.kills += 1;
            if state.ignored_kills_left > 0 {
                state.ignored_kills_left -= 1;
                return Ok(ok(""));
            }
            if let Some(pod) = state.pods.get_mut(name) {
                pod.phase = PodPhase::Failed;
            }
            return Ok(ok(""));
        }

        if let Some(path) = script.strip_prefix("test -e ") {
            let path = path.trim_matches('\'');
            let prefix = format!("{}/", path.trim_end_matches('/'));
            let pod = state
                .pods
                .get(name)
                .ok_or_else(|| AppError::PodNotFound(name.to_string()))?;
            let exists = pod
                .files
                .keys()
                .any(|file| file == path || file.starts_with(&prefix));
            return Ok(if exists { ok("") } else { failed("") });
        }

        if script.contains("tar zxf - -C /") {
            if !self.behavior.copy_delay.is_zero() {
                drop(state);
                tokio::time::sleep(self.behavior.copy_delay).await;
                state = self.state.write().await;
            }
            if state.copy_failures_left > 0 {
                state.copy_failures_left -= 1;
                return Ok(failed("tar: short read"));
            }
            if state.lost_uploads_left > 0 {
                state.lost_uploads_left -= 1;
                return Ok(ok(""));
            }
            let entries = read_entries(&stdin.unwrap_or_default())?;
            let pod = state
                .pods
                .get_mut(name)
                .ok_or_else(|| AppError::PodNotFound(name.to_string()))?;
            for entry in entries {
                let starts_script = entry.path.ends_with("wrapped-script.sh");
                if !entry.is_dir {
                    pod.files.insert(format!("/{}", entry.path), entry.contents);
                }
                if starts_script {
                    pod.logs = output.clone();
                    if pod.logs.is_empty() && !self.behavior.hold_running {
                        pod.phase = finished;
                    }
                }
            }
            return Ok(ok(""));
        }

        if state.command_failures_left > 0 {
            state.command_failures_left -= 1;
            return Ok(failed("transient failure"));
        }
        Ok(ok(""))
    }
}
