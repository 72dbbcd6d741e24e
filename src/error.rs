use std::fmt;
use std::time::Duration;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid toleration {raw:?}: {reason}")]
    InvalidToleration { raw: String, reason: String },

    #[error("Duplicate toleration {0:?}")]
    DuplicateToleration(String),

    #[error("{name} value can't be less than 1, got {value}")]
    InvalidAttempts { name: String, value: i64 },

    #[error("User (id: {id}, whoami: {whoami}) in the image doesn't have a home directory")]
    MissingHomeDirectory { id: String, whoami: String },

    #[error("Kubernetes API error: {0}")]
    KubeError(String),

    #[error("Pod not found: {0}")]
    PodNotFound(String),

    #[error("Remote command `{command}` failed in pod {pod}: {output}")]
    RemoteCommandFailed {
        pod: String,
        command: String,
        output: String,
    },

    #[error("Archive error: {0}")]
    ArchiveError(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Timed out after {timeout:?} waiting for pod {pod} readiness: {errors}")]
    ReadinessTimeout {
        pod: String,
        timeout: Duration,
        errors: ErrorList,
    },

    #[error("Interrupted while waiting for pod {0} readiness")]
    Interrupted(String),

    #[error("Timed out after {timeout:?} waiting for pod {pod} to finish: {errors}")]
    PhaseConfirmationTimeout {
        pod: String,
        timeout: Duration,
        errors: ErrorList,
    },

    #[error("Pod {0} failed")]
    PodFailed(String),

    #[error("Unexpected pod phase: {0}")]
    UnexpectedPhase(String),

    #[error("Command was cancelled")]
    Cancelled,

    #[error("Command deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),

    #[error("{0}")]
    Multiple(ErrorList),
}

impl AppError {
    /// Appends `other` to this error, keeping this one first.
    ///
    /// Used when a cleanup step fails on an error path: the cleanup failure is
    /// recorded but the primary error stays at the head of the list.
    pub fn append(self, other: AppError) -> AppError {
        let mut errors = match self {
            AppError::Multiple(list) => list,
            primary => ErrorList::from(vec![primary]),
        };
        match other {
            AppError::Multiple(list) => errors.extend(list),
            other => errors.push(other),
        }
        AppError::Multiple(errors)
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::PodNotFound(_))
    }

    /// True for caller-driven cancellation, as opposed to a failure of the
    /// command itself.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, AppError::Cancelled | AppError::DeadlineExceeded(_))
    }

    /// The individual errors behind this one. A plain error yields itself.
    pub fn errors(&self) -> &[AppError] {
        match self {
            AppError::Multiple(list) => list.as_slice(),
            other => std::slice::from_ref(other),
        }
    }
}

/// Ordered collection of partial failures.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ErrorList(Vec<AppError>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn push(&mut self, error: AppError) {
        self.0.push(error);
    }

    pub fn extend(&mut self, other: ErrorList) {
        self.0.extend(other.0);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[AppError] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AppError> {
        self.0.iter()
    }

    /// `Ok(())` when nothing failed, otherwise the whole list as one error.
    pub fn into_result(self) -> Result<()> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AppError::Multiple(self))
        }
    }
}

impl From<Vec<AppError>> for ErrorList {
    fn from(errors: Vec<AppError>) -> Self {
        Self(errors)
    }
}

impl IntoIterator for ErrorList {
    type Item = AppError;
    type IntoIter = std::vec::IntoIter<AppError>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl fmt::Display for ErrorList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_slice() {
            [] => write!(f, "no errors"),
            [single] => write!(f, "{}", single),
            errors => {
                write!(f, "{} errors occurred:", errors.len())?;
                for (i, error) in errors.iter().enumerate() {
                    write!(f, "\n  [{}] {}", i + 1, error)?;
                }
                Ok(())
            }
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Io(err.to_string())
    }
}

impl From<kube::Error> for AppError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(response) if response.code == 404 => {
                AppError::PodNotFound(response.message)
            }
            other => AppError::KubeError(other.to_string()),
        }
    }
}

impl From<serde_yaml::Error> for AppError {
    fn from(err: serde_yaml::Error) -> Self {
        AppError::ConfigError(format!("YAML error: {}", err))
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
