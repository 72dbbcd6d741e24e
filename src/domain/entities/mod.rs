pub mod options;
pub mod pod;
pub mod toleration;

pub use options::{expand_local_path, ExecutionOptions, PurgeOptions, UNSET_ID};
pub use pod::{
    label_selector, ownership_labels, LogLine, PodHandle, PodPhase, UserInfo, HOST_LABEL,
};
pub use toleration::{TolerationOperator, TolerationSpec};
