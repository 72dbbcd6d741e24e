//! Cluster access for the pod runner.
//!
//! Consumers depend on the [`ClusterClient`] trait and never on a specific
//! transport. [`KubeClusterClient`] is the production implementation; tests
//! substitute an in-memory fake.

mod client;
pub mod kube_client;

pub use client::{ClusterClient, ExecOutput, LogStream};
pub use kube_client::KubeClusterClient;
