//! Pod specifications built from [`ExecutionOptions`].

use k8s_openapi::api::core::v1::{
    Container, EnvVar, ExecAction, LocalObjectReference, Pod, PodSpec, Probe,
    ResourceRequirements, SecurityContext,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

use crate::config::RunnerConfig;
use crate::domain::{ExecutionOptions, TolerationSpec, UNSET_ID};
use crate::error::Result;

/// Name of the command script inside the user's home directory.
pub const SCRIPT_NAME: &str = "wrapped-script.sh";

/// Variable carrying the command timeout, in seconds, into the container.
pub const TIMEOUT_ENV: &str = "TIMEOUT";

/// Container entrypoint, run with `sh -cue`.
///
/// The TERM/INT trap goes in before anything else: PID 1 ignores signals it
/// has no handler for. Before the script starts a signal just ends the
/// container with 143; afterwards it is forwarded to the script. The
/// container exit status, and therefore the pod phase, is the script's.
fn entrypoint_script(sentinel: &str) -> String {
    format!(
        r#"child=""
trap 'if [ -n "${{child}}" ]; then kill -TERM "${{child}}" 2>/dev/null; wait "${{child}}"; fi; exit 143' TERM INT
touch {sentinel}
script="${{HOME}}/{SCRIPT_NAME}"
until [ -f "${{script}}" ]; do sleep 0.5; done
sleep 1
sh "${{script}}" &
child=$!
wait "${{child}}"
"#
    )
}

/// Builds the full pod object: spec, `generateName`, labels and
/// annotations.
///
/// Fails on invalid or duplicate tolerations, before anything reaches the
/// cluster.
pub fn build_pod(
    config: &RunnerConfig,
    options: &ExecutionOptions,
    labels: BTreeMap<String, String>,
) -> Result<Pod> {
    Ok(Pod {
        metadata: ObjectMeta {
            generate_name: Some(format!("{}-", config.namespace)),
            namespace: Some(config.namespace.clone()),
            labels: Some(labels),
            annotations: Some(options.annotations.clone()),
            ..Default::default()
        },
        spec: Some(build_pod_spec(config, options)?),
        ..Default::default()
    })
}

pub fn build_pod_spec(config: &RunnerConfig, options: &ExecutionOptions) -> Result<PodSpec> {
    let tolerations = TolerationSpec::parse_all(&options.tolerations)?;

    let container = Container {
        name: config.container_name.clone(),
        image: Some(options.image.clone()),
        image_pull_policy: Some(options.pull_policy.clone()),
        command: Some(vec!["sh".to_string(), "-cue".to_string()]),
        args: Some(vec![entrypoint_script(&config.readiness_sentinel)]),
        working_dir: Some("/".to_string()),
        env: Some(build_env(options)),
        resources: build_resources(options),
        security_context: build_security_context(options),
        startup_probe: Some(readiness_probe(&config.readiness_sentinel)),
        ..Default::default()
    };

    Ok(PodSpec {
        containers: vec![container],
        restart_policy: Some("Never".to_string()),
        service_account_name: Some(config.service_account.clone()),
        automount_service_account_token: Some(true),
        termination_grace_period_seconds: Some(config.termination_grace_period_seconds),
        image_pull_secrets: options
            .image_pull_secret
            .as_ref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| {
                vec![LocalObjectReference {
                    name: secret.clone(),
                }]
            }),
        tolerations: (!tolerations.is_empty())
            .then(|| tolerations.iter().map(TolerationSpec::to_k8s).collect()),
        node_selector: (!options.node_selector.is_empty()).then(|| options.node_selector.clone()),
        host_network: options.host_network.then_some(true),
        ..Default::default()
    })
}

/// Host-substituted variables, then explicit ones, then the timeout. Later
/// entries may shadow earlier ones of the same name.
fn build_env(options: &ExecutionOptions) -> Vec<EnvVar> {
    let substituted = options.subst_env.iter().map(|name| EnvVar {
        name: name.clone(),
        value: Some(std::env::var(name).unwrap_or_default()),
        value_from: None,
    });
    let explicit = options.env.iter().map(|(name, value)| EnvVar {
        name: name.clone(),
        value: Some(value.clone()),
        value_from: None,
    });
    let timeout = std::iter::once(EnvVar {
        name: TIMEOUT_ENV.to_string(),
        value: Some(options.timeout_seconds.to_string()),
        value_from: None,
    });

    substituted.chain(explicit).chain(timeout).collect()
}

/// Same quantities for requests and limits; empty or "0" values are left out.
fn build_resources(options: &ExecutionOptions) -> Option<ResourceRequirements> {
    let mut quantities = BTreeMap::new();
    for (name, value) in [("cpu", &options.cpu), ("memory", &options.memory)] {
        if !value.is_empty() && value != "0" {
            quantities.insert(name.to_string(), Quantity(value.clone()));
        }
    }
    if quantities.is_empty() {
        return None;
    }
    Some(ResourceRequirements {
        requests: Some(quantities.clone()),
        limits: Some(quantities),
        ..Default::default()
    })
}

fn build_security_context(options: &ExecutionOptions) -> Option<SecurityContext> {
    let run_as_user = (options.run_as_user > UNSET_ID).then_some(options.run_as_user);
    let run_as_group = (options.run_as_group > UNSET_ID).then_some(options.run_as_group);
    if run_as_user.is_none() && run_as_group.is_none() {
        return None;
    }
    Some(SecurityContext {
        run_as_user,
        run_as_group,
        ..Default::default()
    })
}

/// Checks for the readiness sentinel every second, 2s per probe, giving up
/// after 60 failures.
fn readiness_probe(sentinel: &str) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "sh".to_string(),
                "-c".to_string(),
                format!("([ -f {} ] && exit 0) || exit 1", sentinel),
            ]),
        }),
        timeout_seconds: Some(2),
        period_seconds: Some(1),
        success_threshold: Some(1),
        failure_threshold: Some(60),
        ..Default::default()
    }
}
