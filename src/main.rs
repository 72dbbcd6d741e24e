use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

use podrunner::core::logging::init_structured_logging;
use podrunner::{
    CommandContext, ExecutionOptions, KubeClusterClient, PodManager, PurgeOptions, RunnerConfig,
};

/// Run commands inside short-lived Kubernetes pods
#[derive(Parser)]
#[command(name = "podrunner")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a command in a fresh pod and stream its output
    Exec {
        #[command(flatten)]
        pod: PodArgs,

        /// Local to remote copies, `/local/path:/remote/path`
        #[arg(long = "copy")]
        copy: Vec<String>,

        /// Command to run, after `--`
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Delete pods created from this host
    Purge {
        /// Delete every pod in the namespace
        #[arg(long)]
        all: bool,

        /// Extra labels the pods were created with
        #[arg(short, long = "label", value_parser = parse_key_val)]
        labels: Vec<(String, String)>,
    },
}

#[derive(Args)]
struct PodArgs {
    /// YAML file with execution options; flags override it
    #[arg(short, long)]
    options: Option<PathBuf>,

    #[arg(long)]
    image: Option<String>,

    #[arg(long)]
    pull_policy: Option<String>,

    #[arg(long)]
    image_pull_secret: Option<String>,

    #[arg(long)]
    cpu: Option<String>,

    #[arg(long)]
    memory: Option<String>,

    #[arg(long)]
    run_as_user: Option<i64>,

    #[arg(long)]
    run_as_group: Option<i64>,

    #[arg(short, long = "label", value_parser = parse_key_val)]
    labels: Vec<(String, String)>,

    #[arg(long = "annotation", value_parser = parse_key_val)]
    annotations: Vec<(String, String)>,

    #[arg(long = "node-selector", value_parser = parse_key_val)]
    node_selector: Vec<(String, String)>,

    #[arg(short, long = "env", value_parser = parse_key_val)]
    env: Vec<(String, String)>,

    /// Names of local variables passed through to the pod
    #[arg(long = "subst-env")]
    subst_env: Vec<String>,

    /// `key=value:effect:operator`
    #[arg(long = "toleration")]
    tolerations: Vec<String>,

    #[arg(long)]
    host_network: bool,

    #[arg(long)]
    copy_attempts: Option<u32>,

    /// Remote command run before the main one, retried; repeatable
    #[arg(long = "update")]
    update_commands: Vec<String>,

    #[arg(long)]
    update_attempts: Option<u32>,

    /// Command timeout in seconds
    #[arg(long)]
    timeout: Option<u64>,
}

impl PodArgs {
    fn into_options(self) -> Result<ExecutionOptions> {
        let mut options = match &self.options {
            Some(path) => ExecutionOptions::from_yaml_file(path)?,
            None => ExecutionOptions::default(),
        };

        if let Some(image) = self.image {
            options.image = image;
        }
        if let Some(pull_policy) = self.pull_policy {
            options.pull_policy = pull_policy;
        }
        if self.image_pull_secret.is_some() {
            options.image_pull_secret = self.image_pull_secret;
        }
        if let Some(cpu) = self.cpu {
            options.cpu = cpu;
        }
        if let Some(memory) = self.memory {
            options.memory = memory;
        }
        if let Some(uid) = self.run_as_user {
            options.run_as_user = uid;
        }
        if let Some(gid) = self.run_as_group {
            options.run_as_group = gid;
        }
        options.labels.extend(self.labels);
        options.annotations.extend(self.annotations);
        options.node_selector.extend(self.node_selector);
        options.env.extend(self.env);
        options.subst_env.extend(self.subst_env);
        options.tolerations.extend(self.tolerations);
        options.host_network |= self.host_network;
        if let Some(attempts) = self.copy_attempts {
            options.copy_attempts = attempts;
        }
        options.update_commands.extend(self.update_commands);
        if let Some(attempts) = self.update_attempts {
            options.update_attempts = attempts;
        }
        if let Some(seconds) = self.timeout {
            options.timeout_seconds = seconds;
        }

        options.validate()?;
        Ok(options)
    }
}

fn parse_key_val(raw: &str) -> std::result::Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_structured_logging(cli.verbose) {
        eprintln!("{}", e);
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Commands) -> Result<()> {
    let config = Arc::new(RunnerConfig::init().context("Failed to load configuration")?);
    let client = KubeClusterClient::try_default(&config.namespace).await?;
    let manager = PodManager::new(Arc::new(client), config);

    match command {
        Commands::Exec { pod, copy, command } => {
            let mut options = pod.into_options()?;
            options
                .files
                .extend(ExecutionOptions::parse_copy_specs(&copy)?);

            let ctx = CommandContext::from_token(
                manager.interrupted().child_token(),
                Some(options.timeout()),
            );
            let mut stdout = tokio::io::stdout();
            manager
                .run_command(&ctx, &options, &command.join(" "), &mut stdout)
                .await?;
            info!("Command finished");
        }
        Commands::Purge { all, labels } => {
            let options = ExecutionOptions {
                labels: labels.into_iter().collect::<BTreeMap<_, _>>(),
                ..Default::default()
            };
            manager.delete_pods(&options, PurgeOptions { all }).await?;
            info!("Pods deleted");
        }
    }

    Ok(())
}
