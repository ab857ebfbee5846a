//! Thin CLI front-end (SPEC_FULL.md §14 — out of core scope per spec §3,
//! built the way shipit's `cli/mod.rs` wires its own `Command` variants
//! to small per-subcommand modules that construct collaborators and call
//! into the core).

pub mod project;
pub mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::compose::DockerComposeDriver;
use crate::config::OtterConfig;
use crate::deploy::{DeployOptions, Deployer};
use crate::git::ProcessGitManager;
use crate::notify::{CompositeNotifier, Notifier, WebhookNotifier};
use crate::state::{SqliteStateStore, StateStore};
use terminal::{TerminalProgressSink, TerminalStreamSink};

#[derive(Parser)]
#[command(name = "otterstack", version, about = "Single-host Docker Compose deployment controller")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Increase log verbosity; repeatable (-v, -vv, -vvv).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Override the data directory (defaults to `OTTERSTACK_DATA_DIR` or
    /// `~/.local/share/otterstack`).
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Webhook URL notified of deploy lifecycle events.
    #[arg(long, global = true, env = "OTTERSTACK_WEBHOOK_URL")]
    pub webhook_url: Option<String>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage registered projects.
    Project {
        #[command(subcommand)]
        action: project::ProjectAction,
    },
    /// Deploy a project to a git ref.
    Deploy {
        project: String,
        #[arg(default_value = "HEAD")]
        git_ref: String,
        #[arg(long)]
        skip_pull: bool,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
    },
    /// Roll back a project to its previous (or a specific) deployment.
    Rollback {
        project: String,
        #[arg(long)]
        to: Option<String>,
    },
    /// List recent deployments for a project.
    Releases {
        project: String,
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Print the most recent logs for a project's active stack.
    Logs { project: String },
    /// Scan for and mark deployments orphaned by a prior crash.
    Recover,
}

pub async fn run(cli: Cli) -> Result<()> {
    let mut config = OtterConfig::from_env();
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    config.ensure_layout()?;

    let state: Arc<dyn StateStore> = Arc::new(SqliteStateStore::connect(&config.db_path()).await?);
    let git = Arc::new(ProcessGitManager::new());
    let compose = Arc::new(DockerComposeDriver::new());

    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();
    if let Some(url) = cli.webhook_url {
        notifiers.push(Box::new(WebhookNotifier::new("webhook", url)));
    }
    let notifier = CompositeNotifier::new(notifiers);

    let deployer = Deployer::new(state.clone(), git.clone(), compose.clone(), notifier, config.clone());

    let recovered = deployer.recover_crashed().await?;
    for deployment in &recovered {
        tracing::warn!(deployment_id = %deployment.id, "deployment marked interrupted after restart");
    }

    match cli.command {
        Command::Project { action } => project::run(state.as_ref(), git.as_ref(), &config, action).await,
        Command::Deploy {
            project,
            git_ref,
            skip_pull,
            timeout_secs,
        } => deploy_command(&deployer, &project, &git_ref, skip_pull, timeout_secs).await,
        Command::Rollback { project, to } => rollback_command(&deployer, &project, to.as_deref()).await,
        Command::Releases { project, limit } => releases_command(state.as_ref(), &project, limit).await,
        Command::Logs { project } => logs_command(state.as_ref(), compose.as_ref(), &config, &project).await,
        Command::Recover => {
            terminal::header(&format!("{} deployment(s) recovered", recovered.len()));
            Ok(())
        }
    }
}

async fn deploy_command(
    deployer: &Deployer,
    project: &str,
    git_ref: &str,
    skip_pull: bool,
    timeout_secs: u64,
) -> Result<()> {
    let progress_sink = TerminalProgressSink::new();
    let stream_sink = TerminalStreamSink::new();
    let mut options = DeployOptions::new(&progress_sink, &stream_sink);
    options.skip_pull = skip_pull;
    options.timeout = std::time::Duration::from_secs(timeout_secs);

    let deployment = deployer.deploy(project, git_ref, options).await?;
    terminal::success(&format!(
        "deployed {project}@{} (deployment {})",
        &deployment.git_sha[..deployment.git_sha.len().min(7)],
        deployment.id
    ));
    Ok(())
}

async fn rollback_command(deployer: &Deployer, project: &str, target_sha: Option<&str>) -> Result<()> {
    let deployment = deployer.rollback(project, target_sha).await?;
    terminal::success(&format!(
        "rolled back {project} to {} (deployment {})",
        &deployment.git_sha[..deployment.git_sha.len().min(7)],
        deployment.id
    ));
    Ok(())
}

async fn releases_command(state: &dyn StateStore, project: &str, limit: i64) -> Result<()> {
    let project = state.get_project_by_name(project).await?;
    let deployments = state.list_deployments(project.id, limit).await?;
    for deployment in deployments {
        terminal::info(&format!(
            "{:8}  {:10}  {:7}  {}",
            deployment.started_at.format("%Y-%m-%d %H:%M"),
            deployment.status.as_str(),
            short_sha(&deployment.git_sha),
            deployment.git_ref,
        ));
    }
    Ok(())
}

async fn logs_command(
    state: &dyn StateStore,
    compose: &dyn crate::compose::ComposeDriver,
    config: &OtterConfig,
    project: &str,
) -> Result<()> {
    let project = state.get_project_by_name(project).await?;
    let active = state.get_active_deployment(project.id).await?;
    let worktree = std::path::PathBuf::from(&active.worktree_path);
    let ctx = crate::compose::ComposeContext {
        compose_file: worktree.join(&project.compose_file),
        working_dir: worktree,
        extra_compose_files: Vec::new(),
        project_name: crate::compose::generate_project_name(&project.name, &short_sha(&active.git_sha)),
    };
    let _ = config;
    let logs = compose.logs(&ctx).await?;
    print!("{logs}");
    Ok(())
}

fn short_sha(sha: &str) -> String {
    sha.chars().take(7).collect()
}
