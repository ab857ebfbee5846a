//! `otterstack project ...` subcommands.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::terminal;
use crate::config::OtterConfig;
use crate::git::GitManager;
use crate::state::models::{ProjectStatus, RepoType};
use crate::state::{NewProject, StateStore};

#[derive(Subcommand)]
pub enum ProjectAction {
    /// Register a project. `repo` is a local path or a remote git URL.
    Add {
        name: String,
        repo: String,
        #[arg(long)]
        compose_file: Option<String>,
        #[arg(long)]
        retention: Option<u32>,
        #[arg(long)]
        traefik: bool,
    },
    /// List registered projects.
    List,
    /// Unregister a project (deployments cascade-delete).
    Remove { name: String },
    /// Set one or more `KEY=VALUE` environment variables.
    SetEnv {
        name: String,
        #[arg(required = true)]
        vars: Vec<String>,
    },
    /// Unset an environment variable.
    UnsetEnv { name: String, key: String },
}

pub async fn run(
    state: &dyn StateStore,
    git: &dyn GitManager,
    config: &OtterConfig,
    action: ProjectAction,
) -> Result<()> {
    match action {
        ProjectAction::Add {
            name,
            repo,
            compose_file,
            retention,
            traefik,
        } => add(state, git, config, name, repo, compose_file, retention, traefik).await,
        ProjectAction::List => list(state).await,
        ProjectAction::Remove { name } => remove(state, &name).await,
        ProjectAction::SetEnv { name, vars } => set_env(state, &name, vars).await,
        ProjectAction::UnsetEnv { name, key } => unset_env(state, &name, &key).await,
    }
}

fn looks_like_remote(repo: &str) -> bool {
    repo.starts_with("http://")
        || repo.starts_with("https://")
        || repo.starts_with("git@")
        || repo.starts_with("ssh://")
        || repo.ends_with(".git")
}

#[allow(clippy::too_many_arguments)]
async fn add(
    state: &dyn StateStore,
    git: &dyn GitManager,
    config: &OtterConfig,
    name: String,
    repo: String,
    compose_file: Option<String>,
    retention: Option<u32>,
    traefik: bool,
) -> Result<()> {
    let is_remote = looks_like_remote(&repo);
    let new_project = NewProject {
        name: name.clone(),
        repo_type: if is_remote { RepoType::Remote } else { RepoType::Local },
        repo_url: if is_remote { Some(repo.clone()) } else { None },
        repo_path: if is_remote { String::new() } else { repo.clone() },
        compose_file: compose_file.unwrap_or_else(crate::state::models::default_compose_file),
        worktree_retention: retention.unwrap_or(config.default_worktree_retention),
        traefik_routing_enabled: traefik,
    };
    let project = state.create_project(new_project).await?;

    if is_remote {
        terminal::info(&format!("cloning {repo}"));
        let dest = config.project_repo_dir(&name);
        match git.clone_repo(&repo, &dest).await {
            Ok(()) => {
                state.update_project_status(project.id, ProjectStatus::Ready).await?;
            }
            Err(e) => {
                state
                    .update_project_status(project.id, ProjectStatus::CloneFailed)
                    .await?;
                return Err(e);
            }
        }
    } else {
        let path = PathBuf::from(&repo);
        if git.is_repo(&path).await {
            state.update_project_status(project.id, ProjectStatus::Ready).await?;
        }
    }

    terminal::success(&format!("registered project '{name}'"));
    Ok(())
}

async fn list(state: &dyn StateStore) -> Result<()> {
    for project in state.list_projects().await? {
        terminal::info(&format!(
            "{:20}  {:9}  {}",
            project.name,
            project.status.as_str(),
            project.repo_url.as_deref().unwrap_or(&project.repo_path),
        ));
    }
    Ok(())
}

async fn remove(state: &dyn StateStore, name: &str) -> Result<()> {
    let project = state.get_project_by_name(name).await?;
    state.delete_project(project.id).await?;
    terminal::success(&format!("removed project '{name}'"));
    Ok(())
}

async fn set_env(state: &dyn StateStore, name: &str, vars: Vec<String>) -> Result<()> {
    let project = state.get_project_by_name(name).await?;
    let mut parsed = HashMap::with_capacity(vars.len());
    for entry in vars {
        let (key, value) = entry
            .split_once('=')
            .with_context(|| format!("invalid KEY=VALUE pair: {entry}"))?;
        parsed.insert(key.to_string(), value.to_string());
    }
    state.set_env_vars(project.id, parsed).await?;
    terminal::success(&format!("updated environment for '{name}'"));
    Ok(())
}

async fn unset_env(state: &dyn StateStore, name: &str, key: &str) -> Result<()> {
    let project = state.get_project_by_name(name).await?;
    state.delete_env_var(project.id, key).await?;
    terminal::success(&format!("unset {key} for '{name}'"));
    Ok(())
}
