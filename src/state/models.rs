use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepoType {
    Local,
    Remote,
}

impl RepoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RepoType::Local => "local",
            RepoType::Remote => "remote",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(RepoType::Local),
            "remote" => Some(RepoType::Remote),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Unconfigured,
    Cloning,
    Ready,
    CloneFailed,
}

impl ProjectStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectStatus::Unconfigured => "unconfigured",
            ProjectStatus::Cloning => "cloning",
            ProjectStatus::Ready => "ready",
            ProjectStatus::CloneFailed => "clone_failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unconfigured" => Some(ProjectStatus::Unconfigured),
            "cloning" => Some(ProjectStatus::Cloning),
            "ready" => Some(ProjectStatus::Ready),
            "clone_failed" => Some(ProjectStatus::CloneFailed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Deploying,
    Active,
    Inactive,
    Failed,
    RolledBack,
    Interrupted,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Deploying => "deploying",
            DeploymentStatus::Active => "active",
            DeploymentStatus::Inactive => "inactive",
            DeploymentStatus::Failed => "failed",
            DeploymentStatus::RolledBack => "rolled_back",
            DeploymentStatus::Interrupted => "interrupted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "deploying" => Some(DeploymentStatus::Deploying),
            "active" => Some(DeploymentStatus::Active),
            "inactive" => Some(DeploymentStatus::Inactive),
            "failed" => Some(DeploymentStatus::Failed),
            "rolled_back" => Some(DeploymentStatus::RolledBack),
            "interrupted" => Some(DeploymentStatus::Interrupted),
            _ => None,
        }
    }

    /// Deployments in these statuses are done; `finished_at` must be set.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            DeploymentStatus::Active
                | DeploymentStatus::Inactive
                | DeploymentStatus::Failed
                | DeploymentStatus::RolledBack
                | DeploymentStatus::Interrupted
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub repo_type: RepoType,
    pub repo_url: Option<String>,
    pub repo_path: String,
    pub compose_file: String,
    pub worktree_retention: u32,
    pub status: ProjectStatus,
    pub traefik_routing_enabled: bool,
    pub env_vars: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: Uuid,
    pub project_id: Uuid,
    pub git_sha: String,
    pub git_ref: String,
    pub worktree_path: String,
    pub status: DeploymentStatus,
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Default relative path to the compose file inside a worktree, per spec
/// §3 ("default `compose.yaml`").
pub fn default_compose_file() -> String {
    "compose.yaml".to_string()
}

/// Validate a project name against `^[a-z0-9-]{1,64}$` (spec §3, §6).
pub fn is_valid_project_name(name: &str) -> bool {
    if name.is_empty() || name.len() > 64 {
        return false;
    }
    name.bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}
