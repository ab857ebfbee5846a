//! Stateless helpers shared by the phase methods on [`super::Deployer`].
//!
//! Grounded on shipit's `deploy/steps.rs`, which also factors the bits
//! each numbered step needs (path construction, a template render) out
//! of the orchestration loop in `deploy/mod.rs`.

use std::path::{Path, PathBuf};

use crate::config::OtterConfig;
use crate::state::models::Project;

/// First 7 characters of a full 40-character SHA (spec §6).
pub fn short_sha(sha: &str) -> &str {
    &sha[..sha.len().min(7)]
}

pub fn worktree_path(config: &OtterConfig, project_name: &str, sha: &str) -> PathBuf {
    config.project_worktrees_dir(project_name).join(short_sha(sha))
}

pub fn repo_path(config: &OtterConfig, project: &Project) -> PathBuf {
    match project.repo_type {
        crate::state::models::RepoType::Local => PathBuf::from(&project.repo_path),
        crate::state::models::RepoType::Remote => config.project_repo_dir(&project.name),
    }
}

pub fn compose_file_path(worktree: &Path, project: &Project) -> PathBuf {
    worktree.join(&project.compose_file)
}
