//! Git repository and worktree management (spec §4.4).
//!
//! Grounded on `conductor-core`'s `WorktreeManager` (the corpus's only
//! full worktree-lifecycle implementation: create/list/remove, merged-vs-
//! abandoned detection, and a `tempfile`-based git fixture for tests) and
//! on shipit's pattern of shelling out to a CLI tool and mapping exit
//! status/stderr into a typed error rather than parsing libgit2 output.

pub mod worktree;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::{Error, Result};
pub use worktree::WorktreeEntry;

#[async_trait]
pub trait GitManager: Send + Sync {
    async fn is_repo(&self, path: &Path) -> bool;
    /// Clones `url` into `dest`. Atomic: clones into a sibling temp
    /// directory first, then renames into place, so a process killed
    /// mid-clone never leaves a half-populated `dest`.
    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()>;
    async fn fetch(&self, repo_path: &Path) -> Result<()>;
    /// Resolves a branch, tag, or (possibly abbreviated) commit SHA to a
    /// full 40-character commit SHA.
    async fn resolve_ref(&self, repo_path: &Path, git_ref: &str) -> Result<String>;
    async fn commit_exists(&self, repo_path: &Path, sha: &str) -> Result<bool>;
    async fn get_current_commit(&self, repo_path: &Path) -> Result<String>;
    async fn get_remote_url(&self, repo_path: &Path) -> Result<Option<String>>;
    async fn get_default_branch(&self, repo_path: &Path) -> Result<String>;
    /// Validates the repo is reachable and authenticated without
    /// cloning it (`git ls-remote`).
    async fn check_auth(&self, url: &str) -> Result<()>;

    async fn create_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        sha: &str,
    ) -> Result<()>;
    async fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path) -> Result<()>;
    async fn list_worktrees(&self, repo_path: &Path) -> Result<Vec<WorktreeEntry>>;
    async fn prune_worktrees(&self, repo_path: &Path) -> Result<()>;
}

#[derive(Default)]
pub struct ProcessGitManager;

impl ProcessGitManager {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, cwd: Option<&Path>, args: &[&str]) -> Result<String> {
        let mut command = Command::new("git");
        command.args(args).stdout(Stdio::piped()).stderr(Stdio::piped());
        if let Some(cwd) = cwd {
            command.current_dir(cwd);
        }
        let output = command
            .output()
            .await
            .map_err(|_| Error::GitNotFound)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::GitFetchFailed(format!(
                "git {} failed: {stderr}",
                args.join(" ")
            )));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GitManager for ProcessGitManager {
    async fn is_repo(&self, path: &Path) -> bool {
        self.run(Some(path), &["rev-parse", "--is-inside-work-tree"])
            .await
            .map(|out| out == "true")
            .unwrap_or(false)
    }

    async fn clone_repo(&self, url: &str, dest: &Path) -> Result<()> {
        if dest.exists() {
            return Err(Error::GitCloneFailed(format!(
                "destination already exists: {}",
                dest.display()
            )));
        }
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)?;
        let tmp_dest = parent.join(format!(
            ".{}.clone-tmp",
            dest.file_name().and_then(|n| n.to_str()).unwrap_or("repo")
        ));
        if tmp_dest.exists() {
            std::fs::remove_dir_all(&tmp_dest)?;
        }

        let result = self
            .run(
                None,
                &["clone", "--origin", "origin", url, tmp_dest.to_str().unwrap_or_default()],
            )
            .await;

        match result {
            Ok(_) => {
                std::fs::rename(&tmp_dest, dest)?;
                Ok(())
            }
            Err(e) => {
                let _ = std::fs::remove_dir_all(&tmp_dest);
                Err(Error::GitCloneFailed(e.to_string()))
            }
        }
    }

    async fn fetch(&self, repo_path: &Path) -> Result<()> {
        self.run(Some(repo_path), &["fetch", "--all", "--prune"])
            .await
            .map(|_| ())
            .map_err(|e| Error::GitFetchFailed(e.to_string()))
    }

    async fn resolve_ref(&self, repo_path: &Path, git_ref: &str) -> Result<String> {
        // Try the ref as given, then as a remote-tracking branch, since
        // callers pass short names like "main" that only exist as
        // "origin/main" right after a fresh clone.
        for candidate in [git_ref.to_string(), format!("origin/{git_ref}")] {
            if let Ok(sha) = self
                .run(
                    Some(repo_path),
                    &["rev-parse", "--verify", &format!("{candidate}^{{commit}}")],
                )
                .await
            {
                return Ok(sha);
            }
        }
        Err(Error::GitRefNotFound(git_ref.to_string()))
    }

    async fn commit_exists(&self, repo_path: &Path, sha: &str) -> Result<bool> {
        Ok(self
            .run(Some(repo_path), &["cat-file", "-e", &format!("{sha}^{{commit}}")])
            .await
            .is_ok())
    }

    async fn get_current_commit(&self, repo_path: &Path) -> Result<String> {
        self.run(Some(repo_path), &["rev-parse", "HEAD"]).await
    }

    async fn get_remote_url(&self, repo_path: &Path) -> Result<Option<String>> {
        match self
            .run(Some(repo_path), &["remote", "get-url", "origin"])
            .await
        {
            Ok(url) if !url.is_empty() => Ok(Some(url)),
            _ => Ok(None),
        }
    }

    async fn get_default_branch(&self, repo_path: &Path) -> Result<String> {
        let head_ref = self
            .run(
                Some(repo_path),
                &["symbolic-ref", "refs/remotes/origin/HEAD"],
            )
            .await
            .unwrap_or_default();
        if let Some(branch) = head_ref.strip_prefix("refs/remotes/origin/") {
            return Ok(branch.to_string());
        }
        // No remote HEAD set locally (shallow / non-default remote
        // config); ask origin directly.
        let show = self
            .run(Some(repo_path), &["remote", "show", "origin"])
            .await?;
        show.lines()
            .find_map(|line| line.trim().strip_prefix("HEAD branch: "))
            .map(|s| s.to_string())
            .ok_or_else(|| Error::GitRefNotFound("HEAD".to_string()))
    }

    async fn check_auth(&self, url: &str) -> Result<()> {
        self.run(None, &["ls-remote", "--exit-code", url])
            .await
            .map(|_| ())
            .map_err(|e| Error::GitCloneFailed(e.to_string()))
    }

    async fn create_worktree(
        &self,
        repo_path: &Path,
        worktree_path: &Path,
        sha: &str,
    ) -> Result<()> {
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.run(
            Some(repo_path),
            &[
                "worktree",
                "add",
                "--detach",
                worktree_path.to_str().unwrap_or_default(),
                sha,
            ],
        )
        .await
        .map(|_| ())
        .map_err(|e| Error::WorktreeCreateFailed(e.to_string()))
    }

    async fn remove_worktree(&self, repo_path: &Path, worktree_path: &Path) -> Result<()> {
        let result = self
            .run(
                Some(repo_path),
                &[
                    "worktree",
                    "remove",
                    "--force",
                    worktree_path.to_str().unwrap_or_default(),
                ],
            )
            .await;

        if result.is_ok() {
            return Ok(());
        }

        // git refused (e.g. a locked worktree, or metadata pointing at a
        // path it no longer trusts): fall back to deleting the directory
        // ourselves and let `worktree prune` reconcile git's bookkeeping
        // (spec §4.4).
        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)
                .map_err(|e| Error::WorktreeRemoveFailed(e.to_string()))?;
        }
        self.prune_worktrees(repo_path).await
    }

    async fn list_worktrees(&self, repo_path: &Path) -> Result<Vec<WorktreeEntry>> {
        let raw = self
            .run(Some(repo_path), &["worktree", "list", "--porcelain"])
            .await?;
        Ok(worktree::parse_porcelain(&raw))
    }

    async fn prune_worktrees(&self, repo_path: &Path) -> Result<()> {
        self.run(Some(repo_path), &["worktree", "prune"])
            .await
            .map(|_| ())
    }
}

/// Joins a project's repo directory and a deployment SHA into the
/// worktree path convention used across the codebase:
/// `<worktrees_dir>/<sha>`.
pub fn worktree_path_for(worktrees_dir: &Path, sha: &str) -> PathBuf {
    worktrees_dir.join(sha)
}
