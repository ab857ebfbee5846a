//! Parsing for `git worktree list --porcelain` output.
//!
//! The porcelain format is a blank-line-delimited sequence of records,
//! each a run of `key value` lines (`worktree`, `HEAD`, `branch`) or bare
//! flags (`detached`, `bare`, `locked`, `prunable`). Grounded on the
//! status bookkeeping in `conductor-core`'s `WorktreeManager`, adapted to
//! parse git's own listing instead of a database table.

use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeEntry {
    pub path: PathBuf,
    pub commit: String,
    pub branch: Option<String>,
    pub detached: bool,
    pub locked: bool,
    pub prunable: bool,
}

pub fn parse_porcelain(raw: &str) -> Vec<WorktreeEntry> {
    let mut entries = Vec::new();
    let mut path: Option<PathBuf> = None;
    let mut commit = String::new();
    let mut branch = None;
    let mut detached = false;
    let mut locked = false;
    let mut prunable = false;

    let flush = |path: &mut Option<PathBuf>,
                 commit: &mut String,
                 branch: &mut Option<String>,
                 detached: &mut bool,
                 locked: &mut bool,
                 prunable: &mut bool,
                 out: &mut Vec<WorktreeEntry>| {
        if let Some(p) = path.take() {
            out.push(WorktreeEntry {
                path: p,
                commit: std::mem::take(commit),
                branch: branch.take(),
                detached: std::mem::take(detached),
                locked: std::mem::take(locked),
                prunable: std::mem::take(prunable),
            });
        }
    };

    for line in raw.lines() {
        if line.is_empty() {
            flush(
                &mut path,
                &mut commit,
                &mut branch,
                &mut detached,
                &mut locked,
                &mut prunable,
                &mut entries,
            );
            continue;
        }
        if let Some(value) = line.strip_prefix("worktree ") {
            path = Some(PathBuf::from(value));
        } else if let Some(value) = line.strip_prefix("HEAD ") {
            commit = value.to_string();
        } else if let Some(value) = line.strip_prefix("branch ") {
            branch = Some(
                value
                    .strip_prefix("refs/heads/")
                    .unwrap_or(value)
                    .to_string(),
            );
        } else if line == "detached" {
            detached = true;
        } else if line.starts_with("locked") {
            locked = true;
        } else if line.starts_with("prunable") {
            prunable = true;
        }
    }
    flush(
        &mut path,
        &mut commit,
        &mut branch,
        &mut detached,
        &mut locked,
        &mut prunable,
        &mut entries,
    );
    entries
}
