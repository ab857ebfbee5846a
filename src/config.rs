use std::path::{Path, PathBuf};

/// Runtime configuration for the core. Unlike shipit's per-project
/// `shipit.toml`, this config describes the controller's own install, not
/// an individual deployment target — project-level settings live in the
/// StateStore (`state::models::Project`).
#[derive(Debug, Clone)]
pub struct OtterConfig {
    pub data_dir: PathBuf,
    pub default_health_timeout_secs: u64,
    pub default_worktree_retention: u32,
}

impl Default for OtterConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            default_health_timeout_secs: 300,
            default_worktree_retention: 5,
        }
    }
}

impl OtterConfig {
    /// Build config from the environment, honoring `OTTERSTACK_DATA_DIR`
    /// (spec §6) as the sole environment-driven override.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(dir) = std::env::var("OTTERSTACK_DATA_DIR") {
            if !dir.is_empty() {
                config.data_dir = PathBuf::from(dir);
            }
        }
        config
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("otterstack.db")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.data_dir.join("locks")
    }

    pub fn worktrees_dir(&self) -> PathBuf {
        self.data_dir.join("worktrees")
    }

    pub fn repos_dir(&self) -> PathBuf {
        self.data_dir.join("repos")
    }

    pub fn project_worktrees_dir(&self, project_name: &str) -> PathBuf {
        self.worktrees_dir().join(project_name)
    }

    pub fn project_repo_dir(&self, project_name: &str) -> PathBuf {
        self.repos_dir().join(project_name)
    }

    /// Ensure every directory the core writes into exists.
    pub fn ensure_layout(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(self.locks_dir())?;
        std::fs::create_dir_all(self.worktrees_dir())?;
        std::fs::create_dir_all(self.repos_dir())?;
        Ok(())
    }
}

fn default_data_dir() -> PathBuf {
    dirs_data_dir().unwrap_or_else(|| Path::new(".otterstack").to_path_buf())
}

fn dirs_data_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".local/share/otterstack"))
}
