//! The stable error taxonomy shared by every core collaborator.
//!
//! Each variant carries a human-readable message and maps to one of the
//! textual codes a caller can match on (`Error::code`); the codes are part
//! of the contract other tooling (scripts, tests, the CLI) depends on and
//! must not change once shipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // -- Project --
    #[error("project not found: {0}")]
    ProjectNotFound(String),
    #[error("project already exists: {0}")]
    ProjectExists(String),
    #[error("invalid project name '{0}': must match ^[a-z0-9-]{{1,64}}$")]
    InvalidProjectName(String),
    #[error("project is locked: {0}")]
    ProjectLocked(String),

    // -- Git --
    #[error("git executable not found")]
    GitNotFound,
    #[error("git ref not found: {0}")]
    GitRefNotFound(String),
    #[error("git clone failed: {0}")]
    GitCloneFailed(String),
    #[error("git fetch failed: {0}")]
    GitFetchFailed(String),
    #[error("worktree already exists: {0}")]
    WorktreeExists(String),
    #[error("worktree not found: {0}")]
    WorktreeNotFound(String),
    #[error("failed to create worktree: {0}")]
    WorktreeCreateFailed(String),
    #[error("failed to remove worktree: {0}")]
    WorktreeRemoveFailed(String),
    #[error("not a git repository: {0}")]
    NotGitRepo(String),

    // -- Compose --
    #[error("compose executable not found")]
    ComposeNotFound,
    #[error("compose file not found: {0}")]
    ComposeFileNotFound(String),
    #[error("compose file invalid: {0}")]
    ComposeInvalid(String),
    #[error("compose operation timed out: {0}")]
    ComposeTimeout(String),

    // -- Deployment --
    #[error("deployment not found: {0}")]
    DeploymentNotFound(String),
    #[error("deployment already in progress for project: {0}")]
    DeploymentInProgress(String),
    #[error("no active deployment for project: {0}")]
    NoActiveDeployment(String),
    #[error("no previous deployment for project: {0}")]
    NoPreviousDeployment(String),
    #[error("missing required environment variables: {0}")]
    MissingRequiredEnv(String),
    #[error("image pull failed: {0}")]
    ImagePullFailed(String),
    #[error("health check timed out: {0}")]
    HealthTimeout(String),
    #[error("routing switch failed: {0}")]
    RoutingFailed(String),

    // -- State --
    #[error("database not initialized")]
    DatabaseNotInitialized,
    #[error("migration failed: {0}")]
    MigrationFailed(String),

    // -- Lock --
    #[error("lock already held: {0}")]
    LockAcquireFailed(String),
    #[error("lock is stale: {0}")]
    LockStale(String),

    // -- Operation --
    #[error("operation cancelled")]
    OperationCancelled,
    #[error("operation interrupted")]
    OperationInterrupted,

    // -- Escape hatch for collaborator I/O errors that don't map to a kind above --
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

impl Error {
    /// Stable textual code, suitable for scripts and tests, and for the
    /// `error_message` column / progress-sink payload.
    pub fn code(&self) -> &'static str {
        use Error::*;
        match self {
            ProjectNotFound(_) => "project_not_found",
            ProjectExists(_) => "project_exists",
            InvalidProjectName(_) => "invalid_project_name",
            ProjectLocked(_) => "project_locked",
            GitNotFound => "git_not_found",
            GitRefNotFound(_) => "git_ref_not_found",
            GitCloneFailed(_) => "git_clone_failed",
            GitFetchFailed(_) => "git_fetch_failed",
            WorktreeExists(_) => "worktree_exists",
            WorktreeNotFound(_) => "worktree_not_found",
            WorktreeCreateFailed(_) => "worktree_create_failed",
            WorktreeRemoveFailed(_) => "worktree_remove_failed",
            NotGitRepo(_) => "not_git_repo",
            ComposeNotFound => "compose_not_found",
            ComposeFileNotFound(_) => "compose_file_not_found",
            ComposeInvalid(_) => "compose_invalid",
            ComposeTimeout(_) => "compose_timeout",
            DeploymentNotFound(_) => "deployment_not_found",
            DeploymentInProgress(_) => "deployment_in_progress",
            NoActiveDeployment(_) => "no_active_deployment",
            NoPreviousDeployment(_) => "no_previous_deployment",
            MissingRequiredEnv(_) => "missing_required_env",
            ImagePullFailed(_) => "image_pull_failed",
            HealthTimeout(_) => "health_timeout",
            RoutingFailed(_) => "routing_failed",
            DatabaseNotInitialized => "database_not_initialized",
            MigrationFailed(_) => "migration_failed",
            LockAcquireFailed(_) => "lock_acquire_failed",
            LockStale(_) => "lock_stale",
            OperationCancelled => "operation_cancelled",
            OperationInterrupted => "operation_interrupted",
            Io(_) => "io_error",
            Database(_) => "database_error",
            Migrate(_) => "migration_failed",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
