//! Integration tests for the `Deployer` state machine against fake
//! `GitManager`/`ComposeDriver` collaborators and a real `SqliteStateStore`
//! (spec §8's "Deployer against fake collaborators" testable property).
//! `StateStore`, `GitManager`, and `ComposeDriver` are all trait objects
//! per the core's design, which is what makes this kind of test possible
//! without a real git checkout or Docker daemon.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use otterstack::compose::{ComposeContext, ComposeDriver, ServiceStatus};
use otterstack::config::OtterConfig;
use otterstack::deploy::{DeployOptions, Deployer};
use otterstack::error::Result;
use otterstack::git::{GitManager, ProcessGitManager, WorktreeEntry};
use otterstack::notify::CompositeNotifier;
use otterstack::progress::{NullProgressSink, NullStreamSink, StreamSink};
use otterstack::state::models::{DeploymentStatus, RepoType};
use otterstack::state::{NewProject, SqliteStateStore, StateStore};

/// Resolves any ref to a distinct, deterministic 40-character sha and
/// materializes a minimal compose file at worktree creation time, since
/// the Deployer reads the compose file straight off disk.
#[derive(Default)]
struct FakeGitManager;

#[async_trait]
impl GitManager for FakeGitManager {
    async fn is_repo(&self, _path: &Path) -> bool {
        true
    }

    async fn clone_repo(&self, _url: &str, dest: &Path) -> Result<()> {
        std::fs::create_dir_all(dest)?;
        Ok(())
    }

    async fn fetch(&self, _repo_path: &Path) -> Result<()> {
        Ok(())
    }

    async fn resolve_ref(&self, _repo_path: &Path, git_ref: &str) -> Result<String> {
        Ok(format!("{git_ref:0<40}"))
    }

    async fn commit_exists(&self, _repo_path: &Path, _sha: &str) -> Result<bool> {
        Ok(true)
    }

    async fn get_current_commit(&self, _repo_path: &Path) -> Result<String> {
        Ok("0".repeat(40))
    }

    async fn get_remote_url(&self, _repo_path: &Path) -> Result<Option<String>> {
        Ok(None)
    }

    async fn get_default_branch(&self, _repo_path: &Path) -> Result<String> {
        Ok("main".to_string())
    }

    async fn check_auth(&self, _url: &str) -> Result<()> {
        Ok(())
    }

    async fn create_worktree(&self, _repo_path: &Path, worktree_path: &Path, _sha: &str) -> Result<()> {
        std::fs::create_dir_all(worktree_path)?;
        std::fs::write(
            worktree_path.join("compose.yaml"),
            "services:\n  web:\n    image: nginx\n",
        )?;
        Ok(())
    }

    async fn remove_worktree(&self, _repo_path: &Path, worktree_path: &Path) -> Result<()> {
        if worktree_path.exists() {
            std::fs::remove_dir_all(worktree_path)?;
        }
        Ok(())
    }

    async fn list_worktrees(&self, _repo_path: &Path) -> Result<Vec<WorktreeEntry>> {
        Ok(Vec::new())
    }

    async fn prune_worktrees(&self, _repo_path: &Path) -> Result<()> {
        Ok(())
    }
}

/// Always reports a single healthy service, so `wait_for_healthy`
/// resolves on its first poll instead of the test sleeping in real time.
/// `fail_pull`/`image_present` let individual tests exercise the
/// "pull failed but a local image covers it" downgrade-to-warning path.
#[derive(Default)]
struct FakeComposeDriver {
    fail_pull: bool,
    image_present: bool,
}

#[async_trait]
impl ComposeDriver for FakeComposeDriver {
    async fn validate(&self, _ctx: &ComposeContext) -> Result<()> {
        Ok(())
    }

    async fn validate_with_env(&self, _ctx: &ComposeContext, _env_file: &Path) -> Result<()> {
        Ok(())
    }

    async fn up(&self, _ctx: &ComposeContext, _env_file: &Path, _streams: &dyn StreamSink) -> Result<()> {
        Ok(())
    }

    async fn down(&self, _ctx: &ComposeContext, _streams: &dyn StreamSink) -> Result<()> {
        Ok(())
    }

    async fn pull(&self, _ctx: &ComposeContext, _env_file: &Path, _streams: &dyn StreamSink) -> Result<()> {
        if self.fail_pull {
            return Err(otterstack::error::Error::ComposeNotFound);
        }
        Ok(())
    }

    async fn restart(&self, _ctx: &ComposeContext, _env_file: &Path, _streams: &dyn StreamSink) -> Result<()> {
        Ok(())
    }

    async fn status(&self, _ctx: &ComposeContext) -> Result<Vec<ServiceStatus>> {
        Ok(vec![ServiceStatus {
            name: "web".to_string(),
            status: "Up 1 second".to_string(),
            health: String::new(),
        }])
    }

    async fn logs(&self, _ctx: &ComposeContext) -> Result<String> {
        Ok(String::new())
    }

    async fn any_image_present(&self, _ctx: &ComposeContext) -> Result<bool> {
        Ok(self.image_present)
    }
}

async fn test_deployer(data_dir: &Path) -> (Arc<dyn StateStore>, Deployer) {
    test_deployer_with_compose(data_dir, FakeComposeDriver::default()).await
}

async fn test_deployer_with_compose(
    data_dir: &Path,
    compose: FakeComposeDriver,
) -> (Arc<dyn StateStore>, Deployer) {
    let config = OtterConfig {
        data_dir: data_dir.to_path_buf(),
        default_health_timeout_secs: 5,
        default_worktree_retention: 2,
    };
    config.ensure_layout().unwrap();
    let state: Arc<dyn StateStore> = Arc::new(SqliteStateStore::connect(&config.db_path()).await.unwrap());
    let git = Arc::new(FakeGitManager);
    let compose = Arc::new(compose);
    let deployer = Deployer::new(state.clone(), git, compose, CompositeNotifier::new(Vec::new()), config);
    (state, deployer)
}

fn deploy_options<'a>(sink: &'a NullProgressSink, stream: &'a NullStreamSink) -> DeployOptions<'a> {
    let mut options = DeployOptions::new(sink, stream);
    options.timeout = std::time::Duration::from_secs(5);
    options
}

#[tokio::test]
async fn deploy_activates_the_new_release_and_retires_the_old_one() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer(dir.path()).await;

    state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Remote,
            repo_url: Some("https://example.invalid/demo.git".to_string()),
            repo_path: String::new(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 2,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();

    let sink = NullProgressSink;
    let stream = NullStreamSink;

    let first = deployer
        .deploy("demo", "v1", deploy_options(&sink, &stream))
        .await
        .unwrap();
    assert_eq!(first.status, DeploymentStatus::Active);
    assert!(first.git_sha.starts_with("v1"));

    let second = deployer
        .deploy("demo", "v2", deploy_options(&sink, &stream))
        .await
        .unwrap();
    assert_eq!(second.status, DeploymentStatus::Active);

    let first_reloaded = state.get_deployment(first.id).await.unwrap();
    assert_eq!(first_reloaded.status, DeploymentStatus::Inactive);
}

#[tokio::test]
async fn rollback_restores_the_previous_release_and_marks_the_current_one_rolled_back() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer(dir.path()).await;

    state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Local,
            repo_url: None,
            repo_path: dir.path().join("repo").display().to_string(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 5,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();

    let sink = NullProgressSink;
    let stream = NullStreamSink;

    let v1 = deployer
        .deploy("demo", "v1", deploy_options(&sink, &stream))
        .await
        .unwrap();
    let v2 = deployer
        .deploy("demo", "v2", deploy_options(&sink, &stream))
        .await
        .unwrap();

    let rolled_to = deployer.rollback("demo", None).await.unwrap();
    assert_eq!(rolled_to.id, v1.id);
    assert_eq!(rolled_to.status, DeploymentStatus::Active);

    let v2_reloaded = state.get_deployment(v2.id).await.unwrap();
    assert_eq!(v2_reloaded.status, DeploymentStatus::RolledBack);

    let active = state.get_active_deployment(
        state.get_project_by_name("demo").await.unwrap().id,
    )
    .await
    .unwrap();
    assert_eq!(active.id, v1.id);
}

#[tokio::test]
async fn worktree_retention_prunes_worktrees_beyond_the_configured_limit() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer(dir.path()).await;

    state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Local,
            repo_url: None,
            repo_path: dir.path().join("repo").display().to_string(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 1,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();

    let sink = NullProgressSink;
    let stream = NullStreamSink;

    let v1 = deployer
        .deploy("demo", "v1", deploy_options(&sink, &stream))
        .await
        .unwrap();
    deployer
        .deploy("demo", "v2", deploy_options(&sink, &stream))
        .await
        .unwrap();

    let v1_reloaded = state.get_deployment(v1.id).await.unwrap();
    assert!(!Path::new(&v1_reloaded.worktree_path).exists());
}

#[tokio::test]
async fn recover_crashed_marks_stuck_deployments_interrupted() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer(dir.path()).await;

    let project = state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Local,
            repo_url: None,
            repo_path: "/tmp/demo".to_string(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 5,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();
    let stuck = state
        .create_deployment(otterstack::state::NewDeployment {
            project_id: project.id,
            git_ref: "main".to_string(),
        })
        .await
        .unwrap();

    // No lock file was ever written for this project, so its deployment
    // looks orphaned by a crash.
    let recovered = deployer.recover_crashed().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].id, stuck.id);

    let reloaded = state.get_deployment(stuck.id).await.unwrap();
    assert_eq!(reloaded.status, DeploymentStatus::Interrupted);
}

#[tokio::test]
async fn pull_failure_is_a_warning_when_a_local_image_covers_it() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer_with_compose(
        dir.path(),
        FakeComposeDriver {
            fail_pull: true,
            image_present: true,
        },
    )
    .await;
    state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Local,
            repo_url: None,
            repo_path: dir.path().join("repo").display().to_string(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 2,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();

    let sink = NullProgressSink;
    let stream = NullStreamSink;
    let result = deployer
        .deploy("demo", "v1", deploy_options(&sink, &stream))
        .await
        .unwrap();
    assert_eq!(result.status, DeploymentStatus::Active);
}

#[tokio::test]
async fn pull_failure_is_fatal_with_no_local_image_to_fall_back_on() {
    let dir = tempfile::tempdir().unwrap();
    let (state, deployer) = test_deployer_with_compose(
        dir.path(),
        FakeComposeDriver {
            fail_pull: true,
            image_present: false,
        },
    )
    .await;
    state
        .create_project(NewProject {
            name: "demo".to_string(),
            repo_type: RepoType::Local,
            repo_url: None,
            repo_path: dir.path().join("repo").display().to_string(),
            compose_file: "compose.yaml".to_string(),
            worktree_retention: 2,
            traefik_routing_enabled: false,
        })
        .await
        .unwrap();

    let sink = NullProgressSink;
    let stream = NullStreamSink;
    let err = deployer
        .deploy("demo", "v1", deploy_options(&sink, &stream))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "image_pull_failed");
}

#[tokio::test]
async fn real_git_manager_type_is_wired_the_same_way_as_the_cli() {
    // Sanity check that `ProcessGitManager` satisfies the same trait
    // object bound the fakes above do, so swapping it in for the CLI
    // binary is a drop-in change.
    let _git: Arc<dyn GitManager> = Arc::new(ProcessGitManager::new());
}
