//! The Deployer state machine (spec §4.1) — orchestrates GitManager,
//! ComposeDriver, and RoutingInjector against the StateStore into the
//! 13-phase deploy sequence, plus rollback and crash recovery.
//!
//! Grounded on shipit's `deploy::run`/`deploy_to_host` (the same
//! "acquire → numbered phases → release, with a rollback-on-failure
//! branch" shape) but rebuilt around a single local host and a
//! commit-scoped Compose project instead of a fleet of SSH targets.

pub mod env_scan;
pub mod phases;
pub mod recovery;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::compose::{self, env_file, ComposeContext, ComposeDriver};
use crate::config::OtterConfig;
use crate::error::{Error, Result};
use crate::git::GitManager;
use crate::lock::LockManager;
use crate::notify::{CompositeNotifier, NotifyEvent};
use crate::progress::{Phase, ProgressEmitter, ProgressSink, StreamSink};
use crate::routing::{self, RoutingInjector};
use crate::state::models::{Deployment, DeploymentStatus, Project, RepoType};
use crate::state::{NewDeployment, StateStore};

pub use recovery::recover_crashed;

pub struct DeployOptions<'a> {
    pub skip_pull: bool,
    pub timeout: Duration,
    pub progress_sink: &'a dyn ProgressSink,
    pub stream_sink: &'a dyn StreamSink,
}

impl<'a> DeployOptions<'a> {
    pub fn new(progress_sink: &'a dyn ProgressSink, stream_sink: &'a dyn StreamSink) -> Self {
        Self {
            skip_pull: false,
            timeout: Duration::from_secs(300),
            progress_sink,
            stream_sink,
        }
    }
}

pub struct Deployer {
    state: Arc<dyn StateStore>,
    locks: LockManager,
    git: Arc<dyn GitManager>,
    compose: Arc<dyn ComposeDriver>,
    routing: RoutingInjector,
    notifier: CompositeNotifier,
    config: OtterConfig,
}

impl Deployer {
    pub fn new(
        state: Arc<dyn StateStore>,
        git: Arc<dyn GitManager>,
        compose: Arc<dyn ComposeDriver>,
        notifier: CompositeNotifier,
        config: OtterConfig,
    ) -> Self {
        let locks = LockManager::new(config.locks_dir());
        Self {
            state,
            locks,
            git,
            compose,
            routing: RoutingInjector::new(),
            notifier,
            config,
        }
    }

    pub async fn deploy(
        &self,
        project_name: &str,
        git_ref: &str,
        options: DeployOptions<'_>,
    ) -> Result<Deployment> {
        let project = self.state.get_project_by_name(project_name).await?;
        let lock = self.locks.acquire("deployment", &project.name)?;

        let deployment = self
            .state
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_ref: git_ref.to_string(),
            })
            .await?;

        let emitter = ProgressEmitter::new(options.progress_sink, project.name.as_str(), deployment.id.to_string());
        emitter.info(Phase::Initializing, format!("deploying {git_ref}"));
        self.fire(&NotifyEvent::DeployStarted {
            project: project.name.clone(),
            deployment_id: deployment.id,
            git_ref: git_ref.to_string(),
        })
        .await;

        let deadline = Instant::now() + options.timeout;
        let outcome = self
            .run_happy_path(&project, deployment.clone(), &options, &emitter, deadline)
            .await;

        let _ = lock.release();

        match outcome {
            Ok(final_deployment) => {
                emitter.success(Phase::Complete, "deployment active");
                self.fire(&NotifyEvent::DeploySucceeded {
                    project: project.name.clone(),
                    deployment_id: final_deployment.id,
                    git_sha: final_deployment.git_sha.clone(),
                })
                .await;
                Ok(final_deployment)
            }
            Err(e) => {
                let _ = self
                    .state
                    .update_deployment_status(deployment.id, DeploymentStatus::Failed, Some(e.code().to_string()))
                    .await;
                emitter.error(Phase::Failed, e.to_string());
                self.fire(&NotifyEvent::DeployFailed {
                    project: project.name.clone(),
                    deployment_id: deployment.id,
                    error_code: e.code().to_string(),
                    error_message: e.to_string(),
                })
                .await;
                Err(e)
            }
        }
    }

    /// Phases 2–12 of the happy path. Phase 1 (lock + row creation) and
    /// the terminal status bookkeeping happen in `deploy`, since they're
    /// shared with the failure branch.
    async fn run_happy_path(
        &self,
        project: &Project,
        mut deployment: Deployment,
        options: &DeployOptions<'_>,
        emitter: &ProgressEmitter<'_>,
        deadline: Instant,
    ) -> Result<Deployment> {
        let repo_path = phases::repo_path(&self.config, project);

        // Phase 2: fetch.
        if project.repo_type == RepoType::Remote {
            emitter.info(Phase::Fetching, "fetching refs");
            self.git
                .fetch(&repo_path)
                .await
                .map_err(|_| Error::GitFetchFailed(project.name.clone()))?;
        }

        // Phase 3: resolve.
        emitter.info(Phase::Resolving, format!("resolving {}", deployment.git_ref));
        let sha = self.git.resolve_ref(&repo_path, &deployment.git_ref).await?;
        self.state.set_deployment_sha(deployment.id, &sha).await?;
        deployment.git_sha = sha.clone();

        // Phase 4: worktree.
        emitter.info(Phase::Worktree, "materializing worktree");
        let worktree = phases::worktree_path(&self.config, &project.name, &sha);
        if !worktree.exists() {
            self.git
                .create_worktree(&repo_path, &worktree, &sha)
                .await?;
        }
        self.state
            .set_worktree_path(deployment.id, &worktree.display().to_string())
            .await?;
        deployment.worktree_path = worktree.display().to_string();

        // Phase 5: env validation.
        emitter.info(Phase::Validating, "checking required environment");
        let compose_file = phases::compose_file_path(&worktree, project);
        let compose_text = std::fs::read_to_string(&compose_file)
            .map_err(|_| Error::ComposeFileNotFound(compose_file.display().to_string()))?;
        let scan = env_scan::scan(&compose_text)?;
        env_scan::check_required(&scan, &project.env_vars)?;

        let env_file_path = env_file::write(&worktree, &project.env_vars)?;

        let ctx = ComposeContext {
            working_dir: worktree.clone(),
            compose_file: compose_file.clone(),
            extra_compose_files: Vec::new(),
            project_name: compose::generate_project_name(&project.name, phases::short_sha(&sha)),
        };

        let cleanup_env_file = || {
            let _ = env_file::remove(&env_file_path);
        };

        // Phase 6: validate compose.
        if let Err(e) = self.compose.validate_with_env(&ctx, &env_file_path).await {
            cleanup_env_file();
            return Err(Error::ComposeInvalid(e.to_string()));
        }

        // Phase 7: pull. A failure is only fatal when no image this
        // stack needs is already present locally (spec §4.1 phase 7);
        // otherwise it's surfaced as a warning and the deploy proceeds
        // against whatever is cached.
        if !options.skip_pull {
            emitter.info(Phase::Pulling, "pulling images");
            if let Err(e) = self.compose.pull(&ctx, &env_file_path, options.stream_sink).await {
                match self.compose.any_image_present(&ctx).await {
                    Ok(true) => {
                        emitter.warning(Phase::Pulling, format!("image pull failed, using local images: {e}"));
                    }
                    _ => {
                        cleanup_env_file();
                        return Err(Error::ImagePullFailed(e.to_string()));
                    }
                }
            }
        }

        // Phase 8: up.
        emitter.info(Phase::Starting, format!("starting {}", ctx.project_name));
        if let Err(e) = self.compose.up(&ctx, &env_file_path, options.stream_sink).await {
            let _ = self.compose.down(&ctx, options.stream_sink).await;
            cleanup_env_file();
            return Err(e);
        }

        // Phase 9: health wait.
        emitter.info(Phase::HealthCheck, "waiting for containers to become healthy");
        let remaining = deadline.saturating_duration_since(Instant::now());
        if let Err(e) = routing::wait_for_healthy(self.compose.as_ref(), &ctx, remaining).await {
            let _ = self.compose.down(&ctx, options.stream_sink).await;
            cleanup_env_file();
            return Err(e);
        }

        // Phase 10: routing switch.
        let mut ctx = ctx;
        if let Err(e) = self.switch_routing(project, &compose_file, &mut ctx, &env_file_path, options, emitter).await {
            let _ = self.compose.down(&ctx, options.stream_sink).await;
            cleanup_env_file();
            return Err(e);
        }

        cleanup_env_file();

        // Phase 11: commit.
        self.state
            .update_deployment_status(deployment.id, DeploymentStatus::Active, None)
            .await?;
        self.state
            .deactivate_previous(project.id, deployment.id)
            .await?;
        deployment.status = DeploymentStatus::Active;

        // Phase 12: retire previous (best-effort; failures are warnings).
        let previous = self.state.get_previous_deployment(project.id).await.ok();
        self.retire_previous(project, previous.as_ref(), emitter).await;

        Ok(deployment)
    }

    async fn switch_routing(
        &self,
        project: &Project,
        compose_file: &std::path::Path,
        ctx: &mut ComposeContext,
        env_file_path: &std::path::Path,
        options: &DeployOptions<'_>,
        emitter: &ProgressEmitter<'_>,
    ) -> Result<()> {
        if !project.traefik_routing_enabled || !self.routing.is_running().await {
            emitter.warning(Phase::Traefik, "traefik routing skipped");
            return Ok(());
        }

        emitter.info(Phase::Traefik, "switching routing priority");
        let priority = now_unix_ms();
        // A worktree can be routed more than once (e.g. a rollback target
        // that was previously superseded, then re-activated): clear any
        // override left by that earlier switch before regenerating, since
        // `generate_override` itself is single-shot per worktree (spec §8).
        let stale_override = compose_file
            .parent()
            .unwrap_or_else(|| std::path::Path::new("."))
            .join("docker-compose.traefik.yml");
        if stale_override.exists() {
            std::fs::remove_file(&stale_override)?;
        }
        let override_path = self
            .routing
            .generate_override(compose_file, priority)
            .map_err(|e| Error::RoutingFailed(e.to_string()))?;
        ctx.extra_compose_files.push(override_path);
        self.compose
            .restart(ctx, env_file_path, options.stream_sink)
            .await
            .map_err(|e| Error::RoutingFailed(e.to_string()))
    }

    /// Tears down the deployment's own Compose stack by its commit-scoped
    /// project name. Used for both the just-superseded deployment after a
    /// successful deploy and the just-rolled-back one after a rollback.
    async fn stop_stack(&self, project: &Project, stack: &Deployment, emitter: &ProgressEmitter<'_>) {
        if stack.worktree_path.is_empty() || stack.git_sha.is_empty() {
            return;
        }
        let stack_ctx = ComposeContext {
            working_dir: PathBuf::from(&stack.worktree_path),
            compose_file: phases::compose_file_path(std::path::Path::new(&stack.worktree_path), project),
            extra_compose_files: Vec::new(),
            project_name: compose::generate_project_name(&project.name, phases::short_sha(&stack.git_sha)),
        };
        if let Err(e) = self.compose.down(&stack_ctx, &crate::progress::NullStreamSink).await {
            emitter.warning(Phase::Cleanup, format!("failed to stop previous stack: {e}"));
        }
    }

    /// Phase 12: stops `superseded`'s stack (if any) and applies worktree
    /// retention. A retirement failure is a warning, never a deploy
    /// failure (spec §4.1).
    async fn retire_previous(&self, project: &Project, superseded: Option<&Deployment>, emitter: &ProgressEmitter<'_>) {
        emitter.info(Phase::Cleanup, "retiring previous deployment");

        if let Some(stack) = superseded {
            self.stop_stack(project, stack, emitter).await;
        }

        if let Err(e) = self.prune_worktrees(project).await {
            emitter.warning(Phase::Cleanup, format!("worktree retention failed: {e}"));
        }
    }

    /// Keeps the `worktree_retention` most recent `{active, inactive,
    /// rolled_back}` deployments' worktrees, removing the rest (spec
    /// §4.1 phase 12). Deployments currently `deploying` are never
    /// pruned (SPEC_FULL.md §15).
    async fn prune_worktrees(&self, project: &Project) -> Result<()> {
        let history = self.state.list_deployments(project.id, 1000).await?;
        let mut retained: Vec<&Deployment> = history
            .iter()
            .filter(|d| {
                matches!(
                    d.status,
                    DeploymentStatus::Active | DeploymentStatus::Inactive | DeploymentStatus::RolledBack
                )
            })
            .collect();
        retained.sort_by(|a, b| b.started_at.cmp(&a.started_at));

        let keep = project.worktree_retention as usize;
        let repo_path = phases::repo_path(&self.config, project);
        for stale in retained.iter().skip(keep) {
            if stale.worktree_path.is_empty() {
                continue;
            }
            let path = PathBuf::from(&stale.worktree_path);
            if path.exists() {
                self.git.remove_worktree(&repo_path, &path).await?;
            }
        }
        Ok(())
    }

    pub async fn rollback(&self, project_name: &str, target_sha: Option<&str>) -> Result<Deployment> {
        let project = self.state.get_project_by_name(project_name).await?;
        let lock = self.locks.acquire("deployment", &project.name)?;

        let outcome = self.run_rollback(&project, target_sha).await;
        let _ = lock.release();
        outcome
    }

    async fn run_rollback(&self, project: &Project, target_sha: Option<&str>) -> Result<Deployment> {
        let current_active = self.state.get_active_deployment(project.id).await?;
        let target = match target_sha {
            Some(prefix) => self.state.get_by_sha_prefix(project.id, prefix).await?,
            None => self.state.get_previous_deployment(project.id).await?,
        };

        if target.worktree_path.is_empty() || !PathBuf::from(&target.worktree_path).exists() {
            return Err(Error::WorktreeNotFound(target.worktree_path.clone()));
        }

        let null_sink = crate::progress::NullProgressSink;
        let null_stream = crate::progress::NullStreamSink;
        let emitter = ProgressEmitter::new(&null_sink, project.name.as_str(), target.id.to_string());
        let options = DeployOptions::new(&null_sink, &null_stream);

        self.fire(&NotifyEvent::RollbackStarted {
            project: project.name.clone(),
            deployment_id: target.id,
        })
        .await;

        let worktree = PathBuf::from(&target.worktree_path);
        let compose_file = phases::compose_file_path(&worktree, project);
        let env_file_path = env_file::write(&worktree, &project.env_vars)?;
        let mut ctx = ComposeContext {
            working_dir: worktree.clone(),
            compose_file: compose_file.clone(),
            extra_compose_files: Vec::new(),
            project_name: compose::generate_project_name(&project.name, phases::short_sha(&target.git_sha)),
        };

        let cleanup_env_file = || {
            let _ = env_file::remove(&env_file_path);
        };

        emitter.info(Phase::Starting, format!("restarting {}", ctx.project_name));
        if let Err(e) = self.compose.up(&ctx, &env_file_path, &null_stream).await {
            cleanup_env_file();
            return Err(e);
        }

        let deadline = Instant::now() + Duration::from_secs(self.config.default_health_timeout_secs);
        if let Err(e) = routing::wait_for_healthy(self.compose.as_ref(), &ctx, deadline.saturating_duration_since(Instant::now())).await {
            let _ = self.compose.down(&ctx, &null_stream).await;
            cleanup_env_file();
            return Err(e);
        }

        if let Err(e) = self
            .switch_routing(project, &compose_file, &mut ctx, &env_file_path, &options, &emitter)
            .await
        {
            let _ = self.compose.down(&ctx, &null_stream).await;
            cleanup_env_file();
            return Err(e);
        }
        cleanup_env_file();

        self.state
            .update_deployment_status(target.id, DeploymentStatus::Active, None)
            .await?;
        self.state.deactivate_previous(project.id, target.id).await?;
        self.state
            .update_deployment_status(current_active.id, DeploymentStatus::RolledBack, None)
            .await?;

        let mut target = target;
        target.status = DeploymentStatus::Active;

        self.retire_previous(project, Some(&current_active), &emitter).await;

        self.fire(&NotifyEvent::RollbackSucceeded {
            project: project.name.clone(),
            deployment_id: target.id,
            git_sha: target.git_sha.clone(),
        })
        .await;

        Ok(target)
    }

    pub async fn recover_crashed(&self) -> Result<Vec<Deployment>> {
        recovery::recover_crashed(self.state.as_ref(), &self.locks).await
    }

    async fn fire(&self, event: &NotifyEvent) {
        for error in self.notifier.notify_all(event).await {
            tracing::warn!(%error, "notifier delivery failed");
        }
    }
}

fn now_unix_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Merges a project's stored env vars with any caller-supplied overrides
/// (currently unused by the CLI but kept for embedders that layer
/// per-invocation overrides on top of stored values).
#[allow(dead_code)]
fn merged_env(project: &Project, overrides: &HashMap<String, String>) -> HashMap<String, String> {
    compose::merged_env(&project.env_vars, overrides)
}
