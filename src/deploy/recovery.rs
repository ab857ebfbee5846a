//! Crash recovery (spec §4.1): on process start, deployments left
//! `deploying` by a process that died mid-phase are transitioned to
//! `interrupted` rather than silently resumed or retried.

use crate::error::Result;
use crate::lock::{is_process_alive, read_lock_owner, LockManager};
use crate::state::models::{Deployment, DeploymentStatus};
use crate::state::StateStore;

const INTERRUPTED_MESSAGE: &str = "operation_interrupted";

/// Scans every deployment in `{deploying, interrupted}` and marks the
/// ones whose lock is absent or whose owner is dead as `interrupted`.
/// Worktrees are left untouched for forensic inspection (spec §4.1).
/// Returns the deployments that were (re-)marked this call.
pub async fn recover_crashed(
    state: &dyn StateStore,
    locks: &LockManager,
) -> Result<Vec<Deployment>> {
    let mut recovered = Vec::new();
    for deployment in state.get_interrupted().await? {
        if deployment.status == DeploymentStatus::Interrupted {
            continue;
        }

        let project = state.get_project_by_id(deployment.project_id).await?;
        let lock_path = locks.lock_path("deployment", &project.name);
        let owner_alive = read_lock_owner(&lock_path)?
            .map(is_process_alive)
            .unwrap_or(false);

        if owner_alive {
            continue;
        }

        state
            .update_deployment_status(
                deployment.id,
                DeploymentStatus::Interrupted,
                Some(INTERRUPTED_MESSAGE.to_string()),
            )
            .await?;

        let mut updated = deployment;
        updated.status = DeploymentStatus::Interrupted;
        updated.error_message = Some(INTERRUPTED_MESSAGE.to_string());
        recovered.push(updated);
    }
    Ok(recovered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{NewDeployment, NewProject, SqliteStateStore};

    #[tokio::test]
    async fn marks_deployment_interrupted_when_lock_owner_is_dead() {
        let store = SqliteStateStore::connect_in_memory().await.unwrap();
        let project = store
            .create_project(NewProject {
                name: "demo".to_string(),
                repo_type: crate::state::models::RepoType::Local,
                repo_url: None,
                repo_path: "/tmp/demo".to_string(),
                compose_file: "compose.yaml".to_string(),
                worktree_retention: 5,
                traefik_routing_enabled: false,
            })
            .await
            .unwrap();
        let deployment = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_ref: "main".to_string(),
            })
            .await
            .unwrap();

        let locks_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(locks_dir.path().to_path_buf());
        // No lock file at all recorded for this project: owner is
        // considered dead.

        let recovered = recover_crashed(&store, &locks).await.unwrap();
        assert_eq!(recovered.len(), 1);
        assert_eq!(recovered[0].id, deployment.id);

        let reloaded = store.get_deployment(deployment.id).await.unwrap();
        assert_eq!(reloaded.status, crate::state::models::DeploymentStatus::Interrupted);
        assert_eq!(reloaded.error_message.as_deref(), Some("operation_interrupted"));
    }

    #[tokio::test]
    async fn leaves_deployment_alone_when_owner_still_alive() {
        let store = SqliteStateStore::connect_in_memory().await.unwrap();
        let project = store
            .create_project(NewProject {
                name: "demo".to_string(),
                repo_type: crate::state::models::RepoType::Local,
                repo_url: None,
                repo_path: "/tmp/demo".to_string(),
                compose_file: "compose.yaml".to_string(),
                worktree_retention: 5,
                traefik_routing_enabled: false,
            })
            .await
            .unwrap();
        let deployment = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_ref: "main".to_string(),
            })
            .await
            .unwrap();

        let locks_dir = tempfile::tempdir().unwrap();
        let locks = LockManager::new(locks_dir.path().to_path_buf());
        let _lock = locks.acquire("deployment", &project.name).unwrap();

        let recovered = recover_crashed(&store, &locks).await.unwrap();
        assert!(recovered.is_empty());

        let reloaded = store.get_deployment(deployment.id).await.unwrap();
        assert_eq!(reloaded.status, crate::state::models::DeploymentStatus::Deploying);
    }
}
