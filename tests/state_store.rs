//! Integration tests for `SqliteStateStore`, exercised through a real
//! on-disk database (WAL mode, migrations applied via `connect`) rather
//! than the crate's own in-memory test helper, since integration tests
//! link against the compiled library and can't see its `#[cfg(test)]`
//! items.

use std::collections::HashMap;

use otterstack::state::models::{DeploymentStatus, ProjectStatus, RepoType};
use otterstack::state::{NewDeployment, NewProject, SqliteStateStore, StateStore};

async fn open_store() -> (tempfile::TempDir, SqliteStateStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SqliteStateStore::connect(&dir.path().join("otterstack.db"))
        .await
        .unwrap();
    (dir, store)
}

fn new_project(name: &str) -> NewProject {
    NewProject {
        name: name.to_string(),
        repo_type: RepoType::Local,
        repo_url: None,
        repo_path: format!("/srv/{name}"),
        compose_file: "compose.yaml".to_string(),
        worktree_retention: 5,
        traefik_routing_enabled: false,
    }
}

#[tokio::test]
async fn create_and_fetch_project_round_trips() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();
    assert_eq!(project.status, ProjectStatus::Unconfigured);

    let fetched = store.get_project_by_name("demo").await.unwrap();
    assert_eq!(fetched.id, project.id);
    let fetched = store.get_project_by_id(project.id).await.unwrap();
    assert_eq!(fetched.name, "demo");
}

#[tokio::test]
async fn duplicate_project_name_is_rejected() {
    let (_dir, store) = open_store().await;
    store.create_project(new_project("demo")).await.unwrap();
    let err = store.create_project(new_project("demo")).await.unwrap_err();
    assert_eq!(err.code(), "project_exists");
}

#[tokio::test]
async fn invalid_project_name_is_rejected_before_insert() {
    let (_dir, store) = open_store().await;
    let err = store
        .create_project(new_project("Not Valid!"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), "invalid_project_name");
}

#[tokio::test]
async fn env_vars_merge_on_repeated_set() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();

    let mut first = HashMap::new();
    first.insert("A".to_string(), "1".to_string());
    first.insert("B".to_string(), "2".to_string());
    store.set_env_vars(project.id, first).await.unwrap();

    let mut second = HashMap::new();
    second.insert("B".to_string(), "20".to_string());
    second.insert("C".to_string(), "3".to_string());
    store.set_env_vars(project.id, second).await.unwrap();

    let env = store.get_env_vars(project.id).await.unwrap();
    assert_eq!(env.get("A").map(String::as_str), Some("1"));
    assert_eq!(env.get("B").map(String::as_str), Some("20"));
    assert_eq!(env.get("C").map(String::as_str), Some("3"));

    store.delete_env_var(project.id, "A").await.unwrap();
    let env = store.get_env_vars(project.id).await.unwrap();
    assert!(!env.contains_key("A"));
}

#[tokio::test]
async fn deployment_status_transitions_stamp_finished_at() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();
    let deployment = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "main".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(deployment.status, DeploymentStatus::Deploying);
    assert!(deployment.finished_at.is_none());

    store
        .update_deployment_status(deployment.id, DeploymentStatus::Active, None)
        .await
        .unwrap();
    let reloaded = store.get_deployment(deployment.id).await.unwrap();
    assert_eq!(reloaded.status, DeploymentStatus::Active);
    assert!(reloaded.finished_at.is_some());
}

#[tokio::test]
async fn get_active_deployment_prefers_most_recent_when_invariant_is_broken() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();

    let first = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "v1".to_string(),
        })
        .await
        .unwrap();
    store
        .update_deployment_status(first.id, DeploymentStatus::Active, None)
        .await
        .unwrap();

    // Simulate the crash-recovery-worthy case where two rows ended up
    // active at once; the store should tolerate it and pick one rather
    // than erroring.
    let second = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "v2".to_string(),
        })
        .await
        .unwrap();
    store
        .update_deployment_status(second.id, DeploymentStatus::Active, None)
        .await
        .unwrap();

    let active = store.get_active_deployment(project.id).await.unwrap();
    assert_eq!(active.id, second.id);
}

#[tokio::test]
async fn deactivate_previous_is_unconditional_across_all_other_actives() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();

    let mut ids = Vec::new();
    for git_ref in ["v1", "v2", "v3"] {
        let deployment = store
            .create_deployment(NewDeployment {
                project_id: project.id,
                git_ref: git_ref.to_string(),
            })
            .await
            .unwrap();
        store
            .update_deployment_status(deployment.id, DeploymentStatus::Active, None)
            .await
            .unwrap();
        ids.push(deployment.id);
    }

    store.deactivate_previous(project.id, ids[2]).await.unwrap();

    let first = store.get_deployment(ids[0]).await.unwrap();
    let second = store.get_deployment(ids[1]).await.unwrap();
    let third = store.get_deployment(ids[2]).await.unwrap();
    assert_eq!(first.status, DeploymentStatus::Inactive);
    assert_eq!(second.status, DeploymentStatus::Inactive);
    assert_eq!(third.status, DeploymentStatus::Active);
}

#[tokio::test]
async fn sha_prefix_lookup_requires_a_unique_match() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();

    let deployment = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "main".to_string(),
        })
        .await
        .unwrap();
    store
        .set_deployment_sha(deployment.id, "abcdef0123456789abcdef0123456789abcdef01")
        .await
        .unwrap();

    let found = store.get_by_sha_prefix(project.id, "abcdef0").await.unwrap();
    assert_eq!(found.id, deployment.id);

    let too_short = store.get_by_sha_prefix(project.id, "abc").await;
    assert!(too_short.is_err());

    let no_match = store.get_by_sha_prefix(project.id, "ffffff").await;
    assert!(no_match.is_err());
}

#[tokio::test]
async fn get_interrupted_returns_deploying_and_interrupted_rows_only() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();

    let stuck = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "v1".to_string(),
        })
        .await
        .unwrap();
    let finished = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "v2".to_string(),
        })
        .await
        .unwrap();
    store
        .update_deployment_status(finished.id, DeploymentStatus::Active, None)
        .await
        .unwrap();

    let interrupted = store.get_interrupted().await.unwrap();
    assert_eq!(interrupted.len(), 1);
    assert_eq!(interrupted[0].id, stuck.id);
}

#[tokio::test]
async fn delete_project_cascades_to_deployments_and_env_vars() {
    let (_dir, store) = open_store().await;
    let project = store.create_project(new_project("demo")).await.unwrap();
    let deployment = store
        .create_deployment(NewDeployment {
            project_id: project.id,
            git_ref: "main".to_string(),
        })
        .await
        .unwrap();
    let mut vars = HashMap::new();
    vars.insert("A".to_string(), "1".to_string());
    store.set_env_vars(project.id, vars).await.unwrap();

    store.delete_project(project.id).await.unwrap();

    assert!(store.get_project_by_id(project.id).await.is_err());
    assert!(store.get_deployment(deployment.id).await.is_err());
}
