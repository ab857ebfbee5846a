//! The durable project/deployment state store (spec §4.2).
//!
//! Grounded on the `sqlx` usage in `agentsphere-platform`'s deployer and
//! `KwaminaWhyte-rivetr` (both async Rust deployment controllers backed by
//! a SQL database with a migration-tracked schema); unlike those two this
//! store targets SQLite in WAL mode, since OtterStack is single-host and
//! single-writer (spec §4.2/§5).

pub mod models;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use crate::error::{Error, Result};
use models::{Deployment, DeploymentStatus, Project, ProjectStatus, RepoType};

/// Fields needed to register a new project; id/status/timestamps are
/// assigned by the store.
pub struct NewProject {
    pub name: String,
    pub repo_type: RepoType,
    pub repo_url: Option<String>,
    pub repo_path: String,
    pub compose_file: String,
    pub worktree_retention: u32,
    pub traefik_routing_enabled: bool,
}

/// Fields needed to start a new deployment attempt.
pub struct NewDeployment {
    pub project_id: Uuid,
    pub git_ref: String,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    // -- Projects --
    async fn create_project(&self, input: NewProject) -> Result<Project>;
    async fn get_project_by_name(&self, name: &str) -> Result<Project>;
    async fn get_project_by_id(&self, id: Uuid) -> Result<Project>;
    async fn list_projects(&self) -> Result<Vec<Project>>;
    async fn update_project_status(&self, id: Uuid, status: ProjectStatus) -> Result<()>;
    async fn delete_project(&self, id: Uuid) -> Result<()>;
    async fn set_env_vars(&self, id: Uuid, vars: HashMap<String, String>) -> Result<()>;
    async fn get_env_vars(&self, id: Uuid) -> Result<HashMap<String, String>>;
    async fn delete_env_var(&self, id: Uuid, key: &str) -> Result<()>;

    // -- Deployments --
    async fn create_deployment(&self, input: NewDeployment) -> Result<Deployment>;
    async fn get_deployment(&self, id: Uuid) -> Result<Deployment>;
    async fn get_active_deployment(&self, project_id: Uuid) -> Result<Deployment>;
    async fn list_deployments(&self, project_id: Uuid, limit: i64) -> Result<Vec<Deployment>>;
    async fn update_deployment_status(
        &self,
        id: Uuid,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<()>;
    async fn set_deployment_sha(&self, id: Uuid, sha: &str) -> Result<()>;
    async fn set_worktree_path(&self, id: Uuid, path: &str) -> Result<()>;
    /// Sets every other deployment of `project_id` that is currently
    /// `active` to `inactive` (spec §4.1 phase 11). Deliberately
    /// unconditional rather than "the single other active row" so a
    /// broken invariant (two coexisting actives, spec §9) self-heals on
    /// the next successful deploy.
    async fn deactivate_previous(&self, project_id: Uuid, except_id: Uuid) -> Result<()>;
    async fn get_previous_deployment(&self, project_id: Uuid) -> Result<Deployment>;
    async fn get_by_sha_prefix(&self, project_id: Uuid, prefix: &str) -> Result<Deployment>;
    async fn get_interrupted(&self) -> Result<Vec<Deployment>>;
}

pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    pub async fn connect(db_path: &std::path::Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        // WAL journaling so readers are never blocked by the single writer
        // (spec §4.2).
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&pool)
            .await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow, env_vars: HashMap<String, String>) -> Result<Project> {
    let id: String = row.try_get("id")?;
    let repo_type: String = row.try_get("repo_type")?;
    let status: String = row.try_get("status")?;
    Ok(Project {
        id: Uuid::parse_str(&id).map_err(|e| Error::MigrationFailed(e.to_string()))?,
        name: row.try_get("name")?,
        repo_type: RepoType::parse(&repo_type)
            .ok_or_else(|| Error::MigrationFailed(format!("bad repo_type '{repo_type}'")))?,
        repo_url: row.try_get("repo_url")?,
        repo_path: row.try_get("repo_path")?,
        compose_file: row.try_get("compose_file")?,
        worktree_retention: row.try_get::<i64, _>("worktree_retention")? as u32,
        status: ProjectStatus::parse(&status)
            .ok_or_else(|| Error::MigrationFailed(format!("bad status '{status}'")))?,
        traefik_routing_enabled: row.try_get::<i64, _>("traefik_routing_enabled")? != 0,
        env_vars,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn deployment_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Deployment> {
    let id: String = row.try_get("id")?;
    let project_id: String = row.try_get("project_id")?;
    let status: String = row.try_get("status")?;
    Ok(Deployment {
        id: Uuid::parse_str(&id).map_err(|e| Error::MigrationFailed(e.to_string()))?,
        project_id: Uuid::parse_str(&project_id)
            .map_err(|e| Error::MigrationFailed(e.to_string()))?,
        git_sha: row.try_get("git_sha")?,
        git_ref: row.try_get("git_ref")?,
        worktree_path: row.try_get("worktree_path")?,
        status: DeploymentStatus::parse(&status)
            .ok_or_else(|| Error::MigrationFailed(format!("bad status '{status}'")))?,
        error_message: row.try_get("error_message")?,
        started_at: row.try_get("started_at")?,
        finished_at: row.try_get("finished_at")?,
    })
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn create_project(&self, input: NewProject) -> Result<Project> {
        if !models::is_valid_project_name(&input.name) {
            return Err(Error::InvalidProjectName(input.name));
        }

        let id = Uuid::new_v4();
        let now = Utc::now();
        let status = match input.repo_type {
            RepoType::Local => ProjectStatus::Unconfigured,
            RepoType::Remote => ProjectStatus::Cloning,
        };

        let result = sqlx::query(
            "INSERT INTO projects
                (id, name, repo_type, repo_url, repo_path, compose_file,
                 worktree_retention, status, traefik_routing_enabled,
                 created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(&input.name)
        .bind(input.repo_type.as_str())
        .bind(&input.repo_url)
        .bind(&input.repo_path)
        .bind(&input.compose_file)
        .bind(input.worktree_retention as i64)
        .bind(status.as_str())
        .bind(input.traefik_routing_enabled as i64)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await;

        if let Err(sqlx::Error::Database(db_err)) = &result {
            if db_err.is_unique_violation() {
                return Err(Error::ProjectExists(input.name));
            }
        }
        result?;

        Ok(Project {
            id,
            name: input.name,
            repo_type: input.repo_type,
            repo_url: input.repo_url,
            repo_path: input.repo_path,
            compose_file: input.compose_file,
            worktree_retention: input.worktree_retention,
            status,
            traefik_routing_enabled: input.traefik_routing_enabled,
            env_vars: HashMap::new(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn get_project_by_name(&self, name: &str) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(name.to_string()))?;
        let id: String = row.try_get("id")?;
        let id = Uuid::parse_str(&id).map_err(|e| Error::MigrationFailed(e.to_string()))?;
        let env_vars = self.get_env_vars(id).await?;
        project_from_row(&row, env_vars)
    }

    async fn get_project_by_id(&self, id: Uuid) -> Result<Project> {
        let row = sqlx::query("SELECT * FROM projects WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::ProjectNotFound(id.to_string()))?;
        let env_vars = self.get_env_vars(id).await?;
        project_from_row(&row, env_vars)
    }

    async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query("SELECT * FROM projects ORDER BY name")
            .fetch_all(&self.pool)
            .await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.try_get("id")?;
            let id = Uuid::parse_str(&id).map_err(|e| Error::MigrationFailed(e.to_string()))?;
            let env_vars = self.get_env_vars(id).await?;
            out.push(project_from_row(row, env_vars)?);
        }
        Ok(out)
    }

    async fn update_project_status(&self, id: Uuid, status: ProjectStatus) -> Result<()> {
        let result = sqlx::query("UPDATE projects SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn delete_project(&self, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM projects WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(Error::ProjectNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_env_vars(&self, id: Uuid, vars: HashMap<String, String>) -> Result<()> {
        // Merge semantics (spec §4.2): existing keys are overwritten,
        // others left alone.
        let mut tx = self.pool.begin().await?;
        for (key, value) in vars {
            sqlx::query(
                "INSERT INTO project_env_vars (project_id, key, value) VALUES (?, ?, ?)
                 ON CONFLICT(project_id, key) DO UPDATE SET value = excluded.value",
            )
            .bind(id.to_string())
            .bind(key)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_env_vars(&self, id: Uuid) -> Result<HashMap<String, String>> {
        let rows = sqlx::query("SELECT key, value FROM project_env_vars WHERE project_id = ?")
            .bind(id.to_string())
            .fetch_all(&self.pool)
            .await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key")?;
            let value: String = row.try_get("value")?;
            map.insert(key, value);
        }
        Ok(map)
    }

    async fn delete_env_var(&self, id: Uuid, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM project_env_vars WHERE project_id = ? AND key = ?")
            .bind(id.to_string())
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_deployment(&self, input: NewDeployment) -> Result<Deployment> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            "INSERT INTO deployments
                (id, project_id, git_sha, git_ref, worktree_path, status, started_at)
             VALUES (?, ?, '', ?, '', ?, ?)",
        )
        .bind(id.to_string())
        .bind(input.project_id.to_string())
        .bind(&input.git_ref)
        .bind(DeploymentStatus::Deploying.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(Deployment {
            id,
            project_id: input.project_id,
            git_sha: String::new(),
            git_ref: input.git_ref,
            worktree_path: String::new(),
            status: DeploymentStatus::Deploying,
            error_message: None,
            started_at: now,
            finished_at: None,
        })
    }

    async fn get_deployment(&self, id: Uuid) -> Result<Deployment> {
        let row = sqlx::query("SELECT * FROM deployments WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::DeploymentNotFound(id.to_string()))?;
        deployment_from_row(&row)
    }

    async fn get_active_deployment(&self, project_id: Uuid) -> Result<Deployment> {
        // Most recent by started_at in case the active-uniqueness
        // invariant was ever violated by a crash (spec §9).
        let row = sqlx::query(
            "SELECT * FROM deployments WHERE project_id = ? AND status = 'active'
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| Error::NoActiveDeployment(project_id.to_string()))?;
        deployment_from_row(&row)
    }

    async fn list_deployments(&self, project_id: Uuid, limit: i64) -> Result<Vec<Deployment>> {
        let rows = sqlx::query(
            "SELECT * FROM deployments WHERE project_id = ?
             ORDER BY started_at DESC LIMIT ?",
        )
        .bind(project_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deployment_from_row).collect()
    }

    async fn update_deployment_status(
        &self,
        id: Uuid,
        status: DeploymentStatus,
        error_message: Option<String>,
    ) -> Result<()> {
        let finished_at = status.is_terminal().then(Utc::now);
        let result = sqlx::query(
            "UPDATE deployments SET status = ?, error_message = ?, finished_at = COALESCE(?, finished_at)
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(error_message)
        .bind(finished_at)
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(Error::DeploymentNotFound(id.to_string()));
        }
        Ok(())
    }

    async fn set_deployment_sha(&self, id: Uuid, sha: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET git_sha = ? WHERE id = ?")
            .bind(sha)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_worktree_path(&self, id: Uuid, path: &str) -> Result<()> {
        sqlx::query("UPDATE deployments SET worktree_path = ? WHERE id = ?")
            .bind(path)
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn deactivate_previous(&self, project_id: Uuid, except_id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE deployments SET status = 'inactive', finished_at = ?
             WHERE project_id = ? AND status = 'active' AND id != ?",
        )
        .bind(Utc::now())
        .bind(project_id.to_string())
        .bind(except_id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_previous_deployment(&self, project_id: Uuid) -> Result<Deployment> {
        let row = sqlx::query(
            "SELECT * FROM deployments
             WHERE project_id = ? AND status IN ('inactive', 'active')
             ORDER BY started_at DESC LIMIT 1 OFFSET 1",
        )
        .bind(project_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => deployment_from_row(&row),
            None => {
                // Fall back to the single active one if there's no
                // second row (nothing to roll back to).
                Err(Error::NoPreviousDeployment(project_id.to_string()))
            }
        }
    }

    async fn get_by_sha_prefix(&self, project_id: Uuid, prefix: &str) -> Result<Deployment> {
        if prefix.len() < 4 {
            return Err(Error::DeploymentNotFound(prefix.to_string()));
        }
        let rows = sqlx::query("SELECT * FROM deployments WHERE project_id = ? AND git_sha LIKE ?")
            .bind(project_id.to_string())
            .bind(format!("{prefix}%"))
            .fetch_all(&self.pool)
            .await?;
        match rows.len() {
            1 => deployment_from_row(&rows[0]),
            _ => Err(Error::DeploymentNotFound(prefix.to_string())),
        }
    }

    async fn get_interrupted(&self) -> Result<Vec<Deployment>> {
        let rows = sqlx::query(
            "SELECT * FROM deployments WHERE status IN ('deploying', 'interrupted')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deployment_from_row).collect()
    }
}
