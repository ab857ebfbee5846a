//! Docker Compose driving (spec §4.5).
//!
//! Grounded on komodo's periphery `docker/compose.rs` (subprocess
//! invocation of `docker compose` with `-p`/`-f`/`--env-file` flags,
//! buffered JSON output for `ps`) and on shipit's streaming pattern for
//! long operators (`build_images`/`start_new` in `deploy/steps.rs`, which
//! forward child stdout/stderr line-by-line to the console as the
//! subprocess runs instead of buffering to the end).

pub mod env_file;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use crate::error::{Error, Result};
use crate::progress::StreamSink;

/// Identifies the Compose project this driver call targets.
pub struct ComposeContext {
    pub working_dir: PathBuf,
    pub compose_file: PathBuf,
    /// Additional `-f` files layered on top of `compose_file`, e.g. the
    /// Traefik priority override (spec §4.1 phase 10).
    pub extra_compose_files: Vec<PathBuf>,
    pub project_name: String,
}

#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub name: String,
    pub status: String,
    pub health: String,
}

#[async_trait]
pub trait ComposeDriver: Send + Sync {
    async fn validate(&self, ctx: &ComposeContext) -> Result<()>;
    async fn validate_with_env(&self, ctx: &ComposeContext, env_file: &Path) -> Result<()>;
    async fn up(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()>;
    async fn down(&self, ctx: &ComposeContext, streams: &dyn StreamSink) -> Result<()>;
    async fn pull(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()>;
    async fn restart(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()>;
    async fn status(&self, ctx: &ComposeContext) -> Result<Vec<ServiceStatus>>;
    async fn logs(&self, ctx: &ComposeContext) -> Result<String>;
    /// True iff at least one image this project's services reference is
    /// already present in the local image store (spec §4.1 phase 7: a
    /// pull failure is only fatal when nothing local could stand in for
    /// it).
    async fn any_image_present(&self, ctx: &ComposeContext) -> Result<bool>;
}

pub fn generate_project_name(project_name: &str, short_sha: &str) -> String {
    format!("{project_name}-{short_sha}")
}

/// A service is considered up (for hosts without a healthcheck, spec
/// §4.6) when its status begins with "Up" or is exactly "running".
pub fn is_service_running(status: &str) -> bool {
    status.starts_with("Up") || status == "running"
}

#[derive(Default)]
pub struct DockerComposeDriver;

impl DockerComposeDriver {
    pub fn new() -> Self {
        Self
    }

    fn base_args<'a>(&self, ctx: &'a ComposeContext) -> Vec<&'a str> {
        let mut args = vec!["compose", "-p", ctx.project_name.as_str()];
        args.push("-f");
        args.push(ctx.compose_file.to_str().unwrap_or_default());
        for extra in &ctx.extra_compose_files {
            args.push("-f");
            args.push(extra.to_str().unwrap_or_default());
        }
        args
    }

    /// Streams stdout/stderr of a long-running compose invocation line by
    /// line to `streams` as it runs.
    async fn run_streaming(
        &self,
        ctx: &ComposeContext,
        mut extra: Vec<&str>,
        env_file: Option<&Path>,
        streams: &dyn StreamSink,
    ) -> Result<()> {
        let mut args = self.base_args(ctx);
        if let Some(env_file) = env_file {
            args.push("--env-file");
            args.push(env_file.to_str().unwrap_or_default());
        }
        args.append(&mut extra);

        let mut child = Command::new("docker")
            .args(&args)
            .current_dir(&ctx.working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|_| Error::ComposeNotFound)?;

        let stdout = child.stdout.take().expect("piped stdout");
        let stderr = child.stderr.take().expect("piped stderr");
        let mut stdout_lines = BufReader::new(stdout).lines();
        let mut stderr_lines = BufReader::new(stderr).lines();
        let mut stdout_done = false;
        let mut stderr_done = false;

        let status = loop {
            if stdout_done && stderr_done {
                break child.wait().await.map_err(|_| Error::ComposeNotFound)?;
            }
            tokio::select! {
                line = stdout_lines.next_line(), if !stdout_done => {
                    match line {
                        Ok(Some(line)) => streams.on_stdout(&line),
                        Ok(None) | Err(_) => stdout_done = true,
                    }
                }
                line = stderr_lines.next_line(), if !stderr_done => {
                    match line {
                        Ok(Some(line)) => streams.on_stderr(&line),
                        Ok(None) | Err(_) => stderr_done = true,
                    }
                }
                status = child.wait() => {
                    break status.map_err(|_| Error::ComposeNotFound)?;
                }
            }
        };

        if !status.success() {
            return Err(Error::ComposeInvalid(format!(
                "docker {} exited with {status}",
                args.join(" ")
            )));
        }
        Ok(())
    }

    /// Buffers stdout for operations that must return structured data
    /// (`ps`, `logs`) rather than streaming it to a human.
    async fn run_buffered(&self, ctx: &ComposeContext, extra: &[&str]) -> Result<String> {
        let mut args = self.base_args(ctx);
        args.extend_from_slice(extra);
        let output = Command::new("docker")
            .args(&args)
            .current_dir(&ctx.working_dir)
            .output()
            .await
            .map_err(|_| Error::ComposeNotFound)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::ComposeInvalid(stderr));
        }
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}

#[derive(Deserialize)]
struct PsEntry {
    #[serde(rename = "Service")]
    service: String,
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "Health", default)]
    health: String,
}

#[async_trait]
impl ComposeDriver for DockerComposeDriver {
    async fn validate(&self, ctx: &ComposeContext) -> Result<()> {
        if !ctx.compose_file.exists() {
            return Err(Error::ComposeFileNotFound(
                ctx.compose_file.display().to_string(),
            ));
        }
        self.run_buffered(ctx, &["config", "--quiet"])
            .await
            .map(|_| ())
            .map_err(|e| Error::ComposeInvalid(e.to_string()))
    }

    async fn validate_with_env(&self, ctx: &ComposeContext, env_file: &Path) -> Result<()> {
        self.validate(ctx).await?;
        let mut args = self.base_args(ctx);
        args.push("--env-file");
        args.push(env_file.to_str().unwrap_or_default());
        args.push("config");
        args.push("--quiet");
        let output = Command::new("docker")
            .args(&args)
            .current_dir(&ctx.working_dir)
            .output()
            .await
            .map_err(|_| Error::ComposeNotFound)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(Error::ComposeInvalid(stderr));
        }
        Ok(())
    }

    async fn up(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()> {
        self.run_streaming(ctx, vec!["up", "-d", "--remove-orphans"], Some(env_file), streams)
            .await
    }

    async fn down(&self, ctx: &ComposeContext, streams: &dyn StreamSink) -> Result<()> {
        self.run_streaming(ctx, vec!["down"], None, streams).await
    }

    async fn pull(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()> {
        self.run_streaming(ctx, vec!["pull"], Some(env_file), streams)
            .await
    }

    async fn restart(
        &self,
        ctx: &ComposeContext,
        env_file: &Path,
        streams: &dyn StreamSink,
    ) -> Result<()> {
        self.run_streaming(ctx, vec!["up", "-d", "--force-recreate"], Some(env_file), streams)
            .await
    }

    async fn status(&self, ctx: &ComposeContext) -> Result<Vec<ServiceStatus>> {
        let raw = self
            .run_buffered(ctx, &["ps", "--all", "--format", "json"])
            .await?;
        let mut out = Vec::new();
        for line in raw.lines().filter(|l| !l.trim().is_empty()) {
            let entry: PsEntry = serde_json::from_str(line)
                .map_err(|e| Error::ComposeInvalid(format!("unparseable ps output: {e}")))?;
            out.push(ServiceStatus {
                name: entry.service,
                status: entry.state,
                health: entry.health,
            });
        }
        Ok(out)
    }

    async fn logs(&self, ctx: &ComposeContext) -> Result<String> {
        self.run_buffered(ctx, &["logs", "--no-color", "--tail", "200"])
            .await
    }

    async fn any_image_present(&self, ctx: &ComposeContext) -> Result<bool> {
        let raw = self
            .run_buffered(ctx, &["config", "--images"])
            .await
            .unwrap_or_default();
        for image in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let output = Command::new("docker")
                .args(["image", "inspect", image])
                .output()
                .await
                .map_err(|_| Error::ComposeNotFound)?;
            if output.status.success() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Queries whether a named container (by substring, e.g. "traefik") is
/// currently running on the host, independent of any specific compose
/// project (spec §4.6 `IsRunning`).
pub async fn container_name_running(substring: &str) -> bool {
    let output = Command::new("docker")
        .args([
            "ps",
            "--filter",
            &format!("name={substring}"),
            "--format",
            "{{.Names}}",
        ])
        .output()
        .await;
    match output {
        Ok(output) if output.status.success() => {
            !String::from_utf8_lossy(&output.stdout).trim().is_empty()
        }
        _ => false,
    }
}

pub fn merged_env(base: &HashMap<String, String>, overrides: &HashMap<String, String>) -> HashMap<String, String> {
    let mut merged = base.clone();
    merged.extend(overrides.clone());
    merged
}
