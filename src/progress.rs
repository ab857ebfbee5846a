//! The `ProgressSink`/`StreamSink` collaborator interfaces from spec §6.
//!
//! The core never prints anything itself; every human-visible line is a
//! `ProgressEvent` delivered to whatever sink the embedder supplied (the
//! CLI's `TerminalProgressSink`, a test's recording sink, a future TUI).

use std::time::{Duration, Instant};

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Initializing,
    Fetching,
    Resolving,
    Worktree,
    Validating,
    Pulling,
    Starting,
    HealthCheck,
    Traefik,
    Cleanup,
    Complete,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Level {
    Info,
    Verbose,
    Warning,
    Error,
    Success,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub project: String,
    pub deployment_id: String,
    pub phase: Phase,
    pub level: Level,
    pub message: String,
    pub elapsed: Duration,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Receives structured progress events in emission order, for one
/// deployment at a time. Implementations must not block for long — the
/// Deployer calls this synchronously between I/O-bound phases.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Used when no embedder-supplied sink is configured.
pub struct NullProgressSink;

impl ProgressSink for NullProgressSink {
    fn emit(&self, _event: ProgressEvent) {}
}

/// Helper the Deployer uses to stamp events with the deployment's clock and
/// forward them to the configured sink, so phase code doesn't repeat the
/// elapsed-time bookkeeping at every call site.
pub struct ProgressEmitter<'a> {
    sink: &'a dyn ProgressSink,
    project: String,
    deployment_id: String,
    start: Instant,
}

impl<'a> ProgressEmitter<'a> {
    pub fn new(sink: &'a dyn ProgressSink, project: impl Into<String>, deployment_id: impl Into<String>) -> Self {
        Self {
            sink,
            project: project.into(),
            deployment_id: deployment_id.into(),
            start: Instant::now(),
        }
    }

    pub fn emit(&self, phase: Phase, level: Level, message: impl Into<String>) {
        self.emit_with_metadata(phase, level, message, serde_json::Value::Null);
    }

    pub fn emit_with_metadata(
        &self,
        phase: Phase,
        level: Level,
        message: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        self.sink.emit(ProgressEvent {
            project: self.project.clone(),
            deployment_id: self.deployment_id.clone(),
            phase,
            level,
            message: message.into(),
            elapsed: self.start.elapsed(),
            metadata,
        });
    }

    pub fn info(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, Level::Info, message);
    }

    pub fn warning(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, Level::Warning, message);
    }

    pub fn error(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, Level::Error, message);
    }

    pub fn success(&self, phase: Phase, message: impl Into<String>) {
        self.emit(phase, Level::Success, message);
    }
}

/// Pair of byte sinks for streaming subprocess stdout/stderr (spec §4.5,
/// §9: "treat stream sinks as set-once per operation").
pub trait StreamSink: Send + Sync {
    fn on_stdout(&self, line: &str);
    fn on_stderr(&self, line: &str);
}

pub struct NullStreamSink;

impl StreamSink for NullStreamSink {
    fn on_stdout(&self, _line: &str) {}
    fn on_stderr(&self, _line: &str) {}
}
