//! Fire-and-forget deploy event notifications (spec §6 `Notifier`,
//! SPEC_FULL.md §14 — a supplemented feature: shipit has no equivalent,
//! komodo and agentsphere-platform are this corpus's reference points
//! for "deploy lifecycle webhook" shapes).
//!
//! Deliberately outside the core error taxonomy (`crate::error::Error`):
//! per spec §6, notifier failures are "aggregated and reported, never
//! propagated as deployment failure", so they carry their own error type
//! that the Deployer only ever logs as a warning.

pub mod webhook;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

pub use webhook::WebhookNotifier;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    DeployStarted {
        project: String,
        deployment_id: Uuid,
        git_ref: String,
    },
    DeploySucceeded {
        project: String,
        deployment_id: Uuid,
        git_sha: String,
    },
    DeployFailed {
        project: String,
        deployment_id: Uuid,
        error_code: String,
        error_message: String,
    },
    RollbackStarted {
        project: String,
        deployment_id: Uuid,
    },
    RollbackSucceeded {
        project: String,
        deployment_id: Uuid,
        git_sha: String,
    },
    ServiceHealthChanged {
        project: String,
        service: String,
        healthy: bool,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("notifier '{name}' failed: {source}")]
    Delivery {
        name: String,
        #[source]
        source: reqwest::Error,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &str;
    async fn notify(&self, event: &NotifyEvent) -> Result<(), NotifyError>;
}

pub struct NullNotifier;

#[async_trait]
impl Notifier for NullNotifier {
    fn name(&self) -> &str {
        "null"
    }

    async fn notify(&self, _event: &NotifyEvent) -> Result<(), NotifyError> {
        Ok(())
    }
}

/// Fans an event out to every configured notifier in turn, collecting
/// failures instead of short-circuiting on the first one, so one broken
/// webhook never silences the others.
pub struct CompositeNotifier {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl CompositeNotifier {
    pub fn new(notifiers: Vec<Box<dyn Notifier>>) -> Self {
        Self { notifiers }
    }

    pub async fn notify_all(&self, event: &NotifyEvent) -> Vec<NotifyError> {
        let mut errors = Vec::new();
        for notifier in &self.notifiers {
            if let Err(e) = notifier.notify(event).await {
                errors.push(e);
            }
        }
        errors
    }
}
