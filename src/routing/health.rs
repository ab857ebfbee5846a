//! Health polling for a freshly started Compose project (spec §4.1 phase
//! 9, §4.6 `WaitForHealthy`).

use std::time::{Duration, Instant};

use crate::compose::{is_service_running, ComposeContext, ComposeDriver};
use crate::error::{Error, Result};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Polls `ctx`'s containers every 2s until every service is ready or
/// `timeout` elapses. A service is ready when `health == "healthy"`, or
/// when it declares no healthcheck (`health == ""`) and its status
/// begins with "Up" or equals "running". `starting`/`unhealthy` are
/// never ready.
pub async fn wait_for_healthy(
    driver: &dyn ComposeDriver,
    ctx: &ComposeContext,
    timeout: Duration,
) -> Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let statuses = driver.status(ctx).await?;
        if !statuses.is_empty() && statuses.iter().all(is_ready) {
            return Ok(());
        }

        if Instant::now() >= deadline {
            return Err(Error::HealthTimeout(ctx.project_name.clone()));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline.saturating_duration_since(Instant::now())))
            .await;
    }
}

fn is_ready(service: &crate::compose::ServiceStatus) -> bool {
    if service.health == "healthy" {
        return true;
    }
    if service.health.is_empty() {
        return is_service_running(&service.status);
    }
    false
}
