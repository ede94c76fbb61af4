//! Refresh Router Info: periodic republication of the published identity.
//!
//! Re-signs the current router info with a new publication time, writes the
//! info file under the identity file lock, republishes, and schedules itself
//! again. Runs alongside everything else once boot is done, which is why the
//! bootstrap and rebuild paths take the same lock.

use tracing::{debug, warn};

use crate::{
    error::AppError,
    identity::{store::ArtifactKind, RouterIdentity},
};

use super::queue::{Job, JobContext, JobFuture};

pub struct RefreshRouterInfoJob;

impl RefreshRouterInfoJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RefreshRouterInfoJob {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for RefreshRouterInfoJob {
    fn name(&self) -> &str {
        "Refresh Router Info"
    }

    fn run(self: Box<Self>, ctx: JobContext) -> JobFuture {
        Box::pin(async move {
            let router = ctx.router.clone();
            let Some(current) = router.state.identity() else {
                warn!("no published router identity, skipping refresh");
                return Ok(());
            };

            let info = current
                .info
                .republished(chrono::Utc::now().timestamp_millis(), &current.keys.signing_private)
                .map_err(|e| AppError::Identity(e.to_string()))?;
            let bytes = info.to_bytes().map_err(|e| AppError::Identity(e.to_string()))?;

            let guard = router.file_lock.acquire().await;
            let store = router.store.clone();
            tokio::task::spawn_blocking(move || {
                let res = store.write(ArtifactKind::Info, &bytes);
                drop(guard);
                res
            })
            .await
            .map_err(|e| AppError::Identity(format!("refresh write panicked: {e}")))?
            .map_err(|e| AppError::Identity(e.to_string()))?;

            debug!(published_ms = info.published_ms(), "router info refreshed");
            router.state.publish_identity(RouterIdentity { info, keys: current.keys.clone() });

            if let Some(interval) = router.config.identity.refresh_interval {
                ctx.queue.enqueue_after(Box::new(RefreshRouterInfoJob::new()), interval);
            }
            Ok(())
        })
    }
}
