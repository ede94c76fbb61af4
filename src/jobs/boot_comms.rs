//! Boot Communication System: the stage that follows a published identity.
//!
//! Transports are owned elsewhere; this job is the handoff point. It checks
//! the identity is visible, arms periodic republication and flips the boot
//! status to `Ready`.

use tracing::info;

use crate::{error::AppError, router::BootStatus};

use super::{
    queue::{Job, JobContext, JobFuture},
    refresh_router_info::RefreshRouterInfoJob,
};

pub struct BootCommsJob;

impl BootCommsJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for BootCommsJob {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for BootCommsJob {
    fn name(&self) -> &str {
        "Boot Communication System"
    }

    fn run(self: Box<Self>, ctx: JobContext) -> JobFuture {
        Box::pin(async move {
            let router = &ctx.router;
            let Some(identity) = router.state.identity() else {
                let reason = "communication layer started without a router identity";
                router.state.set_boot_status(BootStatus::Failed(reason.into()));
                return Err(AppError::Bootstrap(reason.into()));
            };

            info!(
                router = %identity.short_hash(),
                addresses = identity.info.addresses().len(),
                "booting communication layer"
            );

            if let Some(interval) = router.config.identity.refresh_interval {
                ctx.queue.enqueue_after(Box::new(RefreshRouterInfoJob::new()), interval);
            }

            router.state.set_boot_status(BootStatus::Ready { router_hash: identity.router_hash() });
            Ok(())
        })
    }
}
