//! Startup jobs and the queue that runs them.
//!
//! Boot chain: [`LoadIdentityJob`] → (on failure [`RebuildIdentityJob`], then
//! itself again) → [`BootCommsJob`] → periodic [`RefreshRouterInfoJob`].

pub mod boot_comms;
pub mod load_identity;
pub mod queue;
pub mod rebuild_identity;
pub mod refresh_router_info;

pub use boot_comms::BootCommsJob;
pub use load_identity::{LoadIdentityJob, Outcome};
pub use queue::{Job, JobContext, JobFuture, JobQueue, JobQueueHandle, RunHandle};
pub use rebuild_identity::RebuildIdentityJob;
pub use refresh_router_info::RefreshRouterInfoJob;
