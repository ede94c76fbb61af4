//! Load Router Info: the identity bootstrap job.
//!
//! One pass:
//! 1. Take the identity file lock and classify what is on disk.
//! 2. If both files are present, decode the router info and the four keys,
//!    verify the signature against the bundle, and compare the stored
//!    encryption key's exponent marker with the current policy.
//! 3. Anything short of a fully valid identity deletes both files while the
//!    lock is still held.
//! 4. Release the lock. A valid identity is published and the next boot
//!    stage is enqueued. Otherwise the rebuild job runs to completion and a
//!    fresh pass is enqueued with `attempt + 1`.
//!
//! Boot fails for good once `identity.max_attempts` rebuilds have gone by
//! without a usable identity, or if a rebuild fails, times out or is
//! cancelled.

use std::io::Read;

use tracing::{debug, error, info, warn};

use crate::{
    error::{AppError, IdentityError},
    identity::{
        keys::KeyBundle,
        policy::{ExponentPolicy, PolicyProvider},
        record::decode_record,
        store::{classify, delete_both, ArtifactKind, IdentityStore, PresenceState},
        RouterIdentity,
    },
    router::{BootStatus, FileGuard},
};

use super::{
    boot_comms::BootCommsJob,
    queue::{Job, JobContext, JobFuture},
    rebuild_identity::RebuildIdentityJob,
};

/// Result of one load pass.
#[derive(Debug)]
pub enum Outcome {
    Valid(RouterIdentity),
    /// Nothing loadable on disk (absent, keys only, or info only).
    Missing(PresenceState),
    /// Malformed bytes, bad signature or an I/O fault.
    Corrupt(IdentityError),
    /// Trusted identity built under the other exponent policy.
    StalePolicy {
        stored: ExponentPolicy,
        current: ExponentPolicy,
    },
}

/// Classify, load and validate. Every outcome other than `Valid` has already
/// deleted both files when this returns.
///
/// `_guard` proves the caller holds the identity file lock.
pub fn load_pass(store: &dyn IdentityStore, policy: &dyn PolicyProvider, _guard: &FileGuard) -> Outcome {
    let presence = classify(store);
    if !presence.is_loadable() {
        // An info file without its keys cannot sign or decrypt; treat it as
        // absent rather than run without an identity.
        debug!(?presence, "no loadable router identity on disk");
        delete_both(store);
        return Outcome::Missing(presence);
    }

    let outcome = match read_identity(store, policy) {
        Ok(identity) => {
            debug!(
                path = %store.describe(ArtifactKind::Info),
                addresses = identity.info.addresses().len(),
                "read router info"
            );
            return Outcome::Valid(identity);
        }
        Err(IdentityError::PolicyMismatch { stored, current }) => {
            if current.is_long() {
                warn!("Rebuilding router info with longer key");
            } else {
                warn!("Rebuilding router info with faster key");
            }
            Outcome::StalePolicy { stored, current }
        }
        Err(e) => {
            error!(
                info = %store.describe(ArtifactKind::Info),
                keys = %store.describe(ArtifactKind::Keys),
                error = %e,
                "corrupt router info or keys"
            );
            Outcome::Corrupt(e)
        }
    };

    delete_both(store);
    outcome
}

fn read_identity(store: &dyn IdentityStore, policy: &dyn PolicyProvider) -> Result<RouterIdentity, IdentityError> {
    let info = {
        let mut reader = store.open_read(ArtifactKind::Info)?;
        let mut buf = Vec::new();
        reader
            .read_to_end(&mut buf)
            .map_err(|e| IdentityError::from_io(ArtifactKind::Info, e))?;
        decode_record(&buf)?
    };

    let keys = {
        let mut reader = store.open_read(ArtifactKind::Keys)?;
        KeyBundle::read_from(&mut *reader)?
    };

    if !info.verify_signature() || !info.matches_bundle(&keys) {
        return Err(IdentityError::SignatureInvalid);
    }

    let stored = keys.encryption_private.exponent_policy();
    let current = policy.current_exponent_policy();
    if stored != current {
        return Err(IdentityError::PolicyMismatch { stored, current });
    }

    Ok(RouterIdentity { info, keys })
}

// ── job ──────────────────────────────────────────────────────────────────────

pub struct LoadIdentityJob {
    attempt: u32,
}

impl LoadIdentityJob {
    pub fn new() -> Self {
        Self { attempt: 1 }
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    fn next_attempt(&self) -> Self {
        Self { attempt: self.attempt + 1 }
    }

    async fn run_pass(self: Box<Self>, ctx: JobContext) -> Result<(), AppError> {
        let router = ctx.router.clone();
        router.state.set_boot_status(BootStatus::LoadingIdentity { attempt: self.attempt });

        let guard = router.file_lock.acquire().await;
        let store = router.store.clone();
        let policy = router.policy.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            let outcome = load_pass(&*store, &*policy, &guard);
            drop(guard);
            outcome
        })
        .await
        .map_err(|e| AppError::Bootstrap(format!("load pass panicked: {e}")))?;

        let reason = match outcome {
            Outcome::Valid(identity) => {
                router.state.publish_identity(identity);
                return ctx.queue.enqueue(Box::new(BootCommsJob::new()));
            }
            Outcome::Missing(presence) => format!("{presence:?}"),
            Outcome::Corrupt(e) => e.to_string(),
            Outcome::StalePolicy { stored, current } => format!("{stored} key, want {current}"),
        };

        // Pass N follows N - 1 rebuilds.
        let max = router.config.identity.max_attempts;
        if self.attempt > max {
            return Err(AppError::Bootstrap(format!(
                "no usable router identity after {max} rebuilds (last: {reason})"
            )));
        }

        info!(attempt = self.attempt, %reason, "rebuilding router identity");
        ctx.queue
            .run_now(Box::new(RebuildIdentityJob::new()))
            .wait(router.config.identity.rebuild_timeout, &router.shutdown)
            .await
            .map_err(|e| AppError::Bootstrap(format!("rebuild failed: {e}")))?;

        ctx.queue.enqueue(Box::new(self.next_attempt()))
    }
}

impl Default for LoadIdentityJob {
    fn default() -> Self {
        Self::new()
    }
}

impl Job for LoadIdentityJob {
    fn name(&self) -> &str {
        "Load Router Info"
    }

    fn run(self: Box<Self>, ctx: JobContext) -> JobFuture {
        Box::pin(async move {
            let router = ctx.router.clone();
            let res = self.run_pass(ctx).await;
            if let Err(e) = &res {
                error!(error = %e, "router identity bootstrap failed");
                let reason = match e {
                    AppError::Bootstrap(msg) => msg.clone(),
                    other => other.to_string(),
                };
                router.state.set_boot_status(BootStatus::Failed(reason));
            }
            res
        })
    }
}
