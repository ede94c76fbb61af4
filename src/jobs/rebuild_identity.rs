//! Rebuild Router Info: generate and persist a brand new identity.
//!
//! Keys are generated for the current exponent policy off the async pool,
//! then the key bundle and a freshly signed router info are written under
//! the identity file lock, keys first. Nothing is published here; the next
//! load pass reads the new files back and publishes them.

use std::collections::BTreeMap;

use tracing::info;

use crate::{
    config::Config,
    error::AppError,
    identity::{
        keys::KeyBundle,
        record::RouterInfo,
        store::{ArtifactKind, IdentityStore},
    },
    router::FileGuard,
};

use super::queue::{Job, JobContext, JobFuture};

pub struct RebuildIdentityJob;

impl RebuildIdentityJob {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RebuildIdentityJob {
    fn default() -> Self {
        Self::new()
    }
}

/// Options published in every fresh router info.
fn router_options(config: &Config) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("router.name".to_string(), config.router_name.clone()),
        ("router.version".to_string(), env!("CARGO_PKG_VERSION").to_string()),
    ])
}

/// Write `keys` then `info`. `_guard` proves the file lock is held.
pub fn persist(
    store: &dyn IdentityStore,
    info: &RouterInfo,
    keys: &KeyBundle,
    _guard: &FileGuard,
) -> Result<(), AppError> {
    let info_bytes = info.to_bytes().map_err(|e| AppError::Identity(e.to_string()))?;
    store
        .write(ArtifactKind::Keys, &keys.to_bytes())
        .map_err(|e| AppError::Identity(format!("cannot write {}: {e}", store.describe(ArtifactKind::Keys))))?;
    store
        .write(ArtifactKind::Info, &info_bytes)
        .map_err(|e| AppError::Identity(format!("cannot write {}: {e}", store.describe(ArtifactKind::Info))))?;
    Ok(())
}

impl Job for RebuildIdentityJob {
    fn name(&self) -> &str {
        "Rebuild Router Info"
    }

    fn run(self: Box<Self>, ctx: JobContext) -> JobFuture {
        Box::pin(async move {
            let router = ctx.router;
            let policy = router.policy.current_exponent_policy();
            info!(%policy, "generating new router keys");

            let keygen = router.keygen.clone();
            let keys = tokio::task::spawn_blocking(move || keygen.generate(policy))
                .await
                .map_err(|e| AppError::Identity(format!("key generation panicked: {e}")))??;

            let info = RouterInfo::build(
                &keys,
                router.config.identity.addresses.clone(),
                router_options(&router.config),
                chrono::Utc::now().timestamp_millis(),
            )
            .map_err(|e| AppError::Identity(e.to_string()))?;

            let guard = router.file_lock.acquire().await;
            let store = router.store.clone();
            let hash = hex::encode(&keys.signing_public.to_bytes()[..4]);
            tokio::task::spawn_blocking(move || {
                let res = persist(&*store, &info, &keys, &guard);
                drop(guard);
                res
            })
            .await
            .map_err(|e| AppError::Identity(format!("persist panicked: {e}")))??;

            info!(signing_key = %hash, "new router identity written");
            Ok(())
        })
    }
}
