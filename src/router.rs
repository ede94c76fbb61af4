//! Router context: shared state handed to every job.
//!
//! Holds the resolved config, the published identity slot, the boot status
//! channel, the identity file lock and the pluggable collaborators (store,
//! exponent policy, key generator). Built with [`RouterContext::builder`] so
//! tests can swap in fakes.

use std::sync::{Arc, RwLock};

use tokio::sync::{watch, Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    config::Config,
    error::AppError,
    identity::{
        keygen::{ElGamalKeyGenerator, KeyGenerator},
        policy::{ConfiguredPolicy, PolicyProvider},
        store::{FsIdentityStore, IdentityStore},
        RouterIdentity,
    },
    system::SystemVersion,
};

// ── FileLock ─────────────────────────────────────────────────────────────────

/// Mutual exclusion over the identity files. Every read, write or delete of
/// either file happens while a [`FileGuard`] is alive.
#[derive(Clone, Default)]
pub struct FileLock {
    inner: Arc<Mutex<()>>,
}

/// Held for the duration of one read/validate or write sequence. Owned, so it
/// can move into `spawn_blocking`.
pub struct FileGuard {
    _guard: OwnedMutexGuard<()>,
}

impl FileLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> FileGuard {
        FileGuard { _guard: self.inner.clone().lock_owned().await }
    }
}

#[cfg(test)]
impl FileLock {
    fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

// ── Boot status ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootStatus {
    Starting,
    /// A load pass is running.
    LoadingIdentity { attempt: u32 },
    /// Identity published, next stage reached.
    Ready { router_hash: String },
    Failed(String),
}

// ── RouterState ──────────────────────────────────────────────────────────────

/// Read-mostly shared state. The bootstrap and rebuild paths are the only
/// writers of the identity slot.
pub struct RouterState {
    identity: RwLock<Option<Arc<RouterIdentity>>>,
    boot_tx: watch::Sender<BootStatus>,
}

impl RouterState {
    fn new() -> Self {
        let (boot_tx, _) = watch::channel(BootStatus::Starting);
        Self { identity: RwLock::new(None), boot_tx }
    }

    pub fn identity(&self) -> Option<Arc<RouterIdentity>> {
        self.identity.read().unwrap_or_else(|p| p.into_inner()).clone()
    }

    pub fn publish_identity(&self, identity: RouterIdentity) -> Arc<RouterIdentity> {
        let identity = Arc::new(identity);
        *self.identity.write().unwrap_or_else(|p| p.into_inner()) = Some(identity.clone());
        info!(
            router = %identity.short_hash(),
            addresses = identity.info.addresses().len(),
            "router identity published"
        );
        identity
    }

    pub fn boot_status(&self) -> BootStatus {
        self.boot_tx.borrow().clone()
    }

    pub fn set_boot_status(&self, status: BootStatus) {
        self.boot_tx.send_replace(status);
    }

    pub fn subscribe_boot(&self) -> watch::Receiver<BootStatus> {
        self.boot_tx.subscribe()
    }

    /// Wait until boot reaches `Ready` or `Failed`.
    pub async fn wait_until_booted(&self) -> Result<String, AppError> {
        let mut rx = self.subscribe_boot();
        loop {
            match &*rx.borrow_and_update() {
                BootStatus::Ready { router_hash } => return Ok(router_hash.clone()),
                BootStatus::Failed(reason) => return Err(AppError::Bootstrap(reason.clone())),
                _ => {}
            }
            rx.changed()
                .await
                .map_err(|_| AppError::Bootstrap("boot status channel closed".into()))?;
        }
    }
}

// ── RouterContext ────────────────────────────────────────────────────────────

pub struct RouterContext {
    pub config: Config,
    pub state: RouterState,
    pub file_lock: FileLock,
    pub store: Arc<dyn IdentityStore>,
    pub policy: Arc<dyn PolicyProvider>,
    pub keygen: Arc<dyn KeyGenerator>,
    pub shutdown: CancellationToken,
}

impl RouterContext {
    pub fn builder(config: Config) -> RouterContextBuilder {
        RouterContextBuilder {
            config,
            store: None,
            policy: None,
            keygen: None,
            shutdown: None,
        }
    }
}

pub struct RouterContextBuilder {
    config: Config,
    store: Option<Arc<dyn IdentityStore>>,
    policy: Option<Arc<dyn PolicyProvider>>,
    keygen: Option<Arc<dyn KeyGenerator>>,
    shutdown: Option<CancellationToken>,
}

impl RouterContextBuilder {
    pub fn store(mut self, store: Arc<dyn IdentityStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn policy(mut self, policy: Arc<dyn PolicyProvider>) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn key_generator(mut self, keygen: Arc<dyn KeyGenerator>) -> Self {
        self.keygen = Some(keygen);
        self
    }

    pub fn shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = Some(token);
        self
    }

    /// Missing collaborators default to the filesystem store, the configured
    /// policy for this host and the ElGamal generator.
    pub fn build(self) -> Result<Arc<RouterContext>, AppError> {
        let config = self.config;
        let store = match self.store {
            Some(s) => s,
            None => Arc::new(FsIdentityStore::from_config(&config)),
        };
        let policy = match self.policy {
            Some(p) => p,
            None => Arc::new(ConfiguredPolicy::new(
                config.identity.exponent_policy,
                &SystemVersion::detect(),
            )),
        };
        let keygen = match self.keygen {
            Some(k) => k,
            None => Arc::new(ElGamalKeyGenerator::new()?),
        };
        Ok(Arc::new(RouterContext {
            config,
            state: RouterState::new(),
            file_lock: FileLock::new(),
            store,
            policy,
            keygen,
            shutdown: self.shutdown.unwrap_or_default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{
        keys::tests::sample_bundle, policy::ExponentPolicy, record::RouterInfo,
        store::MemoryIdentityStore,
    };
    use std::path::Path;

    fn ctx() -> Arc<RouterContext> {
        RouterContext::builder(Config::with_router_dir(Path::new("/nonexistent")))
            .store(Arc::new(MemoryIdentityStore::new()))
            .policy(Arc::new(ExponentPolicy::Short))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn file_lock_is_exclusive() {
        let lock = FileLock::new();
        let guard = lock.acquire().await;
        assert!(lock.is_locked());
        drop(guard);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn publish_replaces_identity() {
        let ctx = ctx();
        assert!(ctx.state.identity().is_none());

        let keys = sample_bundle(ExponentPolicy::Short);
        let info = RouterInfo::build(&keys, vec![], Default::default(), 1).unwrap();
        let published = ctx.state.publish_identity(RouterIdentity { info, keys });
        assert_eq!(
            ctx.state.identity().unwrap().router_hash(),
            published.router_hash()
        );
    }

    #[tokio::test]
    async fn wait_until_booted_sees_ready_and_failed() {
        let ctx = ctx();
        let waiter = {
            let ctx = ctx.clone();
            tokio::spawn(async move { ctx.state.wait_until_booted().await })
        };
        ctx.state.set_boot_status(BootStatus::LoadingIdentity { attempt: 1 });
        ctx.state.set_boot_status(BootStatus::Ready { router_hash: "abcd".into() });
        assert_eq!(waiter.await.unwrap().unwrap(), "abcd");

        ctx.state.set_boot_status(BootStatus::Failed("no keys".into()));
        let err = ctx.state.wait_until_booted().await.unwrap_err();
        assert!(err.to_string().contains("no keys"));
    }
}
