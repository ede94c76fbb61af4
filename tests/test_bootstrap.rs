//! Boot scenarios driven through the real job queue.
//!
//! The store is in memory and the key generator is a recording fake with
//! random encryption material, so every scenario runs in milliseconds. One
//! test at the end runs the full filesystem + ElGamal stack.

use std::{
    collections::BTreeMap,
    io::Write,
    path::Path,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use ed25519_dalek::SigningKey;
use rand_core::{OsRng, RngCore};
use tempfile::TempDir;

use router_bootstrap::{
    config::Config,
    error::AppError,
    identity::{
        keygen::KeyGenerator,
        keys::{
            EncryptionPrivateKey, EncryptionPublicKey, KeyBundle, SigningPrivateKey,
            ENCRYPTION_KEY_LEN,
        },
        policy::ExponentPolicy,
        record::{decode_record, RouterInfo},
        store::{classify, ArtifactKind, FsIdentityStore, IdentityStore, MemoryIdentityStore, PresenceState},
    },
    jobs::{load_identity::load_pass, JobQueue, LoadIdentityJob, Outcome},
    router::{BootStatus, RouterContext},
};

// ── fixtures ─────────────────────────────────────────────────────────────────

fn bundle(policy: ExponentPolicy) -> KeyBundle {
    let mut enc_priv = [0u8; ENCRYPTION_KEY_LEN];
    OsRng.fill_bytes(&mut enc_priv);
    match policy {
        ExponentPolicy::Long => enc_priv[0] |= 0x40,
        ExponentPolicy::Short => enc_priv[..8].fill(0),
    }
    let mut enc_pub = [0u8; ENCRYPTION_KEY_LEN];
    OsRng.fill_bytes(&mut enc_pub);
    let signing = SigningKey::generate(&mut OsRng);
    KeyBundle {
        encryption_private: EncryptionPrivateKey::from_bytes(enc_priv),
        signing_private: SigningPrivateKey::from_bytes(signing.to_bytes()),
        encryption_public: EncryptionPublicKey::from_bytes(enc_pub),
        signing_public: signing.verifying_key().into(),
    }
}

fn write_identity(store: &MemoryIdentityStore, keys: &KeyBundle) -> RouterInfo {
    let info = RouterInfo::build(keys, vec![], BTreeMap::new(), 1).unwrap();
    store.put(ArtifactKind::Info, info.to_bytes().unwrap());
    store.put(ArtifactKind::Keys, keys.to_bytes());
    info
}

/// Records every call and what the store looked like at that moment.
struct RecordingKeyGen {
    store: Arc<MemoryIdentityStore>,
    calls: AtomicU32,
    presence_at_call: Mutex<Vec<PresenceState>>,
    /// Ignore the requested policy and produce this one instead.
    force_policy: Option<ExponentPolicy>,
    fail: bool,
}

impl RecordingKeyGen {
    fn new(store: Arc<MemoryIdentityStore>) -> Self {
        Self {
            store,
            calls: AtomicU32::new(0),
            presence_at_call: Mutex::new(Vec::new()),
            force_policy: None,
            fail: false,
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl KeyGenerator for RecordingKeyGen {
    fn generate(&self, policy: ExponentPolicy) -> Result<KeyBundle, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.presence_at_call.lock().unwrap().push(classify(&*self.store));
        if self.fail {
            return Err(AppError::Identity("entropy source unavailable".into()));
        }
        Ok(bundle(self.force_policy.unwrap_or(policy)))
    }
}

fn router_with(
    store: Arc<MemoryIdentityStore>,
    policy: ExponentPolicy,
    keygen: Arc<RecordingKeyGen>,
) -> Arc<RouterContext> {
    let mut config = Config::with_router_dir(Path::new("/nonexistent"));
    config.identity.max_attempts = 3;
    config.identity.rebuild_timeout = Duration::from_secs(10);
    RouterContext::builder(config)
        .store(store)
        .policy(Arc::new(policy))
        .key_generator(keygen)
        .build()
        .unwrap()
}

async fn boot(router: &Arc<RouterContext>) -> Result<String, AppError> {
    let (queue, _dispatcher) = JobQueue::start(router.clone());
    queue.enqueue(Box::new(LoadIdentityJob::new())).unwrap();
    let res = tokio::time::timeout(Duration::from_secs(30), router.state.wait_until_booted())
        .await
        .expect("boot did not finish");
    router.shutdown.cancel();
    res
}

/// Captures formatted log output on the current thread.
#[derive(Clone, Default)]
struct LogBuf(Arc<Mutex<Vec<u8>>>);

impl Write for LogBuf {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogBuf {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }
}

async fn pass_with_logs(store: &MemoryIdentityStore, policy: ExponentPolicy) -> (Outcome, String) {
    let logs = LogBuf::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(move || writer.clone())
        .with_ansi(false)
        .finish();
    let _default = tracing::subscriber::set_default(subscriber);

    let lock = router_bootstrap::router::FileLock::new();
    let guard = lock.acquire().await;
    let outcome = load_pass(store, &policy, &guard);
    (outcome, logs.contents())
}

// ── scenarios ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn valid_identity_publishes_without_rebuild() {
    let store = Arc::new(MemoryIdentityStore::new());
    let keys = bundle(ExponentPolicy::Short);
    let info = write_identity(&store, &keys);
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 0);
    let published = router.state.identity().unwrap();
    assert_eq!(published.keys, keys);
    assert_eq!(published.info, info);
    assert_eq!(store.get(ArtifactKind::Keys).unwrap(), keys.to_bytes());
    assert!(matches!(router.state.boot_status(), BootStatus::Ready { .. }));
}

#[tokio::test]
async fn scenario_a_nothing_on_disk() {
    let store = Arc::new(MemoryIdentityStore::new());
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    let hash = boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    assert_eq!(classify(&*store), PresenceState::BothPresent);
    let published = router.state.identity().unwrap();
    assert_eq!(published.router_hash(), hash);
    assert_eq!(store.get(ArtifactKind::Keys).unwrap(), published.keys.to_bytes());
}

#[tokio::test]
async fn scenario_b_info_without_keys_is_absent() {
    let store = Arc::new(MemoryIdentityStore::new());
    let orphan = RouterInfo::build(&bundle(ExponentPolicy::Short), vec![], BTreeMap::new(), 1).unwrap();
    store.put(ArtifactKind::Info, orphan.to_bytes().unwrap());
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    assert_eq!(*keygen.presence_at_call.lock().unwrap(), vec![PresenceState::Absent]);
    let stored = decode_record(&store.get(ArtifactKind::Info).unwrap()).unwrap();
    assert_ne!(stored, orphan);
    assert!(router.state.identity().unwrap().info.matches_bundle(&router.state.identity().unwrap().keys));
}

#[tokio::test]
async fn keys_without_info_rebuilds() {
    let store = Arc::new(MemoryIdentityStore::new());
    let old = bundle(ExponentPolicy::Short);
    store.put(ArtifactKind::Keys, old.to_bytes());
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    assert_ne!(router.state.identity().unwrap().keys, old);
}

#[tokio::test]
async fn bad_signature_wipes_before_rebuild() {
    let store = Arc::new(MemoryIdentityStore::new());
    let keys = bundle(ExponentPolicy::Short);
    let mut info = RouterInfo::build(&keys, vec![], BTreeMap::new(), 1).unwrap();
    info.body.options.insert("forged".into(), "yes".into());
    store.put(ArtifactKind::Info, info.to_bytes().unwrap());
    store.put(ArtifactKind::Keys, keys.to_bytes());
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    boot(&router).await.unwrap();

    assert_eq!(*keygen.presence_at_call.lock().unwrap(), vec![PresenceState::Absent]);
    assert_ne!(router.state.identity().unwrap().keys, keys);
}

#[tokio::test]
async fn scenario_c_short_key_under_long_policy() {
    let store = MemoryIdentityStore::new();
    write_identity(&store, &bundle(ExponentPolicy::Short));

    let (outcome, logs) = pass_with_logs(&store, ExponentPolicy::Long).await;

    assert!(matches!(outcome, Outcome::StalePolicy { current: ExponentPolicy::Long, .. }));
    assert!(logs.contains("WARN"));
    assert!(logs.contains("Rebuilding router info with longer key"));
    assert_eq!(classify(&store), PresenceState::Absent);
}

#[tokio::test]
async fn scenario_c_boot_ends_with_long_key() {
    let store = Arc::new(MemoryIdentityStore::new());
    write_identity(&store, &bundle(ExponentPolicy::Short));
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Long, keygen.clone());

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    let published = router.state.identity().unwrap();
    assert!(published.keys.encryption_private.has_long_exponent());
}

#[tokio::test]
async fn scenario_d_long_key_under_short_policy() {
    let store = MemoryIdentityStore::new();
    write_identity(&store, &bundle(ExponentPolicy::Long));

    let (outcome, logs) = pass_with_logs(&store, ExponentPolicy::Short).await;

    assert!(matches!(
        outcome,
        Outcome::StalePolicy { stored: ExponentPolicy::Long, current: ExponentPolicy::Short }
    ));
    assert!(logs.contains("Rebuilding router info with faster key"));
    assert_eq!(classify(&store), PresenceState::Absent);
}

#[tokio::test]
async fn scenario_e_third_key_malformed() {
    let store = Arc::new(MemoryIdentityStore::new());
    let keys = bundle(ExponentPolicy::Short);
    write_identity(&store, &keys);
    // Keep the first two keys, cut the third short.
    let mut bytes = keys.to_bytes();
    bytes.truncate(ENCRYPTION_KEY_LEN + 32 + 100);
    store.put(ArtifactKind::Keys, bytes);

    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());
    let mut status = router.state.subscribe_boot();

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    assert_eq!(*keygen.presence_at_call.lock().unwrap(), vec![PresenceState::Absent]);
    let published = router.state.identity().unwrap();
    assert_ne!(published.keys, keys);
    assert_eq!(store.get(ArtifactKind::Keys).unwrap(), published.keys.to_bytes());
    assert!(matches!(&*status.borrow_and_update(), BootStatus::Ready { .. }));
}

#[tokio::test]
async fn retry_budget_is_enforced() {
    let store = Arc::new(MemoryIdentityStore::new());
    let mut keygen = RecordingKeyGen::new(store.clone());
    // Every rebuild produces a key the policy rejects.
    keygen.force_policy = Some(ExponentPolicy::Long);
    let keygen = Arc::new(keygen);
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    let err = boot(&router).await.unwrap_err();

    assert!(err.to_string().contains("after 3 rebuilds"), "{err}");
    assert_eq!(keygen.calls(), 3);
    assert!(router.state.identity().is_none());
    assert!(matches!(router.state.boot_status(), BootStatus::Failed(_)));
}

#[tokio::test]
async fn first_run_boots_with_smallest_budget() {
    let store = Arc::new(MemoryIdentityStore::new());
    let keygen = Arc::new(RecordingKeyGen::new(store.clone()));
    let mut config = Config::with_router_dir(Path::new("/nonexistent"));
    config.identity.max_attempts = 1;
    let router = RouterContext::builder(config)
        .store(store.clone())
        .policy(Arc::new(ExponentPolicy::Short))
        .key_generator(keygen.clone())
        .build()
        .unwrap();

    boot(&router).await.unwrap();

    assert_eq!(keygen.calls(), 1);
    assert_eq!(classify(&*store), PresenceState::BothPresent);
    assert!(router.state.identity().is_some());
}

#[tokio::test]
async fn failed_rebuild_is_fatal() {
    let store = Arc::new(MemoryIdentityStore::new());
    let mut keygen = RecordingKeyGen::new(store.clone());
    keygen.fail = true;
    let keygen = Arc::new(keygen);
    let router = router_with(store.clone(), ExponentPolicy::Short, keygen.clone());

    let err = boot(&router).await.unwrap_err();

    assert!(err.to_string().contains("rebuild failed"), "{err}");
    assert!(err.to_string().contains("entropy source unavailable"));
    assert_eq!(keygen.calls(), 1);
    assert!(router.state.identity().is_none());
}

#[tokio::test]
async fn classify_twice_is_stable() {
    let store = MemoryIdentityStore::new();
    store.put(ArtifactKind::Keys, vec![1, 2, 3]);
    assert_eq!(classify(&store), classify(&store));
    assert_eq!(classify(&store), PresenceState::KeysOnly);
}

#[tokio::test]
async fn filesystem_boot_then_reload() {
    let tmp = TempDir::new().unwrap();
    let mut config = Config::with_router_dir(tmp.path());
    config.identity.exponent_policy = router_bootstrap::identity::policy::PolicySetting::Short;

    // First boot generates real ElGamal keys and writes both files.
    let router = RouterContext::builder(config.clone()).build().unwrap();
    let first = boot(&router).await.unwrap();
    let store = FsIdentityStore::from_config(&config);
    assert!(store.exists(ArtifactKind::Info));
    assert!(store.exists(ArtifactKind::Keys));
    assert_eq!(
        std::fs::metadata(config.keys_path()).unwrap().len(),
        router_bootstrap::identity::keys::bundle_len() as u64
    );

    // Second boot loads the same identity back without rebuilding.
    let router = RouterContext::builder(config).build().unwrap();
    let second = boot(&router).await.unwrap();
    assert_eq!(first, second);
}
