//! Identity store: the two persisted identity artifacts.
//!
//! Layout under `router_dir` (file names configurable):
//! ```text
//! ~/.router/
//! ├── router.info   (signed router info, JSON, mode 0644)
//! └── router.keys   (576-byte key bundle, mode 0600)
//! ```
//!
//! Callers must hold the router's [`FileLock`](crate::router::FileLock) for
//! every call. The store makes no promise about the pair as a whole.

use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, BufReader, Cursor, Read, Write},
    path::{Path, PathBuf},
    sync::Mutex,
};

use tracing::{debug, error};

use crate::{config::Config, error::IdentityError};

/// Which of the two files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Info,
    Keys,
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactKind::Info => f.write_str("router info"),
            ArtifactKind::Keys => f.write_str("router keys"),
        }
    }
}

/// What is on disk right now. Recomputed on every load attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Absent,
    KeysOnly,
    /// Info without keys. Loads exactly like `Absent`.
    InfoOnly,
    BothPresent,
}

impl PresenceState {
    pub fn is_loadable(self) -> bool {
        matches!(self, PresenceState::BothPresent)
    }
}

/// Byte-level access to the identity artifacts.
pub trait IdentityStore: Send + Sync {
    fn exists(&self, kind: ArtifactKind) -> bool;

    /// Fails with [`IdentityError::NotFound`] when the file is missing.
    fn open_read(&self, kind: ArtifactKind) -> Result<Box<dyn Read + Send>, IdentityError>;

    fn write(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), IdentityError>;

    /// Best effort. Failures are logged, never returned.
    fn delete(&self, kind: ArtifactKind);

    /// Human-readable location, for logs.
    fn describe(&self, kind: ArtifactKind) -> String;
}

/// Classify the store. Pure read; calling it twice without a write in
/// between gives the same answer.
pub fn classify(store: &dyn IdentityStore) -> PresenceState {
    match (store.exists(ArtifactKind::Info), store.exists(ArtifactKind::Keys)) {
        (true, true) => PresenceState::BothPresent,
        (false, true) => PresenceState::KeysOnly,
        (true, false) => PresenceState::InfoOnly,
        (false, false) => PresenceState::Absent,
    }
}

/// Delete both artifacts regardless of which exist.
pub fn delete_both(store: &dyn IdentityStore) {
    store.delete(ArtifactKind::Info);
    store.delete(ArtifactKind::Keys);
}

// ── filesystem store ─────────────────────────────────────────────────────────

pub struct FsIdentityStore {
    info_path: PathBuf,
    keys_path: PathBuf,
}

impl FsIdentityStore {
    /// Files named by `config`, under its router directory.
    pub fn from_config(config: &Config) -> Self {
        Self { info_path: config.info_path(), keys_path: config.keys_path() }
    }

    pub fn path(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Info => &self.info_path,
            ArtifactKind::Keys => &self.keys_path,
        }
    }
}

impl IdentityStore for FsIdentityStore {
    fn exists(&self, kind: ArtifactKind) -> bool {
        self.path(kind).is_file()
    }

    fn open_read(&self, kind: ArtifactKind) -> Result<Box<dyn Read + Send>, IdentityError> {
        let file = fs::File::open(self.path(kind)).map_err(|e| IdentityError::from_io(kind, e))?;
        Ok(Box::new(BufReader::new(file)))
    }

    /// Write to a sibling temp file, then rename over the target. The temp
    /// file never outlives a failed write.
    fn write(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), IdentityError> {
        let path = self.path(kind);
        let io_err = |e: io::Error| IdentityError::Io(format!("cannot write {}: {e}", path.display()));

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = temp_path(path);

        if let Err(e) = write_private(&tmp, bytes, kind).and_then(|()| fs::rename(&tmp, path)) {
            if let Err(cleanup) = fs::remove_file(&tmp) {
                if cleanup.kind() != io::ErrorKind::NotFound {
                    error!(path = %tmp.display(), error = %cleanup, "failed to remove temp file");
                }
            }
            return Err(io_err(e));
        }
        debug!(path = %path.display(), len = bytes.len(), "wrote {kind}");
        Ok(())
    }

    fn delete(&self, kind: ArtifactKind) {
        let path = self.path(kind);
        match fs::remove_file(path) {
            Ok(()) => debug!(path = %path.display(), "deleted {kind}"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(path = %path.display(), error = %e, "failed to delete {kind}"),
        }
    }

    fn describe(&self, kind: ArtifactKind) -> String {
        self.path(kind).display().to_string()
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    PathBuf::from(tmp)
}

/// Create (or truncate) `path` with the artifact's final mode before any
/// bytes land in it, then write and sync.
fn write_private(path: &Path, bytes: &[u8], kind: ArtifactKind) -> io::Result<()> {
    let mut opts = fs::OpenOptions::new();
    opts.write(true).create(true).truncate(true);

    #[cfg(unix)]
    let mode = match kind {
        ArtifactKind::Keys => 0o600,
        ArtifactKind::Info => 0o644,
    };
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        opts.mode(mode);
    }
    #[cfg(not(unix))]
    let _ = kind;

    let mut file = opts.open(path)?;

    // A leftover temp file keeps its old mode; reset it before writing.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(fs::Permissions::from_mode(mode))?;
    }

    file.write_all(bytes)?;
    file.sync_all()
}

// ── in-memory store ──────────────────────────────────────────────────────────

/// Store held in memory. Deletes can be made to fail to exercise the
/// leftover-file path.
#[derive(Default)]
pub struct MemoryIdentityStore {
    files: Mutex<HashMap<ArtifactKind, Vec<u8>>>,
    fail_deletes: Mutex<bool>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<Vec<u8>> {
        self.lock_files().get(&kind).cloned()
    }

    pub fn put(&self, kind: ArtifactKind, bytes: Vec<u8>) {
        self.lock_files().insert(kind, bytes);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        *self.fail_deletes.lock().unwrap_or_else(|p| p.into_inner()) = fail;
    }

    fn lock_files(&self) -> std::sync::MutexGuard<'_, HashMap<ArtifactKind, Vec<u8>>> {
        self.files.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl IdentityStore for MemoryIdentityStore {
    fn exists(&self, kind: ArtifactKind) -> bool {
        self.lock_files().contains_key(&kind)
    }

    fn open_read(&self, kind: ArtifactKind) -> Result<Box<dyn Read + Send>, IdentityError> {
        self.get(kind)
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn Read + Send>)
            .ok_or(IdentityError::NotFound(kind))
    }

    fn write(&self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), IdentityError> {
        self.put(kind, bytes.to_vec());
        Ok(())
    }

    fn delete(&self, kind: ArtifactKind) {
        if *self.fail_deletes.lock().unwrap_or_else(|p| p.into_inner()) {
            error!("failed to delete {kind}: store refused");
            return;
        }
        self.lock_files().remove(&kind);
    }

    fn describe(&self, kind: ArtifactKind) -> String {
        format!("memory:{kind}")
    }
}
