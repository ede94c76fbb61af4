//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` (or an explicit path) relative to the current
//! working directory, then applies `ROUTER_DIR` and `ROUTER_LOG_LEVEL`.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;

use crate::{
    error::AppError,
    identity::{policy::PolicySetting, record::RouterAddress},
    logger,
};

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const DEFAULT_INFO_FILENAME: &str = "router.info";
pub const DEFAULT_KEYS_FILENAME: &str = "router.keys";

/// Identity files and bootstrap behaviour.
#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub info_filename: String,
    pub keys_filename: String,
    pub exponent_policy: PolicySetting,
    /// Rebuilds allowed before boot is declared failed.
    pub max_attempts: u32,
    /// Upper bound on one rebuild run.
    pub rebuild_timeout: Duration,
    /// `None` disables periodic republication.
    pub refresh_interval: Option<Duration>,
    /// Addresses written into a freshly built router info.
    pub addresses: Vec<RouterAddress>,
}

#[derive(Debug, Clone)]
pub struct JobsConfig {
    pub queue_capacity: usize,
}

/// Fully-resolved router configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub router_name: String,
    /// Directory for the identity files (already expanded, no `~`).
    pub router_dir: PathBuf,
    pub log_level: String,
    pub identity: IdentityConfig,
    pub jobs: JobsConfig,
}

impl Config {
    /// Built-in defaults rooted at `router_dir`.
    pub fn with_router_dir(router_dir: &Path) -> Self {
        let identity = RawIdentity::default();
        Self {
            router_name: default_router_name(),
            router_dir: router_dir.to_path_buf(),
            log_level: default_log_level(),
            identity: IdentityConfig {
                info_filename: identity.info_filename,
                keys_filename: identity.keys_filename,
                exponent_policy: identity.exponent_policy,
                max_attempts: identity.max_attempts,
                rebuild_timeout: Duration::from_secs(identity.rebuild_timeout_secs),
                refresh_interval: None,
                addresses: Vec::new(),
            },
            jobs: JobsConfig { queue_capacity: default_queue_capacity() },
        }
    }

    pub fn info_path(&self) -> PathBuf {
        self.router_dir.join(&self.identity.info_filename)
    }

    pub fn keys_path(&self) -> PathBuf {
        self.router_dir.join(&self.identity.keys_filename)
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize)]
struct RawConfig {
    router: RawRouter,
    #[serde(default)]
    identity: RawIdentity,
    #[serde(default)]
    jobs: RawJobs,
}

#[derive(Deserialize)]
struct RawRouter {
    #[serde(default = "default_router_name")]
    name: String,
    router_dir: String,
    #[serde(default = "default_log_level")]
    log_level: String,
}

#[derive(Deserialize)]
struct RawIdentity {
    #[serde(default = "default_info_filename")]
    info_filename: String,
    #[serde(default = "default_keys_filename")]
    keys_filename: String,
    #[serde(default)]
    exponent_policy: PolicySetting,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
    #[serde(default = "default_rebuild_timeout_secs")]
    rebuild_timeout_secs: u64,
    /// `0` disables.
    #[serde(default)]
    refresh_interval_secs: u64,
    #[serde(default)]
    addresses: Vec<RouterAddress>,
}

impl Default for RawIdentity {
    fn default() -> Self {
        Self {
            info_filename: default_info_filename(),
            keys_filename: default_keys_filename(),
            exponent_policy: PolicySetting::default(),
            max_attempts: default_max_attempts(),
            rebuild_timeout_secs: default_rebuild_timeout_secs(),
            refresh_interval_secs: 0,
            addresses: Vec::new(),
        }
    }
}

#[derive(Deserialize)]
struct RawJobs {
    #[serde(default = "default_queue_capacity")]
    queue_capacity: usize,
}

impl Default for RawJobs {
    fn default() -> Self {
        Self { queue_capacity: default_queue_capacity() }
    }
}

fn default_router_name() -> String { "router".to_string() }
fn default_log_level() -> String { "info".to_string() }
fn default_info_filename() -> String { DEFAULT_INFO_FILENAME.to_string() }
fn default_keys_filename() -> String { DEFAULT_KEYS_FILENAME.to_string() }
fn default_max_attempts() -> u32 { 5 }
fn default_rebuild_timeout_secs() -> u64 { 120 }
fn default_queue_capacity() -> usize { 256 }

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let router_dir_override = env::var("ROUTER_DIR").ok();
    let log_level_override = env::var("ROUTER_LOG_LEVEL").ok();
    load_from(
        path.unwrap_or(Path::new(DEFAULT_CONFIG_PATH)),
        router_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Loader that accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    router_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let r = parsed.router;
    let id = parsed.identity;

    let router_dir = expand_home(router_dir_override.unwrap_or(&r.router_dir));
    let log_level = log_level_override.unwrap_or(&r.log_level).to_string();

    let config = Config {
        router_name: r.name,
        router_dir,
        log_level,
        identity: IdentityConfig {
            info_filename: id.info_filename,
            keys_filename: id.keys_filename,
            exponent_policy: id.exponent_policy,
            max_attempts: id.max_attempts,
            rebuild_timeout: Duration::from_secs(id.rebuild_timeout_secs),
            refresh_interval: (id.refresh_interval_secs > 0)
                .then(|| Duration::from_secs(id.refresh_interval_secs)),
            addresses: id.addresses,
        },
        jobs: JobsConfig { queue_capacity: parsed.jobs.queue_capacity },
    };
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), AppError> {
    if !config.log_level.contains('=') && !config.log_level.contains(',') {
        logger::parse_level(&config.log_level)
            .map_err(|e| AppError::Config(format!("router.log_level: {e}")))?;
    }
    let id = &config.identity;
    if id.info_filename.is_empty() || id.keys_filename.is_empty() {
        return Err(AppError::Config("identity file names must not be empty".into()));
    }
    if id.info_filename == id.keys_filename {
        return Err(AppError::Config(format!(
            "info_filename and keys_filename are both '{}'",
            id.info_filename
        )));
    }
    if id.max_attempts == 0 {
        return Err(AppError::Config("identity.max_attempts must be > 0".into()));
    }
    if id.rebuild_timeout.is_zero() {
        return Err(AppError::Config("identity.rebuild_timeout_secs must be > 0".into()));
    }
    if config.jobs.queue_capacity == 0 {
        return Err(AppError::Config("jobs.queue_capacity must be > 0".into()));
    }
    Ok(())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
