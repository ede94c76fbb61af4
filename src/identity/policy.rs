//! Exponent-length policy for encryption private keys.
//!
//! Long exponents fill the whole 2048-bit range; short ones leave the
//! high-order bytes zero. The stored key must match the current policy or
//! the identity is rebuilt.

use std::fmt;

use serde::Deserialize;

use crate::system::SystemVersion;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExponentPolicy {
    Short,
    Long,
}

impl ExponentPolicy {
    pub fn is_long(self) -> bool {
        matches!(self, ExponentPolicy::Long)
    }
}

impl fmt::Display for ExponentPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExponentPolicy::Short => write!(f, "short"),
            ExponentPolicy::Long => write!(f, "long"),
        }
    }
}

/// `exponent_policy` as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolicySetting {
    #[default]
    Auto,
    Long,
    Short,
}

/// Source of the current exponent policy. Must be side-effect free.
pub trait PolicyProvider: Send + Sync {
    fn current_exponent_policy(&self) -> ExponentPolicy;
}

/// Policy resolved once from config and platform facts.
#[derive(Debug, Clone)]
pub struct ConfiguredPolicy {
    policy: ExponentPolicy,
}

impl ConfiguredPolicy {
    pub fn new(setting: PolicySetting, system: &SystemVersion) -> Self {
        let policy = match setting {
            PolicySetting::Long => ExponentPolicy::Long,
            PolicySetting::Short => ExponentPolicy::Short,
            PolicySetting::Auto if system.is_slow() => ExponentPolicy::Short,
            PolicySetting::Auto => ExponentPolicy::Long,
        };
        Self { policy }
    }
}

impl PolicyProvider for ConfiguredPolicy {
    fn current_exponent_policy(&self) -> ExponentPolicy {
        self.policy
    }
}

/// Fixed policy, for tests and embedders that decide up front.
impl PolicyProvider for ExponentPolicy {
    fn current_exponent_policy(&self) -> ExponentPolicy {
        *self
    }
}
