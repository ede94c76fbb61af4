//! Platform facts: what system the router is running on.
//!
//! Pure, read-only probes. The only consumer inside this crate is the
//! exponent policy, which picks long ElGamal exponents on hosts fast enough
//! to afford them.

use std::env;

/// Set by a service wrapper that supervises the router process.
const WRAPPER_ENV: &str = "ROUTER_WRAPPER_VERSION";

/// Snapshot of the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemVersion {
    pub os: &'static str,
    pub arch: &'static str,
    pub pointer_width: u32,
    pub wrapper_version: Option<String>,
}

impl SystemVersion {
    pub fn detect() -> Self {
        Self {
            os: env::consts::OS,
            arch: env::consts::ARCH,
            pointer_width: usize::BITS,
            wrapper_version: env::var(WRAPPER_ENV).ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn is_windows(&self) -> bool {
        self.os == "windows"
    }

    pub fn is_mac(&self) -> bool {
        self.os == "macos"
    }

    pub fn is_android(&self) -> bool {
        self.os == "android"
    }

    /// Pointer width of this build, not necessarily of the OS.
    pub fn is_64bit(&self) -> bool {
        self.pointer_width == 64
    }

    pub fn is_arm(&self) -> bool {
        self.arch.starts_with("arm") || self.arch == "aarch64"
    }

    pub fn has_wrapper(&self) -> bool {
        self.wrapper_version.is_some()
    }

    /// Hosts where 2048-bit exponentiation is too expensive to run on every
    /// key generation and tunnel build.
    pub fn is_slow(&self) -> bool {
        self.is_android() || !self.is_64bit() || (self.is_arm() && !self.is_mac())
    }
}
