//! Application-wide error types.
//!
//! [`AppError`] is what surfaces to `main`. [`IdentityError`] is the load-path
//! taxonomy for the identity files; the bootstrap job recovers every variant
//! locally by wiping and rebuilding.

use thiserror::Error;

use crate::identity::{store::ArtifactKind, policy::ExponentPolicy};

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("identity error: {0}")]
    Identity(String),

    #[error("logger error: {0}")]
    Logger(String),

    #[error("scheduler error: {0}")]
    Scheduler(String),

    #[error("bootstrap failed: {0}")]
    Bootstrap(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a stored identity could not be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    #[error("{0} file not found")]
    NotFound(ArtifactKind),

    #[error("malformed data: {0}")]
    Format(String),

    #[error("router info has a bad signature")]
    SignatureInvalid,

    #[error("stored encryption key uses the {stored} exponent policy, router wants {current}")]
    PolicyMismatch {
        stored: ExponentPolicy,
        current: ExponentPolicy,
    },

    #[error("io fault: {0}")]
    Io(String),
}

impl IdentityError {
    /// Map an I/O error while reading `kind`. A short read is a format fault,
    /// not a transient one.
    pub fn from_io(kind: ArtifactKind, e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => IdentityError::NotFound(kind),
            std::io::ErrorKind::UnexpectedEof => {
                IdentityError::Format(format!("{kind} file truncated"))
            }
            _ => IdentityError::Io(format!("{kind}: {e}")),
        }
    }
}
