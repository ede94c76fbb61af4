//! Router identity bootstrap.
//!
//! Loads and validates the router's persisted identity at startup, wipes and
//! rebuilds it when it is missing, corrupt or built under a different
//! exponent policy, then hands off to the next boot stage through the job
//! queue. The binary entry point is `src/main.rs`.

pub mod config;
pub mod error;
pub mod identity;
pub mod jobs;
pub mod logger;
pub mod router;
pub mod system;
