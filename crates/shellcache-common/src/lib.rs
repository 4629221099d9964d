//! # Shellcache Common
//!
//! Logging configuration shared by the shellcache crates.
//!
//! The policy crates only emit `tracing` events; whoever hosts the worker
//! decides how they are rendered by installing a subscriber through
//! [`init_logging`] or [`try_init_logging`].

pub mod logging;

pub use logging::{init_logging, try_init_logging, LogConfig, LogFormat};
