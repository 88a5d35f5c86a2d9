#![forbid(unsafe_code)]

//! Shared types for the duskrelay workspace: opaque identifiers, the
//! crate-wide error type, TOML configuration loading, and a `tracing`
//! init helper used by the daemon binary.

pub mod config;
pub mod error;
pub mod ids;
pub mod logging;
pub mod time;

pub use config::DaemonConfig;
pub use error::{Error, Result};
pub use ids::{PathId, RouterId};
