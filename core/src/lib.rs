//! contivshim core - shared types for the CRI shim.
//!
//! Errors, configuration, exec result types and the per-call context
//! used by the shim adapter and its delegates.

pub mod config;
pub mod context;
pub mod error;
pub mod exec;

// Re-export commonly used types
pub use config::{CoordinationConfig, LogFormat, LogLevel, ShimConfig, UpstreamConfig};
pub use context::CallContext;
pub use error::{Result, ShimError};
pub use exec::{ExecOutput, ExitError};

/// contivshim version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
