use thiserror::Error;

use crate::exec::ExitError;

/// Shim error types
#[derive(Error, Debug)]
pub enum ShimError {
    /// Sandbox, container or image does not exist in the delegate
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed or incomplete request
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Delegate runtime failure
    #[error("Runtime error: {0}")]
    RuntimeError(String),

    /// Coordination store dial or write failure
    #[error("Coordination store error: {endpoints} - {message}")]
    CoordinationError { endpoints: String, message: String },

    /// Command ran inside the container but exited non-zero
    #[error(transparent)]
    Exited(#[from] ExitError),

    /// Call deadline elapsed at a suspension point
    #[error("Deadline exceeded: {0}")]
    DeadlineExceeded(String),

    /// Call was cancelled (shutdown or caller went away)
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Capability deliberately not provided by the shim
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// Status returned by an upstream gRPC peer
    #[error("gRPC error: {0}")]
    GrpcError(#[from] tonic::Status),

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<serde_yaml::Error> for ShimError {
    fn from(err: serde_yaml::Error) -> Self {
        ShimError::SerializationError(err.to_string())
    }
}

/// Result type alias for shim operations
pub type Result<T> = std::result::Result<T, ShimError>;
