//! CRI-specific error conversions.

use contivshim_core::ShimError;
use tonic::Status;

/// Convert a ShimError to a gRPC Status.
pub fn shim_error_to_status(err: ShimError) -> Status {
    match err {
        // Upstream statuses pass through untouched
        ShimError::GrpcError(status) => status,
        ShimError::NotFound(msg) => Status::not_found(msg),
        ShimError::InvalidArgument(msg) => Status::invalid_argument(msg),
        ShimError::CoordinationError { endpoints, message } => {
            Status::unavailable(format!("coordination store {}: {}", endpoints, message))
        }
        ShimError::DeadlineExceeded(msg) => Status::deadline_exceeded(msg),
        ShimError::Cancelled(msg) => Status::cancelled(msg),
        ShimError::NotImplemented(msg) => Status::unimplemented(msg),
        ShimError::ConfigError(msg) => Status::invalid_argument(msg),
        ShimError::Exited(e) => Status::unknown(e.to_string()),
        other => Status::internal(other.to_string()),
    }
}

/// Log a delegate failure for `method` and convert it for the caller.
pub fn delegate_failure(method: &str, err: ShimError) -> Status {
    tracing::error!(method, error = %err, "{} from runtime delegate failed", method);
    shim_error_to_status(err)
}

/// Log a rejected `method` request and build its `InvalidArgument` status.
pub fn invalid_request(method: &str, reason: &str) -> Status {
    tracing::warn!(method, reason, "{} request rejected", method);
    shim_error_to_status(ShimError::InvalidArgument(reason.to_string()))
}
