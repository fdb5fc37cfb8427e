//! Per-call context threaded through every suspension point of an RPC.
//!
//! A `CallContext` carries the caller's deadline (from the `grpc-timeout`
//! header) and a cancellation token derived from the server's shutdown
//! token. Delegate calls run under the caller deadline; coordination store
//! dials and writes run under the tighter of their own bound and the caller
//! deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, ShimError};

/// Request metadata key carrying the caller's deadline.
pub const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

/// Deadline and cancellation for a single call.
#[derive(Debug, Clone)]
pub struct CallContext {
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl CallContext {
    /// Create a context with an explicit deadline and cancellation token.
    pub fn new(deadline: Option<Instant>, cancel: CancellationToken) -> Self {
        Self { deadline, cancel }
    }

    /// Context with no deadline and its own, never-cancelled token.
    pub fn background() -> Self {
        Self::new(None, CancellationToken::new())
    }

    /// Context expiring `timeout` from now.
    pub fn with_timeout(timeout: Duration, cancel: CancellationToken) -> Self {
        Self::new(Some(Instant::now() + timeout), cancel)
    }

    /// Build the context for an inbound request.
    ///
    /// The token is a child of `parent`, so cancelling the server's token
    /// cancels every in-flight call without affecting the server itself.
    pub fn from_metadata(metadata: &tonic::metadata::MetadataMap, parent: &CancellationToken) -> Self {
        let deadline = metadata
            .get(GRPC_TIMEOUT_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_grpc_timeout)
            .map(|timeout| Instant::now() + timeout);
        Self::new(deadline, parent.child_token())
    }

    /// The caller's deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline. `None` when the call is unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Run `fut` under the caller deadline and cancellation.
    pub async fn run<T, F>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.run_until(self.deadline, what, fut).await
    }

    /// Run `fut` bounded by `limit`, or by the caller deadline if sooner.
    pub async fn bounded<T, F>(&self, limit: Duration, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let own = Instant::now() + limit;
        let deadline = match self.deadline {
            Some(caller) if caller < own => caller,
            _ => own,
        };
        self.run_until(Some(deadline), what, fut).await
    }

    async fn run_until<T, F>(&self, deadline: Option<Instant>, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timed = async {
            match deadline {
                Some(d) => match tokio::time::timeout_at(d, fut).await {
                    Ok(res) => res,
                    Err(_) => Err(ShimError::DeadlineExceeded(what.to_string())),
                },
                None => fut.await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(ShimError::Cancelled(what.to_string())),
            res = timed => res,
        }
    }
}

/// Parse a `grpc-timeout` header value (`<up to 8 digits><unit>`).
pub fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || !value.is_ascii() {
        return None;
    }

    let (digits, unit) = value.split_at(value.len() - 1);
    if digits.len() > 8 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let amount: u64 = digits.parse().ok()?;

    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}
