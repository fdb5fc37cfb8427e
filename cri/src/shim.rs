//! The shim adapter value served by both CRI services.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tonic::Request;

use contivshim_core::CallContext;

use crate::coordination::{CoordinationClient, CoordinationRecord};
use crate::delegate::{ImageDelegate, RuntimeDelegate};

/// CRI shim adapter.
///
/// Holds only shared handles to its collaborators, so one value serves
/// both the RuntimeService and the ImageService concurrently.
pub struct Shim {
    pub(crate) runtime: Arc<dyn RuntimeDelegate>,
    pub(crate) images: Arc<dyn ImageDelegate>,
    pub(crate) coordinator: Arc<dyn CoordinationClient>,
    pub(crate) record: CoordinationRecord,
    shutdown: CancellationToken,
}

impl Shim {
    /// Create a shim over the given delegates and coordination store.
    pub fn new(
        runtime: Arc<dyn RuntimeDelegate>,
        images: Arc<dyn ImageDelegate>,
        coordinator: Arc<dyn CoordinationClient>,
        record: CoordinationRecord,
    ) -> Self {
        Self {
            runtime,
            images,
            coordinator,
            record,
            shutdown: CancellationToken::new(),
        }
    }

    /// Cancel in-flight calls when `token` is cancelled.
    pub fn with_shutdown(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Build the call context for an inbound request.
    pub(crate) fn context<T>(&self, request: &Request<T>) -> CallContext {
        CallContext::from_metadata(request.metadata(), &self.shutdown)
    }
}
