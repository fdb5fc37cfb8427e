//! gRPC server setup for CRI services.
//!
//! Listens on a Unix domain socket for CRI RuntimeService and ImageService RPCs.

use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::net::UnixListener;
use tokio_stream::wrappers::UnixListenerStream;
use tonic::transport::Server;

use crate::cri_api::image_service_server::ImageServiceServer;
use crate::cri_api::runtime_service_server::RuntimeServiceServer;
use crate::shim::Shim;

/// Bind a listener at `socket_path`, replacing any stale socket file.
///
/// A missing file is fine; any other failure to remove it is returned
/// before binding is attempted.
pub fn bind_endpoint(socket_path: &Path) -> io::Result<UnixListener> {
    match std::fs::remove_file(socket_path) {
        Ok(()) => {
            tracing::debug!(socket = %socket_path.display(), "Removed stale socket");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    // Ensure parent directory exists
    if let Some(parent) = socket_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    UnixListener::bind(socket_path)
}

/// CRI gRPC server configuration.
pub struct CriServer {
    /// Path to the Unix domain socket.
    socket_path: PathBuf,
    /// Adapter serving both CRI services.
    shim: Arc<Shim>,
}

impl CriServer {
    /// Create a new CRI server.
    pub fn new(socket_path: PathBuf, shim: Shim) -> Self {
        Self {
            socket_path,
            shim: Arc::new(shim),
        }
    }

    /// Serve CRI RPCs until the process exits.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Serve CRI RPCs until `signal` resolves.
    ///
    /// The listener is released on every return path.
    pub async fn serve_with_shutdown<F>(
        self,
        signal: F,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
    where
        F: Future<Output = ()> + Send,
    {
        let uds = bind_endpoint(&self.socket_path).map_err(|e| {
            tracing::error!(
                socket = %self.socket_path.display(),
                error = %e,
                "Failed to bind CRI endpoint"
            );
            e
        })?;
        let uds_stream = UnixListenerStream::new(uds);

        tracing::info!(
            socket = %self.socket_path.display(),
            "CRI server listening"
        );

        Server::builder()
            .add_service(RuntimeServiceServer::from_arc(self.shim.clone()))
            .add_service(ImageServiceServer::from_arc(self.shim))
            .serve_with_incoming_shutdown(uds_stream, signal)
            .await?;

        tracing::info!(socket = %self.socket_path.display(), "CRI server stopped");
        Ok(())
    }
}
