//! Contiv CRI shim binary.
//!
//! Serves CRI RuntimeService and ImageService over a Unix domain socket,
//! forwarding to an upstream CRI runtime and recording sandbox creation
//! in etcd.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use contivshim_core::{LogFormat, ShimConfig};
use contivshim_cri::coordination::{CoordinationRecord, EtcdCoordinator};
use contivshim_cri::server::CriServer;
use contivshim_cri::shim::Shim;
use contivshim_cri::upstream::UpstreamRuntime;

/// Contiv CRI shim
#[derive(Parser, Debug)]
#[command(name = "contivshim", version, about = "Contiv CRI shim")]
struct Args {
    /// Path to a YAML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the Unix domain socket for CRI communication.
    #[arg(long)]
    socket: Option<PathBuf>,

    /// etcd endpoint (repeatable).
    #[arg(long = "etcd-endpoint")]
    etcd_endpoints: Vec<String>,

    /// Upstream CRI runtime socket.
    #[arg(long)]
    runtime_endpoint: Option<PathBuf>,

    /// Upstream CRI image socket (defaults to the runtime socket).
    #[arg(long)]
    image_endpoint: Option<PathBuf>,

    /// Log output format: text or json.
    #[arg(long)]
    log_format: Option<LogFormat>,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration.
    fn apply(self, config: &mut ShimConfig) {
        if let Some(socket) = self.socket {
            config.socket = socket;
        }
        if !self.etcd_endpoints.is_empty() {
            config.coordination.endpoints = self.etcd_endpoints;
        }
        if let Some(endpoint) = self.runtime_endpoint {
            config.upstream.runtime_endpoint = endpoint;
        }
        if let Some(endpoint) = self.image_endpoint {
            config.upstream.image_endpoint = Some(endpoint);
        }
        if let Some(format) = self.log_format {
            config.log_format = format;
        }
    }
}

fn init_tracing(config: &ShimConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));

    match config.log_format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let mut config = ShimConfig::load_or_default(args.config.as_deref())?;
    args.apply(&mut config);
    config.validate()?;

    init_tracing(&config);

    tracing::info!(
        socket = %config.socket.display(),
        runtime = %config.upstream.runtime_endpoint.display(),
        etcd = ?config.coordination.endpoints,
        version = contivshim_core::VERSION,
        "Starting contivshim"
    );

    let coordinator = Arc::new(EtcdCoordinator::new(&config.coordination)?);
    let upstream = Arc::new(
        UpstreamRuntime::connect(
            &config.upstream.runtime_endpoint,
            config.upstream.image_endpoint(),
            config.upstream.connect_timeout(),
        )
        .await?,
    );

    let shutdown = CancellationToken::new();
    let shim = Shim::new(
        upstream.clone(),
        upstream,
        coordinator,
        CoordinationRecord::from(&config.coordination),
    )
    .with_shutdown(shutdown.clone());

    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to listen for shutdown signal");
                }
            }
        }
    });

    let server = CriServer::new(config.socket.clone(), shim);
    server
        .serve_with_shutdown(async move { shutdown.cancelled().await })
        .await?;

    Ok(())
}
