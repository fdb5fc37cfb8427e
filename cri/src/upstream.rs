//! Upstream CRI delegate.
//!
//! Implements both delegate traits by forwarding each call to another CRI
//! endpoint (containerd, CRI-O, ...) over its Unix socket. The remaining
//! caller deadline is sent along as the outgoing `grpc-timeout`, and
//! upstream statuses come back unchanged as `ShimError::GrpcError`.
//! Responses are handed back whole; a status call answered without its
//! status object is an upstream fault.

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint, Uri};
use tonic::Request;
use tower::service_fn;

use contivshim_core::{CallContext, ExecOutput, ExitError, Result, ShimError};

use crate::cri_api::image_service_client::ImageServiceClient;
use crate::cri_api::runtime_service_client::RuntimeServiceClient;
use crate::cri_api::*;
use crate::delegate::{ImageDelegate, RuntimeDelegate};

/// Connect a gRPC channel to a Unix socket.
pub async fn connect_unix(socket_path: &Path, timeout: Duration) -> Result<Channel> {
    let path = socket_path.to_path_buf();
    let socket = socket_path.display().to_string();

    // The connector ignores the URI; tonic only needs a well-formed one
    Endpoint::from_static("http://[::]:50051")
        .connect_timeout(timeout)
        .connect_with_connector(service_fn(move |_: Uri| UnixStream::connect(path.clone())))
        .await
        .map_err(|e| {
            tracing::error!(socket = %socket, error = %e, "Failed to connect to upstream CRI endpoint");
            ShimError::RuntimeError(format!("failed to connect to {}: {}", socket, e))
        })
}

/// Wrap `message` in a request carrying the caller's remaining deadline.
fn request<T>(ctx: &CallContext, message: T) -> Request<T> {
    let mut req = Request::new(message);
    if let Some(remaining) = ctx.remaining() {
        req.set_timeout(remaining);
    }
    req
}

fn missing_status(what: &str) -> ShimError {
    tracing::error!(what, "Upstream runtime returned no status");
    ShimError::RuntimeError(format!("no status returned for {}", what))
}

/// CRI delegate backed by an upstream runtime's gRPC endpoint.
#[derive(Clone)]
pub struct UpstreamRuntime {
    runtime: RuntimeServiceClient<Channel>,
    images: ImageServiceClient<Channel>,
}

impl UpstreamRuntime {
    /// Connect to the upstream runtime and image sockets.
    ///
    /// When both paths are the same a single channel serves both services.
    pub async fn connect(
        runtime_socket: &Path,
        image_socket: &Path,
        connect_timeout: Duration,
    ) -> Result<Self> {
        let runtime_channel = connect_unix(runtime_socket, connect_timeout).await?;
        let image_channel = if image_socket == runtime_socket {
            runtime_channel.clone()
        } else {
            connect_unix(image_socket, connect_timeout).await?
        };

        tracing::info!(
            runtime = %runtime_socket.display(),
            image = %image_socket.display(),
            "Connected to upstream CRI runtime"
        );

        Ok(Self::from_channels(runtime_channel, image_channel))
    }

    /// Build from already-connected channels.
    pub fn from_channels(runtime: Channel, images: Channel) -> Self {
        Self {
            runtime: RuntimeServiceClient::new(runtime),
            images: ImageServiceClient::new(images),
        }
    }
}

#[async_trait]
impl RuntimeDelegate for UpstreamRuntime {
    async fn run_pod_sandbox(
        &self,
        ctx: &CallContext,
        config: PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String> {
        let resp = self
            .runtime
            .clone()
            .run_pod_sandbox(request(
                ctx,
                RunPodSandboxRequest {
                    config: Some(config),
                    runtime_handler: runtime_handler.to_string(),
                },
            ))
            .await?
            .into_inner();
        Ok(resp.pod_sandbox_id)
    }

    async fn stop_pod_sandbox(&self, ctx: &CallContext, pod_sandbox_id: &str) -> Result<()> {
        self.runtime
            .clone()
            .stop_pod_sandbox(request(
                ctx,
                StopPodSandboxRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn remove_pod_sandbox(&self, ctx: &CallContext, pod_sandbox_id: &str) -> Result<()> {
        self.runtime
            .clone()
            .remove_pod_sandbox(request(
                ctx,
                RemovePodSandboxRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn pod_sandbox_status(
        &self,
        ctx: &CallContext,
        pod_sandbox_id: &str,
        verbose: bool,
    ) -> Result<PodSandboxStatusResponse> {
        let resp = self
            .runtime
            .clone()
            .pod_sandbox_status(request(
                ctx,
                PodSandboxStatusRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                    verbose,
                },
            ))
            .await?
            .into_inner();
        if resp.status.is_none() {
            return Err(missing_status(&format!("sandbox {}", pod_sandbox_id)));
        }
        Ok(resp)
    }

    async fn list_pod_sandbox(
        &self,
        ctx: &CallContext,
        filter: Option<PodSandboxFilter>,
    ) -> Result<Vec<PodSandbox>> {
        let resp = self
            .runtime
            .clone()
            .list_pod_sandbox(request(ctx, ListPodSandboxRequest { filter }))
            .await?
            .into_inner();
        Ok(resp.items)
    }

    async fn create_container(
        &self,
        ctx: &CallContext,
        pod_sandbox_id: &str,
        config: ContainerConfig,
        sandbox_config: PodSandboxConfig,
    ) -> Result<String> {
        let resp = self
            .runtime
            .clone()
            .create_container(request(
                ctx,
                CreateContainerRequest {
                    pod_sandbox_id: pod_sandbox_id.to_string(),
                    config: Some(config),
                    sandbox_config: Some(sandbox_config),
                },
            ))
            .await?
            .into_inner();
        Ok(resp.container_id)
    }

    async fn start_container(&self, ctx: &CallContext, container_id: &str) -> Result<()> {
        self.runtime
            .clone()
            .start_container(request(
                ctx,
                StartContainerRequest {
                    container_id: container_id.to_string(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn stop_container(
        &self,
        ctx: &CallContext,
        container_id: &str,
        grace_period: Duration,
    ) -> Result<()> {
        self.runtime
            .clone()
            .stop_container(request(
                ctx,
                StopContainerRequest {
                    container_id: container_id.to_string(),
                    timeout: grace_period.as_secs() as i64,
                },
            ))
            .await?;
        Ok(())
    }

    async fn remove_container(&self, ctx: &CallContext, container_id: &str) -> Result<()> {
        self.runtime
            .clone()
            .remove_container(request(
                ctx,
                RemoveContainerRequest {
                    container_id: container_id.to_string(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn list_containers(
        &self,
        ctx: &CallContext,
        filter: Option<ContainerFilter>,
    ) -> Result<Vec<Container>> {
        let resp = self
            .runtime
            .clone()
            .list_containers(request(ctx, ListContainersRequest { filter }))
            .await?
            .into_inner();
        Ok(resp.containers)
    }

    async fn container_status(
        &self,
        ctx: &CallContext,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatusResponse> {
        let resp = self
            .runtime
            .clone()
            .container_status(request(
                ctx,
                ContainerStatusRequest {
                    container_id: container_id.to_string(),
                    verbose,
                },
            ))
            .await?
            .into_inner();
        if resp.status.is_none() {
            return Err(missing_status(&format!("container {}", container_id)));
        }
        Ok(resp)
    }

    async fn update_container_resources(
        &self,
        ctx: &CallContext,
        container_id: &str,
        resources: ContainerResources,
        annotations: HashMap<String, String>,
    ) -> Result<()> {
        self.runtime
            .clone()
            .update_container_resources(request(
                ctx,
                UpdateContainerResourcesRequest {
                    container_id: container_id.to_string(),
                    linux: resources.linux,
                    windows: resources.windows,
                    annotations,
                },
            ))
            .await?;
        Ok(())
    }

    async fn reopen_container_log(&self, ctx: &CallContext, container_id: &str) -> Result<()> {
        self.runtime
            .clone()
            .reopen_container_log(request(
                ctx,
                ReopenContainerLogRequest {
                    container_id: container_id.to_string(),
                },
            ))
            .await?;
        Ok(())
    }

    async fn exec_sync(
        &self,
        ctx: &CallContext,
        container_id: &str,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        let resp = self
            .runtime
            .clone()
            .exec_sync(request(
                ctx,
                ExecSyncRequest {
                    container_id: container_id.to_string(),
                    cmd,
                    timeout: timeout.as_secs() as i64,
                },
            ))
            .await?
            .into_inner();

        if resp.exit_code != 0 {
            return Err(ExitError {
                code: resp.exit_code,
                stdout: resp.stdout,
                stderr: resp.stderr,
            }
            .into());
        }
        Ok(ExecOutput {
            stdout: resp.stdout,
            stderr: resp.stderr,
        })
    }

    async fn exec(&self, ctx: &CallContext, req: ExecRequest) -> Result<ExecResponse> {
        Ok(self.runtime.clone().exec(request(ctx, req)).await?.into_inner())
    }

    async fn attach(&self, ctx: &CallContext, req: AttachRequest) -> Result<AttachResponse> {
        Ok(self.runtime.clone().attach(request(ctx, req)).await?.into_inner())
    }

    async fn port_forward(
        &self,
        ctx: &CallContext,
        req: PortForwardRequest,
    ) -> Result<PortForwardResponse> {
        Ok(self
            .runtime
            .clone()
            .port_forward(request(ctx, req))
            .await?
            .into_inner())
    }

    async fn container_stats(
        &self,
        ctx: &CallContext,
        container_id: &str,
    ) -> Result<ContainerStats> {
        let resp = self
            .runtime
            .clone()
            .container_stats(request(
                ctx,
                ContainerStatsRequest {
                    container_id: container_id.to_string(),
                },
            ))
            .await?
            .into_inner();
        resp.stats.ok_or_else(|| {
            ShimError::RuntimeError(format!("no stats returned for container {}", container_id))
        })
    }

    async fn list_container_stats(
        &self,
        ctx: &CallContext,
        filter: Option<ContainerStatsFilter>,
    ) -> Result<Vec<ContainerStats>> {
        let resp = self
            .runtime
            .clone()
            .list_container_stats(request(ctx, ListContainerStatsRequest { filter }))
            .await?
            .into_inner();
        Ok(resp.stats)
    }

    async fn update_runtime_config(
        &self,
        ctx: &CallContext,
        config: Option<RuntimeConfig>,
    ) -> Result<()> {
        self.runtime
            .clone()
            .update_runtime_config(request(
                ctx,
                UpdateRuntimeConfigRequest {
                    runtime_config: config,
                },
            ))
            .await?;
        Ok(())
    }

    async fn status(&self, ctx: &CallContext, verbose: bool) -> Result<StatusResponse> {
        let resp = self
            .runtime
            .clone()
            .status(request(ctx, StatusRequest { verbose }))
            .await?
            .into_inner();
        if resp.status.is_none() {
            return Err(missing_status("runtime"));
        }
        Ok(resp)
    }
}

#[async_trait]
impl ImageDelegate for UpstreamRuntime {
    async fn list_images(
        &self,
        ctx: &CallContext,
        filter: Option<ImageFilter>,
    ) -> Result<Vec<Image>> {
        let resp = self
            .images
            .clone()
            .list_images(request(ctx, ListImagesRequest { filter }))
            .await?
            .into_inner();
        Ok(resp.images)
    }

    async fn image_status(
        &self,
        ctx: &CallContext,
        image: ImageSpec,
        verbose: bool,
    ) -> Result<ImageStatusResponse> {
        Ok(self
            .images
            .clone()
            .image_status(request(
                ctx,
                ImageStatusRequest {
                    image: Some(image),
                    verbose,
                },
            ))
            .await?
            .into_inner())
    }

    async fn pull_image(
        &self,
        ctx: &CallContext,
        image: ImageSpec,
        auth: Option<AuthConfig>,
        sandbox_config: Option<PodSandboxConfig>,
    ) -> Result<String> {
        let resp = self
            .images
            .clone()
            .pull_image(request(
                ctx,
                PullImageRequest {
                    image: Some(image),
                    auth,
                    sandbox_config,
                },
            ))
            .await?
            .into_inner();
        Ok(resp.image_ref)
    }

    async fn remove_image(&self, ctx: &CallContext, image: ImageSpec) -> Result<()> {
        self.images
            .clone()
            .remove_image(request(ctx, RemoveImageRequest { image: Some(image) }))
            .await?;
        Ok(())
    }
}
