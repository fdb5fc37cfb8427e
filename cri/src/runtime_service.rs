//! CRI RuntimeService implementation.
//!
//! Every call is forwarded to the runtime delegate. `RunPodSandbox` first
//! writes the coordination record; if that fails the sandbox is never
//! created.

use std::time::Duration;

use tonic::{Request, Response, Status};

use contivshim_core::ShimError;

use crate::cri_api::runtime_service_server::RuntimeService;
use crate::cri_api::*;
use crate::error::{delegate_failure, invalid_request, shim_error_to_status};
use crate::shim::Shim;

/// CRI API version reported by `Version`.
pub const CRI_VERSION: &str = "0.1.0";
/// Name the shim reports itself as.
pub const RUNTIME_NAME: &str = "contivshim";
/// Shim runtime version.
pub const RUNTIME_VERSION: &str = "0.1.0";
/// Runtime API version the shim implements.
pub const RUNTIME_API_VERSION: &str = "0.1.0";

/// Convert a CRI seconds field to a duration. Negative values become zero.
fn seconds(value: i64) -> Duration {
    Duration::from_secs(value.max(0) as u64)
}

#[tonic::async_trait]
impl RuntimeService for Shim {
    // ── Version ──────────────────────────────────────────────────────

    async fn version(
        &self,
        request: Request<VersionRequest>,
    ) -> Result<Response<VersionResponse>, Status> {
        let req = request.into_inner();
        tracing::debug!(kubelet_version = %req.version, "CRI Version");
        Ok(Response::new(VersionResponse {
            version: CRI_VERSION.to_string(),
            runtime_name: RUNTIME_NAME.to_string(),
            runtime_version: RUNTIME_VERSION.to_string(),
            runtime_api_version: RUNTIME_API_VERSION.to_string(),
        }))
    }

    // ── Pod Sandbox ──────────────────────────────────────────────────

    async fn run_pod_sandbox(
        &self,
        request: Request<RunPodSandboxRequest>,
    ) -> Result<Response<RunPodSandboxResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let config = req
            .config
            .ok_or_else(|| invalid_request("RunPodSandbox", "sandbox config required"))?;

        let (name, namespace) = config
            .metadata
            .as_ref()
            .map(|m| (m.name.clone(), m.namespace.clone()))
            .unwrap_or_default();

        tracing::info!(
            name = %name,
            namespace = %namespace,
            runtime_handler = %req.runtime_handler,
            "CRI RunPodSandbox"
        );

        // Coordination write is a precondition of sandbox creation
        self.record
            .write(self.coordinator.as_ref(), &ctx)
            .await
            .map_err(|e| {
                tracing::error!(
                    name = %name,
                    key = %self.record.key,
                    error = %e,
                    "Coordination store write failed, sandbox not created"
                );
                shim_error_to_status(e)
            })?;

        let pod_sandbox_id = ctx
            .run(
                "RunPodSandbox",
                self.runtime
                    .run_pod_sandbox(&ctx, config, &req.runtime_handler),
            )
            .await
            .map_err(|e| delegate_failure("RunPodSandbox", e))?;

        tracing::info!(sandbox_id = %pod_sandbox_id, name = %name, "Pod sandbox created");

        Ok(Response::new(RunPodSandboxResponse { pod_sandbox_id }))
    }

    async fn stop_pod_sandbox(
        &self,
        request: Request<StopPodSandboxRequest>,
    ) -> Result<Response<StopPodSandboxResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        tracing::info!(sandbox_id = %sandbox_id, "CRI StopPodSandbox");

        ctx.run(
            "StopPodSandbox",
            self.runtime.stop_pod_sandbox(&ctx, sandbox_id),
        )
        .await
        .map_err(|e| delegate_failure("StopPodSandbox", e))?;

        Ok(Response::new(StopPodSandboxResponse {}))
    }

    async fn remove_pod_sandbox(
        &self,
        request: Request<RemovePodSandboxRequest>,
    ) -> Result<Response<RemovePodSandboxResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        tracing::info!(sandbox_id = %sandbox_id, "CRI RemovePodSandbox");

        ctx.run(
            "RemovePodSandbox",
            self.runtime.remove_pod_sandbox(&ctx, sandbox_id),
        )
        .await
        .map_err(|e| delegate_failure("RemovePodSandbox", e))?;

        Ok(Response::new(RemovePodSandboxResponse {}))
    }

    async fn pod_sandbox_status(
        &self,
        request: Request<PodSandboxStatusRequest>,
    ) -> Result<Response<PodSandboxStatusResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        tracing::debug!(sandbox_id = %sandbox_id, verbose = req.verbose, "CRI PodSandboxStatus");

        let resp = ctx
            .run(
                "PodSandboxStatus",
                self.runtime
                    .pod_sandbox_status(&ctx, sandbox_id, req.verbose),
            )
            .await
            .map_err(|e| delegate_failure("PodSandboxStatus", e))?;

        Ok(Response::new(resp))
    }

    async fn list_pod_sandbox(
        &self,
        request: Request<ListPodSandboxRequest>,
    ) -> Result<Response<ListPodSandboxResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(filter = ?req.filter, "CRI ListPodSandbox");

        let items = ctx
            .run(
                "ListPodSandbox",
                self.runtime.list_pod_sandbox(&ctx, req.filter),
            )
            .await
            .map_err(|e| delegate_failure("ListPodSandbox", e))?;

        Ok(Response::new(ListPodSandboxResponse { items }))
    }

    // ── Container ────────────────────────────────────────────────────

    async fn create_container(
        &self,
        request: Request<CreateContainerRequest>,
    ) -> Result<Response<CreateContainerResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let sandbox_id = &req.pod_sandbox_id;

        let config = req
            .config
            .ok_or_else(|| invalid_request("CreateContainer", "container config required"))?;
        let sandbox_config = req
            .sandbox_config
            .ok_or_else(|| invalid_request("CreateContainer", "sandbox config required"))?;

        let name = config
            .metadata
            .as_ref()
            .map(|m| m.name.clone())
            .unwrap_or_default();
        let image = config
            .image
            .as_ref()
            .map(|i| i.image.clone())
            .unwrap_or_default();

        tracing::info!(
            sandbox_id = %sandbox_id,
            name = %name,
            image = %image,
            "CRI CreateContainer"
        );

        let container_id = ctx
            .run(
                "CreateContainer",
                self.runtime
                    .create_container(&ctx, sandbox_id, config, sandbox_config),
            )
            .await
            .map_err(|e| delegate_failure("CreateContainer", e))?;

        Ok(Response::new(CreateContainerResponse { container_id }))
    }

    async fn start_container(
        &self,
        request: Request<StartContainerRequest>,
    ) -> Result<Response<StartContainerResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI StartContainer");

        ctx.run(
            "StartContainer",
            self.runtime.start_container(&ctx, container_id),
        )
        .await
        .map_err(|e| delegate_failure("StartContainer", e))?;

        Ok(Response::new(StartContainerResponse {}))
    }

    async fn stop_container(
        &self,
        request: Request<StopContainerRequest>,
    ) -> Result<Response<StopContainerResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;
        let grace_period = seconds(req.timeout);

        tracing::info!(
            container_id = %container_id,
            grace_period_secs = grace_period.as_secs(),
            "CRI StopContainer"
        );

        ctx.run(
            "StopContainer",
            self.runtime
                .stop_container(&ctx, container_id, grace_period),
        )
        .await
        .map_err(|e| delegate_failure("StopContainer", e))?;

        Ok(Response::new(StopContainerResponse {}))
    }

    async fn remove_container(
        &self,
        request: Request<RemoveContainerRequest>,
    ) -> Result<Response<RemoveContainerResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI RemoveContainer");

        ctx.run(
            "RemoveContainer",
            self.runtime.remove_container(&ctx, container_id),
        )
        .await
        .map_err(|e| delegate_failure("RemoveContainer", e))?;

        Ok(Response::new(RemoveContainerResponse {}))
    }

    async fn container_status(
        &self,
        request: Request<ContainerStatusRequest>,
    ) -> Result<Response<ContainerStatusResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::debug!(container_id = %container_id, verbose = req.verbose, "CRI ContainerStatus");

        let resp = ctx
            .run(
                "ContainerStatus",
                self.runtime
                    .container_status(&ctx, container_id, req.verbose),
            )
            .await
            .map_err(|e| delegate_failure("ContainerStatus", e))?;

        Ok(Response::new(resp))
    }

    async fn list_containers(
        &self,
        request: Request<ListContainersRequest>,
    ) -> Result<Response<ListContainersResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(filter = ?req.filter, "CRI ListContainers");

        let containers = ctx
            .run(
                "ListContainers",
                self.runtime.list_containers(&ctx, req.filter),
            )
            .await
            .map_err(|e| delegate_failure("ListContainers", e))?;

        Ok(Response::new(ListContainersResponse { containers }))
    }

    async fn update_container_resources(
        &self,
        request: Request<UpdateContainerResourcesRequest>,
    ) -> Result<Response<UpdateContainerResourcesResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;
        let resources = ContainerResources {
            linux: req.linux,
            windows: req.windows,
        };

        tracing::info!(container_id = %container_id, "CRI UpdateContainerResources");

        ctx.run(
            "UpdateContainerResources",
            self.runtime.update_container_resources(
                &ctx,
                container_id,
                resources,
                req.annotations,
            ),
        )
        .await
        .map_err(|e| delegate_failure("UpdateContainerResources", e))?;

        Ok(Response::new(UpdateContainerResourcesResponse {}))
    }

    async fn reopen_container_log(
        &self,
        request: Request<ReopenContainerLogRequest>,
    ) -> Result<Response<ReopenContainerLogResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::info!(container_id = %container_id, "CRI ReopenContainerLog");

        ctx.run(
            "ReopenContainerLog",
            self.runtime.reopen_container_log(&ctx, container_id),
        )
        .await
        .map_err(|e| delegate_failure("ReopenContainerLog", e))?;

        Ok(Response::new(ReopenContainerLogResponse {}))
    }

    // ── Exec / Attach / PortForward ──────────────────────────────────

    async fn exec_sync(
        &self,
        request: Request<ExecSyncRequest>,
    ) -> Result<Response<ExecSyncResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;
        let timeout = seconds(req.timeout);

        tracing::debug!(
            container_id = %container_id,
            cmd = ?req.cmd,
            timeout_secs = timeout.as_secs(),
            "CRI ExecSync"
        );

        let result = ctx
            .run(
                "ExecSync",
                self.runtime
                    .exec_sync(&ctx, container_id, req.cmd.clone(), timeout),
            )
            .await;

        match result {
            Ok(output) => Ok(Response::new(ExecSyncResponse {
                stdout: output.stdout,
                stderr: output.stderr,
                exit_code: 0,
            })),
            // The command ran; its exit status is the answer, not an error
            Err(ShimError::Exited(exit)) => {
                tracing::debug!(
                    container_id = %container_id,
                    exit_code = exit.code,
                    "ExecSync command exited non-zero"
                );
                Ok(Response::new(ExecSyncResponse {
                    stdout: exit.stdout,
                    stderr: exit.stderr,
                    exit_code: exit.code,
                }))
            }
            Err(e) => Err(delegate_failure("ExecSync", e)),
        }
    }

    async fn exec(
        &self,
        request: Request<ExecRequest>,
    ) -> Result<Response<ExecResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(
            container_id = %req.container_id,
            cmd = ?req.cmd,
            tty = req.tty,
            "CRI Exec"
        );

        let resp = ctx
            .run("Exec", self.runtime.exec(&ctx, req))
            .await
            .map_err(|e| delegate_failure("Exec", e))?;

        Ok(Response::new(resp))
    }

    async fn attach(
        &self,
        request: Request<AttachRequest>,
    ) -> Result<Response<AttachResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(container_id = %req.container_id, tty = req.tty, "CRI Attach");

        let resp = ctx
            .run("Attach", self.runtime.attach(&ctx, req))
            .await
            .map_err(|e| delegate_failure("Attach", e))?;

        Ok(Response::new(resp))
    }

    async fn port_forward(
        &self,
        request: Request<PortForwardRequest>,
    ) -> Result<Response<PortForwardResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(
            sandbox_id = %req.pod_sandbox_id,
            ports = ?req.port,
            "CRI PortForward"
        );

        let resp = ctx
            .run("PortForward", self.runtime.port_forward(&ctx, req))
            .await
            .map_err(|e| delegate_failure("PortForward", e))?;

        Ok(Response::new(resp))
    }

    // ── Stats ────────────────────────────────────────────────────────

    async fn container_stats(
        &self,
        request: Request<ContainerStatsRequest>,
    ) -> Result<Response<ContainerStatsResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();
        let container_id = &req.container_id;

        tracing::debug!(container_id = %container_id, "CRI ContainerStats");

        let stats = ctx
            .run(
                "ContainerStats",
                self.runtime.container_stats(&ctx, container_id),
            )
            .await
            .map_err(|e| delegate_failure("ContainerStats", e))?;

        Ok(Response::new(ContainerStatsResponse { stats: Some(stats) }))
    }

    async fn list_container_stats(
        &self,
        request: Request<ListContainerStatsRequest>,
    ) -> Result<Response<ListContainerStatsResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(filter = ?req.filter, "CRI ListContainerStats");

        let stats = ctx
            .run(
                "ListContainerStats",
                self.runtime.list_container_stats(&ctx, req.filter),
            )
            .await
            .map_err(|e| delegate_failure("ListContainerStats", e))?;

        Ok(Response::new(ListContainerStatsResponse { stats }))
    }

    // ── Status ───────────────────────────────────────────────────────

    async fn update_runtime_config(
        &self,
        request: Request<UpdateRuntimeConfigRequest>,
    ) -> Result<Response<UpdateRuntimeConfigResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::info!(runtime_config = ?req.runtime_config, "CRI UpdateRuntimeConfig");

        ctx.run(
            "UpdateRuntimeConfig",
            self.runtime
                .update_runtime_config(&ctx, req.runtime_config),
        )
        .await
        .map_err(|e| delegate_failure("UpdateRuntimeConfig", e))?;

        Ok(Response::new(UpdateRuntimeConfigResponse {}))
    }

    async fn status(
        &self,
        request: Request<StatusRequest>,
    ) -> Result<Response<StatusResponse>, Status> {
        let ctx = self.context(&request);
        let req = request.into_inner();

        tracing::debug!(verbose = req.verbose, "CRI Status");

        let resp = ctx
            .run("Status", self.runtime.status(&ctx, req.verbose))
            .await
            .map_err(|e| delegate_failure("Status", e))?;

        Ok(Response::new(resp))
    }
}
