//! Delegate capability traits.
//!
//! The shim owns no container state. Every CRI call is satisfied by a
//! `RuntimeDelegate` (sandboxes, containers, exec, stats, status) or an
//! `ImageDelegate` (images). Each operation receives the call's
//! `CallContext` so implementations can honor the caller deadline.
//!
//! Status calls hand back the full CRI response message so fields the
//! shim does not inspect reach the caller untouched.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use contivshim_core::{CallContext, ExecOutput, Result};

use crate::cri_api::{
    AttachRequest, AttachResponse, AuthConfig, Container, ContainerConfig, ContainerFilter,
    ContainerResources, ContainerStats, ContainerStatsFilter, ContainerStatusResponse,
    ExecRequest, ExecResponse, Image, ImageFilter, ImageSpec, ImageStatusResponse, PodSandbox,
    PodSandboxConfig, PodSandboxFilter, PodSandboxStatusResponse, PortForwardRequest,
    PortForwardResponse, RuntimeConfig, StatusResponse,
};

/// Container runtime the shim forwards sandbox and container calls to.
#[async_trait]
pub trait RuntimeDelegate: Send + Sync {
    /// Create and start a sandbox, returning its runtime-assigned id.
    async fn run_pod_sandbox(
        &self,
        ctx: &CallContext,
        config: PodSandboxConfig,
        runtime_handler: &str,
    ) -> Result<String>;

    async fn stop_pod_sandbox(&self, ctx: &CallContext, pod_sandbox_id: &str) -> Result<()>;

    async fn remove_pod_sandbox(&self, ctx: &CallContext, pod_sandbox_id: &str) -> Result<()>;

    async fn pod_sandbox_status(
        &self,
        ctx: &CallContext,
        pod_sandbox_id: &str,
        verbose: bool,
    ) -> Result<PodSandboxStatusResponse>;

    async fn list_pod_sandbox(
        &self,
        ctx: &CallContext,
        filter: Option<PodSandboxFilter>,
    ) -> Result<Vec<PodSandbox>>;

    /// Create a container inside a sandbox, returning its runtime-assigned id.
    async fn create_container(
        &self,
        ctx: &CallContext,
        pod_sandbox_id: &str,
        config: ContainerConfig,
        sandbox_config: PodSandboxConfig,
    ) -> Result<String>;

    async fn start_container(&self, ctx: &CallContext, container_id: &str) -> Result<()>;

    /// Stop a container, killing it once `grace_period` has elapsed.
    async fn stop_container(
        &self,
        ctx: &CallContext,
        container_id: &str,
        grace_period: Duration,
    ) -> Result<()>;

    async fn remove_container(&self, ctx: &CallContext, container_id: &str) -> Result<()>;

    async fn list_containers(
        &self,
        ctx: &CallContext,
        filter: Option<ContainerFilter>,
    ) -> Result<Vec<Container>>;

    async fn container_status(
        &self,
        ctx: &CallContext,
        container_id: &str,
        verbose: bool,
    ) -> Result<ContainerStatusResponse>;

    /// Apply new resource limits. `annotations` are passed through as sent.
    async fn update_container_resources(
        &self,
        ctx: &CallContext,
        container_id: &str,
        resources: ContainerResources,
        annotations: HashMap<String, String>,
    ) -> Result<()>;

    async fn reopen_container_log(&self, ctx: &CallContext, container_id: &str) -> Result<()>;

    /// Run a command to completion inside a container.
    ///
    /// A command that starts but exits non-zero must fail with
    /// `ShimError::Exited`; any other error means it could not be run.
    async fn exec_sync(
        &self,
        ctx: &CallContext,
        container_id: &str,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecOutput>;

    /// Issue a streaming endpoint for an interactive exec.
    async fn exec(&self, ctx: &CallContext, req: ExecRequest) -> Result<ExecResponse>;

    /// Issue a streaming endpoint for attaching to a container.
    async fn attach(&self, ctx: &CallContext, req: AttachRequest) -> Result<AttachResponse>;

    /// Issue a streaming endpoint for forwarding sandbox ports.
    async fn port_forward(
        &self,
        ctx: &CallContext,
        req: PortForwardRequest,
    ) -> Result<PortForwardResponse>;

    async fn container_stats(&self, ctx: &CallContext, container_id: &str)
        -> Result<ContainerStats>;

    async fn list_container_stats(
        &self,
        ctx: &CallContext,
        filter: Option<ContainerStatsFilter>,
    ) -> Result<Vec<ContainerStats>>;

    async fn update_runtime_config(
        &self,
        ctx: &CallContext,
        config: Option<RuntimeConfig>,
    ) -> Result<()>;

    async fn status(&self, ctx: &CallContext, verbose: bool) -> Result<StatusResponse>;
}

/// Image manager the shim forwards image calls to.
#[async_trait]
pub trait ImageDelegate: Send + Sync {
    async fn list_images(&self, ctx: &CallContext, filter: Option<ImageFilter>)
        -> Result<Vec<Image>>;

    /// Look up an image. A response without an image means it is not present.
    async fn image_status(
        &self,
        ctx: &CallContext,
        image: ImageSpec,
        verbose: bool,
    ) -> Result<ImageStatusResponse>;

    /// Pull an image, returning the reference the runtime resolved it to.
    async fn pull_image(
        &self,
        ctx: &CallContext,
        image: ImageSpec,
        auth: Option<AuthConfig>,
        sandbox_config: Option<PodSandboxConfig>,
    ) -> Result<String>;

    async fn remove_image(&self, ctx: &CallContext, image: ImageSpec) -> Result<()>;
}
