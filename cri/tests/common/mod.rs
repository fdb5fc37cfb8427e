//! In-memory delegates and coordination store shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use contivshim_core::{CallContext, ExecOutput, ExitError, Result, ShimError};
use contivshim_cri::coordination::{CoordinationClient, CoordinationRecord, CoordinationSession};
use contivshim_cri::cri_api::*;
use contivshim_cri::delegate::{ImageDelegate, RuntimeDelegate};
use contivshim_cri::shim::Shim;

/// Runtime delegate that records every call and answers from memory.
#[derive(Default)]
pub struct FakeRuntime {
    calls: Mutex<Vec<String>>,
    issued_ids: Mutex<Vec<String>>,
    containers: Mutex<Vec<ContainerConfig>>,
    resources: Mutex<Vec<(ContainerResources, HashMap<String, String>)>>,
    grace_periods: Mutex<Vec<Duration>>,
    exec_timeouts: Mutex<Vec<Duration>>,
    delay: Option<Duration>,
    failure: Option<fn() -> ShimError>,
    exit_code: i32,
    no_status: bool,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long before answering any call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Fail every call with the error built by `failure`.
    pub fn failing(mut self, failure: fn() -> ShimError) -> Self {
        self.failure = Some(failure);
        self
    }

    /// Make `exec_sync` report that the command exited with `code`.
    pub fn with_exit_code(mut self, code: i32) -> Self {
        self.exit_code = code;
        self
    }

    /// Answer status calls without a status object.
    pub fn without_status(mut self) -> Self {
        self.no_status = true;
        self
    }

    /// Container configs received by `create_container`, in order.
    pub fn containers(&self) -> Vec<ContainerConfig> {
        self.containers.lock().clone()
    }

    /// Resources and annotations received by `update_container_resources`.
    pub fn resource_updates(&self) -> Vec<(ContainerResources, HashMap<String, String>)> {
        self.resources.lock().clone()
    }

    /// Grace periods received by `stop_container`.
    pub fn grace_periods(&self) -> Vec<Duration> {
        self.grace_periods.lock().clone()
    }

    /// Timeouts received by `exec_sync`.
    pub fn exec_timeouts(&self) -> Vec<Duration> {
        self.exec_timeouts.lock().clone()
    }

    /// Names of the delegate operations invoked so far.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Number of times `name` was invoked.
    pub fn count(&self, name: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.as_str() == name).count()
    }

    /// Ids handed out by create operations, in order.
    pub fn issued_ids(&self) -> Vec<String> {
        self.issued_ids.lock().clone()
    }

    async fn enter(&self, name: &str) -> Result<()> {
        self.calls.lock().push(name.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.failure {
            Some(failure) => Err(failure()),
            None => Ok(()),
        }
    }

    fn issue_id(&self, prefix: &str) -> String {
        let id = format!("{}-{}", prefix, uuid::Uuid::new_v4().simple());
        self.issued_ids.lock().push(id.clone());
        id
    }
}

#[async_trait]
impl RuntimeDelegate for FakeRuntime {
    async fn run_pod_sandbox(
        &self,
        _ctx: &CallContext,
        _config: PodSandboxConfig,
        _runtime_handler: &str,
    ) -> Result<String> {
        self.enter("run_pod_sandbox").await?;
        Ok(self.issue_id("sandbox"))
    }

    async fn stop_pod_sandbox(&self, _ctx: &CallContext, _pod_sandbox_id: &str) -> Result<()> {
        self.enter("stop_pod_sandbox").await
    }

    async fn remove_pod_sandbox(&self, _ctx: &CallContext, _pod_sandbox_id: &str) -> Result<()> {
        self.enter("remove_pod_sandbox").await
    }

    async fn pod_sandbox_status(
        &self,
        _ctx: &CallContext,
        pod_sandbox_id: &str,
        verbose: bool,
    ) -> Result<PodSandboxStatusResponse> {
        self.enter("pod_sandbox_status").await?;
        let mut resp = PodSandboxStatusResponse {
            status: (!self.no_status).then(|| PodSandboxStatus {
                id: pod_sandbox_id.to_string(),
                state: PodSandboxState::SandboxReady as i32,
                ..Default::default()
            }),
            containers_statuses: vec![ContainerStatus {
                id: "container-in-pod".to_string(),
                state: ContainerState::ContainerRunning as i32,
                ..Default::default()
            }],
            timestamp: 1_700_000_000,
            ..Default::default()
        };
        if verbose {
            resp.info.insert("info".to_string(), "{}".to_string());
        }
        Ok(resp)
    }

    async fn list_pod_sandbox(
        &self,
        _ctx: &CallContext,
        _filter: Option<PodSandboxFilter>,
    ) -> Result<Vec<PodSandbox>> {
        self.enter("list_pod_sandbox").await?;
        Ok(self
            .issued_ids
            .lock()
            .iter()
            .filter(|id| id.starts_with("sandbox-"))
            .map(|id| PodSandbox {
                id: id.clone(),
                state: PodSandboxState::SandboxReady as i32,
                ..Default::default()
            })
            .collect())
    }

    async fn create_container(
        &self,
        _ctx: &CallContext,
        _pod_sandbox_id: &str,
        config: ContainerConfig,
        _sandbox_config: PodSandboxConfig,
    ) -> Result<String> {
        self.enter("create_container").await?;
        self.containers.lock().push(config);
        Ok(self.issue_id("container"))
    }

    async fn start_container(&self, _ctx: &CallContext, _container_id: &str) -> Result<()> {
        self.enter("start_container").await
    }

    async fn stop_container(
        &self,
        _ctx: &CallContext,
        _container_id: &str,
        grace_period: Duration,
    ) -> Result<()> {
        self.grace_periods.lock().push(grace_period);
        self.enter("stop_container").await
    }

    async fn remove_container(&self, _ctx: &CallContext, _container_id: &str) -> Result<()> {
        self.enter("remove_container").await
    }

    async fn list_containers(
        &self,
        _ctx: &CallContext,
        _filter: Option<ContainerFilter>,
    ) -> Result<Vec<Container>> {
        self.enter("list_containers").await?;
        Ok(Vec::new())
    }

    async fn container_status(
        &self,
        _ctx: &CallContext,
        container_id: &str,
        _verbose: bool,
    ) -> Result<ContainerStatusResponse> {
        self.enter("container_status").await?;
        Ok(ContainerStatusResponse {
            status: (!self.no_status).then(|| ContainerStatus {
                id: container_id.to_string(),
                state: ContainerState::ContainerRunning as i32,
                user: Some(ContainerUser {
                    linux: Some(LinuxContainerUser {
                        uid: 1000,
                        gid: 1000,
                        supplemental_groups: vec![1000, 10],
                    }),
                }),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn update_container_resources(
        &self,
        _ctx: &CallContext,
        _container_id: &str,
        resources: ContainerResources,
        annotations: HashMap<String, String>,
    ) -> Result<()> {
        self.resources.lock().push((resources, annotations));
        self.enter("update_container_resources").await
    }

    async fn reopen_container_log(&self, _ctx: &CallContext, _container_id: &str) -> Result<()> {
        self.enter("reopen_container_log").await
    }

    async fn exec_sync(
        &self,
        _ctx: &CallContext,
        _container_id: &str,
        cmd: Vec<String>,
        timeout: Duration,
    ) -> Result<ExecOutput> {
        self.exec_timeouts.lock().push(timeout);
        self.enter("exec_sync").await?;
        if self.exit_code != 0 {
            return Err(ExitError {
                code: self.exit_code,
                stdout: b"partial output\n".to_vec(),
                stderr: b"command failed\n".to_vec(),
            }
            .into());
        }
        Ok(ExecOutput {
            stdout: format!("{}\n", cmd.join(" ")).into_bytes(),
            stderr: Vec::new(),
        })
    }

    async fn exec(&self, _ctx: &CallContext, req: ExecRequest) -> Result<ExecResponse> {
        self.enter("exec").await?;
        Ok(ExecResponse {
            url: format!("http://127.0.0.1:10010/exec/{}", req.container_id),
        })
    }

    async fn attach(&self, _ctx: &CallContext, req: AttachRequest) -> Result<AttachResponse> {
        self.enter("attach").await?;
        Ok(AttachResponse {
            url: format!("http://127.0.0.1:10010/attach/{}", req.container_id),
        })
    }

    async fn port_forward(
        &self,
        _ctx: &CallContext,
        req: PortForwardRequest,
    ) -> Result<PortForwardResponse> {
        self.enter("port_forward").await?;
        Ok(PortForwardResponse {
            url: format!("http://127.0.0.1:10010/portforward/{}", req.pod_sandbox_id),
        })
    }

    async fn container_stats(
        &self,
        _ctx: &CallContext,
        container_id: &str,
    ) -> Result<ContainerStats> {
        self.enter("container_stats").await?;
        Ok(ContainerStats {
            attributes: Some(ContainerAttributes {
                id: container_id.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        })
    }

    async fn list_container_stats(
        &self,
        _ctx: &CallContext,
        _filter: Option<ContainerStatsFilter>,
    ) -> Result<Vec<ContainerStats>> {
        self.enter("list_container_stats").await?;
        Ok(Vec::new())
    }

    async fn update_runtime_config(
        &self,
        _ctx: &CallContext,
        _config: Option<RuntimeConfig>,
    ) -> Result<()> {
        self.enter("update_runtime_config").await
    }

    async fn status(&self, _ctx: &CallContext, _verbose: bool) -> Result<StatusResponse> {
        self.enter("status").await?;
        Ok(StatusResponse {
            status: (!self.no_status).then(|| RuntimeStatus {
                conditions: vec![RuntimeCondition {
                    r#type: "RuntimeReady".to_string(),
                    status: true,
                    ..Default::default()
                }],
            }),
            runtime_handlers: vec![RuntimeHandler {
                name: "runc".to_string(),
                features: Some(RuntimeHandlerFeatures {
                    recursive_read_only: true,
                    user_namespaces: true,
                }),
            }],
            features: Some(RuntimeFeatures {
                supplemental_groups_policy: true,
            }),
            ..Default::default()
        })
    }
}

/// Image delegate backed by a map of image references.
#[derive(Default)]
pub struct FakeImages {
    images: Mutex<HashMap<String, Image>>,
}

impl FakeImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, image: &str) -> bool {
        self.images.lock().contains_key(image)
    }
}

#[async_trait]
impl ImageDelegate for FakeImages {
    async fn list_images(
        &self,
        _ctx: &CallContext,
        _filter: Option<ImageFilter>,
    ) -> Result<Vec<Image>> {
        Ok(self.images.lock().values().cloned().collect())
    }

    async fn image_status(
        &self,
        _ctx: &CallContext,
        image: ImageSpec,
        _verbose: bool,
    ) -> Result<ImageStatusResponse> {
        Ok(ImageStatusResponse {
            image: self.images.lock().get(&image.image).cloned(),
            ..Default::default()
        })
    }

    async fn pull_image(
        &self,
        _ctx: &CallContext,
        image: ImageSpec,
        _auth: Option<AuthConfig>,
        _sandbox_config: Option<PodSandboxConfig>,
    ) -> Result<String> {
        let image_ref = format!("sha256:{}", uuid::Uuid::new_v4().simple());
        self.images.lock().insert(
            image.image.clone(),
            Image {
                id: image_ref.clone(),
                repo_tags: vec![image.image.clone()],
                ..Default::default()
            },
        );
        Ok(image_ref)
    }

    async fn remove_image(&self, _ctx: &CallContext, image: ImageSpec) -> Result<()> {
        match self.images.lock().remove(&image.image) {
            Some(_) => Ok(()),
            None => Err(ShimError::NotFound(format!("image {}", image.image))),
        }
    }
}

/// How the fake coordination store behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    Healthy,
    DialFails,
    PutFails,
    PutHangs,
}

/// Coordination store tracking dials, writes and open sessions.
pub struct FakeCoordinator {
    mode: StoreMode,
    dials: AtomicUsize,
    open_sessions: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<(String, String)>>>,
}

impl FakeCoordinator {
    pub fn new(mode: StoreMode) -> Self {
        Self {
            mode,
            dials: AtomicUsize::new(0),
            open_sessions: Arc::new(AtomicUsize::new(0)),
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<(String, String)> {
        self.writes.lock().clone()
    }
}

struct FakeSession {
    mode: StoreMode,
    open_sessions: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<(String, String)>>>,
}

impl Drop for FakeSession {
    fn drop(&mut self) {
        self.open_sessions.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CoordinationSession for FakeSession {
    async fn put(&mut self, _ctx: &CallContext, key: &str, value: &str) -> Result<()> {
        match self.mode {
            StoreMode::PutFails => Err(ShimError::CoordinationError {
                endpoints: "fake://store".to_string(),
                message: "etcdserver: request timed out".to_string(),
            }),
            StoreMode::PutHangs => std::future::pending().await,
            _ => {
                self.writes.lock().push((key.to_string(), value.to_string()));
                Ok(())
            }
        }
    }
}

#[async_trait]
impl CoordinationClient for FakeCoordinator {
    async fn dial(&self, _ctx: &CallContext) -> Result<Box<dyn CoordinationSession>> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        if self.mode == StoreMode::DialFails {
            return Err(ShimError::CoordinationError {
                endpoints: "fake://store".to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            mode: self.mode,
            open_sessions: self.open_sessions.clone(),
            writes: self.writes.clone(),
        }))
    }
}

/// A shim wired to fakes, with handles to inspect them.
pub struct Harness {
    pub shim: Shim,
    pub runtime: Arc<FakeRuntime>,
    pub images: Arc<FakeImages>,
    pub coordinator: Arc<FakeCoordinator>,
    pub shutdown: CancellationToken,
}

pub fn record() -> CoordinationRecord {
    CoordinationRecord {
        key: "sample_key".to_string(),
        value: "sample_value".to_string(),
        dial_timeout: Duration::from_secs(1),
        request_timeout: Duration::from_millis(200),
    }
}

pub fn harness(runtime: FakeRuntime, mode: StoreMode) -> Harness {
    let runtime = Arc::new(runtime);
    let images = Arc::new(FakeImages::new());
    let coordinator = Arc::new(FakeCoordinator::new(mode));
    let shutdown = CancellationToken::new();

    let shim = Shim::new(
        runtime.clone(),
        images.clone(),
        coordinator.clone(),
        record(),
    )
    .with_shutdown(shutdown.clone());

    Harness {
        shim,
        runtime,
        images,
        coordinator,
        shutdown,
    }
}

pub fn sandbox_config(name: &str) -> PodSandboxConfig {
    PodSandboxConfig {
        metadata: Some(PodSandboxMetadata {
            name: name.to_string(),
            uid: uuid::Uuid::new_v4().to_string(),
            namespace: "default".to_string(),
            attempt: 0,
        }),
        ..Default::default()
    }
}

pub fn container_config(name: &str) -> ContainerConfig {
    ContainerConfig {
        metadata: Some(ContainerMetadata {
            name: name.to_string(),
            attempt: 0,
        }),
        image: Some(ImageSpec {
            image: "docker.io/library/busybox:latest".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Wait until a server has created its socket.
pub async fn wait_for_socket(path: &Path) {
    for _ in 0..200 {
        if path.exists() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("socket {} never appeared", path.display());
}
