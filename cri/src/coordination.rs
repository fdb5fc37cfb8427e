//! Coordination store written on sandbox creation.
//!
//! A fresh session is dialed for every `RunPodSandbox`, used for exactly
//! one put, and dropped before the call returns. Dial and put are each
//! bounded by their own timeout and by the caller deadline.

use std::time::Duration;

use async_trait::async_trait;
use etcd_client::{Client, ConnectOptions};

use contivshim_core::{CallContext, CoordinationConfig, Result, ShimError};

/// Client able to open sessions against the coordination store.
#[async_trait]
pub trait CoordinationClient: Send + Sync {
    /// Open a new session.
    async fn dial(&self, ctx: &CallContext) -> Result<Box<dyn CoordinationSession>>;
}

/// An open connection to the coordination store. Dropping it closes it.
#[async_trait]
pub trait CoordinationSession: Send {
    /// Write a single key.
    async fn put(&mut self, ctx: &CallContext, key: &str, value: &str) -> Result<()>;
}

/// The record written on every sandbox creation, with its timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinationRecord {
    pub key: String,
    pub value: String,
    pub dial_timeout: Duration,
    pub request_timeout: Duration,
}

impl From<&CoordinationConfig> for CoordinationRecord {
    fn from(config: &CoordinationConfig) -> Self {
        Self {
            key: config.key.clone(),
            value: config.value.clone(),
            dial_timeout: config.dial_timeout(),
            request_timeout: config.request_timeout(),
        }
    }
}

impl CoordinationRecord {
    /// Dial the store and write the record. The session is released on
    /// every path before this returns.
    pub async fn write(&self, client: &dyn CoordinationClient, ctx: &CallContext) -> Result<()> {
        let mut session = ctx
            .bounded(self.dial_timeout, "coordination store dial", client.dial(ctx))
            .await?;

        ctx.bounded(
            self.request_timeout,
            "coordination store put",
            session.put(ctx, &self.key, &self.value),
        )
        .await
    }
}

/// etcd v3 backed coordination client.
pub struct EtcdCoordinator {
    endpoints: Vec<String>,
    dial_timeout: Duration,
    request_timeout: Duration,
}

impl EtcdCoordinator {
    /// Create a client for the configured endpoints.
    pub fn new(config: &CoordinationConfig) -> Result<Self> {
        let endpoints: Vec<String> = config
            .endpoints
            .iter()
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty())
            .collect();
        if endpoints.is_empty() {
            return Err(ShimError::ConfigError(
                "coordination endpoints are empty".to_string(),
            ));
        }

        Ok(Self {
            endpoints,
            dial_timeout: config.dial_timeout(),
            request_timeout: config.request_timeout(),
        })
    }

    /// Configured endpoints.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    fn store_error(endpoints: &[String], err: etcd_client::Error) -> ShimError {
        ShimError::CoordinationError {
            endpoints: endpoints.join(","),
            message: err.to_string(),
        }
    }
}

#[async_trait]
impl CoordinationClient for EtcdCoordinator {
    async fn dial(&self, _ctx: &CallContext) -> Result<Box<dyn CoordinationSession>> {
        let options = ConnectOptions::new()
            .with_connect_timeout(self.dial_timeout)
            .with_timeout(self.request_timeout);

        let client = Client::connect(self.endpoints.as_slice(), Some(options))
            .await
            .map_err(|e| {
                tracing::error!(endpoints = ?self.endpoints, error = %e, "Failed to create etcd client");
                Self::store_error(&self.endpoints, e)
            })?;

        Ok(Box::new(EtcdSession {
            client,
            endpoints: self.endpoints.clone(),
        }))
    }
}

struct EtcdSession {
    client: Client,
    endpoints: Vec<String>,
}

#[async_trait]
impl CoordinationSession for EtcdSession {
    async fn put(&mut self, _ctx: &CallContext, key: &str, value: &str) -> Result<()> {
        self.client
            .put(key, value, None)
            .await
            .map(|_| ())
            .map_err(|e| EtcdCoordinator::store_error(&self.endpoints, e))
    }
}
