use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Result, ShimError};

/// Default Unix socket the shim serves CRI on.
pub const DEFAULT_SOCKET: &str = "/var/run/contivshim/contivshim.sock";

/// Default upstream CRI runtime socket.
pub const DEFAULT_RUNTIME_ENDPOINT: &str = "/run/containerd/containerd.sock";

/// Default etcd endpoint.
pub const DEFAULT_ETCD_ENDPOINT: &str = "http://127.0.0.1:2379";

/// Shim configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    /// Unix socket the shim listens on
    pub socket: PathBuf,

    /// Log level
    pub log_level: LogLevel,

    /// Log output format
    pub log_format: LogFormat,

    /// Delegate CRI runtime
    pub upstream: UpstreamConfig,

    /// Coordination store
    pub coordination: CoordinationConfig,
}

impl Default for ShimConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from(DEFAULT_SOCKET),
            log_level: LogLevel::Info,
            log_format: LogFormat::Text,
            upstream: UpstreamConfig::default(),
            coordination: CoordinationConfig::default(),
        }
    }
}

impl ShimConfig {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ShimError::ConfigError(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config: ShimConfig = serde_yaml::from_str(&raw)?;
        Ok(config)
    }

    /// Load from `path` if given, otherwise start from defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Reject configurations the shim cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.socket.as_os_str().is_empty() {
            return Err(ShimError::ConfigError("socket path is empty".to_string()));
        }
        if self.upstream.runtime_endpoint.as_os_str().is_empty() {
            return Err(ShimError::ConfigError(
                "upstream runtime endpoint is empty".to_string(),
            ));
        }
        if self.upstream.connect_timeout_ms == 0 {
            return Err(ShimError::ConfigError(
                "upstream connect_timeout_ms must be > 0".to_string(),
            ));
        }
        self.coordination.validate()
    }
}

/// Upstream CRI runtime the shim delegates to
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Socket serving the CRI RuntimeService
    pub runtime_endpoint: PathBuf,

    /// Socket serving the CRI ImageService (defaults to the runtime socket)
    pub image_endpoint: Option<PathBuf>,

    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            runtime_endpoint: PathBuf::from(DEFAULT_RUNTIME_ENDPOINT),
            image_endpoint: None,
            connect_timeout_ms: 5000,
        }
    }
}

impl UpstreamConfig {
    /// Socket serving the ImageService.
    pub fn image_endpoint(&self) -> &Path {
        self.image_endpoint
            .as_deref()
            .unwrap_or(self.runtime_endpoint.as_path())
    }

    /// Connect timeout.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Coordination store written on every sandbox creation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Store endpoints
    pub endpoints: Vec<String>,

    /// Dial timeout in milliseconds
    pub dial_timeout_ms: u64,

    /// Per-write timeout in milliseconds
    pub request_timeout_ms: u64,

    /// Key written on sandbox creation
    pub key: String,

    /// Value written on sandbox creation
    pub value: String,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            endpoints: vec![DEFAULT_ETCD_ENDPOINT.to_string()],
            dial_timeout_ms: 5000,
            request_timeout_ms: 5000,
            key: "sample_key".to_string(),
            value: "sample_value".to_string(),
        }
    }
}

impl CoordinationConfig {
    /// Dial timeout.
    pub fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    /// Per-write timeout.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn validate(&self) -> Result<()> {
        if self.endpoints.iter().all(|e| e.trim().is_empty()) {
            return Err(ShimError::ConfigError(
                "coordination endpoints are empty".to_string(),
            ));
        }
        if self.dial_timeout_ms == 0 || self.request_timeout_ms == 0 {
            return Err(ShimError::ConfigError(
                "coordination timeouts must be > 0".to_string(),
            ));
        }
        if self.key.is_empty() {
            return Err(ShimError::ConfigError(
                "coordination key is empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// Log level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per event.
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: '{}' (supported: text, json)", s)),
        }
    }
}
