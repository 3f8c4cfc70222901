//! Configuration data model.
//!
//! Struct/enum definitions plus default values. Loading and environment
//! overrides live in `config::mod` and `config::env`.

use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

use super::defaults::{
    DEFAULT_COOP_REMOTE_PORT, DEFAULT_HEALTH_INTERVAL_SECS, DEFAULT_HTTP_TIMEOUT_SECS,
    DEFAULT_KUBECTL, DEFAULT_MAX_CONSECUTIVE_FAILURES, DEFAULT_NAMESPACE,
    DEFAULT_OPEN_TIMEOUT_SECS, DEFAULT_POLL_INTERVAL_SECS, DEFAULT_REGISTRY_BINARY,
    DEFAULT_SCREEN_SESSION, DEFAULT_TMUX,
};

/// Top-level runtime configuration, deserialized straight from TOML.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub cluster: ClusterConfig,
    pub tmux: TmuxConfig,
    pub registry: RegistryConfig,
    pub coop: CoopConfig,
    pub server: ServerConfig,
}

impl Config {
    /// Effective namespace after env/config resolution.
    pub fn namespace(&self) -> &str {
        self.cluster
            .namespace
            .as_deref()
            .map(str::trim)
            .filter(|ns| !ns.is_empty())
            .unwrap_or(DEFAULT_NAMESPACE)
    }
}

/// `[cluster]`: how to reach the Kubernetes control plane.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ClusterConfig {
    pub namespace: Option<String>,
    pub kubeconfig: Option<String>,
    pub kubectl: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            kubeconfig: None,
            kubectl: DEFAULT_KUBECTL.into(),
        }
    }
}

/// `[tmux]`: the local multiplexer host.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TmuxConfig {
    pub binary: String,
    /// Named server socket (`tmux -L`); the default server when unset.
    pub socket: Option<String>,
}

impl Default for TmuxConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_TMUX.into(),
            socket: None,
        }
    }
}

/// `[registry]`: the agent registry CLI.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RegistryConfig {
    pub binary: String,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_REGISTRY_BINARY.into(),
        }
    }
}

/// `[coop]`: web-terminal tunnel settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoopConfig {
    pub remote_port: u16,
    /// Explicit path to the attach client; searched for when unset.
    pub attach_binary: Option<String>,
    pub open_timeout_secs: u64,
    pub http_timeout_secs: u64,
    /// Bearer token sent with every web-terminal request.
    pub token: Option<String>,
}

impl Default for CoopConfig {
    fn default() -> Self {
        Self {
            remote_port: DEFAULT_COOP_REMOTE_PORT,
            attach_binary: None,
            open_timeout_secs: DEFAULT_OPEN_TIMEOUT_SECS,
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            token: None,
        }
    }
}

impl CoopConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// How a proxy session reaches the pod's terminal.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// Run the web-terminal attach client against the tunnel URL.
    #[default]
    Coop,
    /// `kubectl exec` into the container's screen session.
    Screen,
}

/// `[server]`: terminal-server loop settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ServerConfig {
    pub poll_interval_secs: u64,
    pub health_interval_secs: u64,
    pub screen_session: String,
    pub max_consecutive_failures: u32,
    pub proxy_mode: ProxyMode,
    pub lock_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            health_interval_secs: DEFAULT_HEALTH_INTERVAL_SECS,
            screen_session: DEFAULT_SCREEN_SESSION.into(),
            max_consecutive_failures: DEFAULT_MAX_CONSECUTIVE_FAILURES,
            proxy_mode: ProxyMode::Coop,
            lock_dir: None,
        }
    }
}

impl ServerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn health_interval(&self) -> Duration {
        Duration::from_secs(self.health_interval_secs)
    }

    /// Directory holding single-instance lock files.
    pub fn lock_dir(&self) -> PathBuf {
        match self.lock_dir.as_deref().map(str::trim) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::runtime_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("podbridge"),
        }
    }
}
