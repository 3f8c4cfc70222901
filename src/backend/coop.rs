//! Sessions inside cluster pods, reached through the pod's web terminal.
//!
//! When the terminal server keeps a local proxy session for the pod, calls
//! go to that session. Otherwise each call opens a one-shot tunnel, talks
//! to the web terminal's HTTP API, and closes the tunnel again.

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::addressing::ResolvedTarget;
use crate::config::CoopConfig;
use crate::error::{BackendError, TunnelError};
use crate::process::{find_in_path, is_executable, run_interactive};
use crate::shutdown::ShutdownReceiver;
use crate::tmux::{last_lines, TmuxClient};
use crate::tunnel::{PortForwarder, TunnelConnection};

const ATTACH_CLIENT: &str = "coop";

/// Web-terminal connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoopSettings {
    pub remote_port: u16,
    pub open_timeout: Duration,
    pub http_timeout: Duration,
    pub token: Option<String>,
    pub attach_binary: Option<String>,
}

impl CoopSettings {
    pub fn from_config(cfg: &CoopConfig) -> Self {
        Self {
            remote_port: cfg.remote_port,
            open_timeout: cfg.open_timeout(),
            http_timeout: cfg.http_timeout(),
            token: cfg.token.clone().filter(|t| !t.trim().is_empty()),
            attach_binary: cfg.attach_binary.clone(),
        }
    }
}

/// `/api/v1/health` response body.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct CoopHealth {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub ready: bool,
}

impl CoopHealth {
    /// The agent process is up inside the pod.
    pub fn is_running(&self) -> bool {
        self.status == "running" && self.pid.is_some()
    }
}

#[derive(Debug, Serialize)]
struct NudgeRequest<'a> {
    message: &'a str,
}

/// `/api/v1/agent/nudge` response body.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct NudgeOutcome {
    #[serde(default)]
    pub delivered: bool,
    #[serde(default)]
    pub state_before: Option<String>,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Serialize)]
struct KeysRequest<'a> {
    keys: Vec<&'a str>,
}

/// Minimal client for the web terminal's HTTP API.
#[derive(Debug, Clone)]
pub struct CoopClient {
    http: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl CoopClient {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, BackendError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("podbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| BackendError::CommandFailed(format!("web terminal client: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    async fn send(
        &self,
        path: &str,
        req: reqwest::RequestBuilder,
    ) -> Result<reqwest::Response, BackendError> {
        let req = match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        };
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(BackendError::CommandFailed(format!(
                "web terminal {path} returned {}",
                status.as_u16()
            )));
        }
        Ok(resp)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, BackendError> {
        let req = self.http.get(format!("{}{path}", self.base_url));
        self.send(path, req).await
    }

    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<reqwest::Response, BackendError> {
        let req = self.http.post(format!("{}{path}", self.base_url)).json(body);
        self.send(path, req).await
    }

    pub async fn health(&self) -> Result<CoopHealth, BackendError> {
        Ok(self.get("/api/v1/health").await?.json().await?)
    }

    /// Current screen text, trimmed to the last `lines` lines (0 = all).
    pub async fn screen_text(&self, lines: usize) -> Result<String, BackendError> {
        let body = self.get("/api/v1/screen/text").await?.text().await?;
        Ok(last_lines(&body, lines))
    }

    /// Deliver a message to the agent. Fails when the agent refuses it.
    pub async fn nudge(&self, message: &str) -> Result<NudgeOutcome, BackendError> {
        let outcome: NudgeOutcome = self
            .post("/api/v1/agent/nudge", &NudgeRequest { message })
            .await?
            .json()
            .await?;
        if !outcome.delivered {
            return Err(BackendError::CommandFailed(format!(
                "nudge not delivered: {}",
                outcome.reason.as_deref().unwrap_or("unknown")
            )));
        }
        Ok(outcome)
    }

    /// Press named keys (`Enter`, `Escape`, ...). A blank list sends nothing.
    pub async fn send_keys(&self, keys: &str) -> Result<(), BackendError> {
        let keys: Vec<&str> = keys.split_whitespace().collect();
        if keys.is_empty() {
            return Ok(());
        }
        self.post("/api/v1/input/keys", &KeysRequest { keys }).await?;
        Ok(())
    }
}

/// Locate the attach client: configured path, `PATH`, then the usual
/// source-checkout build directories.
pub fn find_attach_client(configured: Option<&str>) -> Option<PathBuf> {
    if let Some(path) = configured.map(str::trim).filter(|p| !p.is_empty()) {
        let path = PathBuf::from(path);
        return is_executable(&path).then_some(path);
    }
    if let Some(found) = find_in_path(ATTACH_CLIENT) {
        return Some(found);
    }
    let home = dirs::home_dir()?;
    ["release", "debug"]
        .iter()
        .map(|profile| home.join("coop").join("target").join(profile).join(ATTACH_CLIENT))
        .find(|candidate| is_executable(candidate))
}

#[derive(Clone)]
pub struct CoopBackend {
    target: ResolvedTarget,
    tmux: Arc<dyn TmuxClient>,
    forwarder: Arc<dyn PortForwarder>,
    settings: CoopSettings,
    shutdown: ShutdownReceiver,
}

impl CoopBackend {
    pub fn new(
        target: ResolvedTarget,
        tmux: Arc<dyn TmuxClient>,
        forwarder: Arc<dyn PortForwarder>,
        settings: CoopSettings,
        shutdown: ShutdownReceiver,
    ) -> Self {
        Self {
            target,
            tmux,
            forwarder,
            settings,
            shutdown,
        }
    }

    pub fn target(&self) -> &ResolvedTarget {
        &self.target
    }

    pub fn settings(&self) -> &CoopSettings {
        &self.settings
    }

    /// Open a tunnel to the pod. The caller owns it and must close it.
    pub async fn open_tunnel(&self) -> Result<TunnelConnection, TunnelError> {
        let mut tunnel = TunnelConnection::new(
            Arc::clone(&self.forwarder),
            self.target.namespace.clone(),
            self.target.pod_name.clone(),
            self.settings.remote_port,
        );
        let mut shutdown = self.shutdown.clone();
        tunnel.open(self.settings.open_timeout, &mut shutdown).await?;
        Ok(tunnel)
    }

    fn client_for(&self, tunnel: &TunnelConnection) -> Result<CoopClient, BackendError> {
        CoopClient::new(
            tunnel.local_url()?,
            self.settings.token.clone(),
            self.settings.http_timeout,
        )
    }

    /// Run one API call over a tunnel that lives exactly as long as the call.
    async fn one_shot<T, F, Fut>(&self, call: F) -> Result<T, BackendError>
    where
        F: FnOnce(CoopClient) -> Fut,
        Fut: Future<Output = Result<T, BackendError>>,
    {
        let mut tunnel = self.open_tunnel().await?;
        let result = match self.client_for(&tunnel) {
            Ok(client) => call(client).await,
            Err(e) => Err(e),
        };
        tunnel.close().await;
        result
    }

    pub async fn has_session(&self, name: &str) -> bool {
        if self.tmux.has_session(name).await {
            return true;
        }
        match self.one_shot(|client| async move { client.health().await }).await {
            Ok(h) => h.is_running(),
            Err(e) => {
                tracing::debug!(pod = %self.target.pod_name, error = %e, "health probe failed");
                false
            }
        }
    }

    pub async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, BackendError> {
        if self.tmux.has_session(name).await {
            return self.tmux.capture_pane(name, lines).await;
        }
        self.one_shot(|client| async move { client.screen_text(lines).await })
            .await
    }

    /// Keys go through the server's proxy session when there is one,
    /// otherwise straight to the web terminal.
    pub async fn send_keys(&self, name: &str, keys: &str) -> Result<(), BackendError> {
        if self.tmux.has_session(name).await {
            return self.tmux.send_keys(name, keys, false).await;
        }
        let keys = keys.to_string();
        self.one_shot(|client| async move { client.send_keys(&keys).await })
            .await
    }

    /// Nudges always use the web terminal, which reports whether the
    /// agent accepted the message.
    pub async fn nudge(&self, _name: &str, message: &str) -> Result<(), BackendError> {
        let message = message.to_string();
        let outcome = self
            .one_shot(|client| async move { client.nudge(&message).await })
            .await?;
        tracing::debug!(
            pod = %self.target.pod_name,
            state_before = outcome.state_before.as_deref().unwrap_or("-"),
            "nudge delivered"
        );
        Ok(())
    }

    /// Run the attach client against a fresh tunnel and forward its exit
    /// code. The tunnel is closed whatever the client does.
    pub async fn attach(&self, _name: &str) -> Result<i32, BackendError> {
        let client = find_attach_client(self.settings.attach_binary.as_deref()).ok_or_else(|| {
            BackendError::CommandFailed(
                "coop attach client not found (looked in PATH and ~/coop/target/{release,debug})"
                    .into(),
            )
        })?;
        let mut tunnel = self.open_tunnel().await?;
        let result = match tunnel.local_url() {
            Ok(url) => {
                tracing::info!(pod = %self.target.pod_name, url = %url, "attaching");
                let program = client.to_string_lossy().to_string();
                run_interactive(&program, &["attach".to_string(), url])
                    .await
                    .map_err(BackendError::from)
            }
            Err(e) => Err(e.into()),
        };
        tunnel.close().await;
        result
    }
}
