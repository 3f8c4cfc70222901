//! Terminal server: keeps local proxy sessions in sync with a rig's pods.
//!
//! Two loops share one [`ConnectionTable`]. Discovery diffs the registry's
//! pod inventory against the table, tearing down vanished pods before
//! opening new ones. Health probes every tracked connection, re-opens
//! degraded ones in place, and tears down entries that stay broken.
//!
//! Tunnels and tmux sessions are never touched while the table lock is
//! held. Each entry's tunnel sits behind its own lock, so a teardown waits
//! for an in-flight re-open on the same pod before closing it.

mod table;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};

use crate::addressing::{session_name_for_pod, AgentAddress};
use crate::backend::find_attach_client;
use crate::cluster::{ClusterClient, Kubectl};
use crate::config::{Config, ProxyMode};
use crate::error::BackendError;
use crate::registry::{AgentRegistry, RegistryPod};
use crate::shutdown::{is_cancelled, wait_for_cancellation, ShutdownReceiver};
use crate::tmux::TmuxClient;
use crate::tunnel::{PortForwarder, TunnelConnection};

pub use table::{ConnectionState, ConnectionTable, Entry, FailureOutcome, ProbeTarget, SharedTunnel};

/// Server tuning, resolved from config and command-line flags.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub rig: String,
    pub namespace: String,
    pub poll_interval: Duration,
    pub health_interval: Duration,
    pub screen_session: String,
    pub max_consecutive_failures: u32,
    pub proxy_mode: ProxyMode,
    pub remote_port: u16,
    pub open_timeout: Duration,
    pub attach_binary: Option<String>,
    pub kubectl: Kubectl,
}

impl ServerSettings {
    pub fn from_config(config: &Config, rig: &str, namespace: &str) -> Self {
        Self {
            rig: rig.to_string(),
            namespace: namespace.to_string(),
            poll_interval: config.server.poll_interval(),
            health_interval: config.server.health_interval(),
            screen_session: config.server.screen_session.clone(),
            max_consecutive_failures: config.server.max_consecutive_failures,
            proxy_mode: config.server.proxy_mode,
            remote_port: config.coop.remote_port,
            open_timeout: config.coop.open_timeout(),
            attach_binary: config.coop.attach_binary.clone(),
            kubectl: Kubectl::from_config(&config.cluster),
        }
    }
}

/// External collaborators the server drives.
#[derive(Clone)]
pub struct ServerDeps {
    pub cluster: Arc<dyn ClusterClient>,
    pub registry: Arc<dyn AgentRegistry>,
    pub tmux: Arc<dyn TmuxClient>,
    pub forwarder: Arc<dyn PortForwarder>,
}

/// One row of a status report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub pod_name: String,
    pub agent_id: String,
    pub session_name: String,
    pub state: ConnectionState,
    pub local_port: Option<u16>,
    pub opened_at: Option<SystemTime>,
    pub last_check: Option<SystemTime>,
    pub failures: u32,
}

/// Point-in-time copy of the connection table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    pub rig: String,
    pub namespace: String,
    pub connections: Vec<ConnectionStatus>,
}

impl ServerStatus {
    pub fn healthy(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.state == ConnectionState::Healthy)
            .count()
    }
}

impl fmt::Display for ServerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "rig {} (namespace {}): {} connection(s), {} healthy",
            self.rig,
            self.namespace,
            self.connections.len(),
            self.healthy()
        )?;
        for c in &self.connections {
            let port = c
                .local_port
                .map(|p| p.to_string())
                .unwrap_or_else(|| "-".into());
            let opened = c
                .opened_at
                .map(httpdate::fmt_http_date)
                .unwrap_or_else(|| "-".into());
            writeln!(
                f,
                "  {:<32} {:<28} {:<9} port={:<5} failures={} opened={}",
                c.pod_name, c.session_name, c.state, port, c.failures, opened
            )?;
        }
        Ok(())
    }
}

/// The standing pod-to-proxy-session bridge for one rig.
#[derive(Clone)]
pub struct TerminalServer {
    settings: Arc<ServerSettings>,
    deps: ServerDeps,
    table: Arc<Mutex<ConnectionTable>>,
    shutdown: ShutdownReceiver,
}

impl TerminalServer {
    pub fn new(settings: ServerSettings, deps: ServerDeps, shutdown: ShutdownReceiver) -> Self {
        Self {
            settings: Arc::new(settings),
            deps,
            table: Arc::new(Mutex::new(ConnectionTable::default())),
            shutdown,
        }
    }

    pub fn settings(&self) -> &ServerSettings {
        &self.settings
    }

    /// Run both loops until shutdown, then tear everything down.
    pub async fn run(&self) -> ServerStatus {
        tracing::info!(
            rig = %self.settings.rig,
            namespace = %self.settings.namespace,
            poll = ?self.settings.poll_interval,
            health = ?self.settings.health_interval,
            mode = ?self.settings.proxy_mode,
            "terminal server starting"
        );
        let discovery = self.clone();
        let health = self.clone();
        let discovery = tokio::spawn(async move { discovery.discovery_loop().await });
        let health = tokio::spawn(async move { health.health_loop().await });
        if let Err(e) = discovery.await {
            tracing::error!(error = %e, "discovery loop panicked");
        }
        if let Err(e) = health.await {
            tracing::error!(error = %e, "health loop panicked");
        }

        let final_status = self.status().await;
        self.shutdown_all().await;
        tracing::info!("terminal server stopped\n{final_status}");
        final_status
    }

    async fn discovery_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(self.settings.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = wait_for_cancellation(&mut shutdown) => break,
                _ = ticker.tick() => {
                    self.discovery_tick().await;
                    let status = self.status().await;
                    tracing::debug!("{status}");
                }
            }
        }
    }

    async fn health_loop(&self) {
        let mut shutdown = self.shutdown.clone();
        let mut ticker = interval(self.settings.health_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick fires at once; nothing is open yet.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = wait_for_cancellation(&mut shutdown) => break,
                _ = ticker.tick() => self.health_tick().await,
            }
        }
    }

    /// One discovery pass: teardown vanished pods, then open new ones.
    ///
    /// A failed registry query leaves the table as it is.
    pub async fn discovery_tick(&self) {
        if is_cancelled(&self.shutdown) {
            return;
        }
        let pods = match self.deps.registry.list_pods(&self.settings.rig).await {
            Ok(pods) => pods,
            Err(e) => {
                tracing::warn!(rig = %self.settings.rig, error = %e, "pod discovery failed");
                return;
            }
        };
        let desired: BTreeMap<String, RegistryPod> = pods
            .into_iter()
            .filter(|p| p.is_live() && !p.pod_name.is_empty())
            .map(|p| (p.pod_name.clone(), p))
            .collect();

        let (vanished, new): (Vec<(String, Entry)>, Vec<RegistryPod>) = {
            let mut table = self.table.lock().await;
            let vanished = table.remove_missing(|pod| desired.contains_key(pod));
            let new = desired
                .values()
                .filter(|p| !table.contains(&p.pod_name))
                .cloned()
                .collect();
            (vanished, new)
        };

        for (pod, entry) in vanished {
            tracing::info!(pod = %pod, session = %entry.session_name, "pod gone; tearing down");
            self.teardown(&pod, entry).await;
        }

        let mut opens = JoinSet::new();
        for pod in new {
            let server = self.clone();
            opens.spawn(async move { server.open_pod(pod).await });
        }
        while let Some(res) = opens.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "open task panicked");
            }
        }
    }

    async fn open_pod(&self, pod: RegistryPod) {
        let summary = match self
            .deps
            .cluster
            .get_pod(&self.settings.namespace, &pod.pod_name)
            .await
        {
            Ok(Some(summary)) if summary.is_running() => summary,
            Ok(Some(summary)) => {
                tracing::debug!(pod = %pod.pod_name, phase = ?summary.phase, "pod not running yet");
                return;
            }
            Ok(None) => {
                tracing::debug!(pod = %pod.pod_name, "registered pod not in cluster");
                return;
            }
            Err(e) => {
                tracing::warn!(pod = %pod.pod_name, error = %e, "pod lookup failed");
                return;
            }
        };

        let session_name = AgentAddress::parse(&pod.agent_id)
            .ok()
            .filter(|addr| !addr.is_raw_pod())
            .map(|addr| addr.session_name())
            .unwrap_or_else(|| session_name_for_pod(&summary));
        let screen = if pod.screen_session.trim().is_empty() {
            self.settings.screen_session.clone()
        } else {
            pod.screen_session.trim().to_string()
        };

        let tunnel: SharedTunnel = Arc::new(Mutex::new(TunnelConnection::new(
            Arc::clone(&self.deps.forwarder),
            self.settings.namespace.clone(),
            pod.pod_name.clone(),
            self.settings.remote_port,
        )));
        let generation = {
            let mut table = self.table.lock().await;
            match table.insert_opening(
                &pod.pod_name,
                &pod.agent_id,
                &session_name,
                &screen,
                Arc::clone(&tunnel),
            ) {
                Some(g) => g,
                None => return,
            }
        };
        tracing::info!(pod = %pod.pod_name, session = %session_name, "opening connection");

        let mut conn = tunnel.lock().await;
        match self
            .connect(&mut conn, &pod.pod_name, &session_name, &screen)
            .await
        {
            Ok(port) => {
                let opened_at = conn.opened_at();
                drop(conn);
                let kept = self
                    .table
                    .lock()
                    .await
                    .mark_open(&pod.pod_name, generation, port, opened_at);
                if kept {
                    tracing::info!(pod = %pod.pod_name, session = %session_name, local_port = port, "connection healthy");
                } else {
                    // Torn down before we took the tunnel lock.
                    tracing::debug!(pod = %pod.pod_name, "entry removed while opening; closing");
                    tunnel.lock().await.close().await;
                    self.kill_proxy(&session_name).await;
                }
            }
            Err(e) => {
                tracing::warn!(pod = %pod.pod_name, error = %e, "connection failed; retrying next tick");
                conn.close().await;
                drop(conn);
                let removed = self
                    .table
                    .lock()
                    .await
                    .remove_generation(&pod.pod_name, generation);
                if removed.is_some() {
                    self.kill_proxy(&session_name).await;
                }
            }
        }
    }

    /// Open the tunnel and (re)create the proxy session around it.
    async fn connect(
        &self,
        conn: &mut TunnelConnection,
        pod: &str,
        session_name: &str,
        screen: &str,
    ) -> Result<u16, BackendError> {
        let mut shutdown = self.shutdown.clone();
        conn.open(self.settings.open_timeout, &mut shutdown).await?;
        let url = conn.local_url()?;
        let argv = self.proxy_argv(pod, &url, screen);
        self.deps.tmux.create_proxy_session(session_name, &argv).await?;
        Ok(conn.local_port()?)
    }

    /// Command the proxy session runs for `pod`.
    pub fn proxy_argv(&self, pod: &str, local_url: &str, screen: &str) -> Vec<String> {
        match self.settings.proxy_mode {
            ProxyMode::Coop => {
                let client = find_attach_client(self.settings.attach_binary.as_deref())
                    .map(|p| p.to_string_lossy().to_string())
                    .unwrap_or_else(|| "coop".to_string());
                vec![client, "attach".into(), local_url.to_string()]
            }
            ProxyMode::Screen => {
                self.settings
                    .kubectl
                    .screen_exec_argv(&self.settings.namespace, pod, screen)
            }
        }
    }

    /// One health pass over every open connection.
    pub async fn health_tick(&self) {
        if is_cancelled(&self.shutdown) {
            return;
        }
        let targets = self.table.lock().await.probe_targets();
        let mut probes = JoinSet::new();
        for target in targets {
            let server = self.clone();
            probes.spawn(async move { server.check(target).await });
        }
        while let Some(res) = probes.join_next().await {
            if let Err(e) = res {
                tracing::error!(error = %e, "health task panicked");
            }
        }
    }

    async fn check(&self, target: ProbeTarget) {
        let healthy = match self.probe(&target).await {
            Some(healthy) => healthy,
            None => return,
        };
        let now = SystemTime::now();
        if healthy {
            self.table
                .lock()
                .await
                .record_success(&target.pod_name, target.generation, now);
            return;
        }

        let outcome = self.table.lock().await.record_failure(
            &target.pod_name,
            target.generation,
            now,
            self.settings.max_consecutive_failures,
        );
        match outcome {
            FailureOutcome::Stale => {}
            FailureOutcome::TearDown(entry) => {
                tracing::warn!(
                    pod = %target.pod_name,
                    failures = entry.failures,
                    "connection stayed degraded; tearing down"
                );
                self.teardown(&target.pod_name, entry).await;
            }
            FailureOutcome::Reopen => self.reopen(&target).await,
        }
    }

    /// `None` when the probe itself could not run (cluster query error).
    async fn probe(&self, target: &ProbeTarget) -> Option<bool> {
        if !target.tunnel.lock().await.is_alive().await {
            tracing::debug!(pod = %target.pod_name, "tunnel not alive");
            return Some(false);
        }
        match self
            .deps
            .cluster
            .get_pod(&self.settings.namespace, &target.pod_name)
            .await
        {
            Ok(Some(pod)) if pod.is_running() => {}
            Ok(_) => {
                tracing::debug!(pod = %target.pod_name, "pod not running");
                return Some(false);
            }
            Err(e) => {
                tracing::warn!(pod = %target.pod_name, error = %e, "health phase check failed");
                return None;
            }
        }
        match self.deps.tmux.pane_dead(&target.session_name).await {
            Ok(dead) => Some(!dead),
            Err(e) => {
                tracing::warn!(session = %target.session_name, error = %e, "pane check failed");
                None
            }
        }
    }

    async fn reopen(&self, target: &ProbeTarget) {
        tracing::info!(pod = %target.pod_name, "connection degraded; reopening in place");
        let mut conn = target.tunnel.lock().await;
        // The port is released by the close below; forget it first.
        if !self
            .table
            .lock()
            .await
            .mark_closed(&target.pod_name, target.generation)
        {
            return;
        }
        conn.close().await;
        match self
            .connect(
                &mut conn,
                &target.pod_name,
                &target.session_name,
                &target.screen_session,
            )
            .await
        {
            Ok(port) => {
                let opened_at = conn.opened_at();
                drop(conn);
                self.table
                    .lock()
                    .await
                    .mark_open(&target.pod_name, target.generation, port, opened_at);
            }
            Err(e) => {
                tracing::warn!(pod = %target.pod_name, error = %e, "reopen failed");
                conn.close().await;
            }
        }
    }

    /// Close an entry's tunnel and kill its proxy session. The entry must
    /// already be out of the table.
    async fn teardown(&self, pod: &str, entry: Entry) {
        entry.tunnel.lock().await.close().await;
        self.kill_proxy(&entry.session_name).await;
        tracing::debug!(pod, session = %entry.session_name, "torn down");
    }

    async fn kill_proxy(&self, session: &str) {
        if let Err(e) = self.deps.tmux.kill_session(session).await {
            tracing::warn!(session, error = %e, "failed to kill proxy session");
        }
    }

    /// Tear down every tracked connection.
    pub async fn shutdown_all(&self) {
        let entries = self.table.lock().await.drain();
        for (pod, entry) in entries {
            self.teardown(&pod, entry).await;
        }
    }

    /// Consistent snapshot of the table.
    pub async fn status(&self) -> ServerStatus {
        let table = self.table.lock().await;
        let connections = table
            .entries()
            .map(|(pod, e)| ConnectionStatus {
                pod_name: pod.clone(),
                agent_id: e.agent_id.clone(),
                session_name: e.session_name.clone(),
                state: e.state,
                local_port: e.local_port,
                opened_at: e.opened_at,
                last_check: e.last_check,
                failures: e.failures,
            })
            .collect();
        drop(table);
        ServerStatus {
            rig: self.settings.rig.clone(),
            namespace: self.settings.namespace.clone(),
            connections,
        }
    }
}
