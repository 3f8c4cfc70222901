//! Shared test doubles for the cluster, registry, tmux, and forwarder seams.
//!
//! Every fake records the calls it sees so tests can assert on side effects
//! (or their absence) without a real cluster or tmux server.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::cluster::{ClusterClient, PodPhase, PodSummary};
use crate::error::{BackendError, DiscoveryError, ProcessError, TunnelError};
use crate::registry::{parse_notes, AgentRecord, AgentRegistry, RegistryPod};
use crate::tmux::{last_lines, TmuxClient};
use crate::tunnel::{ForwardProcess, PortForwarder};

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

fn query_failure(what: &str) -> DiscoveryError {
    DiscoveryError::Query(ProcessError::Failed {
        context: what.to_string(),
        detail: "injected failure".to_string(),
    })
}

// ---------------------------------------------------------------------------
// Cluster
// ---------------------------------------------------------------------------

pub fn pod(name: &str, phase: PodPhase, labels: &[(&str, &str)]) -> PodSummary {
    PodSummary {
        name: name.to_string(),
        phase,
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[derive(Debug, Default)]
pub struct FakeCluster {
    pods: Mutex<Vec<PodSummary>>,
    list_calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeCluster {
    pub fn with_pods(pods: Vec<PodSummary>) -> Self {
        Self {
            pods: Mutex::new(pods),
            ..Self::default()
        }
    }

    pub fn add_pod(&self, pod: PodSummary) {
        lock(&self.pods).push(pod);
    }

    pub fn remove_pod(&self, name: &str) {
        lock(&self.pods).retain(|p| p.name != name);
    }

    pub fn set_phase(&self, name: &str, phase: PodPhase) {
        for p in lock(&self.pods).iter_mut().filter(|p| p.name == name) {
            p.phase = phase.clone();
        }
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Selectors passed to `list_pods`, in call order.
    pub fn list_calls(&self) -> Vec<String> {
        lock(&self.list_calls).clone()
    }
}

fn matches_selector(pod: &PodSummary, selector: &str) -> bool {
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => pod.labels.get(k).map(String::as_str) == Some(v),
            None => false,
        })
}

#[async_trait]
impl ClusterClient for FakeCluster {
    async fn get_pod(
        &self,
        _namespace: &str,
        name: &str,
    ) -> Result<Option<PodSummary>, DiscoveryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(query_failure("kubectl get pod"));
        }
        Ok(lock(&self.pods).iter().find(|p| p.name == name).cloned())
    }

    async fn list_pods(
        &self,
        _namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, DiscoveryError> {
        lock(&self.list_calls).push(selector.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(query_failure("kubectl get pods"));
        }
        Ok(lock(&self.pods)
            .iter()
            .filter(|p| matches_selector(p, selector))
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

pub fn record(id: &str, labels: &[(&str, &str)], notes: &str) -> AgentRecord {
    AgentRecord {
        id: id.to_string(),
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        notes: parse_notes(notes),
    }
}

pub fn registry_pod(agent_id: &str, pod_name: &str) -> RegistryPod {
    RegistryPod {
        agent_id: agent_id.to_string(),
        pod_name: pod_name.to_string(),
        pod_status: "running".to_string(),
        ..RegistryPod::default()
    }
}

#[derive(Debug, Default)]
pub struct FakeRegistry {
    agents: Mutex<HashMap<String, AgentRecord>>,
    pods: Mutex<HashMap<String, Vec<RegistryPod>>>,
    agent_calls: Mutex<Vec<String>>,
    fail: AtomicBool,
}

impl FakeRegistry {
    pub fn insert_agent(&self, record: AgentRecord) {
        lock(&self.agents).insert(record.id.clone(), record);
    }

    pub fn set_pods(&self, rig: &str, pods: Vec<RegistryPod>) {
        lock(&self.pods).insert(rig.to_string(), pods);
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn agent_calls(&self) -> Vec<String> {
        lock(&self.agent_calls).clone()
    }
}

#[async_trait]
impl AgentRegistry for FakeRegistry {
    async fn agent(&self, id: &str) -> Result<Option<AgentRecord>, DiscoveryError> {
        lock(&self.agent_calls).push(id.to_string());
        if self.fail.load(Ordering::SeqCst) {
            return Err(query_failure("bd show"));
        }
        Ok(lock(&self.agents).get(id).cloned())
    }

    async fn list_pods(&self, rig: &str) -> Result<Vec<RegistryPod>, DiscoveryError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(query_failure("bd agent pod-list"));
        }
        Ok(lock(&self.pods)
            .get(rig)
            .map(|pods| pods.iter().filter(|p| p.is_live()).cloned().collect())
            .unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Tmux
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default)]
struct FakeSession {
    text: String,
    dead: bool,
    argv: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FakeTmux {
    sessions: Mutex<BTreeMap<String, FakeSession>>,
    created: Mutex<Vec<(String, Vec<String>)>>,
    killed: Mutex<Vec<String>>,
    keys: Mutex<Vec<(String, String, bool)>>,
}

impl FakeTmux {
    pub fn add_session(&self, name: &str, text: &str) {
        lock(&self.sessions).insert(
            name.to_string(),
            FakeSession {
                text: text.to_string(),
                ..FakeSession::default()
            },
        );
    }

    pub fn set_dead(&self, name: &str, dead: bool) {
        if let Some(s) = lock(&self.sessions).get_mut(name) {
            s.dead = dead;
        }
    }

    /// `(session, argv)` for every proxy session created.
    pub fn created(&self) -> Vec<(String, Vec<String>)> {
        lock(&self.created).clone()
    }

    pub fn killed(&self) -> Vec<String> {
        lock(&self.killed).clone()
    }

    pub fn session_names(&self) -> Vec<String> {
        lock(&self.sessions).keys().cloned().collect()
    }

    /// `(keys, literal)` sent to `session`, in order.
    pub fn keys(&self, session: &str) -> Vec<(String, bool)> {
        lock(&self.keys)
            .iter()
            .filter(|(s, _, _)| s == session)
            .map(|(_, k, literal)| (k.clone(), *literal))
            .collect()
    }

    pub fn argv(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.sessions).get(name).map(|s| s.argv.clone())
    }
}

#[async_trait]
impl TmuxClient for FakeTmux {
    async fn has_session(&self, session: &str) -> bool {
        lock(&self.sessions).contains_key(session)
    }

    async fn capture_pane(&self, session: &str, lines: usize) -> Result<String, BackendError> {
        lock(&self.sessions)
            .get(session)
            .map(|s| last_lines(&s.text, lines))
            .ok_or_else(|| BackendError::SessionNotFound(session.to_string()))
    }

    async fn create_proxy_session(
        &self,
        session: &str,
        argv: &[String],
    ) -> Result<(), BackendError> {
        lock(&self.created).push((session.to_string(), argv.to_vec()));
        lock(&self.sessions).insert(
            session.to_string(),
            FakeSession {
                argv: argv.to_vec(),
                ..FakeSession::default()
            },
        );
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), BackendError> {
        if lock(&self.sessions).remove(session).is_some() {
            lock(&self.killed).push(session.to_string());
        }
        Ok(())
    }

    async fn pane_dead(&self, session: &str) -> Result<bool, BackendError> {
        Ok(lock(&self.sessions).get(session).map_or(true, |s| s.dead))
    }

    async fn send_keys(&self, session: &str, keys: &str, literal: bool) -> Result<(), BackendError> {
        if !lock(&self.sessions).contains_key(session) {
            return Err(BackendError::SessionNotFound(session.to_string()));
        }
        lock(&self.keys).push((session.to_string(), keys.to_string(), literal));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Forwarder
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
enum ForwardMode {
    Listen,
    NeverReady,
    ExitImmediately(String),
}

/// Forwarder whose processes are in-memory. In the default mode each
/// process listens on its local port so readiness probes succeed.
#[derive(Debug)]
pub struct FakeForwarder {
    mode: ForwardMode,
    live: Arc<AtomicUsize>,
    spawned: Mutex<Vec<(String, u16)>>,
    exits: Mutex<Vec<(String, Arc<AtomicBool>)>>,
    refused: Mutex<Vec<String>>,
}

impl Default for FakeForwarder {
    fn default() -> Self {
        Self::with_mode(ForwardMode::Listen)
    }
}

impl FakeForwarder {
    fn with_mode(mode: ForwardMode) -> Self {
        Self {
            mode,
            live: Arc::new(AtomicUsize::new(0)),
            spawned: Mutex::new(Vec::new()),
            exits: Mutex::new(Vec::new()),
            refused: Mutex::new(Vec::new()),
        }
    }

    pub fn never_ready() -> Self {
        Self::with_mode(ForwardMode::NeverReady)
    }

    pub fn exits_immediately(detail: &str) -> Self {
        Self::with_mode(ForwardMode::ExitImmediately(detail.to_string()))
    }

    /// Processes spawned and not yet terminated or dropped.
    pub fn live_processes(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Pod names passed to `spawn`, in order.
    pub fn spawned(&self) -> Vec<String> {
        lock(&self.spawned).iter().map(|(p, _)| p.clone()).collect()
    }

    /// Make every process report that it exited.
    pub fn kill_all(&self) {
        for (_, exited) in lock(&self.exits).iter() {
            exited.store(true, Ordering::SeqCst);
        }
    }

    /// Later spawns for `pod` exit immediately, whatever the mode.
    pub fn refuse_pod(&self, pod: &str) {
        lock(&self.refused).push(pod.to_string());
    }

    /// Make the processes forwarding to `pod` report that they exited.
    pub fn kill_pod(&self, pod: &str) {
        for (_, exited) in lock(&self.exits).iter().filter(|(p, _)| p == pod) {
            exited.store(true, Ordering::SeqCst);
        }
    }
}

struct FakeProcess {
    exited: Arc<AtomicBool>,
    detail: String,
    accept_loop: Option<JoinHandle<()>>,
    live: Arc<AtomicUsize>,
    counted: bool,
}

impl FakeProcess {
    fn stop(&mut self) {
        if let Some(task) = self.accept_loop.take() {
            task.abort();
        }
        if self.counted {
            self.counted = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for FakeProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl ForwardProcess for FakeProcess {
    fn try_exit(&mut self) -> Option<String> {
        self.exited
            .load(Ordering::SeqCst)
            .then(|| self.detail.clone())
    }

    async fn terminate(&mut self) {
        self.exited.store(true, Ordering::SeqCst);
        self.stop();
        // Let the aborted accept loop drop its listener.
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl PortForwarder for FakeForwarder {
    async fn spawn(
        &self,
        _namespace: &str,
        pod: &str,
        local_port: u16,
        _remote_port: u16,
    ) -> Result<Box<dyn ForwardProcess>, TunnelError> {
        lock(&self.spawned).push((pod.to_string(), local_port));
        let exited = Arc::new(AtomicBool::new(false));
        let mode = if lock(&self.refused).iter().any(|p| p == pod) {
            ForwardMode::ExitImmediately("connection refused".to_string())
        } else {
            self.mode.clone()
        };
        let (detail, accept_loop) = match &mode {
            ForwardMode::Listen => {
                let listener = TcpListener::bind(("127.0.0.1", local_port))
                    .await
                    .map_err(TunnelError::PortAllocation)?;
                let task = tokio::spawn(async move {
                    while let Ok((stream, _)) = listener.accept().await {
                        drop(stream);
                    }
                });
                ("forwarder stopped".to_string(), Some(task))
            }
            ForwardMode::NeverReady => ("forwarder stopped".to_string(), None),
            ForwardMode::ExitImmediately(detail) => {
                exited.store(true, Ordering::SeqCst);
                (detail.clone(), None)
            }
        };
        lock(&self.exits).push((pod.to_string(), Arc::clone(&exited)));
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeProcess {
            exited,
            detail,
            accept_loop,
            live: Arc::clone(&self.live),
            counted: true,
        }))
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

/// Serve exactly one HTTP response on a fresh loopback port.
///
/// Returns the base URL and a handle resolving to the raw request: head,
/// blank line, then as much body as `Content-Length` announced.
pub async fn serve_http_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("bind test http listener");
    let url = format!("http://{}", listener.local_addr().expect("local addr"));
    let response = format!(
        "HTTP/1.1 {status}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    );
    let handle = tokio::spawn(async move {
        let Ok((mut stream, _)) = listener.accept().await else {
            return String::new();
        };
        let mut raw = Vec::new();
        let mut buf = [0u8; 1024];
        while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
            }
        }
        let head_len = raw
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map_or(raw.len(), |i| i + 4);
        let body_len = content_length(&String::from_utf8_lossy(&raw[..head_len]));
        while raw.len() < head_len + body_len {
            match stream.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => raw.extend_from_slice(&buf[..n]),
            }
        }
        let _ = stream.write_all(response.as_bytes()).await;
        let _ = stream.shutdown().await;
        String::from_utf8_lossy(&raw).to_string()
    });
    (url, handle)
}

fn content_length(head: &str) -> usize {
    head.lines()
        .filter_map(|l| l.split_once(':'))
        .find(|(k, _)| k.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, v)| v.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_matching_requires_every_pair() {
        let p = pod(
            "x",
            PodPhase::Running,
            &[("gt.rig", "gastown"), ("gt.role", "witness")],
        );
        assert!(matches_selector(&p, "gt.rig=gastown"));
        assert!(matches_selector(&p, "gt.rig=gastown,gt.role=witness"));
        assert!(!matches_selector(&p, "gt.rig=gastown,gt.role=refinery"));
    }

    #[tokio::test]
    async fn fake_forwarder_counts_live_processes() {
        let fwd = FakeForwarder::never_ready();
        let mut p = fwd.spawn("ns", "pod", 1, 8080).await.unwrap();
        assert_eq!(fwd.live_processes(), 1);
        assert!(p.try_exit().is_none());
        p.terminate().await;
        assert_eq!(fwd.live_processes(), 0);
        drop(p);
        assert_eq!(fwd.live_processes(), 0);
    }
}
