//! In-memory collaborators for integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use podbridge::cluster::{ClusterClient, PodPhase, PodSummary};
use podbridge::error::{BackendError, DiscoveryError, TunnelError};
use podbridge::registry::{AgentRecord, AgentRegistry, RegistryPod};
use podbridge::tmux::TmuxClient;
use podbridge::tunnel::{ForwardProcess, PortForwarder};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn running_pod(name: &str, labels: &[(&str, &str)]) -> PodSummary {
    PodSummary {
        name: name.to_string(),
        phase: PodPhase::Running,
        labels: labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
    }
}

#[derive(Default)]
pub struct Cluster {
    pub pods: Mutex<Vec<PodSummary>>,
    pub selectors: Mutex<Vec<String>>,
}

impl Cluster {
    pub fn with(pods: Vec<PodSummary>) -> Self {
        Self {
            pods: Mutex::new(pods),
            ..Self::default()
        }
    }

    pub fn set_pods(&self, pods: Vec<PodSummary>) {
        *lock(&self.pods) = pods;
    }

    pub fn selectors(&self) -> Vec<String> {
        lock(&self.selectors).clone()
    }
}

#[async_trait]
impl ClusterClient for Cluster {
    async fn get_pod(&self, _ns: &str, name: &str) -> Result<Option<PodSummary>, DiscoveryError> {
        Ok(lock(&self.pods).iter().find(|p| p.name == name).cloned())
    }

    async fn list_pods(&self, _ns: &str, selector: &str) -> Result<Vec<PodSummary>, DiscoveryError> {
        lock(&self.selectors).push(selector.to_string());
        let wanted: Vec<(&str, &str)> = selector
            .split(',')
            .filter_map(|pair| pair.split_once('='))
            .collect();
        Ok(lock(&self.pods)
            .iter()
            .filter(|p| {
                wanted
                    .iter()
                    .all(|(k, v)| p.labels.get(*k).map(String::as_str) == Some(*v))
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct Registry {
    pub agents: Mutex<HashMap<String, AgentRecord>>,
    pub pods: Mutex<Vec<RegistryPod>>,
}

impl Registry {
    pub fn agent_with_labels(&self, id: &str, labels: &[(&str, &str)]) {
        let record = AgentRecord {
            id: id.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            notes: BTreeMap::new(),
        };
        lock(&self.agents).insert(id.to_string(), record);
    }

    pub fn set_pods(&self, pods: &[(&str, &str)]) {
        *lock(&self.pods) = pods
            .iter()
            .map(|(agent, pod)| RegistryPod {
                agent_id: agent.to_string(),
                pod_name: pod.to_string(),
                pod_status: "running".into(),
                ..RegistryPod::default()
            })
            .collect();
    }
}

#[async_trait]
impl AgentRegistry for Registry {
    async fn agent(&self, id: &str) -> Result<Option<AgentRecord>, DiscoveryError> {
        Ok(lock(&self.agents).get(id).cloned())
    }

    async fn list_pods(&self, _rig: &str) -> Result<Vec<RegistryPod>, DiscoveryError> {
        Ok(lock(&self.pods).clone())
    }
}

#[derive(Default)]
pub struct Tmux {
    pub sessions: Mutex<BTreeMap<String, Vec<String>>>,
}

impl Tmux {
    pub fn names(&self) -> Vec<String> {
        lock(&self.sessions).keys().cloned().collect()
    }

    pub fn argv(&self, name: &str) -> Option<Vec<String>> {
        lock(&self.sessions).get(name).cloned()
    }
}

#[async_trait]
impl TmuxClient for Tmux {
    async fn has_session(&self, session: &str) -> bool {
        lock(&self.sessions).contains_key(session)
    }

    async fn capture_pane(&self, session: &str, _lines: usize) -> Result<String, BackendError> {
        if self.has_session(session).await {
            Ok(String::new())
        } else {
            Err(BackendError::SessionNotFound(session.to_string()))
        }
    }

    async fn create_proxy_session(&self, session: &str, argv: &[String]) -> Result<(), BackendError> {
        lock(&self.sessions).insert(session.to_string(), argv.to_vec());
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), BackendError> {
        lock(&self.sessions).remove(session);
        Ok(())
    }

    async fn pane_dead(&self, session: &str) -> Result<bool, BackendError> {
        Ok(!self.has_session(session).await)
    }

    async fn send_keys(&self, session: &str, _keys: &str, _literal: bool) -> Result<(), BackendError> {
        if self.has_session(session).await {
            Ok(())
        } else {
            Err(BackendError::SessionNotFound(session.to_string()))
        }
    }
}

/// Forwarder that listens on the requested local port itself.
#[derive(Default)]
pub struct Forwarder {
    pub live: Arc<AtomicUsize>,
}

impl Forwarder {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

struct Process {
    task: JoinHandle<()>,
    live: Arc<AtomicUsize>,
    stopped: AtomicBool,
}

impl Process {
    fn stop(&self) {
        if !self.stopped.swap(true, Ordering::SeqCst) {
            self.task.abort();
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.stop();
    }
}

#[async_trait]
impl ForwardProcess for Process {
    fn try_exit(&mut self) -> Option<String> {
        self.stopped
            .load(Ordering::SeqCst)
            .then(|| "stopped".to_string())
    }

    async fn terminate(&mut self) {
        self.stop();
        tokio::task::yield_now().await;
    }
}

#[async_trait]
impl PortForwarder for Forwarder {
    async fn spawn(
        &self,
        _ns: &str,
        _pod: &str,
        local_port: u16,
        _remote_port: u16,
    ) -> Result<Box<dyn ForwardProcess>, TunnelError> {
        let listener = TcpListener::bind(("127.0.0.1", local_port))
            .await
            .map_err(TunnelError::PortAllocation)?;
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(Process {
            task,
            live: Arc::clone(&self.live),
            stopped: AtomicBool::new(false),
        }))
    }
}
