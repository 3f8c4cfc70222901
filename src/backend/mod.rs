//! Session backends and the resolver that picks one per target.
//!
//! Every backend answers the same capability calls (probe, capture,
//! input, attach). Which one serves
//! a target is decided once, from the agent's registry metadata, by
//! [`resolve_backend`].

mod coop;
mod local;
mod ssh;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::addressing::{resolve_target, AgentAddress};
use crate::cluster::ClusterClient;
use crate::error::{BackendError, ResolveError};
use crate::registry::{AgentRecord, AgentRegistry};
use crate::shutdown::ShutdownReceiver;
use crate::tmux::{LocalTmux, TmuxClient};
use crate::tunnel::PortForwarder;

pub use coop::{
    find_attach_client, CoopBackend, CoopClient, CoopHealth, CoopSettings, NudgeOutcome,
};
pub use local::LocalBackend;
pub use ssh::{SshBackend, SshTarget};

const BACKEND_KEY: &str = "backend";

/// Everything the resolver and the backends it builds need.
#[derive(Clone)]
pub struct BackendDeps {
    pub tmux: Arc<dyn TmuxClient>,
    /// Binary and socket for interactive local attaches.
    pub local_tmux: LocalTmux,
    pub cluster: Arc<dyn ClusterClient>,
    pub registry: Arc<dyn AgentRegistry>,
    pub forwarder: Arc<dyn PortForwarder>,
    pub namespace: String,
    pub coop: CoopSettings,
    pub ssh_timeout: Duration,
    /// Pause between a nudge's text and its `Enter`.
    pub nudge_settle: Duration,
    pub shutdown: ShutdownReceiver,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Local,
    Ssh,
    Coop,
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Local => "local",
            Self::Ssh => "ssh",
            Self::Coop => "coop",
        })
    }
}

/// Variant picked from registry metadata, before any connection details
/// are filled in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendChoice {
    Local,
    Ssh(SshTarget),
    Coop,
}

impl BackendChoice {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local => BackendKind::Local,
            Self::Ssh(_) => BackendKind::Ssh,
            Self::Coop => BackendKind::Coop,
        }
    }
}

/// Pick a variant from an agent's registry record.
///
/// `backend=k8s` selects Coop. `backend=ssh` (label or note) selects SSH
/// when the notes carry an `ssh_host`. Everything else is Local.
pub fn select_backend(record: Option<&AgentRecord>) -> BackendChoice {
    let Some(record) = record else {
        return BackendChoice::Local;
    };
    let marker = record
        .label(BACKEND_KEY)
        .or_else(|| record.note(BACKEND_KEY))
        .map(|v| v.trim().to_ascii_lowercase());
    match marker.as_deref() {
        Some("k8s") => BackendChoice::Coop,
        Some("ssh") => match SshTarget::from_notes(&record.notes) {
            Some(target) => BackendChoice::Ssh(target),
            None => {
                tracing::warn!(agent = %record.id, "backend=ssh without ssh_host; using local");
                BackendChoice::Local
            }
        },
        _ => BackendChoice::Local,
    }
}

/// Registry ids to try for an address, in order.
pub fn registry_ids(address: &AgentAddress) -> Vec<String> {
    match address {
        AgentAddress::RawPod(_) => Vec::new(),
        AgentAddress::Town(role) => vec![format!("hq-{}", role.as_str()), role.as_str().to_string()],
        other => vec![other.agent_id()],
    }
}

async fn lookup_record(address: &AgentAddress, registry: &dyn AgentRegistry) -> Option<AgentRecord> {
    for id in registry_ids(address) {
        match registry.agent(&id).await {
            Ok(Some(record)) => return Some(record),
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(agent = %id, error = %e, "registry lookup failed; assuming local");
                return None;
            }
        }
    }
    None
}

/// One concrete backend.
#[derive(Clone)]
pub enum Backend {
    Local(LocalBackend),
    Ssh(SshBackend),
    Coop(CoopBackend),
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(_) => f.write_str("Backend::Local"),
            Self::Ssh(b) => write!(f, "Backend::Ssh({})", b.target().host),
            Self::Coop(b) => write!(f, "Backend::Coop({})", b.target().pod_name),
        }
    }
}

impl Backend {
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Local(_) => BackendKind::Local,
            Self::Ssh(_) => BackendKind::Ssh,
            Self::Coop(_) => BackendKind::Coop,
        }
    }

    /// Existence probe; any lookup failure reads as `false`.
    pub async fn has_session(&self, name: &str) -> bool {
        match self {
            Self::Local(b) => b.has_session(name).await,
            Self::Ssh(b) => b.has_session(name).await,
            Self::Coop(b) => b.has_session(name).await,
        }
    }

    /// Last `lines` lines of output; `SessionNotFound` when there is no
    /// such session.
    pub async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, BackendError> {
        match self {
            Self::Local(b) => b.capture_pane(name, lines).await,
            Self::Ssh(b) => b.capture_pane(name, lines).await,
            Self::Coop(b) => b.capture_pane(name, lines).await,
        }
    }

    /// Press named keys (`Enter`, `C-c`, ...), whitespace separated.
    pub async fn send_keys(&self, name: &str, keys: &str) -> Result<(), BackendError> {
        match self {
            Self::Local(b) => b.send_keys(name, keys).await,
            Self::Ssh(b) => b.send_keys(name, keys).await,
            Self::Coop(b) => b.send_keys(name, keys).await,
        }
    }

    /// Type `message` into the session and submit it.
    pub async fn nudge(&self, name: &str, message: &str) -> Result<(), BackendError> {
        match self {
            Self::Local(b) => b.nudge(name, message).await,
            Self::Ssh(b) => b.nudge(name, message).await,
            Self::Coop(b) => b.nudge(name, message).await,
        }
    }

    /// Attach the caller's terminal and return the exit code to forward.
    pub async fn attach(&self, name: &str) -> Result<i32, BackendError> {
        match self {
            Self::Local(b) => b.attach(name).await,
            Self::Ssh(b) => b.attach(name).await,
            Self::Coop(b) => b.attach(name).await,
        }
    }
}

/// A backend together with the session name to use on it.
#[derive(Debug, Clone)]
pub struct ResolvedBackend {
    pub backend: Backend,
    pub session_name: String,
}

/// Resolve an address to exactly one backend.
///
/// Raw pod names go to Local when a tmux session of that name already
/// exists, otherwise to Coop. Other addresses are routed by registry
/// metadata. Coop targets are pinned to a running pod here, so an address
/// that matches nothing fails with `NotFound`.
pub async fn resolve_backend(
    address: &AgentAddress,
    deps: &BackendDeps,
) -> Result<ResolvedBackend, ResolveError> {
    let choice = match address {
        AgentAddress::RawPod(name) => {
            if deps.tmux.has_session(name).await {
                BackendChoice::Local
            } else {
                BackendChoice::Coop
            }
        }
        _ => select_backend(lookup_record(address, deps.registry.as_ref()).await.as_ref()),
    };
    tracing::debug!(agent = %address, backend = %choice.kind(), "backend selected");

    let resolved = match choice {
        BackendChoice::Local => ResolvedBackend {
            backend: Backend::Local(LocalBackend::new(
                Arc::clone(&deps.tmux),
                deps.local_tmux.clone(),
                deps.nudge_settle,
            )),
            session_name: address.session_name(),
        },
        BackendChoice::Ssh(target) => ResolvedBackend {
            backend: Backend::Ssh(SshBackend::new(
                target,
                deps.ssh_timeout,
                deps.nudge_settle,
            )),
            session_name: address.session_name(),
        },
        BackendChoice::Coop => {
            let target =
                resolve_target(address, &deps.namespace, deps.cluster.as_ref()).await?;
            let session_name = target.session_name.clone();
            ResolvedBackend {
                backend: Backend::Coop(CoopBackend::new(
                    target,
                    Arc::clone(&deps.tmux),
                    Arc::clone(&deps.forwarder),
                    deps.coop.clone(),
                    deps.shutdown.clone(),
                )),
                session_name,
            }
        }
    };
    Ok(resolved)
}
