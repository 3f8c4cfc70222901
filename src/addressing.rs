//! Agent addressing and naming.
//!
//! Every command that names an agent goes through [`AgentAddress`]: the
//! session names computed here are the same ones the terminal server
//! creates, so independently issued commands always find its sessions.

use std::collections::BTreeMap;
use std::fmt;

use crate::cluster::{ClusterClient, PodSummary};
use crate::config::{DEFAULT_NAMESPACE, NAMESPACE_ENV};
use crate::error::ResolveError;

/// Prefix reserved for literal pod names.
pub const RAW_POD_PREFIX: &str = "gt-";

pub const LABEL_RIG: &str = "gt.rig";
pub const LABEL_ROLE: &str = "gt.role";
pub const LABEL_AGENT: &str = "gt.agent";

/// Single-segment roles that live at town level, outside any rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TownRole {
    Mayor,
    Deacon,
}

impl TownRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mayor => "mayor",
            Self::Deacon => "deacon",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "mayor" => Some(Self::Mayor),
            "deacon" => Some(Self::Deacon),
            _ => None,
        }
    }
}

/// Singleton roles within a rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RigRole {
    Witness,
    Refinery,
}

impl RigRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Witness => "witness",
            Self::Refinery => "refinery",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "witness" => Some(Self::Witness),
            "refinery" => Some(Self::Refinery),
            _ => None,
        }
    }
}

/// Named workers within a rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    Polecat,
    Crew,
}

impl WorkerKind {
    /// Label value (`gt.role`) and pod-name infix.
    pub fn role_label(self) -> &'static str {
        match self {
            Self::Polecat => "polecat",
            Self::Crew => "crew",
        }
    }

    /// Path segment used in canonical agent ids.
    fn id_segment(self) -> &'static str {
        match self {
            Self::Polecat => "polecats",
            Self::Crew => "crew",
        }
    }

    fn parse(raw: &str) -> Option<Self> {
        match raw {
            "polecats" | "polecat" => Some(Self::Polecat),
            "crew" => Some(Self::Crew),
            _ => None,
        }
    }
}

/// A parsed, validated agent address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AgentAddress {
    /// Literal pod name (starts with [`RAW_POD_PREFIX`]).
    RawPod(String),
    Town(TownRole),
    Rig { rig: String, role: RigRole },
    Worker {
        rig: String,
        kind: WorkerKind,
        name: String,
    },
}

impl AgentAddress {
    /// Parse a user-typed target. Never touches the cluster.
    pub fn parse(target: &str) -> Result<Self, ResolveError> {
        let target = target.trim();
        let unparseable = |reason: &str| ResolveError::Unparseable {
            target: target.to_string(),
            reason: reason.to_string(),
        };
        let unrecognized = |reason: String| ResolveError::Unrecognized {
            target: target.to_string(),
            reason,
        };

        if target.is_empty() {
            return Err(unparseable("empty target"));
        }
        if target.starts_with(RAW_POD_PREFIX) {
            if target.contains('/') {
                return Err(unparseable("pod names cannot contain `/`"));
            }
            return Ok(Self::RawPod(target.to_string()));
        }

        let segments: Vec<&str> = target.split('/').collect();
        if segments.iter().any(|s| s.trim().is_empty()) {
            return Err(unparseable("empty path segment"));
        }

        match segments.as_slice() {
            [role] => TownRole::parse(role).map(Self::Town).ok_or_else(|| {
                unrecognized(format!(
                    "`{role}` is not a town-level role (expected mayor or deacon)"
                ))
            }),
            [rig, role] => RigRole::parse(role)
                .map(|role| Self::Rig {
                    rig: rig.to_string(),
                    role,
                })
                .ok_or_else(|| {
                    unrecognized(format!(
                        "`{role}` is not a rig role (expected witness or refinery)"
                    ))
                }),
            [rig, kind, name] => WorkerKind::parse(kind)
                .map(|kind| Self::Worker {
                    rig: rig.to_string(),
                    kind,
                    name: name.to_string(),
                })
                .ok_or_else(|| {
                    unrecognized(format!(
                        "`{kind}` is not a worker type (expected polecats or crew)"
                    ))
                }),
            _ => Err(unparseable("too many path segments")),
        }
    }

    /// Recover an address from a pod's `gt.*` labels.
    pub fn from_labels(labels: &BTreeMap<String, String>) -> Option<Self> {
        let get = |key: &str| {
            labels
                .get(key)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty() && !v.contains('/'))
        };
        let role = get(LABEL_ROLE)?;
        if let Some(town) = TownRole::parse(role) {
            return Some(Self::Town(town));
        }
        let rig = get(LABEL_RIG)?.to_string();
        if let Some(role) = RigRole::parse(role) {
            return Some(Self::Rig { rig, role });
        }
        let kind = WorkerKind::parse(role)?;
        let name = get(LABEL_AGENT)?.to_string();
        Some(Self::Worker { rig, kind, name })
    }

    /// Synthesized pod name the controller gives this agent.
    pub fn pod_name(&self) -> String {
        match self {
            Self::RawPod(name) => name.clone(),
            Self::Town(role) => format!("gt-town-{}-hq", role.as_str()),
            Self::Rig { rig, role } => format!("gt-{rig}-{}-hq", role.as_str()),
            Self::Worker { rig, kind, name } => {
                format!("gt-{rig}-{}-{name}", kind.role_label())
            }
        }
    }

    /// Canonical local session name.
    pub fn session_name(&self) -> String {
        match self {
            Self::RawPod(name) => name.clone(),
            Self::Town(role) => format!("hq-{}", role.as_str()),
            Self::Rig { rig, role } => format!("gt-{rig}-{}", role.as_str()),
            Self::Worker {
                rig,
                kind: WorkerKind::Polecat,
                name,
            } => format!("gt-{rig}-{name}"),
            Self::Worker {
                rig,
                kind: WorkerKind::Crew,
                name,
            } => format!("gt-{rig}-crew-{name}"),
        }
    }

    /// Canonical registry id (`mayor`, `rig/witness`, `rig/polecats/name`).
    pub fn agent_id(&self) -> String {
        match self {
            Self::RawPod(name) => name.clone(),
            Self::Town(role) => role.as_str().to_string(),
            Self::Rig { rig, role } => format!("{rig}/{}", role.as_str()),
            Self::Worker { rig, kind, name } => {
                format!("{rig}/{}/{name}", kind.id_segment())
            }
        }
    }

    /// Label selector built from exactly the segments in the address.
    ///
    /// `None` for raw pod names, which carry no segments.
    pub fn label_selector(&self) -> Option<String> {
        let pairs: Vec<(&str, &str)> = match self {
            Self::RawPod(_) => return None,
            Self::Town(role) => vec![(LABEL_ROLE, role.as_str())],
            Self::Rig { rig, role } => vec![(LABEL_RIG, rig), (LABEL_ROLE, role.as_str())],
            Self::Worker { rig, kind, name } => vec![
                (LABEL_RIG, rig),
                (LABEL_ROLE, kind.role_label()),
                (LABEL_AGENT, name),
            ],
        };
        Some(
            pairs
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect::<Vec<_>>()
                .join(","),
        )
    }

    pub fn is_raw_pod(&self) -> bool {
        matches!(self, Self::RawPod(_))
    }
}

impl fmt::Display for AgentAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.agent_id())
    }
}

/// Session name for a pod seen during discovery or raw-name lookup.
///
/// Labelled pods get their agent's canonical name; anything else keeps the
/// pod name.
pub fn session_name_for_pod(pod: &PodSummary) -> String {
    AgentAddress::from_labels(&pod.labels)
        .map(|addr| addr.session_name())
        .unwrap_or_else(|| pod.name.clone())
}

/// A target pinned to one concrete pod.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTarget {
    pub pod_name: String,
    pub namespace: String,
    pub session_name: String,
}

/// Namespace from the environment override, else config, else the default.
pub fn resolve_namespace<FEnv>(configured: Option<&str>, env_lookup: FEnv) -> String
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(NAMESPACE_ENV)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            configured
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(String::from)
        })
        .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
}

/// Pin an address to a running pod.
///
/// Direct lookup by synthesized pod name first; when that pod is absent or
/// not Running, one label-selector search. Raw pod names get no fallback.
pub async fn resolve_target(
    address: &AgentAddress,
    namespace: &str,
    cluster: &dyn ClusterClient,
) -> Result<ResolvedTarget, ResolveError> {
    let not_found = || ResolveError::NotFound {
        target: address.agent_id(),
        namespace: namespace.to_string(),
    };
    let pod_name = address.pod_name();

    match cluster.get_pod(namespace, &pod_name).await {
        Ok(Some(pod)) if pod.is_running() => {
            let session_name = match address {
                AgentAddress::RawPod(_) => session_name_for_pod(&pod),
                _ => address.session_name(),
            };
            return Ok(ResolvedTarget {
                pod_name: pod.name,
                namespace: namespace.to_string(),
                session_name,
            });
        }
        Ok(Some(pod)) => {
            tracing::debug!(pod = %pod.name, phase = ?pod.phase, "pod not running");
        }
        Ok(None) => tracing::debug!(pod = %pod_name, "pod not found by name"),
        Err(e) if address.is_raw_pod() => return Err(ResolveError::Cluster(e.to_string())),
        Err(e) => tracing::debug!(pod = %pod_name, error = %e, "direct pod lookup failed"),
    }

    let Some(selector) = address.label_selector() else {
        return Err(not_found());
    };
    let pods = cluster
        .list_pods(namespace, &selector)
        .await
        .map_err(|e| ResolveError::Cluster(e.to_string()))?;
    let pod = pods
        .into_iter()
        .find(PodSummary::is_running)
        .ok_or_else(not_found)?;
    tracing::debug!(pod = %pod.name, selector = %selector, "resolved via label selector");
    Ok(ResolvedTarget {
        pod_name: pod.name,
        namespace: namespace.to_string(),
        session_name: address.session_name(),
    })
}
