//! Cluster control plane client.
//!
//! Pods are queried through `kubectl ... -o json`; only the fields the
//! bridge needs (name, phase, labels) are decoded.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::ClusterConfig;
use crate::error::{DiscoveryError, ProcessError};
use crate::process::{ensure_success, run_process, run_with_timeout};

const QUERY_TIMEOUT: Duration = Duration::from_secs(15);

/// Pod lifecycle phase as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PodPhase {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown(String),
}

impl PodPhase {
    pub fn parse(raw: &str) -> Self {
        match raw {
            "Pending" => Self::Pending,
            "Running" => Self::Running,
            "Succeeded" => Self::Succeeded,
            "Failed" => Self::Failed,
            other => Self::Unknown(other.to_string()),
        }
    }
}

/// The slice of a pod object the bridge cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodSummary {
    pub name: String,
    pub phase: PodPhase,
    pub labels: BTreeMap<String, String>,
}

impl PodSummary {
    pub fn is_running(&self) -> bool {
        self.phase == PodPhase::Running
    }
}

/// Read-only access to pods in one cluster.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Fetch one pod by name. `Ok(None)` when the pod does not exist.
    async fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodSummary>, DiscoveryError>;

    /// List pods matching a label selector, in control-plane order.
    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, DiscoveryError>;
}

/// How to invoke `kubectl`, shared by queries, port-forwards, and exec proxies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Kubectl {
    pub binary: String,
    pub kubeconfig: Option<String>,
}

impl Kubectl {
    pub fn from_config(cfg: &ClusterConfig) -> Self {
        Self {
            binary: cfg.kubectl.clone(),
            kubeconfig: cfg.kubeconfig.clone(),
        }
    }

    /// Prefix `args` with the global flags every invocation needs.
    pub fn args<I, S>(&self, args: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut out = Vec::new();
        if let Some(path) = &self.kubeconfig {
            out.push("--kubeconfig".to_string());
            out.push(path.clone());
        }
        out.extend(args.into_iter().map(Into::into));
        out
    }

    /// Full argv (binary first) for an interactive `screen -x` exec.
    pub fn screen_exec_argv(&self, namespace: &str, pod: &str, screen: &str) -> Vec<String> {
        let mut argv = vec![self.binary.clone()];
        argv.extend(self.args([
            "exec", "-it", "-n", namespace, pod, "--", "screen", "-x", screen,
        ]));
        argv
    }
}

/// `ClusterClient` backed by the `kubectl` binary.
#[derive(Debug, Clone)]
pub struct KubectlCluster {
    kubectl: Kubectl,
}

impl KubectlCluster {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    async fn get_json(&self, args: Vec<String>, context: &str) -> Result<String, ProcessError> {
        let argv = self.kubectl.args(args);
        let out = run_with_timeout(
            run_process(&self.kubectl.binary, &argv, None),
            QUERY_TIMEOUT,
            context,
        )
        .await?;
        Ok(ensure_success(out, context)?.stdout)
    }
}

#[async_trait]
impl ClusterClient for KubectlCluster {
    async fn get_pod(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<PodSummary>, DiscoveryError> {
        let context = format!("kubectl get pod {name}");
        let args = ["get", "pod", name, "-n", namespace, "-o", "json"]
            .map(String::from)
            .to_vec();
        match self.get_json(args, &context).await {
            Ok(body) => Ok(Some(parse_pod(&body)?)),
            Err(ProcessError::Failed { detail, .. }) if is_not_found(&detail) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &str,
    ) -> Result<Vec<PodSummary>, DiscoveryError> {
        let context = format!("kubectl get pods -l {selector}");
        let args = ["get", "pods", "-n", namespace, "-l", selector, "-o", "json"]
            .map(String::from)
            .to_vec();
        let body = self.get_json(args, &context).await?;
        parse_pod_list(&body)
    }
}

fn is_not_found(detail: &str) -> bool {
    detail.contains("NotFound") || detail.contains("not found")
}

#[derive(Deserialize)]
struct PodObject {
    #[serde(default)]
    metadata: PodMetadata,
    #[serde(default)]
    status: PodStatus,
}

#[derive(Default, Deserialize)]
struct PodMetadata {
    #[serde(default)]
    name: String,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

#[derive(Default, Deserialize)]
struct PodStatus {
    #[serde(default)]
    phase: String,
}

#[derive(Deserialize)]
struct PodList {
    #[serde(default)]
    items: Vec<PodObject>,
}

impl From<PodObject> for PodSummary {
    fn from(obj: PodObject) -> Self {
        Self {
            name: obj.metadata.name,
            phase: PodPhase::parse(&obj.status.phase),
            labels: obj.metadata.labels,
        }
    }
}

pub(crate) fn parse_pod(body: &str) -> Result<PodSummary, DiscoveryError> {
    let obj: PodObject = serde_json::from_str(body)?;
    if obj.metadata.name.is_empty() {
        return Err(DiscoveryError::Parse("pod object without metadata.name".into()));
    }
    Ok(obj.into())
}

pub(crate) fn parse_pod_list(body: &str) -> Result<Vec<PodSummary>, DiscoveryError> {
    let list: PodList = serde_json::from_str(body)?;
    Ok(list
        .items
        .into_iter()
        .filter(|p| !p.metadata.name.is_empty())
        .map(PodSummary::from)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_pod() {
        let body = r#"{
            "kind": "Pod",
            "metadata": {"name": "gt-gastown-witness-hq", "labels": {"gt.rig": "gastown", "gt.role": "witness"}},
            "status": {"phase": "Running", "podIP": "10.0.0.4"}
        }"#;
        let pod = parse_pod(body).unwrap();
        assert_eq!(pod.name, "gt-gastown-witness-hq");
        assert!(pod.is_running());
        assert_eq!(pod.labels.get("gt.role").map(String::as_str), Some("witness"));
    }

    #[test]
    fn parses_pod_list_and_unknown_phase() {
        let body = r#"{"items": [
            {"metadata": {"name": "a"}, "status": {"phase": "Pending"}},
            {"metadata": {"name": "b"}, "status": {"phase": "Evicted"}},
            {"metadata": {}, "status": {}}
        ]}"#;
        let pods = parse_pod_list(body).unwrap();
        assert_eq!(pods.len(), 2);
        assert_eq!(pods[0].phase, PodPhase::Pending);
        assert_eq!(pods[1].phase, PodPhase::Unknown("Evicted".into()));
    }

    #[test]
    fn garbage_is_a_parse_error() {
        assert!(matches!(parse_pod("nope"), Err(DiscoveryError::Parse(_))));
    }

    #[test]
    fn not_found_detection_matches_kubectl_wording() {
        assert!(is_not_found(
            "Error from server (NotFound): pods \"gt-x\" not found"
        ));
        assert!(!is_not_found("Unable to connect to the server"));
    }

    #[test]
    fn kubeconfig_flag_is_prepended() {
        let k = Kubectl {
            binary: "kubectl".into(),
            kubeconfig: Some("/tmp/kc".into()),
        };
        assert_eq!(
            k.args(["get", "pods"]),
            vec!["--kubeconfig", "/tmp/kc", "get", "pods"]
        );
    }

    #[test]
    fn screen_exec_argv_targets_named_screen() {
        let k = Kubectl {
            binary: "kubectl".into(),
            kubeconfig: None,
        };
        assert_eq!(
            k.screen_exec_argv("gastown", "gt-gastown-polecat-nux", "agent"),
            vec![
                "kubectl",
                "exec",
                "-it",
                "-n",
                "gastown",
                "gt-gastown-polecat-nux",
                "--",
                "screen",
                "-x",
                "agent"
            ]
        );
    }
}
