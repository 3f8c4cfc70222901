//! Agent registry client.
//!
//! The registry (`bd`) is read-only from the bridge's point of view: it
//! supplies per-agent metadata for backend selection and the pod inventory
//! the terminal server keeps in sync with.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::error::{DiscoveryError, ProcessError};
use crate::process::{ensure_success, run_process, run_with_timeout, ExecOutput};

const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Metadata stored on one agent's registry record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentRecord {
    pub id: String,
    /// `key=value` labels, split into a map.
    pub labels: BTreeMap<String, String>,
    /// `key: value` lines from the free-form notes field.
    pub notes: BTreeMap<String, String>,
}

impl AgentRecord {
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }

    pub fn note(&self, key: &str) -> Option<&str> {
        self.notes
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }
}

/// One entry of the registry's pod inventory.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RegistryPod {
    #[serde(default)]
    pub agent_id: String,
    #[serde(default)]
    pub pod_name: String,
    #[serde(default)]
    pub pod_ip: String,
    #[serde(default)]
    pub pod_node: String,
    #[serde(default)]
    pub pod_status: String,
    /// Screen session inside the container; empty means "use the default".
    #[serde(default)]
    pub screen_session: String,
}

impl RegistryPod {
    /// Entries in a terminal state are not worth proxying.
    pub fn is_live(&self) -> bool {
        !matches!(
            self.pod_status.to_ascii_lowercase().as_str(),
            "failed" | "terminated"
        )
    }
}

#[async_trait]
pub trait AgentRegistry: Send + Sync {
    /// Look up one agent. `Ok(None)` when the registry has no such record.
    async fn agent(&self, id: &str) -> Result<Option<AgentRecord>, DiscoveryError>;

    /// Live pods registered for `rig`; terminal-state entries are dropped.
    async fn list_pods(&self, rig: &str) -> Result<Vec<RegistryPod>, DiscoveryError>;
}

/// `AgentRegistry` backed by the `bd` CLI.
#[derive(Debug, Clone)]
pub struct BdRegistry {
    binary: String,
}

impl BdRegistry {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn query(&self, args: Vec<String>, context: &str) -> Result<ExecOutput, ProcessError> {
        run_with_timeout(
            run_process(&self.binary, &args, None),
            QUERY_TIMEOUT,
            context,
        )
        .await
    }
}

#[async_trait]
impl AgentRegistry for BdRegistry {
    async fn agent(&self, id: &str) -> Result<Option<AgentRecord>, DiscoveryError> {
        let context = format!("bd show {id}");
        let args = vec!["show".to_string(), id.to_string(), "--json".to_string()];
        let out = self.query(args, &context).await?;
        if !out.success() && is_missing_record(&out.stderr) {
            return Ok(None);
        }
        let out = ensure_success(out, &context)?;
        parse_show(&out.stdout)
    }

    async fn list_pods(&self, rig: &str) -> Result<Vec<RegistryPod>, DiscoveryError> {
        let context = "bd agent pod-list";
        let mut args = vec![
            "agent".to_string(),
            "pod-list".to_string(),
            "--json".to_string(),
        ];
        if !rig.is_empty() {
            args.push(format!("--rig={rig}"));
        }
        let out = ensure_success(self.query(args, context).await?, context)?;
        parse_pod_list(&out.stdout)
    }
}

fn is_missing_record(stderr: &str) -> bool {
    let lower = stderr.to_ascii_lowercase();
    lower.contains("not found") || lower.contains("no issue")
}

#[derive(Deserialize)]
struct ShowEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    notes: String,
}

#[derive(Deserialize)]
struct PodListResponse {
    #[serde(default)]
    agents: Vec<RegistryPod>,
}

/// `bd show --json` returns an array holding at most one record.
pub(crate) fn parse_show(body: &str) -> Result<Option<AgentRecord>, DiscoveryError> {
    let entries: Vec<ShowEntry> = serde_json::from_str(body)?;
    Ok(entries.into_iter().next().map(|entry| AgentRecord {
        id: entry.id,
        labels: parse_labels(&entry.labels),
        notes: parse_notes(&entry.notes),
    }))
}

pub(crate) fn parse_pod_list(body: &str) -> Result<Vec<RegistryPod>, DiscoveryError> {
    if body.trim().is_empty() {
        return Ok(Vec::new());
    }
    let resp: PodListResponse = serde_json::from_str(body)?;
    Ok(resp
        .agents
        .into_iter()
        .filter(|p| !p.pod_name.is_empty() && p.is_live())
        .collect())
}

/// Split `key=value` labels; bare labels map to an empty value.
pub fn parse_labels(labels: &[String]) -> BTreeMap<String, String> {
    labels
        .iter()
        .map(|label| match label.split_once('=') {
            Some((k, v)) => (k.trim().to_string(), v.trim().to_string()),
            None => (label.trim().to_string(), String::new()),
        })
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

/// Parse `key: value` lines. Lines without a colon are ignored.
pub fn parse_notes(notes: &str) -> BTreeMap<String, String> {
    notes
        .lines()
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
        .filter(|(k, _)| !k.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notes_tolerate_whitespace_and_noise() {
        let notes = parse_notes(
            "  backend: ssh  \nssh_host:   gt@pod.svc \nfree text line\nssh_proxy_command: nc %h %p\n",
        );
        assert_eq!(notes.get("backend").map(String::as_str), Some("ssh"));
        assert_eq!(notes.get("ssh_host").map(String::as_str), Some("gt@pod.svc"));
        assert_eq!(
            notes.get("ssh_proxy_command").map(String::as_str),
            Some("nc %h %p")
        );
        assert_eq!(notes.len(), 3);
    }

    #[test]
    fn labels_split_on_first_equals() {
        let labels = parse_labels(&[
            "backend=k8s".to_string(),
            "gt:agent".to_string(),
            "expr=a=b".to_string(),
        ]);
        assert_eq!(labels.get("backend").map(String::as_str), Some("k8s"));
        assert_eq!(labels.get("gt:agent").map(String::as_str), Some(""));
        assert_eq!(labels.get("expr").map(String::as_str), Some("a=b"));
    }

    #[test]
    fn show_output_takes_first_record() {
        let body = r#"[{"id": "gastown/witness", "labels": ["backend=k8s"], "notes": "role: witness"}]"#;
        let rec = parse_show(body).unwrap().unwrap();
        assert_eq!(rec.id, "gastown/witness");
        assert_eq!(rec.label("backend"), Some("k8s"));
        assert_eq!(rec.note("role"), Some("witness"));
        assert_eq!(parse_show("[]").unwrap(), None);
    }

    #[test]
    fn pod_list_drops_dead_and_nameless_entries() {
        let body = r#"{"agents": [
            {"agent_id": "gastown/polecats/nux", "pod_name": "gt-gastown-polecat-nux", "pod_status": "running", "screen_session": "claude"},
            {"agent_id": "gastown/polecats/old", "pod_name": "gt-gastown-polecat-old", "pod_status": "Terminated"},
            {"agent_id": "gastown/polecats/bad", "pod_name": "gt-gastown-polecat-bad", "pod_status": "failed"},
            {"agent_id": "gastown/witness", "pod_name": ""}
        ]}"#;
        let pods = parse_pod_list(body).unwrap();
        assert_eq!(pods.len(), 1);
        assert_eq!(pods[0].screen_session, "claude");
    }

    #[test]
    fn empty_pod_list_output_is_empty() {
        assert!(parse_pod_list("").unwrap().is_empty());
        assert!(parse_pod_list(r#"{"agents": []}"#).unwrap().is_empty());
    }

    #[test]
    fn missing_record_wording() {
        assert!(is_missing_record("Error: issue gastown/x not found"));
        assert!(!is_missing_record("database locked"));
    }
}
