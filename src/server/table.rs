//! Connection table: one entry per proxied pod.
//!
//! The table itself never performs I/O. Callers hold the table lock only
//! for bookkeeping and do tunnel and tmux work after releasing it.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use tokio::sync::Mutex;

use crate::tunnel::TunnelConnection;

/// Lifecycle of a tracked pod between discovery and teardown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Opening,
    Healthy,
    Degraded,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Opening => "opening",
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
        })
    }
}

/// Tunnel shared between the table and whichever tick is working on it.
pub type SharedTunnel = Arc<Mutex<TunnelConnection>>;

#[derive(Debug)]
pub struct Entry {
    pub agent_id: String,
    pub session_name: String,
    pub screen_session: String,
    pub tunnel: SharedTunnel,
    pub state: ConnectionState,
    pub generation: u64,
    pub local_port: Option<u16>,
    pub opened_at: Option<SystemTime>,
    pub last_check: Option<SystemTime>,
    pub failures: u32,
}

/// What a health probe needs, copied out from under the lock.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub pod_name: String,
    pub session_name: String,
    pub screen_session: String,
    pub generation: u64,
    pub tunnel: SharedTunnel,
}

/// Result of recording a failed probe.
#[derive(Debug)]
pub enum FailureOutcome {
    /// Entry no longer tracked (or replaced); nothing to do.
    Stale,
    /// Retry in place.
    Reopen,
    /// Budget exhausted; the entry was removed and must be torn down.
    TearDown(Entry),
}

#[derive(Debug, Default)]
pub struct ConnectionTable {
    entries: BTreeMap<String, Entry>,
    next_generation: u64,
}

impl ConnectionTable {
    pub fn contains(&self, pod: &str) -> bool {
        self.entries.contains_key(pod)
    }

    pub fn get(&self, pod: &str) -> Option<&Entry> {
        self.entries.get(pod)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    /// Track a new pod in `Opening` state. Returns its generation, or
    /// `None` when the pod is already tracked.
    pub fn insert_opening(
        &mut self,
        pod: &str,
        agent_id: &str,
        session_name: &str,
        screen_session: &str,
        tunnel: SharedTunnel,
    ) -> Option<u64> {
        if self.entries.contains_key(pod) {
            return None;
        }
        self.next_generation += 1;
        let generation = self.next_generation;
        self.entries.insert(
            pod.to_string(),
            Entry {
                agent_id: agent_id.to_string(),
                session_name: session_name.to_string(),
                screen_session: screen_session.to_string(),
                tunnel,
                state: ConnectionState::Opening,
                generation,
                local_port: None,
                opened_at: None,
                last_check: None,
                failures: 0,
            },
        );
        Some(generation)
    }

    fn current(&mut self, pod: &str, generation: u64) -> Option<&mut Entry> {
        self.entries
            .get_mut(pod)
            .filter(|e| e.generation == generation)
    }

    /// Record a successful (re)open. False when the entry was torn down in
    /// the meantime.
    pub fn mark_open(
        &mut self,
        pod: &str,
        generation: u64,
        local_port: u16,
        opened_at: Option<SystemTime>,
    ) -> bool {
        let Some(entry) = self.current(pod, generation) else {
            return false;
        };
        entry.local_port = Some(local_port);
        entry.opened_at = opened_at;
        if entry.state == ConnectionState::Opening {
            entry.state = ConnectionState::Healthy;
        }
        true
    }

    /// Forget the local port of an entry whose tunnel is about to be
    /// closed for a reopen. False when the generation is no longer current.
    pub fn mark_closed(&mut self, pod: &str, generation: u64) -> bool {
        let Some(entry) = self.current(pod, generation) else {
            return false;
        };
        entry.local_port = None;
        entry.opened_at = None;
        true
    }

    /// Remove an entry, but only the generation the caller is working on.
    pub fn remove_generation(&mut self, pod: &str, generation: u64) -> Option<Entry> {
        self.current(pod, generation)?;
        self.entries.remove(pod)
    }

    /// Remove every entry whose pod is not in `keep`.
    pub fn remove_missing<F>(&mut self, keep: F) -> Vec<(String, Entry)>
    where
        F: Fn(&str) -> bool,
    {
        let gone: Vec<String> = self
            .entries
            .keys()
            .filter(|pod| !keep(pod))
            .cloned()
            .collect();
        gone.into_iter()
            .filter_map(|pod| self.entries.remove(&pod).map(|e| (pod, e)))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<(String, Entry)> {
        std::mem::take(&mut self.entries).into_iter().collect()
    }

    /// Entries eligible for a health probe (not still opening).
    pub fn probe_targets(&self) -> Vec<ProbeTarget> {
        self.entries
            .iter()
            .filter(|(_, e)| e.state != ConnectionState::Opening)
            .map(|(pod, e)| ProbeTarget {
                pod_name: pod.clone(),
                session_name: e.session_name.clone(),
                screen_session: e.screen_session.clone(),
                generation: e.generation,
                tunnel: Arc::clone(&e.tunnel),
            })
            .collect()
    }

    pub fn record_success(&mut self, pod: &str, generation: u64, at: SystemTime) {
        if let Some(entry) = self.current(pod, generation) {
            if entry.state == ConnectionState::Degraded {
                tracing::info!(pod, "connection recovered");
            }
            entry.state = ConnectionState::Healthy;
            entry.failures = 0;
            entry.last_check = Some(at);
        }
    }

    pub fn record_failure(
        &mut self,
        pod: &str,
        generation: u64,
        at: SystemTime,
        max_failures: u32,
    ) -> FailureOutcome {
        let Some(entry) = self.current(pod, generation) else {
            return FailureOutcome::Stale;
        };
        entry.failures += 1;
        entry.last_check = Some(at);
        entry.state = ConnectionState::Degraded;
        if entry.failures > max_failures {
            match self.entries.remove(pod) {
                Some(entry) => FailureOutcome::TearDown(entry),
                None => FailureOutcome::Stale,
            }
        } else {
            FailureOutcome::Reopen
        }
    }
}
