//! Default configuration constants.

/// Namespace used when neither the environment nor the config names one.
pub const DEFAULT_NAMESPACE: &str = "gastown";
/// Cluster-control binary.
pub(super) const DEFAULT_KUBECTL: &str = "kubectl";
/// Local terminal-multiplexer binary.
pub(super) const DEFAULT_TMUX: &str = "tmux";
/// Agent registry CLI.
pub(super) const DEFAULT_REGISTRY_BINARY: &str = "bd";
/// Port the in-pod web terminal listens on.
pub(super) const DEFAULT_COOP_REMOTE_PORT: u16 = 8080;
/// Deadline for one-shot tunnel opens.
pub(super) const DEFAULT_OPEN_TIMEOUT_SECS: u64 = 30;
/// Per-request timeout for web-terminal HTTP calls.
pub(super) const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 10;
pub(super) const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
pub(super) const DEFAULT_HEALTH_INTERVAL_SECS: u64 = 5;
/// Screen session name inside agent containers.
pub(super) const DEFAULT_SCREEN_SESSION: &str = "agent";
/// Failed health probes tolerated before an entry is torn down.
pub(super) const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 3;
