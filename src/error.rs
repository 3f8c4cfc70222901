//! Unified error types for podbridge.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use crate::process::format_duration;

// ---------------------------------------------------------------------------
// ProcessError
// ---------------------------------------------------------------------------

/// Errors from spawning or running an external helper binary.
#[derive(Debug)]
pub enum ProcessError {
    /// The binary could not be started at all.
    Spawn { program: String, source: std::io::Error },
    /// The binary ran and exited unsuccessfully.
    Failed { context: String, detail: String },
    /// The binary did not finish within its time budget.
    TimedOut { context: String, after: Duration },
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Spawn { program, source } => write!(f, "{program}: {source}"),
            Self::Failed { context, detail } => write!(f, "{context}: {detail}"),
            Self::TimedOut { context, after } => {
                write!(f, "{context}: timed out after {}", format_duration(*after))
            }
        }
    }
}

impl std::error::Error for ProcessError {}

impl ProcessError {
    /// True when the helper binary itself is missing from PATH.
    pub fn is_missing_binary(&self) -> bool {
        matches!(self, Self::Spawn { source, .. } if source.kind() == std::io::ErrorKind::NotFound)
    }
}

// ---------------------------------------------------------------------------
// ResolveError
// ---------------------------------------------------------------------------

/// The target address resolved to nothing. Never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The address is syntactically malformed.
    Unparseable { target: String, reason: String },
    /// The address parsed but names a role this depth does not recognize.
    Unrecognized { target: String, reason: String },
    /// No running pod or session matches the address.
    NotFound { target: String, namespace: String },
    /// The cluster could not be queried while resolving.
    Cluster(String),
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unparseable { target, reason } => {
                write!(f, "cannot parse target `{target}`: {reason}")
            }
            Self::Unrecognized { target, reason } => {
                write!(f, "cannot resolve target `{target}`: {reason}")
            }
            Self::NotFound { target, namespace } => write!(
                f,
                "could not find running pod/session for `{target}` in namespace `{namespace}`"
            ),
            Self::Cluster(msg) => write!(f, "cluster query failed: {msg}"),
        }
    }
}

impl std::error::Error for ResolveError {}

// ---------------------------------------------------------------------------
// TunnelError
// ---------------------------------------------------------------------------

/// Port-forward tunnel failures.
#[derive(Debug)]
pub enum TunnelError {
    /// No free local port could be reserved.
    PortAllocation(std::io::Error),
    /// The forwarding process could not be started.
    Spawn(ProcessError),
    /// The forwarding process exited before the tunnel came up.
    ForwarderExited { pod: String, detail: String },
    /// The tunnel did not come up before the deadline.
    Timeout { pod: String, after: Duration },
    /// Shutdown was requested while the tunnel was opening.
    Cancelled { pod: String },
    /// An accessor was used before a successful open.
    NotOpen { pod: String },
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PortAllocation(e) => write!(f, "allocating local port: {e}"),
            Self::Spawn(e) => write!(f, "starting port-forward: {e}"),
            Self::ForwarderExited { pod, detail } => {
                write!(f, "port-forward to {pod} exited: {detail}")
            }
            Self::Timeout { pod, after } => write!(
                f,
                "port-forward to {pod} not ready after {}",
                format_duration(*after)
            ),
            Self::Cancelled { pod } => write!(f, "port-forward to {pod} cancelled"),
            Self::NotOpen { pod } => write!(f, "tunnel to {pod} is not open"),
        }
    }
}

impl std::error::Error for TunnelError {}

// ---------------------------------------------------------------------------
// BackendError
// ---------------------------------------------------------------------------

/// Session capability call failures.
#[derive(Debug)]
pub enum BackendError {
    /// The named session does not exist on the chosen backend.
    SessionNotFound(String),
    /// The backend exists but could not be reached.
    Unreachable(String),
    /// The backend answered but the operation failed.
    CommandFailed(String),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SessionNotFound(name) => write!(f, "session `{name}` not found"),
            Self::Unreachable(msg) => write!(f, "unreachable: {msg}"),
            Self::CommandFailed(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<TunnelError> for BackendError {
    fn from(e: TunnelError) -> Self {
        Self::Unreachable(e.to_string())
    }
}

impl From<ProcessError> for BackendError {
    fn from(e: ProcessError) -> Self {
        match e {
            ProcessError::TimedOut { .. } => Self::Unreachable(e.to_string()),
            other => Self::CommandFailed(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_connect() || e.is_timeout() {
            Self::Unreachable(e.to_string())
        } else {
            Self::CommandFailed(e.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// DiscoveryError
// ---------------------------------------------------------------------------

/// Registry or cluster query failures. Logged; the caller retries next tick.
#[derive(Debug)]
pub enum DiscoveryError {
    Query(ProcessError),
    Parse(String),
}

impl fmt::Display for DiscoveryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query(e) => write!(f, "query: {e}"),
            Self::Parse(msg) => write!(f, "parse: {msg}"),
        }
    }
}

impl std::error::Error for DiscoveryError {}

impl From<ProcessError> for DiscoveryError {
    fn from(e: ProcessError) -> Self {
        Self::Query(e)
    }
}

impl From<serde_json::Error> for DiscoveryError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// ConfigError
// ---------------------------------------------------------------------------

/// Errors when loading or parsing configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Toml(toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io: {e}"),
            Self::Toml(e) => write!(f, "toml: {e}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Toml(e)
    }
}

// ---------------------------------------------------------------------------
// LockError
// ---------------------------------------------------------------------------

/// Single-instance lock failures for long-running commands.
#[derive(Debug)]
pub enum LockError {
    AlreadyRunning { path: PathBuf, holder: String },
    Io(std::io::Error),
}

impl fmt::Display for LockError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRunning { path, holder } => {
                write!(f, "already running ({holder}); lock held at {}", path.display())
            }
            Self::Io(e) => write!(f, "lock io: {e}"),
        }
    }
}

impl std::error::Error for LockError {}

impl From<std::io::Error> for LockError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

// ---------------------------------------------------------------------------
// CommandError
// ---------------------------------------------------------------------------

/// Top-level error type for CLI command flows.
#[derive(Debug)]
pub enum CommandError {
    Config(ConfigError),
    Resolve(ResolveError),
    Backend(BackendError),
    Tunnel(TunnelError),
    Lock(LockError),
    /// Invalid flag combination or argument value.
    Usage(String),
    Io(std::io::Error),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(e) => write!(f, "config: {e}"),
            Self::Resolve(e) => write!(f, "{e}"),
            Self::Backend(e) => write!(f, "{e}"),
            Self::Tunnel(e) => write!(f, "connecting to pod: {e}"),
            Self::Lock(e) => write!(f, "{e}"),
            Self::Usage(msg) => write!(f, "{msg}"),
            Self::Io(e) => write!(f, "io: {e}"),
        }
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    /// Process exit status for this failure.
    ///
    /// "Not found" and "found but unreachable" map to different codes so
    /// scripts can tell them apart.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Resolve(ResolveError::Cluster(_)) => 2,
            Self::Resolve(_) => 1,
            Self::Backend(BackendError::SessionNotFound(_)) => 1,
            Self::Backend(BackendError::Unreachable(_)) | Self::Tunnel(_) => 2,
            Self::Config(_) | Self::Usage(_) => 64,
            Self::Backend(_) | Self::Lock(_) | Self::Io(_) => 1,
        }
    }
}

impl From<ConfigError> for CommandError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<ResolveError> for CommandError {
    fn from(e: ResolveError) -> Self {
        Self::Resolve(e)
    }
}

impl From<BackendError> for CommandError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

impl From<TunnelError> for CommandError {
    fn from(e: TunnelError) -> Self {
        Self::Tunnel(e)
    }
}

impl From<LockError> for CommandError {
    fn from(e: LockError) -> Self {
        Self::Lock(e)
    }
}

impl From<std::io::Error> for CommandError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}
