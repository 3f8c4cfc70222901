//! Local terminal-multiplexer host.
//!
//! Targets always use tmux's exact-match form so that `gt-gastown-nux`
//! never matches `gt-gastown-nux2` by prefix. Session-level commands
//! (`has-session`, `kill-session`, `attach-session`) take `=name`; commands
//! that act on a pane or window need the trailing colon, `=name:`, or tmux
//! fails to find the pane.

use std::time::Duration;

use async_trait::async_trait;

use crate::config::TmuxConfig;
use crate::error::{BackendError, ProcessError};
use crate::process::{ensure_success, run_process, shell_quote};

/// Pause between typing a nudge and submitting it, so a paste-detecting
/// TUI has taken the whole message before Enter arrives.
pub const NUDGE_SETTLE: Duration = Duration::from_millis(500);

/// Exact-match session target.
pub fn exact_target(session: &str) -> String {
    format!("={session}")
}

/// Exact-match target for the session's active pane.
pub fn pane_target(session: &str) -> String {
    format!("={session}:")
}

/// `capture-pane` arguments for the last `lines` lines (0 = full history).
pub fn capture_pane_args(session: &str, lines: usize) -> Vec<String> {
    let start = if lines == 0 {
        "-".to_string()
    } else {
        format!("-{lines}")
    };
    vec![
        "capture-pane".into(),
        "-p".into(),
        "-J".into(),
        "-t".into(),
        pane_target(session),
        "-S".into(),
        start,
    ]
}

/// `send-keys` arguments. Literal input is typed as-is; otherwise each
/// whitespace-separated word is a key name (`Enter`, `C-c`, `Escape`).
pub fn send_keys_args(session: &str, keys: &str, literal: bool) -> Vec<String> {
    let mut args = vec!["send-keys".to_string(), "-t".into(), pane_target(session)];
    if literal {
        args.push("-l".into());
        args.push(keys.to_string());
    } else {
        args.extend(keys.split_whitespace().map(String::from));
    }
    args
}

/// A tmux argument vector as a shell command line, for remote hosts.
pub fn shell_command(args: &[String]) -> String {
    let mut cmd = String::from("tmux");
    for arg in args {
        cmd.push(' ');
        cmd.push_str(&shell_quote(arg));
    }
    cmd
}

/// The capture as a shell command line.
pub fn capture_pane_command(session: &str, lines: usize) -> String {
    shell_command(&capture_pane_args(session, lines))
}

/// Keep the last `n` lines of `text`, ignoring trailing blank lines.
/// `n == 0` keeps everything.
pub fn last_lines(text: &str, n: usize) -> String {
    let mut lines: Vec<&str> = text.lines().collect();
    while lines.last().is_some_and(|l| l.trim().is_empty()) {
        lines.pop();
    }
    if n > 0 && lines.len() > n {
        lines.drain(..lines.len() - n);
    }
    lines.join("\n")
}

fn is_missing_session(detail: &str) -> bool {
    detail.contains("can't find session")
        || detail.contains("session not found")
        || detail.contains("no server running")
        || detail.contains("error connecting to")
        || detail.contains("can't find pane")
        || detail.contains("can't find window")
}

/// Operations the bridge performs on a tmux server.
#[async_trait]
pub trait TmuxClient: Send + Sync {
    /// Existence probe. Lookup errors read as "absent".
    async fn has_session(&self, session: &str) -> bool;

    async fn capture_pane(&self, session: &str, lines: usize) -> Result<String, BackendError>;

    /// Create a detached session running `argv`, replacing any stale
    /// session of the same name. The pane stays around after the command
    /// exits so health checks can see it died.
    async fn create_proxy_session(&self, session: &str, argv: &[String])
        -> Result<(), BackendError>;

    /// Kill a session; a missing session is not an error.
    async fn kill_session(&self, session: &str) -> Result<(), BackendError>;

    /// Whether the session's pane has exited. A missing session counts as dead.
    async fn pane_dead(&self, session: &str) -> Result<bool, BackendError>;

    /// Type into the session's pane. See [`send_keys_args`] for `literal`.
    async fn send_keys(&self, session: &str, keys: &str, literal: bool)
        -> Result<(), BackendError>;
}

/// Type `message` into a session and submit it with Enter.
pub async fn nudge_session(
    tmux: &dyn TmuxClient,
    session: &str,
    message: &str,
    settle: Duration,
) -> Result<(), BackendError> {
    tmux.send_keys(session, message, true).await?;
    tokio::time::sleep(settle).await;
    tmux.send_keys(session, "Enter", false).await
}

/// `TmuxClient` for the operator's own tmux server, or a named server
/// socket (`tmux -L <socket>`) when one is configured.
#[derive(Debug, Clone)]
pub struct LocalTmux {
    binary: String,
    socket: Option<String>,
}

impl LocalTmux {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            socket: None,
        }
    }

    pub fn from_config(config: &TmuxConfig) -> Self {
        Self::new(config.binary.clone()).with_socket(config.socket.clone())
    }

    pub fn with_socket(mut self, socket: Option<String>) -> Self {
        self.socket = socket.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Full argument vector for one tmux invocation, socket first.
    pub fn command_args(&self, args: Vec<String>) -> Vec<String> {
        match &self.socket {
            Some(socket) => {
                let mut full = vec!["-L".to_string(), socket.clone()];
                full.extend(args);
                full
            }
            None => args,
        }
    }

    async fn run(&self, args: Vec<String>, context: &str) -> Result<String, BackendError> {
        let out = run_process(&self.binary, &self.command_args(args), None).await?;
        match ensure_success(out, context) {
            Ok(out) => Ok(out.stdout),
            Err(ProcessError::Failed { detail, .. }) if is_missing_session(&detail) => {
                Err(BackendError::SessionNotFound(context.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

/// Argument vector creating `session` around `argv` with remain-on-exit set
/// in the same tmux invocation.
pub fn new_session_args(session: &str, argv: &[String]) -> Vec<String> {
    let command = argv
        .iter()
        .map(|a| shell_quote(a))
        .collect::<Vec<_>>()
        .join(" ");
    vec![
        "new-session".into(),
        "-d".into(),
        "-s".into(),
        session.into(),
        command,
        ";".into(),
        "set-option".into(),
        "-t".into(),
        pane_target(session),
        "remain-on-exit".into(),
        "on".into(),
    ]
}

#[async_trait]
impl TmuxClient for LocalTmux {
    async fn has_session(&self, session: &str) -> bool {
        let args = self.command_args(vec![
            "has-session".to_string(),
            "-t".into(),
            exact_target(session),
        ]);
        match run_process(&self.binary, &args, None).await {
            Ok(out) => out.success(),
            Err(e) => {
                tracing::debug!(session, error = %e, "tmux has-session failed");
                false
            }
        }
    }

    async fn capture_pane(&self, session: &str, lines: usize) -> Result<String, BackendError> {
        let out = self.run(capture_pane_args(session, lines), session).await?;
        Ok(last_lines(&out, lines))
    }

    async fn create_proxy_session(
        &self,
        session: &str,
        argv: &[String],
    ) -> Result<(), BackendError> {
        if self.has_session(session).await {
            tracing::debug!(session, "killing stale session");
            self.kill_session(session).await?;
        }
        self.run(new_session_args(session, argv), session).await?;
        Ok(())
    }

    async fn kill_session(&self, session: &str) -> Result<(), BackendError> {
        let args = vec!["kill-session".to_string(), "-t".into(), exact_target(session)];
        match self.run(args, session).await {
            Ok(_) | Err(BackendError::SessionNotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn pane_dead(&self, session: &str) -> Result<bool, BackendError> {
        let args = vec![
            "display-message".to_string(),
            "-p".into(),
            "-t".into(),
            pane_target(session),
            "#{pane_dead}".into(),
        ];
        match self.run(args, session).await {
            Ok(out) => Ok(out.trim() == "1"),
            Err(BackendError::SessionNotFound(_)) => Ok(true),
            Err(e) => Err(e),
        }
    }

    async fn send_keys(
        &self,
        session: &str,
        keys: &str,
        literal: bool,
    ) -> Result<(), BackendError> {
        if !literal && keys.split_whitespace().next().is_none() {
            return Ok(());
        }
        self.run(send_keys_args(session, keys, literal), session).await?;
        Ok(())
    }
}

/// True when the current process runs inside a tmux client.
pub fn inside_tmux() -> bool {
    std::env::var_os("TMUX").is_some_and(|v| !v.is_empty())
}
