//! Sessions on the operator's own tmux server.

use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;
use crate::process::exec_or_spawn;
use crate::tmux::{exact_target, inside_tmux, nudge_session, LocalTmux, TmuxClient};

#[derive(Clone)]
pub struct LocalBackend {
    tmux: Arc<dyn TmuxClient>,
    invocation: LocalTmux,
    nudge_settle: Duration,
}

impl LocalBackend {
    /// `tmux` serves the capability calls; `invocation` names the binary
    /// and socket an interactive attach runs.
    pub fn new(tmux: Arc<dyn TmuxClient>, invocation: LocalTmux, nudge_settle: Duration) -> Self {
        Self {
            tmux,
            invocation,
            nudge_settle,
        }
    }

    pub async fn has_session(&self, name: &str) -> bool {
        self.tmux.has_session(name).await
    }

    async fn require(&self, name: &str) -> Result<(), BackendError> {
        if self.tmux.has_session(name).await {
            Ok(())
        } else {
            Err(BackendError::SessionNotFound(name.to_string()))
        }
    }

    pub async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, BackendError> {
        self.require(name).await?;
        self.tmux.capture_pane(name, lines).await
    }

    pub async fn send_keys(&self, name: &str, keys: &str) -> Result<(), BackendError> {
        self.require(name).await?;
        self.tmux.send_keys(name, keys, false).await
    }

    pub async fn nudge(&self, name: &str, message: &str) -> Result<(), BackendError> {
        self.require(name).await?;
        nudge_session(self.tmux.as_ref(), name, message, self.nudge_settle).await
    }

    /// Hand the terminal to tmux. On Unix this replaces the process image
    /// and only returns on failure.
    pub async fn attach(&self, name: &str) -> Result<i32, BackendError> {
        self.require(name).await?;
        let args = self
            .invocation
            .command_args(attach_args(name, inside_tmux()));
        Ok(exec_or_spawn(self.invocation.binary(), &args).await?)
    }
}

/// `switch-client` from inside tmux, `attach-session` from a bare terminal.
pub fn attach_args(name: &str, inside_tmux: bool) -> Vec<String> {
    let verb = if inside_tmux {
        "switch-client"
    } else {
        "attach-session"
    };
    vec![verb.to_string(), "-t".into(), exact_target(name)]
}
