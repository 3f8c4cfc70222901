//! Sessions in tmux on an SSH-reachable host.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::BackendError;
use crate::process::{
    ensure_success, run_interactive, run_process, run_with_timeout, shell_quote, ExecOutput,
};
use crate::tmux::{capture_pane_command, exact_target, last_lines, send_keys_args, shell_command};

const DEFAULT_SSH_PORT: u16 = 22;

/// Where and how to reach the remote host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    pub host: String,
    pub port: u16,
    pub key: Option<String>,
    pub proxy_command: Option<String>,
}

impl SshTarget {
    /// Build from registry notes. `None` without an `ssh_host`.
    pub fn from_notes(notes: &BTreeMap<String, String>) -> Option<Self> {
        let get = |key: &str| {
            notes
                .get(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let host = get("ssh_host")?;
        let port = get("ssh_port")
            .and_then(|p| p.parse::<u16>().ok())
            .filter(|p| *p > 0)
            .unwrap_or(DEFAULT_SSH_PORT);
        Some(Self {
            host,
            port,
            key: get("ssh_key"),
            proxy_command: get("ssh_proxy_command"),
        })
    }

    /// Non-interactive connection options, ending with the host.
    pub fn args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            "UserKnownHostsFile=/dev/null".into(),
            "-o".into(),
            "ConnectTimeout=5".into(),
            "-o".into(),
            "BatchMode=yes".into(),
            "-p".into(),
            self.port.to_string(),
        ];
        if let Some(key) = &self.key {
            args.push("-i".into());
            args.push(key.clone());
        }
        if let Some(proxy) = &self.proxy_command {
            args.push("-o".into());
            args.push(format!("ProxyCommand={proxy}"));
        }
        args.push(self.host.clone());
        args
    }
}

#[derive(Debug, Clone)]
pub struct SshBackend {
    target: SshTarget,
    timeout: Duration,
    nudge_settle: Duration,
}

impl SshBackend {
    pub fn new(target: SshTarget, timeout: Duration, nudge_settle: Duration) -> Self {
        Self {
            target,
            timeout,
            nudge_settle,
        }
    }

    pub fn target(&self) -> &SshTarget {
        &self.target
    }

    async fn run_remote(&self, remote_command: &str) -> Result<ExecOutput, BackendError> {
        let mut args = self.target.args();
        args.push(remote_command.to_string());
        let context = format!("ssh {}", self.target.host);
        Ok(run_with_timeout(run_process("ssh", &args, None), self.timeout, &context).await?)
    }

    pub async fn has_session(&self, name: &str) -> bool {
        match self.run_remote(&has_session_command(name)).await {
            Ok(out) => out.stdout.trim() == "yes",
            Err(e) => {
                tracing::debug!(host = %self.target.host, session = name, error = %e, "ssh has-session failed");
                false
            }
        }
    }

    pub async fn capture_pane(&self, name: &str, lines: usize) -> Result<String, BackendError> {
        if !self.has_session(name).await {
            return Err(BackendError::SessionNotFound(name.to_string()));
        }
        let out = self.run_remote(&capture_pane_command(name, lines)).await?;
        let out = ensure_success(out, &format!("capture {name} on {}", self.target.host))?;
        Ok(last_lines(&out.stdout, lines))
    }

    async fn remote_keys(&self, name: &str, keys: &str, literal: bool) -> Result<(), BackendError> {
        let command = shell_command(&send_keys_args(name, keys, literal));
        let out = self.run_remote(&command).await?;
        ensure_success(out, &format!("send-keys {name} on {}", self.target.host))?;
        Ok(())
    }

    pub async fn send_keys(&self, name: &str, keys: &str) -> Result<(), BackendError> {
        if keys.split_whitespace().next().is_none() {
            return Ok(());
        }
        if !self.has_session(name).await {
            return Err(BackendError::SessionNotFound(name.to_string()));
        }
        self.remote_keys(name, keys, false).await
    }

    /// Type the message, let it settle, then submit with Enter.
    pub async fn nudge(&self, name: &str, message: &str) -> Result<(), BackendError> {
        if !self.has_session(name).await {
            return Err(BackendError::SessionNotFound(name.to_string()));
        }
        self.remote_keys(name, message, true).await?;
        tokio::time::sleep(self.nudge_settle).await;
        self.remote_keys(name, "Enter", false).await
    }

    pub async fn attach(&self, name: &str) -> Result<i32, BackendError> {
        Ok(run_interactive("ssh", &self.attach_args(name)).await?)
    }

    pub fn attach_args(&self, name: &str) -> Vec<String> {
        let mut args = vec!["-t".to_string()];
        args.extend(self.target.args());
        args.push(format!(
            "tmux attach-session -t {}",
            shell_quote(&exact_target(name))
        ));
        args
    }
}

fn has_session_command(name: &str) -> String {
    format!(
        "tmux has-session -t {} 2>/dev/null && echo yes || echo no",
        shell_quote(&exact_target(name))
    )
}
