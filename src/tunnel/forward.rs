//! Port-forward processes.

use std::process::Stdio;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};

use crate::cluster::Kubectl;
use crate::error::{ProcessError, TunnelError};

/// Stderr kept from a forwarder for error messages.
const STDERR_LIMIT: usize = 4096;

/// Starts forwarding processes from a local port to a pod port.
#[async_trait]
pub trait PortForwarder: Send + Sync {
    async fn spawn(
        &self,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardProcess>, TunnelError>;
}

/// A running forwarder. Dropping it must stop the forward.
#[async_trait]
pub trait ForwardProcess: Send {
    /// `Some(detail)` once the process has exited.
    fn try_exit(&mut self) -> Option<String>;

    /// Stop the process and wait for it to go away.
    async fn terminate(&mut self);
}

/// `kubectl port-forward` based forwarder.
#[derive(Debug, Clone)]
pub struct KubectlPortForwarder {
    kubectl: Kubectl,
}

impl KubectlPortForwarder {
    pub fn new(kubectl: Kubectl) -> Self {
        Self { kubectl }
    }

    pub fn args(&self, namespace: &str, pod: &str, local_port: u16, remote_port: u16) -> Vec<String> {
        self.kubectl.args([
            "port-forward".to_string(),
            "-n".into(),
            namespace.into(),
            format!("pod/{pod}"),
            format!("{local_port}:{remote_port}"),
            "--address".into(),
            "127.0.0.1".into(),
        ])
    }
}

#[async_trait]
impl PortForwarder for KubectlPortForwarder {
    async fn spawn(
        &self,
        namespace: &str,
        pod: &str,
        local_port: u16,
        remote_port: u16,
    ) -> Result<Box<dyn ForwardProcess>, TunnelError> {
        let mut cmd = Command::new(&self.kubectl.binary);
        cmd.args(self.args(namespace, pod, local_port, remote_port))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let mut child = cmd.spawn().map_err(|source| {
            TunnelError::Spawn(ProcessError::Spawn {
                program: self.kubectl.binary.clone(),
                source,
            })
        })?;

        let stderr = Arc::new(Mutex::new(String::new()));
        if let Some(mut pipe) = child.stderr.take() {
            let sink = Arc::clone(&stderr);
            tokio::spawn(async move {
                let mut buf = [0u8; 512];
                while let Ok(n) = pipe.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    let mut text = sink.lock().unwrap_or_else(|e| e.into_inner());
                    if text.len() < STDERR_LIMIT {
                        text.push_str(&String::from_utf8_lossy(&buf[..n]));
                    }
                }
            });
        }

        Ok(Box::new(KubectlForward { child, stderr }))
    }
}

struct KubectlForward {
    child: Child,
    stderr: Arc<Mutex<String>>,
}

#[async_trait]
impl ForwardProcess for KubectlForward {
    fn try_exit(&mut self) -> Option<String> {
        let status = match self.child.try_wait() {
            Ok(Some(status)) => status.to_string(),
            Ok(None) => return None,
            Err(e) => e.to_string(),
        };
        let stderr = self.stderr.lock().unwrap_or_else(|e| e.into_inner());
        let detail = stderr.trim();
        Some(if detail.is_empty() {
            status
        } else {
            format!("{status}: {detail}")
        })
    }

    async fn terminate(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::debug!(error = %e, "port-forward already gone");
        }
    }
}
