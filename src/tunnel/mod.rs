//! Tunnels from a local ephemeral port to one pod's web-terminal port.
//!
//! A [`TunnelConnection`] owns its port reservation and forwarder process.
//! Both are released on `close()`, on a failed `open()`, and on drop.

mod forward;
mod ports;

use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::net::TcpStream;
use tokio::time::{sleep, Instant};

use crate::error::TunnelError;
use crate::shutdown::{wait_for_cancellation, ShutdownReceiver};

pub use forward::{ForwardProcess, KubectlPortForwarder, PortForwarder};
pub use ports::{is_reserved, reserve_local_port, PortReservation};

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);
const CONNECT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    Closed,
    Opening,
    Open,
    Closing,
    Failed,
}

impl fmt::Display for TunnelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Closed => "closed",
            Self::Opening => "opening",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// One port-forward tunnel to one pod.
pub struct TunnelConnection {
    forwarder: Arc<dyn PortForwarder>,
    pod_name: String,
    namespace: String,
    remote_port: u16,
    state: TunnelState,
    reservation: Option<PortReservation>,
    process: Option<Box<dyn ForwardProcess>>,
    opened_at: Option<SystemTime>,
}

impl fmt::Debug for TunnelConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConnection")
            .field("pod_name", &self.pod_name)
            .field("namespace", &self.namespace)
            .field("state", &self.state)
            .field("local_port", &self.reservation.as_ref().map(PortReservation::port))
            .finish()
    }
}

impl TunnelConnection {
    pub fn new(
        forwarder: Arc<dyn PortForwarder>,
        namespace: impl Into<String>,
        pod_name: impl Into<String>,
        remote_port: u16,
    ) -> Self {
        Self {
            forwarder,
            pod_name: pod_name.into(),
            namespace: namespace.into(),
            remote_port,
            state: TunnelState::Closed,
            reservation: None,
            process: None,
            opened_at: None,
        }
    }

    pub fn pod_name(&self) -> &str {
        &self.pod_name
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn state(&self) -> TunnelState {
        self.state
    }

    pub fn opened_at(&self) -> Option<SystemTime> {
        self.opened_at
    }

    /// Local port; valid only while open.
    pub fn local_port(&self) -> Result<u16, TunnelError> {
        match (&self.state, &self.reservation) {
            (TunnelState::Open, Some(r)) => Ok(r.port()),
            _ => Err(TunnelError::NotOpen {
                pod: self.pod_name.clone(),
            }),
        }
    }

    /// `http://127.0.0.1:<port>`; valid only while open.
    pub fn local_url(&self) -> Result<String, TunnelError> {
        Ok(format!("http://127.0.0.1:{}", self.local_port()?))
    }

    /// Allocate a port, start the forwarder, and wait until the local end
    /// accepts connections.
    ///
    /// Fails with `Timeout` once `deadline` passes and `Cancelled` when
    /// `shutdown` fires. Every failure releases what was acquired.
    pub async fn open(
        &mut self,
        deadline: Duration,
        shutdown: &mut ShutdownReceiver,
    ) -> Result<(), TunnelError> {
        if self.state == TunnelState::Open {
            return Ok(());
        }
        self.release().await;
        self.state = TunnelState::Opening;
        tracing::debug!(pod = %self.pod_name, namespace = %self.namespace, "opening tunnel");

        match self.try_open(deadline, shutdown).await {
            Ok(()) => {
                self.state = TunnelState::Open;
                self.opened_at = Some(SystemTime::now());
                tracing::info!(
                    pod = %self.pod_name,
                    local_port = self.reservation.as_ref().map(PortReservation::port),
                    "tunnel open"
                );
                Ok(())
            }
            Err(e) => {
                self.release().await;
                self.state = TunnelState::Failed;
                tracing::warn!(pod = %self.pod_name, error = %e, "tunnel open failed");
                Err(e)
            }
        }
    }

    async fn try_open(
        &mut self,
        deadline: Duration,
        shutdown: &mut ShutdownReceiver,
    ) -> Result<(), TunnelError> {
        let reservation = reserve_local_port().map_err(TunnelError::PortAllocation)?;
        let port = reservation.port();
        self.reservation = Some(reservation);

        let process = self
            .forwarder
            .spawn(&self.namespace, &self.pod_name, port, self.remote_port)
            .await?;
        let process = self.process.insert(process);

        let expires = Instant::now() + deadline;
        loop {
            if let Some(detail) = process.try_exit() {
                return Err(TunnelError::ForwarderExited {
                    pod: self.pod_name.clone(),
                    detail,
                });
            }
            if probe(port).await {
                return Ok(());
            }
            if Instant::now() >= expires {
                return Err(TunnelError::Timeout {
                    pod: self.pod_name.clone(),
                    after: deadline,
                });
            }
            tokio::select! {
                _ = sleep(READY_POLL_INTERVAL) => {}
                _ = wait_for_cancellation(shutdown) => {
                    return Err(TunnelError::Cancelled { pod: self.pod_name.clone() });
                }
            }
        }
    }

    /// Forwarder still running and the local port accepting connections.
    pub async fn is_alive(&mut self) -> bool {
        if self.state != TunnelState::Open {
            return false;
        }
        let Some(process) = self.process.as_mut() else {
            return false;
        };
        if let Some(detail) = process.try_exit() {
            tracing::debug!(pod = %self.pod_name, detail = %detail, "forwarder exited");
            return false;
        }
        match &self.reservation {
            Some(r) => probe(r.port()).await,
            None => false,
        }
    }

    /// Stop the forwarder and free the port. Idempotent.
    pub async fn close(&mut self) {
        if matches!(self.state, TunnelState::Closed | TunnelState::Failed)
            && self.process.is_none()
            && self.reservation.is_none()
        {
            return;
        }
        self.state = TunnelState::Closing;
        self.release().await;
        self.state = TunnelState::Closed;
        tracing::debug!(pod = %self.pod_name, "tunnel closed");
    }

    async fn release(&mut self) {
        if let Some(mut process) = self.process.take() {
            process.terminate().await;
        }
        self.reservation = None;
        self.opened_at = None;
    }
}

async fn probe(port: u16) -> bool {
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    matches!(
        tokio::time::timeout(CONNECT_PROBE_TIMEOUT, TcpStream::connect(addr)).await,
        Ok(Ok(_))
    )
}
