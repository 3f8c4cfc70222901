//! Command flows behind the CLI subcommands.
//!
//! `main.rs` parses arguments and reports errors; everything between a
//! parsed command and its exit code lives here.

pub(crate) mod attach;
pub(crate) mod coop;
pub(crate) mod lock;
pub(crate) mod nudge;
pub(crate) mod peek;
pub(crate) mod server;

use std::sync::Arc;
use std::time::Duration;

use podbridge::addressing::resolve_namespace;
use podbridge::backend::{BackendDeps, CoopSettings};
use podbridge::cluster::{Kubectl, KubectlCluster};
use podbridge::config::{load_config, Config};
use podbridge::error::CommandError;
use podbridge::registry::BdRegistry;
use podbridge::shutdown::{self, ShutdownReceiver, ShutdownSender};
use podbridge::tmux::{LocalTmux, NUDGE_SETTLE};
use podbridge::tunnel::KubectlPortForwarder;

use crate::cli::Command;

const SSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Run one parsed command and return the process exit code.
pub(crate) async fn run(command: Command, config_path: Option<&str>) -> Result<i32, CommandError> {
    let config = load_config(config_path)?;
    match command {
        Command::Coop(args) => coop::run(&config, args).await,
        Command::Attach(args) => attach::run(&config, args).await,
        Command::Peek(args) => peek::run(&config, args).await,
        Command::Nudge(args) => nudge::run(&config, args).await,
        Command::Keys(args) => nudge::run_keys(&config, args).await,
        Command::TerminalServer(args) => server::run(config, args).await,
    }
}

/// Namespace for one-shot commands: env, then config, then the default.
pub(crate) fn namespace(config: &Config) -> String {
    resolve_namespace(config.cluster.namespace.as_deref(), |name| {
        std::env::var(name).ok()
    })
}

/// Production wiring for backend resolution.
pub(crate) fn backend_deps(config: &Config, shutdown: ShutdownReceiver) -> BackendDeps {
    let kubectl = Kubectl::from_config(&config.cluster);
    let local_tmux = LocalTmux::from_config(&config.tmux);
    BackendDeps {
        tmux: Arc::new(local_tmux.clone()),
        local_tmux,
        cluster: Arc::new(KubectlCluster::new(kubectl.clone())),
        registry: Arc::new(BdRegistry::new(config.registry.binary.clone())),
        forwarder: Arc::new(KubectlPortForwarder::new(kubectl)),
        namespace: namespace(config),
        coop: CoopSettings::from_config(&config.coop),
        ssh_timeout: SSH_TIMEOUT,
        nudge_settle: NUDGE_SETTLE,
        shutdown,
    }
}

/// Shutdown channel whose sender fires on SIGINT or SIGTERM.
pub(crate) fn signal_shutdown() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = shutdown::channel();
    let notify = tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::debug!("shutdown signal received");
        let _ = notify.send(true);
    });
    (tx, rx)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "cannot watch SIGTERM; only Ctrl+C will stop");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
