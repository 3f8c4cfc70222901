//! `podbridge terminal-server`: keep local proxy sessions for a rig's pods.

use std::sync::Arc;

use podbridge::cluster::{Kubectl, KubectlCluster};
use podbridge::config::Config;
use podbridge::error::CommandError;
use podbridge::registry::BdRegistry;
use podbridge::server::{ServerDeps, ServerSettings, TerminalServer};
use podbridge::tmux::LocalTmux;
use podbridge::tunnel::KubectlPortForwarder;

use super::lock::{server_lock_path, InstanceLock};
use super::{namespace, signal_shutdown};
use crate::cli::ServerArgs;

/// Fold command-line flags over the loaded config.
pub(crate) fn apply_overrides(config: &mut Config, args: &ServerArgs) {
    if let Some(path) = args.kubeconfig.as_deref() {
        config.cluster.kubeconfig = Some(path.to_string());
    }
    if let Some(name) = args.screen_session.as_deref() {
        config.server.screen_session = name.to_string();
    }
}

/// Interval flags apply at full precision; the config file only holds
/// whole seconds.
pub(crate) fn apply_interval_overrides(settings: &mut ServerSettings, args: &ServerArgs) {
    if let Some(interval) = args.poll_interval {
        settings.poll_interval = interval;
    }
    if let Some(interval) = args.health_interval {
        settings.health_interval = interval;
    }
}

/// `--namespace` wins over env and config.
pub(crate) fn server_namespace(config: &Config, args: &ServerArgs) -> String {
    args.namespace
        .as_deref()
        .map(str::trim)
        .filter(|ns| !ns.is_empty())
        .map(String::from)
        .unwrap_or_else(|| namespace(config))
}

pub(crate) async fn run(mut config: Config, args: ServerArgs) -> Result<i32, CommandError> {
    let rig = args.rig.trim().to_string();
    if rig.is_empty() {
        return Err(CommandError::Usage("--rig must not be empty".into()));
    }
    apply_overrides(&mut config, &args);
    let namespace = server_namespace(&config, &args);

    let lock = InstanceLock::acquire(&server_lock_path(&config.server.lock_dir(), &rig))?;
    tracing::debug!(lock = %lock.path().display(), "instance lock held");

    let kubectl = Kubectl::from_config(&config.cluster);
    let deps = ServerDeps {
        cluster: Arc::new(KubectlCluster::new(kubectl.clone())),
        registry: Arc::new(BdRegistry::new(config.registry.binary.clone())),
        tmux: Arc::new(LocalTmux::from_config(&config.tmux)),
        forwarder: Arc::new(KubectlPortForwarder::new(kubectl)),
    };
    let mut settings = ServerSettings::from_config(&config, &rig, &namespace);
    apply_interval_overrides(&mut settings, &args);

    let (_tx, rx) = signal_shutdown();
    let server = TerminalServer::new(settings, deps, rx);
    let status = server.run().await;
    tracing::info!(connections = status.connections.len(), "terminal server exited");
    drop(lock);
    Ok(0)
}
