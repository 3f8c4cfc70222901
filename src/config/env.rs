//! Environment overrides applied on top of the parsed config file.

use crate::error::ConfigError;

use super::Config;

/// Namespace override shared with every other gastown command.
pub const NAMESPACE_ENV: &str = "GT_K8S_NAMESPACE";
pub(super) const KUBECONFIG_ENV: &str = "KUBECONFIG";
pub(super) const COOP_TOKEN_ENV: &str = "PODBRIDGE_COOP_TOKEN";
pub(super) const OPEN_TIMEOUT_ENV: &str = "PODBRIDGE_OPEN_TIMEOUT_SECS";

pub(super) fn apply_env_overrides<FEnv>(
    config: &mut Config,
    env_lookup: &FEnv,
) -> Result<(), ConfigError>
where
    FEnv: Fn(&str) -> Option<String>,
{
    if let Some(ns) = non_empty(env_lookup, NAMESPACE_ENV) {
        config.cluster.namespace = Some(ns);
    }
    // kubectl reads KUBECONFIG itself; only surface it when the file is silent.
    if config.cluster.kubeconfig.is_none() {
        config.cluster.kubeconfig = non_empty(env_lookup, KUBECONFIG_ENV);
    }
    if let Some(token) = non_empty(env_lookup, COOP_TOKEN_ENV) {
        config.coop.token = Some(token);
    }
    if let Some(raw) = non_empty(env_lookup, OPEN_TIMEOUT_ENV) {
        let parsed = raw.parse::<u64>().ok().filter(|secs| *secs > 0).ok_or_else(|| {
            ConfigError::Invalid(format!(
                "invalid {OPEN_TIMEOUT_ENV} value `{raw}`: expected positive integer seconds"
            ))
        })?;
        config.coop.open_timeout_secs = parsed;
    }
    Ok(())
}

fn non_empty<FEnv>(env_lookup: &FEnv, name: &str) -> Option<String>
where
    FEnv: Fn(&str) -> Option<String>,
{
    env_lookup(name)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
