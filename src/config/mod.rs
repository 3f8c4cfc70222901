//! Configuration loading from TOML files and environment variables.
//!
//! Config is loaded in this order of precedence (highest wins):
//! 1. Environment variables (`GT_K8S_NAMESPACE`, `KUBECONFIG`,
//!    `PODBRIDGE_COOP_TOKEN`, `PODBRIDGE_OPEN_TIMEOUT_SECS`)
//! 2. TOML file specified via --config CLI flag
//! 3. ./podbridge.toml in the current directory
//! 4. $XDG_CONFIG_HOME/podbridge/podbridge.toml (or ~/.config/podbridge/podbridge.toml)
//! 5. Built-in defaults
//!
//! Command-line flags are applied by the command flows on top of the result.

use crate::error::ConfigError;
use std::path::{Path, PathBuf};

mod defaults;
mod env;
mod types;

pub use defaults::DEFAULT_NAMESPACE;
pub use env::NAMESPACE_ENV;
pub use types::{
    ClusterConfig, Config, CoopConfig, ProxyMode, RegistryConfig, ServerConfig, TmuxConfig,
};

const CONFIG_FILE_NAME: &str = "podbridge.toml";

/// Where the effective config text came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    Local,
    Global(PathBuf),
    BuiltInDefaults,
}

/// Load configuration from disk and environment.
///
/// `path_override` is an explicit config file path (from --config flag).
pub fn load_config(path_override: Option<&str>) -> Result<Config, ConfigError> {
    load_config_from_sources(
        path_override,
        |path| std::fs::read_to_string(path),
        |name| std::env::var(name).ok(),
        config_root_dir,
    )
}

pub fn load_config_from_sources<FRead, FEnv, FRoot>(
    path_override: Option<&str>,
    read_file: FRead,
    env_lookup: FEnv,
    config_root: FRoot,
) -> Result<Config, ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FEnv: Fn(&str) -> Option<String>,
    FRoot: Fn() -> Option<PathBuf>,
{
    let (config_text, source) =
        read_config_text_with_sources(path_override, &read_file, &config_root)?;
    tracing::debug!(source = ?source, "loading configuration");
    let mut config: Config = toml::from_str(&config_text)?;
    env::apply_env_overrides(&mut config, &env_lookup)?;
    validate(&config)?;
    Ok(config)
}

fn read_config_text_with_sources<FRead, FRoot>(
    path_override: Option<&str>,
    read_file: &FRead,
    config_root: &FRoot,
) -> Result<(String, ConfigSource), ConfigError>
where
    FRead: Fn(&Path) -> Result<String, std::io::Error>,
    FRoot: Fn() -> Option<PathBuf>,
{
    // An explicit path must exist; implicit locations are optional.
    if let Some(p) = path_override {
        let path = PathBuf::from(p);
        let text = read_file(&path)?;
        return Ok((text, ConfigSource::Explicit(path)));
    }

    if let Ok(text) = read_file(Path::new(CONFIG_FILE_NAME)) {
        return Ok((text, ConfigSource::Local));
    }
    if let Some(dir) = config_root() {
        let global = dir.join("podbridge").join(CONFIG_FILE_NAME);
        if let Ok(text) = read_file(&global) {
            return Ok((text, ConfigSource::Global(global)));
        }
    }

    Ok((String::new(), ConfigSource::BuiltInDefaults))
}

/// Reject values that would make a loop spin or a tunnel unusable.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
    if config.coop.remote_port == 0 {
        return invalid("coop.remote_port must be non-zero");
    }
    if config.coop.open_timeout_secs == 0 {
        return invalid("coop.open_timeout_secs must be greater than zero");
    }
    if config.coop.http_timeout_secs == 0 {
        return invalid("coop.http_timeout_secs must be greater than zero");
    }
    if config.server.poll_interval_secs == 0 {
        return invalid("server.poll_interval_secs must be greater than zero");
    }
    if config.server.health_interval_secs == 0 {
        return invalid("server.health_interval_secs must be greater than zero");
    }
    if config.server.max_consecutive_failures == 0 {
        return invalid("server.max_consecutive_failures must be at least 1");
    }
    if config.server.screen_session.trim().is_empty() {
        return invalid("server.screen_session must not be empty");
    }
    for (key, value) in [
        ("cluster.kubectl", &config.cluster.kubectl),
        ("tmux.binary", &config.tmux.binary),
        ("registry.binary", &config.registry.binary),
    ] {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(format!("{key} must not be empty")));
        }
    }
    Ok(())
}

pub fn config_root_dir() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("XDG_CONFIG_HOME") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .or_else(dirs::config_dir)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
