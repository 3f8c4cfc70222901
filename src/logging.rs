//! Diagnostic logging setup.
//!
//! Logs go to stderr so command output on stdout (`peek`, `coop --url`)
//! stays pipe-friendly.

use tracing_subscriber::EnvFilter;

const LOG_ENV: &str = "PODBRIDGE_LOG";

/// Pick the filter directive: `PODBRIDGE_LOG`, then `RUST_LOG`, then a
/// level derived from `--verbose`.
fn filter_directive<FEnv>(verbose: bool, env_lookup: FEnv) -> String
where
    FEnv: Fn(&str) -> Option<String>,
{
    let from_env = |name: &str| env_lookup(name).filter(|v| !v.trim().is_empty());
    from_env(LOG_ENV)
        .or_else(|| from_env("RUST_LOG"))
        .unwrap_or_else(|| if verbose { "debug" } else { "info" }.to_string())
}

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init_logging(verbose: bool) {
    let directive = filter_directive(verbose, |name| std::env::var(name).ok());
    let filter = EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}
