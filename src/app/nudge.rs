//! `podbridge nudge` and `podbridge keys`: input to an agent's terminal.

use podbridge::addressing::AgentAddress;
use podbridge::backend::resolve_backend;
use podbridge::config::Config;
use podbridge::error::CommandError;

use super::{backend_deps, signal_shutdown};
use crate::cli::{KeysArgs, NudgeArgs};

/// `-m` wins over the positional message. Blank text is a usage error.
pub(crate) fn message_text(args: &NudgeArgs) -> Result<String, CommandError> {
    args.message_flag
        .as_deref()
        .or(args.message.as_deref())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
        .ok_or_else(|| CommandError::Usage("nudge needs a message (positional or -m)".into()))
}

pub(crate) async fn run(config: &Config, args: NudgeArgs) -> Result<i32, CommandError> {
    let message = message_text(&args)?;
    let address = AgentAddress::parse(&args.target)?;
    let (_tx, rx) = signal_shutdown();
    let deps = backend_deps(config, rx);
    let resolved = resolve_backend(&address, &deps).await?;
    tracing::debug!(
        agent = %address,
        backend = %resolved.backend.kind(),
        session = %resolved.session_name,
        "nudge"
    );
    resolved
        .backend
        .nudge(&resolved.session_name, &message)
        .await?;
    println!("Nudged {address}");
    Ok(0)
}

pub(crate) async fn run_keys(config: &Config, args: KeysArgs) -> Result<i32, CommandError> {
    let keys = args.keys.join(" ");
    if keys.trim().is_empty() {
        return Err(CommandError::Usage("keys needs at least one key name".into()));
    }
    let address = AgentAddress::parse(&args.target)?;
    let (_tx, rx) = signal_shutdown();
    let deps = backend_deps(config, rx);
    let resolved = resolve_backend(&address, &deps).await?;
    resolved
        .backend
        .send_keys(&resolved.session_name, &keys)
        .await?;
    Ok(0)
}
