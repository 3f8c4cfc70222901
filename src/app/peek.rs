//! `podbridge peek`: print the tail of an agent's terminal.

use podbridge::addressing::AgentAddress;
use podbridge::backend::resolve_backend;
use podbridge::config::Config;
use podbridge::error::CommandError;

use super::{backend_deps, signal_shutdown};
use crate::cli::PeekArgs;

const DEFAULT_PEEK_LINES: usize = 100;

/// `-n` wins over the positional count.
pub(crate) fn line_count(args: &PeekArgs) -> usize {
    args.lines.or(args.count).unwrap_or(DEFAULT_PEEK_LINES)
}

pub(crate) async fn run(config: &Config, args: PeekArgs) -> Result<i32, CommandError> {
    let address = AgentAddress::parse(&args.target)?;
    let (_tx, rx) = signal_shutdown();
    let deps = backend_deps(config, rx);
    let resolved = resolve_backend(&address, &deps).await?;
    let lines = line_count(&args);
    tracing::debug!(
        agent = %address,
        backend = %resolved.backend.kind(),
        session = %resolved.session_name,
        lines,
        "peek"
    );
    let text = resolved
        .backend
        .capture_pane(&resolved.session_name, lines)
        .await?;
    if text.is_empty() {
        return Ok(0);
    }
    println!("{text}");
    Ok(0)
}
