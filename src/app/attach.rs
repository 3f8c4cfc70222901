//! `podbridge attach`: attach to an agent wherever it runs.

use podbridge::addressing::AgentAddress;
use podbridge::backend::resolve_backend;
use podbridge::config::Config;
use podbridge::error::CommandError;

use super::{backend_deps, signal_shutdown};
use crate::cli::AttachArgs;

pub(crate) async fn run(config: &Config, args: AttachArgs) -> Result<i32, CommandError> {
    let address = AgentAddress::parse(&args.target)?;
    let (_tx, rx) = signal_shutdown();
    let deps = backend_deps(config, rx);
    let resolved = resolve_backend(&address, &deps).await?;
    tracing::info!(
        agent = %address,
        backend = %resolved.backend.kind(),
        session = %resolved.session_name,
        "attaching"
    );
    Ok(resolved.backend.attach(&resolved.session_name).await?)
}
