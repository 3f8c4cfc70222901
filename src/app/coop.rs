//! `podbridge coop`: reach an agent's web terminal through a tunnel.

use std::sync::Arc;

use crossterm::style::Stylize;
use podbridge::addressing::{resolve_target, AgentAddress};
use podbridge::backend::CoopBackend;
use podbridge::config::Config;
use podbridge::error::CommandError;
use podbridge::shutdown::wait_for_cancellation;

use super::{backend_deps, signal_shutdown};
use crate::cli::CoopArgs;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CoopMode {
    Attach,
    Browser,
    PrintUrl,
}

impl CoopMode {
    pub(crate) fn from_args(args: &CoopArgs) -> Self {
        if args.browser {
            Self::Browser
        } else if args.url {
            Self::PrintUrl
        } else {
            Self::Attach
        }
    }
}

pub(crate) async fn run(config: &Config, args: CoopArgs) -> Result<i32, CommandError> {
    let address = AgentAddress::parse(&args.target)?;
    let mode = CoopMode::from_args(&args);
    let (_tx, rx) = signal_shutdown();
    let deps = backend_deps(config, rx.clone());

    let target = resolve_target(&address, &deps.namespace, deps.cluster.as_ref()).await?;
    tracing::debug!(agent = %address, pod = %target.pod_name, ?mode, "coop target resolved");
    let backend = CoopBackend::new(
        target,
        Arc::clone(&deps.tmux),
        Arc::clone(&deps.forwarder),
        deps.coop.clone(),
        rx.clone(),
    );

    if mode == CoopMode::Attach {
        let session = backend.target().session_name.clone();
        return Ok(backend.attach(&session).await?);
    }

    let mut tunnel = backend.open_tunnel().await?;
    let url = match tunnel.local_url() {
        Ok(url) => url,
        Err(e) => {
            tunnel.close().await;
            return Err(e.into());
        }
    };

    match mode {
        CoopMode::Browser if try_open_browser(&url).await => {
            eprintln!("{} {url}", "opened".green());
        }
        CoopMode::Browser => {
            eprintln!("{}", "could not launch a browser; open this URL:".yellow());
            println!("{url}");
        }
        _ => println!("{url}"),
    }
    eprintln!(
        "{}",
        format!("tunnel to {} open; press Ctrl+C to close", backend.target().pod_name).dark_grey()
    );

    let mut wait = rx;
    wait_for_cancellation(&mut wait).await;
    tunnel.close().await;
    eprintln!("{}", "tunnel closed".dark_grey());
    Ok(0)
}

/// Best-effort launch of the desktop browser.
async fn try_open_browser(url: &str) -> bool {
    #[cfg(target_os = "macos")]
    let mut command = {
        let mut c = tokio::process::Command::new("open");
        c.arg(url);
        c
    };
    #[cfg(target_os = "windows")]
    let mut command = {
        let mut c = tokio::process::Command::new("cmd");
        c.args(["/C", "start", "", url]);
        c
    };
    #[cfg(not(any(target_os = "macos", target_os = "windows")))]
    let mut command = {
        let mut c = tokio::process::Command::new("xdg-open");
        c.arg(url);
        c
    };
    command
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .await
        .is_ok_and(|status| status.success())
}
