//! CLI argument parsing via clap.

use std::time::Duration;

use clap::{Args as ClapArgs, Parser, Subcommand};

use crate::build_info::HELP_BUILD_METADATA;

/// Reach agent terminals wherever they run: local tmux, SSH hosts, or
/// Kubernetes pods.
#[derive(Debug, Parser)]
#[command(name = "podbridge", disable_version_flag = true, after_help = HELP_BUILD_METADATA)]
pub struct Args {
    /// Path to config file (default: ./podbridge.toml or ~/.config/podbridge/podbridge.toml).
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<String>,

    /// Log debug detail to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Print version and build metadata.
    #[arg(short = 'V', long = "version")]
    pub version: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Tunnel to an agent's pod and attach to its web terminal.
    Coop(CoopArgs),
    /// Attach to an agent through whichever backend hosts it.
    Attach(AttachArgs),
    /// Print the last lines of an agent's terminal.
    Peek(PeekArgs),
    /// Type a message into an agent's terminal and submit it.
    Nudge(NudgeArgs),
    /// Press named keys (`Enter`, `Escape`, `C-c`) in an agent's terminal.
    Keys(KeysArgs),
    /// Keep a local proxy session for every agent pod in a rig.
    TerminalServer(ServerArgs),
}

#[derive(Debug, ClapArgs)]
pub struct CoopArgs {
    /// Agent address (`mayor`, `rig/witness`, `rig/polecats/name`) or pod name.
    pub target: String,

    /// Open the web terminal in a browser instead of attaching.
    #[arg(long = "browser", conflicts_with = "url")]
    pub browser: bool,

    /// Print the local URL and keep the tunnel open until Ctrl+C.
    #[arg(long = "url")]
    pub url: bool,
}

#[derive(Debug, ClapArgs)]
pub struct AttachArgs {
    pub target: String,
}

#[derive(Debug, ClapArgs)]
pub struct PeekArgs {
    pub target: String,

    /// Number of lines (default 100).
    pub count: Option<usize>,

    /// Number of lines; wins over the positional count.
    #[arg(short = 'n', long = "lines")]
    pub lines: Option<usize>,
}

#[derive(Debug, ClapArgs)]
pub struct NudgeArgs {
    pub target: String,

    /// Message text.
    pub message: Option<String>,

    /// Message text; wins over the positional message.
    #[arg(short = 'm', long = "message", value_name = "TEXT")]
    pub message_flag: Option<String>,
}

#[derive(Debug, ClapArgs)]
pub struct KeysArgs {
    pub target: String,

    /// Key names, sent in order.
    #[arg(required = true)]
    pub keys: Vec<String>,
}

#[derive(Debug, ClapArgs)]
pub struct ServerArgs {
    /// Rig whose agent pods are proxied.
    #[arg(long = "rig")]
    pub rig: String,

    #[arg(long = "namespace")]
    pub namespace: Option<String>,

    #[arg(long = "kubeconfig", value_name = "PATH")]
    pub kubeconfig: Option<String>,

    /// Discovery interval, e.g. `10s`, `1m`.
    #[arg(long = "poll-interval", value_parser = podbridge::process::parse_duration)]
    pub poll_interval: Option<Duration>,

    /// Health-check interval, e.g. `30s`.
    #[arg(long = "health-interval", value_parser = podbridge::process::parse_duration)]
    pub health_interval: Option<Duration>,

    /// Screen session attached inside each pod in screen proxy mode.
    #[arg(long = "screen-session", value_name = "NAME")]
    pub screen_session: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coop_modes_are_exclusive() {
        assert!(Args::try_parse_from(["podbridge", "coop", "mayor", "--browser", "--url"]).is_err());
        let args = Args::parse_from(["podbridge", "coop", "gastown/witness", "--url"]);
        match args.command {
            Some(Command::Coop(coop)) => {
                assert_eq!(coop.target, "gastown/witness");
                assert!(coop.url);
                assert!(!coop.browser);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn peek_accepts_count_and_flag() {
        let args = Args::parse_from(["podbridge", "peek", "mayor", "20", "-n", "5"]);
        match args.command {
            Some(Command::Peek(peek)) => {
                assert_eq!(peek.count, Some(20));
                assert_eq!(peek.lines, Some(5));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn nudge_takes_positional_or_flag_message() {
        let args = Args::parse_from(["podbridge", "nudge", "gastown/crew/max", "check mail"]);
        match args.command {
            Some(Command::Nudge(nudge)) => {
                assert_eq!(nudge.target, "gastown/crew/max");
                assert_eq!(nudge.message.as_deref(), Some("check mail"));
                assert!(nudge.message_flag.is_none());
            }
            other => panic!("unexpected command: {other:?}"),
        }
        let args = Args::parse_from(["podbridge", "nudge", "mayor", "-m", "hi"]);
        match args.command {
            Some(Command::Nudge(nudge)) => assert_eq!(nudge.message_flag.as_deref(), Some("hi")),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn keys_need_at_least_one_name() {
        assert!(Args::try_parse_from(["podbridge", "keys", "mayor"]).is_err());
        let args = Args::parse_from(["podbridge", "keys", "mayor", "Escape", "Enter"]);
        match args.command {
            Some(Command::Keys(keys)) => assert_eq!(keys.keys, vec!["Escape", "Enter"]),
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn terminal_server_parses_durations() {
        let args = Args::parse_from([
            "podbridge",
            "-v",
            "terminal-server",
            "--rig",
            "gastown",
            "--poll-interval",
            "5s",
            "--health-interval",
            "2m",
        ]);
        assert!(args.verbose);
        match args.command {
            Some(Command::TerminalServer(server)) => {
                assert_eq!(server.rig, "gastown");
                assert_eq!(server.poll_interval, Some(Duration::from_secs(5)));
                assert_eq!(server.health_interval, Some(Duration::from_secs(120)));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn terminal_server_requires_rig() {
        assert!(Args::try_parse_from(["podbridge", "terminal-server"]).is_err());
    }

    #[test]
    fn bad_duration_is_rejected() {
        assert!(Args::try_parse_from([
            "podbridge",
            "terminal-server",
            "--rig",
            "r",
            "--poll-interval",
            "soon"
        ])
        .is_err());
    }

    #[test]
    fn version_flag_needs_no_subcommand() {
        let args = Args::parse_from(["podbridge", "--version"]);
        assert!(args.version);
        assert!(args.command.is_none());
    }
}
