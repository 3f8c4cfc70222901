//! podbridge: reach agent terminals on local tmux, SSH hosts, or
//! Kubernetes pods through one addressing scheme.
//!
//! The library resolves an agent address to the backend that hosts it,
//! manages `kubectl port-forward` tunnels to pods, and runs the terminal
//! server that mirrors a rig's pods as local tmux sessions.
//!
//! # Quick start
//!
//! ```no_run
//! use podbridge::addressing::AgentAddress;
//!
//! let address = AgentAddress::parse("gastown/polecats/toast").unwrap();
//! assert_eq!(address.session_name(), "gt-gastown-toast");
//! ```

pub mod addressing;
pub mod backend;
pub mod cluster;
pub mod config;
pub mod error;
pub mod logging;
pub mod process;
pub mod registry;
pub mod server;
pub mod shutdown;
#[cfg(test)]
pub mod testsupport;
pub mod tmux;
pub mod tunnel;
