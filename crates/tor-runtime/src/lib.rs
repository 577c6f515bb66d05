#![forbid(unsafe_code)]
//! Lifecycle supervisor for the tor daemon.
//!
//! Builds on [`tor_ctl`]'s control-protocol engine with the pieces that sit
//! above the wire: host-level configuration and argv construction
//! ([`config`]), the PROTOCOLINFO/AUTHENTICATE handshake ([`auth`]),
//! discovering the control port tor actually bound ([`port_file`]), the
//! lifecycle action processor ([`action`]), the `(DaemonState, NetworkState,
//! AddressInfo)` state machine ([`state`]), the process supervisor
//! ([`supervisor`]), the process-wide per-instance lock map ([`lock_map`]),
//! and the [`RuntimeManager`] facade that composes all of the above.

pub mod action;
pub mod builder;
pub mod config;
pub mod error;
pub mod lock_map;
pub mod log_classify;

mod auth;
mod control_events;
mod manager;
mod port_file;
mod state;
mod supervisor;

pub use action::{ActionJob, ActionKind};
pub use builder::RuntimeManagerBuilder;
pub use config::{ControlPortSpec, HostPaths, ResourceProvider, SocksPortSpec};
pub use error::RuntimeError;
pub use lock_map::InstanceId;
pub use manager::{Environment, RuntimeManager};
pub use port_file::ControlEndpoint;
