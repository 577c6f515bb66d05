#![forbid(unsafe_code)]
//! A typed client for the Tor control protocol.
//!
//! This crate owns the wire-level concerns: framing control-protocol lines
//! ([`tor_line`]), assembling reply groups and events ([`parser`]),
//! dispatching them to the right place ([`dispatcher`]), a FIFO command
//! queue with single-in-flight discipline ([`queue`]), a typed event bus
//! ([`bus`]), the SAFECOOKIE/HASHEDPASSWORD authentication handshake
//! ([`auth`]), and the [`Connection`] that ties all of the above to a real
//! socket.
//!
//! It knows nothing about spawning or supervising the `tor` process itself —
//! that lifecycle concern lives one layer up, in `tor-runtime`.

pub mod auth;
pub mod bus;
pub mod dispatcher;
pub mod error;
pub mod model;
pub mod parser;
pub mod queue;

mod connection;

pub use bus::{
    AddressInfo, BusEvent, DaemonState, EventBus, EventKind, Executor, LifecycleEvent, ListenerKind,
    LogLevel, LogLine, NetworkState, Observer, RuntimeState, SubscriptionHandle,
};
pub use connection::Connection;
pub use error::ControlError;
pub use model::{Command, Config, ConfigBuilder, EventRecord, ReplyGroup, ReplyLine, Setting};
pub use parser::{ParsedUnit, ReplyParser};
pub use queue::{CommandQueue, Job, JobStatus};
