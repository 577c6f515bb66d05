#![forbid(unsafe_code)]
//! Bounded-memory line ingestion.
//!
//! Both the control socket reader and the process stdout/stderr readers need
//! the same property: read whole lines without letting a misbehaving peer
//! (or a tor build that forgets to print a newline) grow our buffer
//! unboundedly. This crate provides a synchronous reader for the process
//! stdio pipes that don't need to be async, and a tokio-based reader for the
//! control socket, sharing the same chunking and discard-mode logic.

mod dotstuff;
mod sync_reader;

#[cfg(feature = "tokio")]
mod async_reader;

pub use dotstuff::{stuff_data_line, unstuff_data_line};
pub use sync_reader::{BoundedLine, SyncBoundedLineReader};

#[cfg(feature = "tokio")]
pub use async_reader::{AsyncBoundedLineReader, AsyncBoundedLineResult};

/// Default cap on a single line, generous relative to any real control-protocol
/// or tor log line but still bounded.
pub const DEFAULT_MAX_LINE_BYTES: usize = 512 * 1024;

const CHUNK_SIZE_BYTES: usize = 8192;
