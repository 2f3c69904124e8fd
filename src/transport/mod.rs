//! Pluggable packet transports.
//!
//! A transport owns the connect/write/disconnect lifecycle for one
//! destination. Concrete implementations are selected by name at
//! configuration time: `tcp` (stream socket), `pipe` (local channel),
//! `file` (rotating log file), `mem` (in-process ring buffer) and `noop`
//! (discard). All of them honour the same contract: `connect` is
//! idempotent, `write` either delivers a whole frame or fails, and
//! `disconnect` flushes best-effort before closing.

mod file;
mod memory;
mod noop;
mod pipe;
pub(crate) mod rotate;
mod tcp;

pub use file::{FileOptions, FileTransport};
pub use memory::{MemoryBuffer, MemoryTransport};
pub use noop::NoopTransport;
pub use pipe::PipeTransport;
pub use rotate::RotateMode;
pub use tcp::TcpTransport;

use std::time::Duration;

use crate::config::TransportSpec;
use crate::error::{ConfigurationError, TransportError};

/// Magic bytes exchanged when a stream transport connects. The client sends
/// them and expects the identical sequence back; anything else means the
/// peer speaks a different protocol.
pub const HANDSHAKE_MAGIC: [u8; 8] = *b"SIWP\x01\0\0\0";

/// Default connect/read/write timeout for stream transports.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Uniform contract implemented by every concrete transport.
pub trait Transport: Send {
    /// Establish the underlying channel. A no-op when already connected.
    fn connect(&mut self) -> Result<(), TransportError>;
    /// Deliver one framed packet. Never partially writes and reports
    /// success.
    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;
    /// Push any buffered bytes to the destination.
    fn flush(&mut self) -> Result<(), TransportError>;
    /// Close the channel, flushing best-effort first. Idempotent.
    fn disconnect(&mut self) -> Result<(), TransportError>;
    fn is_connected(&self) -> bool;
}

impl std::fmt::Debug for dyn Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Transport")
    }
}

/// Option keys every transport accepts.
const COMMON_OPTIONS: &[&str] = &[
    "timeout",
    "async",
    "backlog",
    "backlog.policy",
    "backlog.block",
    "reconnect",
    "reconnect.interval",
    "on-error",
    "key",
];

pub(crate) fn is_known_transport(name: &str) -> bool {
    matches!(name, "tcp" | "pipe" | "file" | "mem" | "noop")
}

/// Build the concrete transport for a parsed clause, validating that every
/// option key is recognised by the transport or common to all of them.
///
/// A `mem` clause also yields the drain handle for its ring; every other
/// transport yields `None`.
pub(crate) fn build(
    spec: &TransportSpec,
) -> Result<(Box<dyn Transport>, Option<MemoryBuffer>), ConfigurationError> {
    let specific: &[&str] = match spec.name.as_str() {
        "tcp" => &["host", "port"],
        "pipe" => &["name"],
        "file" => &["filename", "append", "maxsize", "rotate", "maxparts"],
        "mem" => &["maxsize"],
        "noop" => &[],
        _ => {
            return Err(ConfigurationError::UnknownTransport {
                name: spec.name.clone(),
                position: spec.position,
            })
        }
    };
    for key in spec.options.keys() {
        if !COMMON_OPTIONS.contains(&key) && !specific.contains(&key) {
            return Err(ConfigurationError::UnknownOption {
                transport: spec.name.clone(),
                key: key.to_string(),
            });
        }
    }

    match spec.name.as_str() {
        "tcp" => Ok((Box::new(TcpTransport::from_options(&spec.options)?), None)),
        "pipe" => Ok((Box::new(PipeTransport::from_options(&spec.options)?), None)),
        "file" => Ok((Box::new(FileTransport::from_options(&spec.options)?), None)),
        "mem" => {
            let transport = MemoryTransport::from_options(&spec.options)?;
            let buffer = transport.buffer();
            Ok((Box::new(transport), Some(buffer)))
        }
        _ => Ok((Box::new(NoopTransport::new()), None)),
    }
}
