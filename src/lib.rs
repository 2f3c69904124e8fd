//! Client engine for streaming binary diagnostic packets to a logging
//! console or a local log file.
//!
//! The pieces, front to back:
//!
//! - [`packet`]: the typed packet model and its self-describing binary
//!   frame encoding.
//! - [`config`]: the `tcp(host=...,port=...);file(...)` connection-string
//!   parser producing one transport specification per clause.
//! - [`transport`]: the pluggable delivery channels (stream socket, local
//!   pipe, rotating file, in-memory ring, no-op).
//! - [`dispatch`]: per-connection delivery with optional worker threads,
//!   byte-bounded backlogs, reconnect backoff and error routing.
//! - [`cipher`]: the optional per-frame AES-CBC envelope.
//! - [`Engine`]: the surface a logging façade talks to: `configure`,
//!   `submit`, `flush`, `dispose`.
//!
//! ```no_run
//! use sidewire::{Engine, LogEntry, LogEntryKind, Packet, ViewerId};
//!
//! let engine = Engine::new("billing", "web-3");
//! engine.configure(
//!     "tcp(host=127.0.0.1,port=4228,async=true,reconnect=true);\
//!      file(filename=billing.swl,maxsize=16MB)",
//! )?;
//! let entry = LogEntry::new(LogEntryKind::Message, ViewerId::Title, "invoice sent");
//! engine.submit(&Packet::LogEntry(entry))?;
//! engine.flush()?;
//! # Ok::<(), sidewire::EngineError>(())
//! ```

pub mod cipher;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod packet;
pub mod transport;

mod engine;
mod level;

pub use cipher::FrameCipher;
pub use dispatch::{ConnectionState, ErrorHandler, OnErrorPolicy, OverflowPolicy};
pub use engine::{DisposeReport, Engine};
pub use error::{ConfigurationError, EngineError, FramingError, TransportError};
pub use level::Level;
pub use packet::{
    decode, encode, ControlCommand, ControlCommandKind, LogEntry, LogEntryKind, LogHeader, Packet,
    PacketKind, ProcessFlow, ProcessFlowKind, ViewerId, Watch, WatchKind,
};
pub use transport::{MemoryBuffer, RotateMode, Transport};
