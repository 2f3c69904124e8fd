//! Error taxonomy shared by the packet codec, transports, dispatch engine
//! and public engine surface.
//!
//! Each variant family maps to one failure domain: `FramingError` for decode
//! faults, `TransportError` for I/O, `ConfigurationError` for connection
//! string problems and `EngineError` for misuse of a disposed engine.

use std::io;

use thiserror::Error;

/// Malformed or truncated packet data encountered while decoding.
///
/// A framing error is always fatal to the decode attempt that produced it
/// and never to the process.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    /// The kind tag does not name any known packet kind.
    #[error("unknown packet kind tag {0:#04x}")]
    UnknownKind(u8),
    /// The frame header or a length-prefixed field claims more bytes than
    /// the input holds.
    #[error("frame declares {declared} bytes but only {available} are available")]
    Truncated { declared: usize, available: usize },
    /// The payload decoded cleanly but left unread bytes behind.
    #[error("{0} trailing bytes after packet payload")]
    TrailingBytes(usize),
    /// A string field was not valid UTF-8.
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// An enumeration field carried a discriminant outside its range.
    #[error("invalid discriminant {value} for {field}")]
    InvalidEnum { field: &'static str, value: i32 },
    /// The packet payload is too large to frame.
    #[error("packet payload of {0} bytes exceeds the frame limit")]
    Oversized(usize),
    /// An encrypted envelope could not be decrypted, most likely because
    /// the key is wrong or the data is corrupt.
    #[error("ciphertext failed to decrypt")]
    BadCiphertext,
}

/// I/O failure while connecting to or writing through a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error(transparent)]
    Io(#[from] io::Error),
    /// The peer did not answer the handshake with the expected magic.
    #[error("handshake rejected by peer")]
    HandshakeRejected,
    /// A write was attempted while the transport was disconnected.
    #[error("transport is not connected")]
    NotConnected,
    /// The transport cannot exist on this platform.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

/// Malformed connection string or invalid option value.
///
/// Configuration errors are fatal to `configure()` and are never partially
/// applied; the previously active connection set stays untouched.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("missing \"(\" at position {position}")]
    MissingOpenParen { position: usize },
    #[error("missing \")\" at position {position}")]
    MissingCloseParen { position: usize },
    #[error("unterminated quoted value in clause \"{clause}\"")]
    UnterminatedQuote { clause: String },
    #[error("duplicate option \"{key}\" in clause \"{clause}\"")]
    DuplicateOption { clause: String, key: String },
    #[error("unknown transport \"{name}\" at position {position}")]
    UnknownTransport { name: String, position: usize },
    #[error("option \"{key}\" is not available for transport \"{transport}\"")]
    UnknownOption { transport: String, key: String },
    #[error("invalid value \"{value}\" for option \"{key}\": {reason}")]
    InvalidValue {
        key: String,
        value: String,
        reason: String,
    },
    #[error("malformed option \"{text}\" in clause \"{clause}\"")]
    MalformedOption { clause: String, text: String },
}

/// Operation attempted against an engine that can no longer serve it.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The engine has been disposed; no further packets are accepted.
    #[error("engine has been disposed")]
    Disposed,
    /// A reject-new backlog refused the frame and the connection's policy
    /// is to surface that.
    #[error("backlog full on connection {connection}")]
    BacklogFull { connection: String },
    #[error(transparent)]
    Framing(#[from] FramingError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}
