//! Public engine surface: configure, submit, flush, dispose.
//!
//! The engine owns the full set of connections described by the last
//! successful `configure` call. A packet submitted once is encoded once
//! and the same frame is offered to every connection; each connection then
//! applies its own delivery mode, backlog and error policy.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::parse;
use crate::dispatch::{Connection, ConnectionOptions, ErrorHandler, ErrorSink, Lane};
use crate::error::{EngineError, TransportError};
use crate::packet::{encode, LogHeader, Packet};
use crate::transport;
use crate::transport::MemoryBuffer;

/// Upper bound on how long `flush` waits for each connection's ack.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(30);
/// Drain window granted to connections displaced by a reconfigure or by
/// dropping the engine.
const REPLACE_GRACE: Duration = Duration::from_secs(1);

/// What dispose left behind.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Frames still queued when the grace period ran out.
    pub discarded: usize,
}

/// Client engine delivering packets to every configured connection.
///
/// ```no_run
/// use sidewire::{Engine, LogEntry, LogEntryKind, Packet, ViewerId};
///
/// let engine = Engine::new("orders", "web-3");
/// engine.configure("tcp(host=console.internal,port=4228,async=true,reconnect=true)")?;
/// let entry = LogEntry::new(LogEntryKind::Message, ViewerId::Title, "order placed");
/// engine.submit(&Packet::LogEntry(entry))?;
/// # Ok::<(), sidewire::EngineError>(())
/// ```
pub struct Engine {
    app_name: String,
    host_name: String,
    connections: RwLock<Vec<Connection>>,
    errors: ErrorSink,
    disposed: AtomicBool,
}

impl Engine {
    pub fn new(app_name: impl Into<String>, host_name: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            host_name: host_name.into(),
            connections: RwLock::new(Vec::new()),
            errors: Arc::new(RwLock::new(None)),
            disposed: AtomicBool::new(false),
        }
    }

    pub fn app_name(&self) -> &str {
        &self.app_name
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    /// Parse a connection string and replace the active connection set.
    ///
    /// The new set is fully validated and built before the old one is
    /// touched; on any error the previously active connections keep
    /// running unchanged. Displaced connections get a short drain window.
    pub fn configure(&self, connections: &str) -> Result<(), EngineError> {
        self.ensure_live()?;
        let specs = parse(connections)?;
        let greeting = Packet::LogHeader(LogHeader::for_client(&self.host_name, &self.app_name));
        let header: Arc<[u8]> = Arc::from(encode(&greeting)?);
        let mut built = Vec::with_capacity(specs.len());
        for spec in &specs {
            let options = ConnectionOptions::from_options(&spec.options)?;
            let (transport, buffer) = transport::build(spec)?;
            built.push((
                format!("{}#{}", spec.name, spec.position),
                transport,
                buffer,
                options,
            ));
        }
        let mut fresh: Vec<Connection> = built
            .into_iter()
            .map(|(name, transport, buffer, options)| {
                let lane = Lane {
                    transport,
                    cipher: options.cipher.clone(),
                    header: Arc::clone(&header),
                };
                Connection::start(name, lane, buffer, options, Arc::clone(&self.errors))
            })
            .collect();
        let mut failure = None;
        for connection in &fresh {
            if let Err(err) = connection.establish() {
                failure = Some(err);
                break;
            }
        }
        if let Some(err) = failure {
            for mut connection in fresh {
                connection.dispose(Duration::ZERO);
            }
            return Err(err);
        }
        let old = {
            let mut connections = self.connections.write();
            // A dispose that raced in after the ensure_live check has
            // already taken the old set; swapping now would leave workers
            // nothing will ever stop.
            if self.disposed.load(Ordering::SeqCst) {
                drop(connections);
                for mut connection in fresh {
                    connection.dispose(Duration::ZERO);
                }
                return Err(EngineError::Disposed);
            }
            std::mem::replace(&mut *connections, fresh)
        };
        for mut connection in old {
            connection.dispose(REPLACE_GRACE);
        }
        Ok(())
    }

    /// Encode the packet once and offer the frame to every connection.
    ///
    /// A failing connection never blocks the others; the first error is
    /// returned after all connections have been offered the frame.
    pub fn submit(&self, packet: &Packet) -> Result<(), EngineError> {
        self.ensure_live()?;
        let frame: Arc<[u8]> = Arc::from(encode(packet)?);
        let connections = self.connections.read();
        let mut first_error = None;
        for connection in connections.iter() {
            if let Err(err) = connection.submit(&frame) {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        match first_error {
            None => Ok(()),
            Some(err) => Err(err),
        }
    }

    /// Block until everything queued before this call has been attempted
    /// on every connection. Synchronous connections only flush their
    /// transport.
    pub fn flush(&self) -> Result<(), EngineError> {
        self.ensure_live()?;
        let connections = self.connections.read();
        let mut flushed = true;
        for connection in connections.iter() {
            flushed &= connection.flush(FLUSH_TIMEOUT);
        }
        if flushed {
            Ok(())
        } else {
            Err(EngineError::Transport(TransportError::Io(io::Error::new(
                io::ErrorKind::TimedOut,
                "flush did not complete in time",
            ))))
        }
    }

    /// Stop intake, let each connection drain for up to `grace`, then
    /// disconnect everything. Idempotent; later calls report nothing
    /// discarded.
    pub fn dispose(&self, grace: Duration) -> DisposeReport {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return DisposeReport::default();
        }
        let old = std::mem::take(&mut *self.connections.write());
        let mut discarded = 0;
        for mut connection in old {
            discarded += connection.dispose(grace);
        }
        DisposeReport { discarded }
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    /// Drain handles for every configured `mem` connection, in clause
    /// order. Empty when no `mem` clause is active.
    pub fn memory_buffers(&self) -> Vec<MemoryBuffer> {
        self.connections
            .read()
            .iter()
            .filter_map(Connection::memory_buffer)
            .collect()
    }

    /// Register the callback that receives errors from asynchronous
    /// connections running the `throw` policy.
    pub fn set_error_handler<F>(&self, handler: F)
    where
        F: Fn(&EngineError) + Send + Sync + 'static,
    {
        *self.errors.write() = Some(Box::new(handler) as ErrorHandler);
    }

    pub fn clear_error_handler(&self) {
        *self.errors.write() = None;
    }

    fn ensure_live(&self) -> Result<(), EngineError> {
        if self.disposed.load(Ordering::SeqCst) {
            Err(EngineError::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.dispose(REPLACE_GRACE);
    }
}
