//! Per-connection delivery: queueing, worker threads and error routing.
//!
//! Each configured clause becomes one [`Connection`]. Synchronous
//! connections write on the caller's thread; asynchronous ones hand frames
//! to a dedicated worker through a byte-bounded [`DispatchQueue`]. A
//! failure on one connection never blocks delivery to the others.

mod backoff;
mod queue;
mod worker;

pub use queue::OverflowPolicy;

pub(crate) use queue::{DispatchQueue, EnqueueError};
pub(crate) use worker::Lane;

use std::str::FromStr;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::config::OptionMap;
use crate::error::{ConfigurationError, EngineError};
use crate::transport::MemoryBuffer;

use backoff::BackoffState;
use worker::{route_error, spawn_worker};

/// Default byte backlog per asynchronous connection.
pub const DEFAULT_BACKLOG: u64 = 2048 * 1024;
/// Default pause between reconnect attempts.
pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(1);

/// How long dispose waits for a worker that has already been asked to
/// stop before the thread is abandoned.
const ABANDON_TIMEOUT: Duration = Duration::from_secs(1);

/// What to do with a transport error the engine has contained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnErrorPolicy {
    /// Drop the frame silently.
    #[default]
    Suppress,
    /// Surface the error: synchronously as `Err`, asynchronously through
    /// the registered error handler.
    Throw,
    /// Record the error on the local diagnostic log and carry on.
    Log,
}

impl FromStr for OnErrorPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "suppress" => Ok(Self::Suppress),
            "throw" => Ok(Self::Throw),
            "log" => Ok(Self::Log),
            _ => Err(()),
        }
    }
}

/// Lifecycle of one connection as seen by diagnostics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

/// Mutable diagnostic counters shared between a connection and its worker.
#[derive(Debug, Default)]
pub(crate) struct Status {
    pub(crate) state: ConnectionState,
    /// Connect attempts, successful or not.
    pub(crate) attempts: u64,
    /// Frames lost to errors or policy, excluding dispose discards.
    pub(crate) dropped: u64,
}

/// Callback invoked for errors routed by the `throw` policy on
/// asynchronous connections.
pub type ErrorHandler = Box<dyn Fn(&EngineError) + Send + Sync>;

pub(crate) type ErrorSink = Arc<RwLock<Option<ErrorHandler>>>;

/// Delivery options common to every transport, parsed from a clause.
#[derive(Clone, Debug)]
pub(crate) struct ConnectionOptions {
    pub(crate) asynchronous: bool,
    pub(crate) backlog: usize,
    pub(crate) policy: OverflowPolicy,
    pub(crate) block: bool,
    pub(crate) reconnect: bool,
    pub(crate) reconnect_interval: Duration,
    pub(crate) on_error: OnErrorPolicy,
    pub(crate) cipher: Option<crate::cipher::FrameCipher>,
}

impl ConnectionOptions {
    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, ConfigurationError> {
        let policy = match options.get("backlog.policy") {
            None => OverflowPolicy::default(),
            Some(raw) => raw.parse().map_err(|_| ConfigurationError::InvalidValue {
                key: "backlog.policy".to_string(),
                value: raw.to_string(),
                reason: "expected drop-oldest or reject-new".to_string(),
            })?,
        };
        let on_error = match options.get("on-error") {
            None => OnErrorPolicy::default(),
            Some(raw) => raw.parse().map_err(|_| ConfigurationError::InvalidValue {
                key: "on-error".to_string(),
                value: raw.to_string(),
                reason: "expected suppress, throw or log".to_string(),
            })?,
        };
        let cipher = match options.get("key") {
            Some(key) if !key.is_empty() => Some(crate::cipher::FrameCipher::new(key)),
            _ => None,
        };
        Ok(Self {
            asynchronous: options.get_bool("async", false)?,
            backlog: options.get_size("backlog", DEFAULT_BACKLOG)? as usize,
            policy,
            block: options.get_bool("backlog.block", false)?,
            reconnect: options.get_bool("reconnect", false)?,
            reconnect_interval: options
                .get_duration("reconnect.interval", DEFAULT_RECONNECT_INTERVAL)?,
            on_error,
            cipher,
        })
    }
}

struct SyncLane {
    lane: Lane,
    backoff: BackoffState,
}

enum Channel {
    Sync(Mutex<SyncLane>),
    Async {
        queue: Arc<DispatchQueue>,
        done: Receiver<()>,
        handle: Option<JoinHandle<()>>,
    },
}

/// One live transport paired with its delivery options.
pub(crate) struct Connection {
    name: String,
    options: ConnectionOptions,
    channel: Channel,
    status: Arc<Mutex<Status>>,
    errors: ErrorSink,
    /// Drain handle when the transport is an in-memory ring.
    buffer: Option<MemoryBuffer>,
}

impl Connection {
    /// Wire up the connection, spawning the worker for asynchronous mode.
    /// No I/O happens here; `establish` or the worker performs the first
    /// connect.
    pub(crate) fn start(
        name: String,
        lane: Lane,
        buffer: Option<MemoryBuffer>,
        options: ConnectionOptions,
        errors: ErrorSink,
    ) -> Self {
        let status = Arc::new(Mutex::new(Status::default()));
        let channel = if options.asynchronous {
            let queue = Arc::new(DispatchQueue::new(
                options.backlog,
                options.policy,
                options.block,
            ));
            let (handle, done) = spawn_worker(
                name.clone(),
                lane,
                options.clone(),
                Arc::clone(&queue),
                Arc::clone(&status),
                Arc::clone(&errors),
            );
            Channel::Async {
                queue,
                done,
                handle: Some(handle),
            }
        } else {
            Channel::Sync(Mutex::new(SyncLane {
                lane,
                backoff: BackoffState::new(options.reconnect_interval),
            }))
        };
        Self {
            name,
            options,
            channel,
            status,
            errors,
            buffer,
        }
    }

    /// Drain handle for an in-memory ring transport, if this connection
    /// carries one.
    pub(crate) fn memory_buffer(&self) -> Option<MemoryBuffer> {
        self.buffer.clone()
    }

    /// Eagerly connect a synchronous lane. Asynchronous workers connect on
    /// their own thread. A failure follows the `on-error` policy, so only
    /// `throw` makes configure fail.
    pub(crate) fn establish(&self) -> Result<(), EngineError> {
        let Channel::Sync(lane) = &self.channel else {
            return Ok(());
        };
        let mut lane = lane.lock();
        if let Err(err) = lane.lane.ensure_connected(&self.status) {
            self.status.lock().state = ConnectionState::Failed;
            if self.options.on_error == OnErrorPolicy::Throw {
                return Err(EngineError::Transport(err));
            }
            route_error(&self.name, self.options.on_error, &self.errors, err);
        }
        Ok(())
    }

    /// Offer one encoded frame to this connection.
    pub(crate) fn submit(&self, frame: &Arc<[u8]>) -> Result<(), EngineError> {
        match &self.channel {
            Channel::Async { queue, .. } => match queue.push_frame(Arc::clone(frame)) {
                Ok(()) => Ok(()),
                Err(EnqueueError::Closed) => Err(EngineError::Disposed),
                Err(EnqueueError::Rejected) => {
                    self.status.lock().dropped += 1;
                    match self.options.on_error {
                        OnErrorPolicy::Throw => Err(EngineError::BacklogFull {
                            connection: self.name.clone(),
                        }),
                        OnErrorPolicy::Log => {
                            warn!("connection {}: backlog full, frame dropped", self.name);
                            Ok(())
                        }
                        OnErrorPolicy::Suppress => Ok(()),
                    }
                }
            },
            Channel::Sync(lane) => self.deliver_sync(&mut lane.lock(), frame),
        }
    }

    fn deliver_sync(&self, lane: &mut SyncLane, frame: &[u8]) -> Result<(), EngineError> {
        match self.try_deliver_sync(lane, frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.status.lock().dropped += 1;
                match self.options.on_error {
                    OnErrorPolicy::Throw => Err(EngineError::Transport(err)),
                    OnErrorPolicy::Log => {
                        warn!("connection {}: dropped frame: {err}", self.name);
                        Ok(())
                    }
                    OnErrorPolicy::Suppress => Ok(()),
                }
            }
        }
    }

    /// One attempt, and with `reconnect` one backed-off reconnect plus a
    /// single re-issue. The caller thread carries the wait, so the retry
    /// is bounded rather than a loop.
    fn try_deliver_sync(
        &self,
        lane: &mut SyncLane,
        frame: &[u8],
    ) -> Result<(), crate::error::TransportError> {
        match self.write_sync(lane, frame) {
            Ok(()) => Ok(()),
            Err(err) => {
                if !self.options.reconnect {
                    return Err(err);
                }
                std::thread::sleep(lane.backoff.next_sleep());
                let _ = lane.lane.transport.disconnect();
                self.write_sync(lane, frame)
            }
        }
    }

    fn write_sync(
        &self,
        lane: &mut SyncLane,
        frame: &[u8],
    ) -> Result<(), crate::error::TransportError> {
        lane.lane.ensure_connected(&self.status).map_err(|err| {
            self.status.lock().state = ConnectionState::Failed;
            err
        })?;
        lane.lane
            .write_frame(frame)
            .map(|()| lane.backoff.record_success())
            .map_err(|err| {
                self.status.lock().state = ConnectionState::Failed;
                let _ = lane.lane.transport.disconnect();
                err
            })
    }

    /// Block until every entry queued before now has been attempted.
    /// Synchronous lanes just flush the transport.
    pub(crate) fn flush(&self, timeout: Duration) -> bool {
        match &self.channel {
            Channel::Async { queue, .. } => {
                let (ack_tx, ack_rx) = bounded(1);
                if queue.push_flush(ack_tx).is_err() {
                    return false;
                }
                ack_rx.recv_timeout(timeout).is_ok()
            }
            Channel::Sync(lane) => lane.lock().lane.transport.flush().is_ok(),
        }
    }

    /// Stop intake, drain up to `grace`, then discard and count whatever
    /// is left.
    pub(crate) fn dispose(&mut self, grace: Duration) -> usize {
        let discarded = match &mut self.channel {
            Channel::Async {
                queue,
                done,
                handle,
            } => {
                queue.close();
                let drained = matches!(
                    done.recv_timeout(grace),
                    Err(RecvTimeoutError::Disconnected)
                );
                let discarded = queue.discard_remaining();
                let exited = drained
                    || matches!(
                        done.recv_timeout(ABANDON_TIMEOUT),
                        Err(RecvTimeoutError::Disconnected)
                    );
                if let Some(handle) = handle.take() {
                    if exited {
                        let _ = handle.join();
                    }
                    // A worker stuck inside a long transport timeout is
                    // abandoned; it exits once the call returns.
                }
                discarded
            }
            Channel::Sync(lane) => {
                let mut lane = lane.lock();
                let _ = lane.lane.transport.flush();
                let _ = lane.lane.transport.disconnect();
                self.status.lock().state = ConnectionState::Disconnected;
                0
            }
        };
        let status = self.status.lock();
        debug!(
            "connection {} closed: {} connect attempts, {} dropped, {} discarded",
            self.name, status.attempts, status.dropped, discarded
        );
        discarded
    }

    #[cfg(test)]
    pub(crate) fn state(&self) -> ConnectionState {
        self.status.lock().state
    }
}
