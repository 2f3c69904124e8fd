//! Background delivery thread for one asynchronous connection.
//!
//! The worker is the sole consumer of its queue and the sole writer on its
//! transport, which makes per-connection FIFO ordering structural rather
//! than something to enforce with locks.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::warn;
use parking_lot::Mutex;

use crate::cipher::FrameCipher;
use crate::error::{EngineError, TransportError};
use crate::transport::Transport;

use super::backoff::BackoffState;
use super::queue::{Command, DispatchQueue};
use super::{ConnectionOptions, ConnectionState, ErrorSink, OnErrorPolicy, Status};

/// Transport plus the per-connection framing concerns layered on top of
/// it: optional encryption and the greeting frame sent after each connect.
pub(crate) struct Lane {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) cipher: Option<FrameCipher>,
    pub(crate) header: Arc<[u8]>,
}

impl Lane {
    pub(crate) fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match &self.cipher {
            Some(cipher) => self.transport.write(&cipher.encrypt(frame)),
            None => self.transport.write(frame),
        }
    }

    /// Connect if needed and send the greeting frame so the receiver can
    /// identify the client before any payload arrives.
    pub(crate) fn ensure_connected(
        &mut self,
        status: &Mutex<Status>,
    ) -> Result<(), TransportError> {
        if self.transport.is_connected() {
            return Ok(());
        }
        {
            let mut status = status.lock();
            status.state = ConnectionState::Connecting;
            status.attempts += 1;
        }
        self.transport.connect()?;
        let header = Arc::clone(&self.header);
        if let Err(err) = self.write_frame(&header) {
            // The greeting must precede any payload; a half-connected
            // channel without it is torn down and retried whole.
            let _ = self.transport.disconnect();
            return Err(err);
        }
        status.lock().state = ConnectionState::Connected;
        Ok(())
    }
}

/// Route a contained failure per the connection's `on-error` policy.
pub(crate) fn route_error(
    name: &str,
    policy: OnErrorPolicy,
    errors: &ErrorSink,
    err: TransportError,
) {
    match policy {
        OnErrorPolicy::Suppress => {}
        OnErrorPolicy::Log => warn!("connection {name}: {err}"),
        OnErrorPolicy::Throw => {
            let guard = errors.read();
            match guard.as_ref() {
                Some(handler) => handler(&EngineError::Transport(err)),
                None => warn!("connection {name}: {err} (no error handler registered)"),
            }
        }
    }
}

/// Start the worker thread. The returned receiver disconnects when the
/// worker exits, which is how dispose observes the drain finishing.
pub(crate) fn spawn_worker(
    name: String,
    lane: Lane,
    options: ConnectionOptions,
    queue: Arc<DispatchQueue>,
    status: Arc<Mutex<Status>>,
    errors: ErrorSink,
) -> (JoinHandle<()>, Receiver<()>) {
    let (done_tx, done_rx) = bounded::<()>(0);
    let handle = thread::spawn(move || {
        let _done: Sender<()> = done_tx;
        run(&name, lane, &options, &queue, &status, &errors);
    });
    (handle, done_rx)
}

fn run(
    name: &str,
    mut lane: Lane,
    options: &ConnectionOptions,
    queue: &DispatchQueue,
    status: &Mutex<Status>,
    errors: &ErrorSink,
) {
    let mut backoff = BackoffState::new(options.reconnect_interval);
    // Establish eagerly so a bad endpoint surfaces right after configure
    // instead of on the first packet.
    if let Err(err) = lane.ensure_connected(status) {
        status.lock().state = ConnectionState::Failed;
        route_error(name, options.on_error, errors, err);
    }
    while let Some(cmd) = queue.pop() {
        match cmd {
            Command::Frame(frame) => {
                let outcome =
                    deliver(name, &mut lane, options, queue, status, errors, &mut backoff, &frame);
                if outcome == Outcome::Abort {
                    // Dispose interrupted the delivery; whatever is still
                    // queued gets discarded and counted by the closer.
                    break;
                }
            }
            Command::Flush(ack) => {
                if let Err(err) = lane.transport.flush() {
                    route_error(name, options.on_error, errors, err);
                }
                let _ = ack.send(());
            }
        }
    }
    let _ = lane.transport.flush();
    let _ = lane.transport.disconnect();
    status.lock().state = ConnectionState::Disconnected;
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Delivered,
    /// The frame was given up per policy; keep draining the queue.
    Dropped,
    /// Dispose closed the queue while the frame was in flight; stop
    /// draining so the closer can count the rest.
    Abort,
}

/// Deliver one frame, reconnecting and re-issuing it until it is written
/// or the policy gives up. Frames are never reordered and a written frame
/// is never written again.
#[allow(clippy::too_many_arguments)]
fn deliver(
    name: &str,
    lane: &mut Lane,
    options: &ConnectionOptions,
    queue: &DispatchQueue,
    status: &Mutex<Status>,
    errors: &ErrorSink,
    backoff: &mut BackoffState,
    frame: &Arc<[u8]>,
) -> Outcome {
    loop {
        if let Err(err) = lane.ensure_connected(status) {
            status.lock().state = ConnectionState::Failed;
            route_error(name, options.on_error, errors, err);
            if !options.reconnect {
                status.lock().dropped += 1;
                return Outcome::Dropped;
            }
            if queue.is_closed() || queue.sleep_unless_closed(backoff.next_sleep()) {
                status.lock().dropped += 1;
                return Outcome::Abort;
            }
            continue;
        }
        match lane.write_frame(frame) {
            Ok(()) => {
                backoff.record_success();
                return Outcome::Delivered;
            }
            Err(err) => {
                status.lock().state = ConnectionState::Failed;
                let _ = lane.transport.disconnect();
                route_error(name, options.on_error, errors, err);
                if !options.reconnect {
                    status.lock().dropped += 1;
                    return Outcome::Dropped;
                }
                // A connect that succeeds but a write that keeps failing
                // must still pace its retries, so the backoff applies here
                // exactly as it does to a failed connect.
                if queue.is_closed() || queue.sleep_unless_closed(backoff.next_sleep()) {
                    status.lock().dropped += 1;
                    return Outcome::Abort;
                }
                // Loop back: reconnect and re-issue this same frame.
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use parking_lot::RwLock;

    use super::super::OverflowPolicy;

    /// Accepts every connect but fails every write, counting the attempts.
    struct FailingTransport {
        writes: Arc<AtomicUsize>,
    }

    impl Transport for FailingTransport {
        fn connect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn write(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(TransportError::NotConnected)
        }

        fn flush(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn disconnect(&mut self) -> Result<(), TransportError> {
            Ok(())
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    #[test]
    fn write_failures_retry_no_faster_than_the_backoff_floor() {
        let writes = Arc::new(AtomicUsize::new(0));
        let lane = Lane {
            transport: Box::new(FailingTransport {
                writes: Arc::clone(&writes),
            }),
            cipher: None,
            header: Arc::from(vec![0u8; 0]),
        };
        let options = ConnectionOptions {
            asynchronous: true,
            backlog: 1024,
            policy: OverflowPolicy::DropOldest,
            block: false,
            reconnect: true,
            reconnect_interval: Duration::from_millis(100),
            on_error: OnErrorPolicy::Suppress,
            cipher: None,
        };
        let queue = Arc::new(DispatchQueue::new(1024, OverflowPolicy::DropOldest, false));
        let status = Arc::new(Mutex::new(Status::default()));
        let errors: ErrorSink = Arc::new(RwLock::new(None));
        let (handle, done) = spawn_worker(
            "test#0".to_string(),
            lane,
            options,
            Arc::clone(&queue),
            Arc::clone(&status),
            errors,
        );

        queue.push_frame(Arc::from(vec![1u8; 8])).unwrap();
        std::thread::sleep(Duration::from_millis(350));
        queue.close();
        queue.discard_remaining();
        let _ = done.recv();
        handle.join().unwrap();

        // With a 100ms floor, 350ms fits a handful of attempts at most.
        // An unpaced retry loop would rack up thousands.
        let attempts = writes.load(Ordering::SeqCst);
        assert!(attempts >= 2, "expected retries, saw {attempts}");
        assert!(attempts <= 6, "retries outran the backoff, saw {attempts}");
    }
}
