//! Byte-bounded command queue between producers and one worker thread.
//!
//! The bound is expressed in encoded frame bytes rather than entry count,
//! so a burst of large packets cannot balloon memory. Total queued bytes
//! never exceed the configured capacity; overflow triggers the configured
//! policy instead of growth.

use std::collections::VecDeque;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use parking_lot::{Condvar, Mutex};

/// What to do when an enqueue would exceed the byte capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Evict queued frames from the head until the new one fits.
    #[default]
    DropOldest,
    /// Keep the queue intact and refuse the new frame (or block for space
    /// when `backlog.block` is set).
    RejectNew,
}

impl FromStr for OverflowPolicy {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "drop-oldest" => Ok(Self::DropOldest),
            "reject-new" => Ok(Self::RejectNew),
            _ => Err(()),
        }
    }
}

/// Work items processed by a connection worker.
pub(crate) enum Command {
    /// One encoded frame to deliver.
    Frame(Arc<[u8]>),
    /// Acknowledge once every entry ahead of this marker has been
    /// attempted.
    Flush(Sender<()>),
}

fn command_bytes(cmd: &Command) -> usize {
    match cmd {
        Command::Frame(frame) => frame.len(),
        Command::Flush(_) => 0,
    }
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum EnqueueError {
    /// The overflow policy refused the frame.
    Rejected,
    /// The queue has been closed by dispose.
    Closed,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<Command>,
    bytes: usize,
    closed: bool,
    evicted: u64,
}

/// FIFO of [`Command`]s bounded by total frame bytes.
///
/// Enqueues come from any caller thread; dequeues from the one worker.
/// `data` signals new entries, `space` signals freed capacity for blocked
/// producers.
pub(crate) struct DispatchQueue {
    capacity: usize,
    policy: OverflowPolicy,
    block: bool,
    inner: Mutex<Inner>,
    data: Condvar,
    space: Condvar,
}

impl DispatchQueue {
    pub(crate) fn new(capacity: usize, policy: OverflowPolicy, block: bool) -> Self {
        Self {
            capacity,
            policy,
            block,
            inner: Mutex::new(Inner::default()),
            data: Condvar::new(),
            space: Condvar::new(),
        }
    }

    pub(crate) fn push_frame(&self, frame: Arc<[u8]>) -> Result<(), EnqueueError> {
        let len = frame.len();
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }
        // A frame bigger than the whole backlog can never fit.
        if len > self.capacity {
            inner.evicted += 1;
            return Err(EnqueueError::Rejected);
        }
        match self.policy {
            OverflowPolicy::DropOldest => {
                while inner.bytes + len > self.capacity {
                    if !evict_oldest_frame(&mut inner) {
                        break;
                    }
                }
            }
            OverflowPolicy::RejectNew => {
                if self.block {
                    while inner.bytes + len > self.capacity && !inner.closed {
                        self.space.wait(&mut inner);
                    }
                    if inner.closed {
                        return Err(EnqueueError::Closed);
                    }
                } else if inner.bytes + len > self.capacity {
                    inner.evicted += 1;
                    return Err(EnqueueError::Rejected);
                }
            }
        }
        inner.bytes += len;
        inner.entries.push_back(Command::Frame(frame));
        self.data.notify_one();
        Ok(())
    }

    pub(crate) fn push_flush(&self, ack: Sender<()>) -> Result<(), EnqueueError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(EnqueueError::Closed);
        }
        inner.entries.push_back(Command::Flush(ack));
        self.data.notify_one();
        Ok(())
    }

    /// Blocking dequeue. Returns `None` once the queue is closed and
    /// drained.
    pub(crate) fn pop(&self) -> Option<Command> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(cmd) = inner.entries.pop_front() {
                inner.bytes -= command_bytes(&cmd);
                self.space.notify_all();
                return Some(cmd);
            }
            if inner.closed {
                return None;
            }
            self.data.wait(&mut inner);
        }
    }

    /// Stop accepting entries and wake every blocked producer and the
    /// worker. Entries already queued stay available for draining.
    pub(crate) fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        self.data.notify_all();
        self.space.notify_all();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Throw away everything still queued, returning how many frames were
    /// lost. Pending flush acks are dropped, which unblocks their waiters.
    pub(crate) fn discard_remaining(&self) -> usize {
        let mut inner = self.inner.lock();
        let discarded = inner
            .entries
            .iter()
            .filter(|cmd| matches!(cmd, Command::Frame(_)))
            .count();
        inner.entries.clear();
        inner.bytes = 0;
        self.space.notify_all();
        self.data.notify_all();
        discarded
    }

    /// Frames lost to the overflow policy since creation.
    pub(crate) fn evicted(&self) -> u64 {
        self.inner.lock().evicted
    }

    /// Worker-side backoff nap that a close interrupts. Returns true when
    /// the queue is closed.
    pub(crate) fn sleep_unless_closed(&self, duration: Duration) -> bool {
        let mut inner = self.inner.lock();
        if inner.closed {
            return true;
        }
        self.data.wait_for(&mut inner, duration);
        inner.closed
    }

    #[cfg(test)]
    pub(crate) fn queued_bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }
}

/// Remove the oldest queued frame, leaving flush markers in place.
fn evict_oldest_frame(inner: &mut Inner) -> bool {
    let index = inner
        .entries
        .iter()
        .position(|cmd| matches!(cmd, Command::Frame(_)));
    match index {
        Some(i) => {
            if let Some(Command::Frame(frame)) = inner.entries.remove(i) {
                inner.bytes -= frame.len();
            }
            inner.evicted += 1;
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn frame(len: usize) -> Arc<[u8]> {
        Arc::from(vec![0u8; len])
    }

    #[test]
    fn pops_preserve_fifo_order() {
        let queue = DispatchQueue::new(1024, OverflowPolicy::DropOldest, false);
        for len in [3, 5, 7] {
            queue.push_frame(frame(len)).unwrap();
        }
        for expected in [3usize, 5, 7] {
            match queue.pop() {
                Some(Command::Frame(f)) => assert_eq!(f.len(), expected),
                _ => panic!("expected a frame"),
            }
        }
    }

    #[test]
    fn drop_oldest_never_exceeds_the_byte_bound() {
        let queue = DispatchQueue::new(100, OverflowPolicy::DropOldest, false);
        for _ in 0..20 {
            queue.push_frame(frame(30)).unwrap();
            assert!(queue.queued_bytes() <= 100);
        }
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.evicted(), 17);
    }

    #[test]
    fn reject_new_keeps_the_oldest_entries() {
        let queue = DispatchQueue::new(100, OverflowPolicy::RejectNew, false);
        queue.push_frame(frame(60)).unwrap();
        queue.push_frame(frame(30)).unwrap();
        assert_eq!(
            queue.push_frame(frame(30)).unwrap_err(),
            EnqueueError::Rejected
        );
        assert_eq!(queue.queued_bytes(), 90);
        assert_eq!(queue.evicted(), 1);
    }

    #[test]
    fn oversized_frames_are_rejected_outright() {
        let queue = DispatchQueue::new(10, OverflowPolicy::DropOldest, false);
        assert_eq!(
            queue.push_frame(frame(11)).unwrap_err(),
            EnqueueError::Rejected
        );
        assert_eq!(queue.len(), 0);
    }

    #[test]
    fn blocking_producer_resumes_when_space_frees_up() {
        let queue = Arc::new(DispatchQueue::new(50, OverflowPolicy::RejectNew, true));
        queue.push_frame(frame(40)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_frame(frame(40)))
        };
        // Give the producer time to block on the full queue.
        thread::sleep(Duration::from_millis(50));
        assert!(matches!(queue.pop(), Some(Command::Frame(_))));
        producer.join().unwrap().unwrap();
        assert_eq!(queue.queued_bytes(), 40);
    }

    #[test]
    fn close_wakes_a_blocked_producer_with_closed() {
        let queue = Arc::new(DispatchQueue::new(50, OverflowPolicy::RejectNew, true));
        queue.push_frame(frame(40)).unwrap();

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.push_frame(frame(40)))
        };
        thread::sleep(Duration::from_millis(50));
        queue.close();
        assert_eq!(producer.join().unwrap().unwrap_err(), EnqueueError::Closed);
    }

    #[test]
    fn closed_queue_drains_then_ends() {
        let queue = DispatchQueue::new(1024, OverflowPolicy::DropOldest, false);
        queue.push_frame(frame(8)).unwrap();
        queue.close();
        assert!(queue.pop().is_some());
        assert!(queue.pop().is_none());
        assert_eq!(
            queue.push_frame(frame(1)).unwrap_err(),
            EnqueueError::Closed
        );
    }

    #[test]
    fn discard_counts_frames_but_not_flush_markers() {
        let queue = DispatchQueue::new(1024, OverflowPolicy::DropOldest, false);
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);
        queue.push_frame(frame(8)).unwrap();
        queue.push_flush(ack_tx).unwrap();
        queue.push_frame(frame(8)).unwrap();
        assert_eq!(queue.discard_remaining(), 2);
        assert_eq!(queue.queued_bytes(), 0);
        // The dropped ack sender unblocks any flush waiter.
        assert!(ack_rx.recv().is_err());
    }

    #[test]
    fn eviction_skips_flush_markers() {
        let queue = DispatchQueue::new(50, OverflowPolicy::DropOldest, false);
        let (ack_tx, _ack_rx) = crossbeam_channel::bounded(1);
        queue.push_flush(ack_tx).unwrap();
        queue.push_frame(frame(40)).unwrap();
        queue.push_frame(frame(40)).unwrap();
        assert!(matches!(queue.pop(), Some(Command::Flush(_))));
        assert!(matches!(queue.pop(), Some(Command::Frame(_))));
        assert!(queue.len() == 0 || queue.queued_bytes() <= 50);
    }
}
