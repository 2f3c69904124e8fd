//! In-process ring-buffer transport.
//!
//! Keeps the most recent frames up to a byte capacity, dropping the oldest
//! when full. Useful for flush-on-error setups where a crash handler dumps
//! the buffered tail; the transport itself never performs I/O.

use std::collections::VecDeque;
use std::io::Write;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::OptionMap;
use crate::error::{ConfigurationError, TransportError};

use super::Transport;

pub const DEFAULT_CAPACITY: u64 = 2 * 1024 * 1024;

#[derive(Debug, Default)]
struct Ring {
    frames: VecDeque<Vec<u8>>,
    bytes: usize,
}

/// Bounded ring of complete frames shared with whoever drains it.
pub struct MemoryTransport {
    capacity: usize,
    ring: Arc<Mutex<Ring>>,
    connected: bool,
}

impl MemoryTransport {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            ring: Arc::new(Mutex::new(Ring::default())),
            connected: false,
        }
    }

    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            options.get_size("maxsize", DEFAULT_CAPACITY)? as usize
        ))
    }

    /// Handle for draining the buffer after the transport has been boxed.
    pub fn buffer(&self) -> MemoryBuffer {
        MemoryBuffer {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Reader side of a [`MemoryTransport`].
#[derive(Clone, Debug)]
pub struct MemoryBuffer {
    ring: Arc<Mutex<Ring>>,
}

impl MemoryBuffer {
    /// Number of frames currently buffered.
    pub fn len(&self) -> usize {
        self.ring.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.lock().frames.is_empty()
    }

    /// Remove and return all buffered frames, oldest first.
    pub fn drain(&self) -> Vec<Vec<u8>> {
        let mut ring = self.ring.lock();
        ring.bytes = 0;
        ring.frames.drain(..).collect()
    }

    /// Write the buffered frames contiguously to `out` without draining.
    pub fn copy_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        let ring = self.ring.lock();
        for frame in &ring.frames {
            out.write_all(frame)?;
        }
        Ok(())
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        let mut ring = self.ring.lock();
        ring.frames.push_back(frame.to_vec());
        ring.bytes += frame.len();
        while ring.bytes > self.capacity {
            match ring.frames.pop_front() {
                Some(oldest) => ring.bytes -= oldest.len(),
                None => break,
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        self.connected = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}
