//! Discard-everything transport.
//!
//! Stands in when logging is disabled so the dispatch engine can run the
//! same code path without branching.

use crate::error::TransportError;

use super::Transport;

#[derive(Default)]
pub struct NoopTransport {
    connected: bool,
}

impl NoopTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for NoopTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        self.connected = true;
        Ok(())
    }

    fn write(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
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
