//! Local inter-process channel transport.
//!
//! On Unix this is a domain socket named by the `name` option, mirroring
//! the named-pipe transport of the protocol family on other platforms.

use std::time::Duration;

use crate::config::OptionMap;
use crate::error::{ConfigurationError, TransportError};

use super::{Transport, DEFAULT_TIMEOUT};

#[cfg(unix)]
use std::{io::Write, os::unix::net::UnixStream, path::PathBuf};

/// Connects to a local console endpoint by name.
pub struct PipeTransport {
    #[cfg_attr(not(unix), allow(dead_code))]
    name: String,
    #[cfg_attr(not(unix), allow(dead_code))]
    timeout: Duration,
    #[cfg(unix)]
    stream: Option<UnixStream>,
}

impl PipeTransport {
    pub fn new(name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            #[cfg(unix)]
            stream: None,
        }
    }

    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            options.get_string("name", "sidewire"),
            options.get_duration("timeout", DEFAULT_TIMEOUT)?,
        ))
    }

    #[cfg(unix)]
    fn endpoint_path(&self) -> PathBuf {
        // Bare names resolve under /tmp the way local consoles publish
        // their endpoints; absolute paths are taken verbatim.
        let path = PathBuf::from(&self.name);
        if path.is_absolute() {
            path
        } else {
            std::env::temp_dir().join(format!("{}.sock", self.name))
        }
    }
}

#[cfg(unix)]
impl Transport for PipeTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let mut stream = UnixStream::connect(self.endpoint_path())?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;
        super::tcp::shake_hands(&mut stream)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(err) = stream.write_all(frame) {
            self.stream = None;
            return Err(err.into());
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        match self.stream.as_mut() {
            Some(stream) => Ok(stream.flush()?),
            None => Ok(()),
        }
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.flush();
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(not(unix))]
impl Transport for PipeTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        Err(TransportError::Unsupported("pipe transport"))
    }

    fn write(&mut self, _frame: &[u8]) -> Result<(), TransportError> {
        Err(TransportError::NotConnected)
    }

    fn flush(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn disconnect(&mut self) -> Result<(), TransportError> {
        Ok(())
    }

    fn is_connected(&self) -> bool {
        false
    }
}
