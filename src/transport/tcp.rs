//! Stream-socket transport.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::config::OptionMap;
use crate::error::{ConfigurationError, TransportError};

use super::{Transport, DEFAULT_TIMEOUT, HANDSHAKE_MAGIC};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 4228;

/// Sends framed packets to a console listening on host:port.
///
/// The configured `timeout` bounds connecting, the handshake read and every
/// subsequent write.
pub struct TcpTransport {
    host: String,
    port: u16,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(host: impl Into<String>, port: u16, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            timeout,
            stream: None,
        }
    }

    pub(crate) fn from_options(options: &OptionMap) -> Result<Self, ConfigurationError> {
        Ok(Self::new(
            options.get_string("host", DEFAULT_HOST),
            options.get_u16("port", DEFAULT_PORT)?,
            options.get_duration("timeout", DEFAULT_TIMEOUT)?,
        ))
    }

    fn socket_addrs(&self) -> std::io::Result<Vec<SocketAddr>> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map(|iter| iter.collect())
    }

    fn open_stream(&self) -> Result<TcpStream, TransportError> {
        let addrs = self.socket_addrs()?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_write_timeout(Some(self.timeout))?;
                    return Ok(stream);
                }
                Err(err) => last_err = Some(err),
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::AddrNotAvailable,
                    format!("no addresses for {}:{}", self.host, self.port),
                )
            })
            .into())
    }
}

/// Exchange the protocol magic over a fresh stream. The peer must echo the
/// exact sequence; a short read or mismatch rejects the connection.
pub(crate) fn shake_hands<S: Read + Write>(stream: &mut S) -> Result<(), TransportError> {
    stream.write_all(&HANDSHAKE_MAGIC)?;
    stream.flush()?;
    let mut answer = [0u8; HANDSHAKE_MAGIC.len()];
    stream
        .read_exact(&mut answer)
        .map_err(|_| TransportError::HandshakeRejected)?;
    if answer != HANDSHAKE_MAGIC {
        return Err(TransportError::HandshakeRejected);
    }
    Ok(())
}

/// Check whether the peer has shut the connection down. A closed socket
/// reads EOF; a healthy idle one has nothing to read.
fn probe_alive(stream: &TcpStream) -> Result<(), TransportError> {
    stream.set_nonblocking(true)?;
    let mut probe = [0u8; 1];
    let verdict = match stream.peek(&mut probe) {
        Ok(0) => Err(TransportError::NotConnected),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Ok(()),
        Err(err) => Err(err.into()),
    };
    stream.set_nonblocking(false)?;
    verdict
}

impl Transport for TcpTransport {
    fn connect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Ok(());
        }
        let mut stream = self.open_stream()?;
        shake_hands(&mut stream)?;
        self.stream = Some(stream);
        Ok(())
    }

    fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut stream = self.stream.take().ok_or(TransportError::NotConnected)?;
        // A peer that closed since the last write would still accept one
        // buffered write, losing that frame. Probing for EOF first fails
        // the write with the frame intact so it can be re-issued after a
        // reconnect.
        probe_alive(&stream)?;
        if let Err(err) = stream.write_all(frame) {
            return Err(err.into());
        }
        self.stream = Some(stream);
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
            let _ = stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn handshake_accepts_an_echoed_magic() {
        let mut fake = FakeStream {
            read: Cursor::new(Vec::from(HANDSHAKE_MAGIC)),
            written: Vec::new(),
        };
        shake_hands(&mut fake).expect("handshake");
        assert_eq!(fake.written, HANDSHAKE_MAGIC);
    }

    #[test]
    fn handshake_rejects_a_wrong_answer() {
        let mut fake = FakeStream {
            read: Cursor::new(vec![0u8; HANDSHAKE_MAGIC.len()]),
            written: Vec::new(),
        };
        assert!(matches!(
            shake_hands(&mut fake),
            Err(TransportError::HandshakeRejected)
        ));
    }

    #[test]
    fn handshake_rejects_a_closed_peer() {
        let mut fake = FakeStream {
            read: Cursor::new(Vec::new()),
            written: Vec::new(),
        };
        assert!(matches!(
            shake_hands(&mut fake),
            Err(TransportError::HandshakeRejected)
        ));
    }

    #[test]
    fn write_without_connect_is_not_connected() {
        let mut transport = TcpTransport::new("127.0.0.1", 1, Duration::from_millis(50));
        assert!(matches!(
            transport.write(b"frame"),
            Err(TransportError::NotConnected)
        ));
    }

    struct FakeStream {
        read: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }

    impl Read for FakeStream {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.read.read(buf)
        }
    }

    impl Write for FakeStream {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }
}
