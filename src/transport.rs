//! TCP transport layer.
//!
//! This module provides the [`Transport`] trait, the byte-stream seam between
//! the protocol layer and the socket, and [`TcpTransport`], its TCP
//! implementation. The transport knows nothing about MODBUS or S7; it moves
//! bytes and reports how many bytes are ready to be read without blocking.
//!
//! # Constants
//!
//! - [`DEFAULT_MODBUS_PORT`] - MODBUS/TCP port (502)
//! - [`DEFAULT_S7_PORT`] - ISO-on-TCP port (102)
//! - [`DEFAULT_READ_TIMEOUT`] - Socket read timeout (3 seconds)
//! - [`DEFAULT_CONNECT_TIMEOUT`] - TCP connect timeout (10 seconds)
//!
//! # Example
//!
//! ```no_run
//! use plclink::{TcpTransport, Transport};
//! use std::io::Write;
//! use std::time::Duration;
//!
//! let mut transport = TcpTransport::connect(
//!     "192.168.1.10:502".parse().unwrap(),
//!     Duration::from_secs(3),
//! ).unwrap();
//!
//! transport.write_all(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x06, 0x00]).unwrap();
//! transport.flush().unwrap();
//! println!("{} bytes pending", transport.available().unwrap());
//! ```

use std::io::{self, BufWriter, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;

use crate::error::{PlcError, Result};

/// Default MODBUS/TCP port.
pub const DEFAULT_MODBUS_PORT: u16 = 502;

/// Default ISO-on-TCP port.
pub const DEFAULT_S7_PORT: u16 = 102;

/// Default socket read timeout.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(3);

/// Default TCP connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Size of the scratch buffer used to peek at pending bytes.
const PEEK_BUFFER_SIZE: usize = 4096;

/// A bidirectional byte stream to a PLC.
///
/// Reads block up to the transport's read timeout. [`available`](Self::available)
/// never blocks.
pub trait Transport: Read + Write + Send {
    /// Number of bytes that can be read without blocking.
    fn available(&mut self) -> Result<usize>;

    /// Reads and drops every byte that is available right now.
    ///
    /// Returns the number of discarded bytes.
    fn discard_available(&mut self) -> Result<usize> {
        let mut discarded = 0;
        let mut scratch = [0u8; 256];
        loop {
            let pending = self.available()?;
            if pending == 0 {
                return Ok(discarded);
            }
            let take = pending.min(scratch.len());
            let n = self.read(&mut scratch[..take])?;
            if n == 0 {
                return Ok(discarded);
            }
            discarded += n;
        }
    }

    /// Closes both directions of the stream.
    fn shutdown(&mut self) -> Result<()>;
}

/// TCP transport to a PLC.
pub struct TcpTransport {
    stream: TcpStream,
    writer: BufWriter<TcpStream>,
    remote_addr: SocketAddr,
}

impl TcpTransport {
    /// Connects to `plc_addr` and applies `read_timeout` to the socket.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the connection cannot be established or
    /// configured.
    pub fn connect(plc_addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        let stream = TcpStream::connect(plc_addr)?;
        Self::from_stream(stream, plc_addr, read_timeout)
    }

    /// Connects to `plc_addr`, giving up after `connect_timeout`.
    ///
    /// # Errors
    ///
    /// Returns `PlcError::Timeout` if the PLC does not accept the connection
    /// in time, or an I/O error.
    pub fn connect_timeout(
        plc_addr: SocketAddr,
        connect_timeout: Duration,
        read_timeout: Duration,
    ) -> Result<Self> {
        let stream = TcpStream::connect_timeout(&plc_addr, connect_timeout)?;
        Self::from_stream(stream, plc_addr, read_timeout)
    }

    fn from_stream(stream: TcpStream, remote_addr: SocketAddr, read_timeout: Duration) -> Result<Self> {
        stream.set_read_timeout(Some(read_timeout))?;
        stream.set_write_timeout(Some(read_timeout))?;
        stream.set_nodelay(true)?;
        let writer = BufWriter::new(stream.try_clone()?);
        Ok(Self {
            stream,
            writer,
            remote_addr,
        })
    }

    /// Returns the remote PLC address.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

impl Read for TcpTransport {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl Write for TcpTransport {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl Transport for TcpTransport {
    fn available(&mut self) -> Result<usize> {
        let mut scratch = [0u8; PEEK_BUFFER_SIZE];
        self.stream.set_nonblocking(true)?;
        let peeked = self.stream.peek(&mut scratch);
        self.stream.set_nonblocking(false)?;
        match peeked {
            Ok(0) => Err(PlcError::Io(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "connection closed by PLC",
            ))),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(PlcError::Io(e)),
        }
    }

    fn shutdown(&mut self) -> Result<()> {
        // a failed flush must not keep the socket open
        let flushed = self.writer.flush();
        match self.stream.shutdown(Shutdown::Both) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotConnected => {}
            Err(e) => return Err(PlcError::Io(e)),
        }
        flushed.map_err(PlcError::from)
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("remote_addr", &self.remote_addr)
            .field("local_addr", &self.stream.local_addr().ok())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn test_default_constants() {
        assert_eq!(DEFAULT_MODBUS_PORT, 502);
        assert_eq!(DEFAULT_S7_PORT, 102);
        assert_eq!(DEFAULT_READ_TIMEOUT, Duration::from_secs(3));
        assert_eq!(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs(10));
    }

    #[test]
    fn test_available_and_discard() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(addr, Duration::from_millis(500)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        assert_eq!(transport.available().unwrap(), 0);

        peer.write_all(&[1, 2, 3]).unwrap();
        peer.flush().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while transport.available().unwrap() < 3 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.available().unwrap(), 3);
        assert_eq!(transport.discard_available().unwrap(), 3);
        assert_eq!(transport.available().unwrap(), 0);
    }

    #[test]
    fn test_discard_spans_several_chunks() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(addr, Duration::from_millis(500)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        peer.write_all(&[0xAA; 600]).unwrap();
        peer.flush().unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while transport.available().unwrap() < 600 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(transport.discard_available().unwrap(), 600);
        assert_eq!(transport.available().unwrap(), 0);
    }

    #[test]
    fn test_write_reaches_peer() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let mut transport = TcpTransport::connect(addr, Duration::from_millis(500)).unwrap();
        let (mut peer, _) = listener.accept().unwrap();

        transport.write_all(&[0xAB, 0xCD]).unwrap();
        transport.flush().unwrap();
        let mut buf = [0u8; 2];
        peer.read_exact(&mut buf).unwrap();
        assert_eq!(buf, [0xAB, 0xCD]);
        transport.shutdown().unwrap();
    }

    #[test]
    fn test_transport_debug() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let transport = TcpTransport::connect(addr, Duration::from_millis(100)).unwrap();
        let debug_str = format!("{transport:?}");
        assert!(debug_str.contains("TcpTransport"));
        assert!(debug_str.contains(&addr.to_string()));
    }
}
