//! Byte streams a live source can read from

use serialport::SerialPort;
use std::io::{self, Read};
use std::net::TcpStream;
use std::time::Duration;

/// A readable link carrying the line protocol (serial port or TCP socket).
///
/// Reads must honor the timeout set with [`ByteStream::set_timeout`] and
/// report it as [`io::ErrorKind::TimedOut`] or [`io::ErrorKind::WouldBlock`].
pub trait ByteStream: Read + Send {
    /// Set the timeout for a single read
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()>;

    /// Discard bytes already received but not yet read
    fn clear_input_buffer(&mut self) -> io::Result<()>;
}

/// Serial port wrapper
pub struct SerialChannel {
    port: Box<dyn SerialPort>,
}

impl SerialChannel {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Read for SerialChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }
}

impl ByteStream for SerialChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.port.set_timeout(timeout).map_err(io::Error::other)
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::other)
    }
}

/// TCP wrapper, for telemetry forwarded over the network
pub struct TcpChannel {
    stream: TcpStream,
}

impl TcpChannel {
    pub fn new(stream: TcpStream) -> Self {
        Self { stream }
    }
}

impl Read for TcpChannel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.read(buf)
    }
}

impl ByteStream for TcpChannel {
    fn set_timeout(&mut self, timeout: Duration) -> io::Result<()> {
        self.stream.set_read_timeout(Some(timeout))
    }

    fn clear_input_buffer(&mut self) -> io::Result<()> {
        // Drain whatever is queued without blocking, then restore blocking mode
        self.stream.set_nonblocking(true)?;
        let mut buf = [0u8; 1024];
        let result = loop {
            match self.stream.read(&mut buf) {
                Ok(0) => break Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        self.stream.set_nonblocking(false)?;
        result
    }
}
