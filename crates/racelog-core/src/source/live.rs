//! Live source: lines arriving over a continuously open byte stream

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, trace, warn};

use super::serial::open_port;
use super::stream::{ByteStream, SerialChannel, TcpChannel};
use super::SourceError;
use crate::config::SerialConfig;

/// Longest single blocking read on the underlying stream
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Upper bound for one line; anything longer is garbage on the wire
const MAX_LINE_LEN: usize = 4096;

/// How the stream is acquired on `open()`
enum Connector {
    Serial(SerialConfig),
    Tcp(String),
    /// A pre-built stream, handed over on the first `open()`
    Stream(Option<Box<dyn ByteStream>>),
}

impl Connector {
    fn target(&self) -> String {
        match self {
            Connector::Serial(config) => config.port_name.clone(),
            Connector::Tcp(address) => format!("tcp://{address}"),
            Connector::Stream(_) => "<stream>".to_string(),
        }
    }
}

/// Cloneable handle that makes an outstanding or future `read_next` return
/// [`SourceError::Closed`] within one poll interval
#[derive(Debug, Clone, Default)]
pub struct SourceShutdown(Arc<AtomicBool>);

impl SourceShutdown {
    /// Request shutdown
    pub fn shutdown(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether shutdown was requested
    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Line reader over a serial port, TCP socket or injected stream
pub struct LiveSource {
    connector: Connector,
    read_timeout: Duration,
    stream: Option<Box<dyn ByteStream>>,
    /// Bytes received but not yet terminated by a newline
    pending: Vec<u8>,
    shutdown: SourceShutdown,
    lines_read: u64,
}

impl LiveSource {
    /// Live source on a serial port
    pub fn serial(config: SerialConfig) -> Self {
        let read_timeout = Duration::from_millis(config.read_timeout_ms);
        Self::with_connector(Connector::Serial(config), read_timeout)
    }

    /// Live source on a TCP endpoint (e.g. a serial-to-network bridge)
    pub fn tcp(address: impl Into<String>, read_timeout: Duration) -> Self {
        Self::with_connector(Connector::Tcp(address.into()), read_timeout)
    }

    /// Live source over an already connected stream
    pub fn from_stream(stream: Box<dyn ByteStream>, read_timeout: Duration) -> Self {
        Self::with_connector(Connector::Stream(Some(stream)), read_timeout)
    }

    fn with_connector(connector: Connector, read_timeout: Duration) -> Self {
        Self {
            connector,
            read_timeout,
            stream: None,
            pending: Vec::new(),
            shutdown: SourceShutdown::default(),
            lines_read: 0,
        }
    }

    /// Handle that can interrupt reads from another thread
    pub fn shutdown_handle(&self) -> SourceShutdown {
        self.shutdown.clone()
    }

    /// Human-readable name of the link
    pub fn target(&self) -> String {
        self.connector.target()
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    /// Complete lines returned so far
    pub fn lines_read(&self) -> u64 {
        self.lines_read
    }

    /// Acquire the link. Opening an open source is a no-op.
    pub fn open(&mut self) -> Result<(), SourceError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let target = self.connector.target();
        let poll = POLL_INTERVAL.min(self.read_timeout);
        let mut stream: Box<dyn ByteStream> = match &mut self.connector {
            Connector::Serial(config) => Box::new(SerialChannel::new(open_port(config, poll)?)),
            Connector::Tcp(address) => {
                let socket = TcpStream::connect(address.as_str()).map_err(|e| SourceError::Open {
                    target: target.clone(),
                    reason: e.to_string(),
                })?;
                Box::new(TcpChannel::new(socket))
            }
            Connector::Stream(slot) => slot.take().ok_or_else(|| SourceError::Open {
                target: target.clone(),
                reason: "stream was already consumed by an earlier session".into(),
            })?,
        };

        stream.set_timeout(poll).map_err(|e| SourceError::Open {
            target: target.clone(),
            reason: e.to_string(),
        })?;
        // Bytes queued before we attached may start mid-line
        stream.clear_input_buffer().map_err(|e| SourceError::Open {
            target: target.clone(),
            reason: e.to_string(),
        })?;

        self.pending.clear();
        self.shutdown.reset();
        self.stream = Some(stream);
        info!(link = %target, "live source opened");
        Ok(())
    }

    /// Block until a complete line arrives.
    ///
    /// Returns [`SourceError::Timeout`] if no line completes within the read
    /// timeout; bytes of a partial line are kept for the next call. A closed
    /// or failed link yields [`SourceError::Disconnected`] and the stream is
    /// dropped. A live link never reports a clean end of stream.
    pub fn read_next(&mut self) -> Result<Option<String>, SourceError> {
        if self.stream.is_none() {
            return Err(SourceError::NotOpen);
        }

        let deadline = Instant::now() + self.read_timeout;
        let mut chunk = [0u8; 256];

        loop {
            if let Some(line) = take_line(&mut self.pending) {
                self.lines_read += 1;
                return Ok(Some(line));
            }
            if self.shutdown.is_shutdown() {
                return Err(SourceError::Closed);
            }
            if Instant::now() >= deadline {
                return Err(SourceError::Timeout);
            }

            let result = match self.stream.as_mut() {
                Some(stream) => stream.read(&mut chunk),
                None => return Err(SourceError::NotOpen),
            };

            match result {
                Ok(0) => return Err(self.disconnect("end of stream".into())),
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    if self.pending.len() > MAX_LINE_LEN && !self.pending.contains(&b'\n') {
                        warn!(len = self.pending.len(), "discarding unterminated input");
                        self.pending.clear();
                    }
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                    ) => {}
                Err(e) => return Err(self.disconnect(e.to_string())),
            }
        }
    }

    /// Release the link. Safe to call on a source that never opened.
    pub fn close(&mut self) {
        self.shutdown.shutdown();
        self.pending.clear();
        if self.stream.take().is_some() {
            info!(link = %self.connector.target(), lines = self.lines_read, "live source closed");
        }
    }

    fn disconnect(&mut self, reason: String) -> SourceError {
        warn!(link = %self.connector.target(), %reason, "live source disconnected");
        self.stream = None;
        self.pending.clear();
        SourceError::Disconnected(reason)
    }
}

impl Drop for LiveSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// Pop the first newline-terminated line, decoding invalid UTF-8 lossily
fn take_line(pending: &mut Vec<u8>) -> Option<String> {
    let end = pending.iter().position(|b| *b == b'\n')?;
    let raw: Vec<u8> = pending.drain(..=end).collect();
    let line = String::from_utf8_lossy(&raw)
        .trim_end_matches(['\r', '\n'])
        .to_string();
    trace!(len = line.len(), "line received");
    Some(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Scripted stream; an empty script behaves like a silent line
    #[derive(Clone, Default)]
    struct ScriptedStream {
        script: Arc<Mutex<VecDeque<io::Result<Vec<u8>>>>>,
    }

    impl ScriptedStream {
        fn push(&self, step: io::Result<Vec<u8>>) {
            self.script.lock().unwrap().push_back(step);
        }
    }

    impl Read for ScriptedStream {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let step = self.script.lock().unwrap().pop_front();
            match step {
                Some(Ok(bytes)) => {
                    buf[..bytes.len()].copy_from_slice(&bytes);
                    Ok(bytes.len())
                }
                Some(Err(e)) => Err(e),
                None => {
                    std::thread::sleep(Duration::from_millis(2));
                    Err(io::ErrorKind::TimedOut.into())
                }
            }
        }
    }

    impl ByteStream for ScriptedStream {
        fn set_timeout(&mut self, _timeout: Duration) -> io::Result<()> {
            Ok(())
        }

        fn clear_input_buffer(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn source(stream: &ScriptedStream) -> LiveSource {
        let mut source =
            LiveSource::from_stream(Box::new(stream.clone()), Duration::from_millis(30));
        source.open().unwrap();
        source
    }

    #[test]
    fn test_reads_lines_split_across_chunks() {
        let stream = ScriptedStream::default();
        stream.push(Ok(b"100;10.5;20".to_vec()));
        stream.push(Ok(b"00;25;35.2\r\n200;15.3;2500;40;35.5\n".to_vec()));
        let mut source = source(&stream);

        assert_eq!(source.read_next().unwrap().as_deref(), Some("100;10.5;2000;25;35.2"));
        assert_eq!(source.read_next().unwrap().as_deref(), Some("200;15.3;2500;40;35.5"));
        assert_eq!(source.lines_read(), 2);
    }

    #[test]
    fn test_timeout_keeps_partial_line() {
        let stream = ScriptedStream::default();
        stream.push(Ok(b"100;10.5;".to_vec()));
        let mut source = source(&stream);

        let err = source.read_next().unwrap_err();
        assert!(matches!(err, SourceError::Timeout));
        assert!(err.is_recoverable());
        assert!(source.is_open());

        stream.push(Ok(b"2000;25;35.2\n".to_vec()));
        assert_eq!(source.read_next().unwrap().as_deref(), Some("100;10.5;2000;25;35.2"));
    }

    #[test]
    fn test_eof_is_disconnect() {
        let stream = ScriptedStream::default();
        stream.push(Ok(Vec::new()));
        let mut source = source(&stream);

        assert!(matches!(source.read_next(), Err(SourceError::Disconnected(_))));
        assert!(!source.is_open());
        assert!(matches!(source.read_next(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_io_error_is_disconnect() {
        let stream = ScriptedStream::default();
        stream.push(Err(io::ErrorKind::BrokenPipe.into()));
        let mut source = source(&stream);
        assert!(matches!(source.read_next(), Err(SourceError::Disconnected(_))));
    }

    #[test]
    fn test_shutdown_interrupts_read() {
        let stream = ScriptedStream::default();
        let mut source = LiveSource::from_stream(Box::new(stream), Duration::from_secs(30));
        source.open().unwrap();
        let handle = source.shutdown_handle();

        let started = Instant::now();
        let reader = std::thread::spawn(move || source.read_next());
        std::thread::sleep(Duration::from_millis(20));
        handle.shutdown();

        let result = reader.join().unwrap();
        assert!(matches!(result, Err(SourceError::Closed)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_open_discards_bytes_received_before_it() {
        use std::io::Write;
        use std::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (mut device, _) = listener.accept().unwrap();
        device.write_all(b"0;1.5;90").unwrap();
        let mut first = [0u8; 1];
        assert_eq!(client.peek(&mut first).unwrap(), 1);

        let mut source =
            LiveSource::from_stream(Box::new(TcpChannel::new(client)), Duration::from_millis(500));
        source.open().unwrap();
        device.write_all(b"100;10.5;2000;25;35.2\n").unwrap();

        assert_eq!(source.read_next().unwrap().as_deref(), Some("100;10.5;2000;25;35.2"));
    }

    #[test]
    fn test_close_without_open_is_safe() {
        let mut source = LiveSource::serial(SerialConfig::default());
        source.close();
        source.close();
        assert!(matches!(source.read_next(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let stream = ScriptedStream::default();
        stream.push(Ok(b"1\xff2\n".to_vec()));
        let mut source = source(&stream);
        assert_eq!(source.read_next().unwrap().as_deref(), Some("1\u{fffd}2"));
    }
}
