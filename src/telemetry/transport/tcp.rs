//! Newline-delimited JSON over TCP.
//!
//! # Wire Format
//!
//! ```text
//! {"sensor":"TF-Luna","data":{...}}\n
//! {"sensor":"MPU6050","data":{...}}\n
//! ```
//!
//! Each line is one frame. The socket uses a short read timeout so that
//! [`Transport::poll_event`] returns `Ok(None)` when no complete line is
//! available, letting the caller service reconnect timers.

use super::{Endpoint, SocketEvent, Transport};
use crate::error::{Result, SurveyError};
use std::collections::VecDeque;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Lines longer than this are treated as a protocol violation
const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Initial capacity for the line buffer (typical frame size)
const INITIAL_BUFFER_CAPACITY: usize = 256;

/// TCP transport reading one JSON frame per line
pub struct TcpLineTransport {
    connect_timeout: Duration,
    read_timeout: Duration,
    reader: Option<BufReader<TcpStream>>,
    /// Bytes of a line that is not complete yet
    partial: Vec<u8>,
    pending: VecDeque<SocketEvent>,
}

impl TcpLineTransport {
    pub fn new(connect_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            read_timeout,
            reader: None,
            partial: Vec::with_capacity(INITIAL_BUFFER_CAPACITY),
            pending: VecDeque::new(),
        }
    }

    fn connect(&self, endpoint: &Endpoint) -> Result<TcpStream> {
        let addrs = endpoint.address().to_socket_addrs()?;

        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => {
                    tracing::debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        Err(match last_err {
            Some(e) => SurveyError::Connection(e),
            None => SurveyError::Config(format!("{} resolved to no addresses", endpoint)),
        })
    }

    fn drop_socket(&mut self) {
        if let Some(reader) = self.reader.take() {
            let _ = reader.get_ref().shutdown(Shutdown::Both);
        }
        self.partial.clear();
    }

    fn take_line(&mut self) -> String {
        while matches!(self.partial.last(), Some(b'\n' | b'\r')) {
            self.partial.pop();
        }
        let line = String::from_utf8_lossy(&self.partial).into_owned();
        self.partial.clear();
        line
    }
}

impl Transport for TcpLineTransport {
    fn open(&mut self, endpoint: &Endpoint) -> Result<()> {
        self.drop_socket();
        self.pending.clear();

        let stream = self.connect(endpoint)?;
        stream.set_read_timeout(Some(self.read_timeout))?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::warn!("Failed to set TCP_NODELAY: {}", e);
        }

        tracing::info!("Telemetry socket connected to {}", endpoint);
        self.reader = Some(BufReader::new(stream));
        self.pending.push_back(SocketEvent::Opened);
        Ok(())
    }

    fn poll_event(&mut self) -> Result<Option<SocketEvent>> {
        if let Some(event) = self.pending.pop_front() {
            return Ok(Some(event));
        }

        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(None),
        };

        // Read at most one byte past the limit so an endless line is caught
        let room = (MAX_FRAME_SIZE + 1).saturating_sub(self.partial.len()) as u64;
        let read = reader.by_ref().take(room).read_until(b'\n', &mut self.partial);

        match read {
            Ok(_) if self.partial.len() > MAX_FRAME_SIZE && !self.partial.ends_with(b"\n") => {
                self.drop_socket();
                Err(SurveyError::Protocol(format!(
                    "Frame exceeds {} bytes without a newline",
                    MAX_FRAME_SIZE
                )))
            }
            Ok(0) => {
                self.drop_socket();
                Ok(Some(SocketEvent::Closed("connection closed by peer".into())))
            }
            Ok(_) if self.partial.ends_with(b"\n") => Ok(Some(SocketEvent::Frame(self.take_line()))),
            Ok(_) => {
                // EOF in the middle of a line; deliver what arrived, next read reports the close
                Ok(Some(SocketEvent::Frame(self.take_line())))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                Ok(None)
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => Ok(None),
            Err(e) => {
                self.drop_socket();
                Err(SurveyError::Connection(e))
            }
        }
    }

    fn close(&mut self) {
        self.drop_socket();
        self.pending.clear();
    }

    fn is_open(&self) -> bool {
        self.reader.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    fn poll_until_some(t: &mut TcpLineTransport) -> SocketEvent {
        for _ in 0..200 {
            if let Some(event) = t.poll_event().unwrap() {
                return event;
            }
        }
        panic!("no event within poll budget");
    }

    #[test]
    fn test_reads_lines_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream.write_all(b"{\"a\":1}\n{\"b\"").unwrap();
            stream.flush().unwrap();
            std::thread::sleep(Duration::from_millis(50));
            stream.write_all(b":2}\r\n").unwrap();
        });

        let mut t = TcpLineTransport::new(Duration::from_secs(1), Duration::from_millis(10));
        t.open(&Endpoint::parse(&format!("127.0.0.1:{}", port)).unwrap())
            .unwrap();

        assert_eq!(poll_until_some(&mut t), SocketEvent::Opened);
        assert_eq!(poll_until_some(&mut t), SocketEvent::Frame("{\"a\":1}".into()));
        assert_eq!(poll_until_some(&mut t), SocketEvent::Frame("{\"b\":2}".into()));

        server.join().unwrap();
        assert!(matches!(poll_until_some(&mut t), SocketEvent::Closed(_)));
        assert!(!t.is_open());
    }

    #[test]
    fn test_refused_connection() {
        // Bind then drop to get a port with nothing listening
        let port = TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();

        let mut t = TcpLineTransport::new(Duration::from_millis(200), Duration::from_millis(10));
        let result = t.open(&Endpoint::parse(&format!("127.0.0.1:{}", port)).unwrap());
        assert!(result.is_err());
        assert!(!t.is_open());
    }

    #[test]
    fn test_endless_line_rejected_without_pause() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let chunk = [b'x'; 8192];
            // Keep writing until the client hangs up; never send a newline
            while stream.write_all(&chunk).is_ok() {}
        });

        let mut t = TcpLineTransport::new(Duration::from_secs(1), Duration::from_secs(5));
        t.open(&Endpoint::parse(&format!("127.0.0.1:{}", port)).unwrap())
            .unwrap();
        assert_eq!(t.poll_event().unwrap(), Some(SocketEvent::Opened));

        let mut outcome = None;
        for _ in 0..1000 {
            match t.poll_event() {
                Ok(_) => continue,
                Err(e) => {
                    outcome = Some(e);
                    break;
                }
            }
        }

        assert!(matches!(outcome, Some(SurveyError::Protocol(_))));
        assert!(!t.is_open());
        assert!(t.partial.is_empty());
        server.join().unwrap();
    }
}
