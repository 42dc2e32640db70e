//! Transport layer for the telemetry socket

use crate::error::{Result, SurveyError};
use std::fmt;

mod mock;
mod tcp;

pub use mock::MockTransport;
pub use tcp::TcpLineTransport;

/// Parsed telemetry endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    /// Request path, kept for endpoints that route by path
    pub path: String,
}

impl Endpoint {
    /// Parse `tcp://host:port[/path]` or bare `host:port`
    pub fn parse(url: &str) -> Result<Self> {
        let url = url.trim();
        let rest = match url.split_once("://") {
            Some(("tcp", rest)) => rest,
            Some((scheme, _)) => {
                return Err(SurveyError::Config(format!(
                    "Unsupported telemetry scheme '{}' in {}",
                    scheme, url
                )));
            }
            None => url,
        };

        let (authority, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, "/"),
        };

        let (host, port) = authority
            .rsplit_once(':')
            .ok_or_else(|| SurveyError::Config(format!("Missing port in {}", url)))?;
        if host.is_empty() {
            return Err(SurveyError::Config(format!("Missing host in {}", url)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| SurveyError::Config(format!("Invalid port in {}: {}", url, e)))?;

        Ok(Self {
            host: host.trim_start_matches('[').trim_end_matches(']').to_string(),
            port,
            path: path.to_string(),
        })
    }

    /// `host:port` form for socket address resolution
    pub fn address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tcp://{}{}", self.address(), self.path)
    }
}

/// Socket lifecycle event reported by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum SocketEvent {
    /// Connection established
    Opened,
    /// One complete text frame (without the line terminator)
    Frame(String),
    /// Connection lost or refused
    Closed(String),
}

/// Transport trait for the telemetry socket.
///
/// Implementations never block for long: `poll_event` returns `Ok(None)`
/// when nothing is ready so the owner can service its timers.
pub trait Transport: Send {
    /// Start connecting. An `Err` means the attempt failed outright.
    fn open(&mut self, endpoint: &Endpoint) -> Result<()>;

    /// Next pending event, if any
    fn poll_event(&mut self) -> Result<Option<SocketEvent>>;

    /// Drop the connection without reporting a close event
    fn close(&mut self);

    /// Check if a socket is currently held
    fn is_open(&self) -> bool;
}
