//! Mock transport for testing

use super::{Endpoint, SocketEvent, Transport};
use crate::error::{Result, SurveyError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Scripted transport for driving a channel without a network.
///
/// Clones share state, so a test keeps one handle and gives another to
/// the channel.
#[derive(Clone, Default)]
pub struct MockTransport {
    inner: Arc<Mutex<MockTransportInner>>,
}

#[derive(Default)]
struct MockTransportInner {
    events: VecDeque<SocketEvent>,
    /// Outcomes for upcoming `open` calls; empty means success
    open_results: VecDeque<std::result::Result<(), String>>,
    opened: Vec<Endpoint>,
    close_count: usize,
    is_open: bool,
}

impl MockTransport {
    /// Create a new mock transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event for the next poll
    pub fn inject(&self, event: SocketEvent) {
        self.inner.lock().events.push_back(event);
    }

    /// Queue a text frame
    pub fn inject_frame(&self, text: &str) {
        self.inject(SocketEvent::Frame(text.to_string()));
    }

    /// Simulate the peer dropping the connection
    pub fn drop_connection(&self, reason: &str) {
        let mut inner = self.inner.lock();
        inner.is_open = false;
        inner.events.push_back(SocketEvent::Closed(reason.to_string()));
    }

    /// Make the next `open` call fail immediately
    pub fn fail_next_open(&self, reason: &str) {
        self.inner
            .lock()
            .open_results
            .push_back(Err(reason.to_string()));
    }

    /// Endpoints passed to `open`, in call order
    pub fn opened(&self) -> Vec<Endpoint> {
        self.inner.lock().opened.clone()
    }

    pub fn open_count(&self) -> usize {
        self.inner.lock().opened.len()
    }

    pub fn close_count(&self) -> usize {
        self.inner.lock().close_count
    }

    /// Clear queued events
    pub fn clear_events(&self) {
        self.inner.lock().events.clear();
    }
}

impl Transport for MockTransport {
    fn open(&mut self, endpoint: &Endpoint) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.opened.push(endpoint.clone());

        match inner.open_results.pop_front() {
            Some(Err(reason)) => Err(SurveyError::Connection(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                reason,
            ))),
            _ => {
                inner.is_open = true;
                inner.events.push_back(SocketEvent::Opened);
                Ok(())
            }
        }
    }

    fn poll_event(&mut self) -> Result<Option<SocketEvent>> {
        Ok(self.inner.lock().events.pop_front())
    }

    fn close(&mut self) {
        let mut inner = self.inner.lock();
        inner.close_count += 1;
        inner.is_open = false;
    }

    fn is_open(&self) -> bool {
        self.inner.lock().is_open
    }
}
