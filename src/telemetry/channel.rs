//! Reconnecting telemetry channel.
//!
//! Owns one socket (through a [`Transport`]), decodes frames, fans events
//! out to [`Subscribers`], and reconnects after unexpected drops.
//!
//! # State Machine
//!
//! ```text
//!                 connect()
//! ┌──────────────┐ ─────────▶ ┌────────────┐  Opened   ┌───────────┐
//! │ Disconnected │            │ Connecting │ ────────▶ │ Connected │
//! │              │ ◀───────── │            │           │           │
//! └──────────────┘  Closed /  └────────────┘           └─────┬─────┘
//!     ▲      │      open err        ▲                        │
//!     │      │ retry timer          │                        │ Closed
//!     │      └──────────────────────┘                        │
//!     └──────────────────────────────────────────────────────┘
//! ```
//!
//! On every unexpected close the retry counter is compared with
//! `max_attempts`. Below the limit a timer is scheduled and the counter
//! incremented; at the limit the channel gives up and reports
//! [`ConnectionStatus::PermanentlyDisconnected`] once. A successful open
//! resets the counter.
//!
//! [`TelemetryChannel::close`] is the intentional teardown: it cancels a
//! pending timer and late close events from the transport are ignored.
//!
//! # Example
//!
//! ```ignore
//! let transport = TcpLineTransport::new(connect_timeout, poll_interval);
//! let mut channel = TelemetryChannel::new(transport, TimerQueue::new(), RetryPolicy::default());
//! channel.subscribe(|event| println!("{:?}", event));
//! channel.connect("tcp://raspberrypi.local:8765")?;
//! loop {
//!     channel.poll();
//! }
//! ```

use std::time::Duration;

use crossbeam_channel::Receiver;

use crate::config::TelemetryConfig;
use crate::error::Result;
use crate::telemetry::messages::{parse_frame, Frame, TelemetryMessage};
use crate::telemetry::scheduler::{Scheduler, TimerId};
use crate::telemetry::subscribers::{Subscribers, SubscriptionId};
use crate::telemetry::transport::{Endpoint, SocketEvent, Transport};

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Connection notifications delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected {
        reason: String,
        /// True when the caller closed the channel
        intentional: bool,
    },
    /// A reconnect attempt has been scheduled
    Reconnecting {
        attempt: u32,
        max_attempts: u32,
        delay: Duration,
    },
    /// Retry budget exhausted; no further attempts will be made
    PermanentlyDisconnected { attempts: u32 },
}

/// Event delivered to every subscriber
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Connection(ConnectionStatus),
    Telemetry(TelemetryMessage),
    /// Frame that could not be parsed as JSON
    Raw(String),
}

/// Reconnect policy
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Reconnect attempts after an unexpected close.
    /// Default: 3
    pub max_attempts: u32,

    /// Delay before the first attempt.
    /// Default: 3s
    pub delay: Duration,

    /// Multiplier applied per further attempt (1.0 keeps the delay fixed).
    /// Default: 1.0
    pub backoff_multiplier: f64,

    /// Cap on the grown delay.
    /// Default: 30s
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
            backoff_multiplier: 1.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &TelemetryConfig) -> Self {
        Self {
            max_attempts: config.max_reconnect_attempts,
            delay: Duration::from_millis(config.reconnect_delay_ms),
            backoff_multiplier: config.backoff_multiplier,
            max_delay: Duration::from_millis(config.max_reconnect_delay_ms),
        }
    }

    /// Delay before the given attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let cap = self.max_delay.max(self.delay);
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let scaled = self.delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if scaled.is_finite() && scaled >= 0.0 {
            Duration::from_secs_f64(scaled.min(cap.as_secs_f64()))
        } else {
            cap
        }
    }
}

/// Transport events handled by one [`TelemetryChannel::poll`] call
pub const MAX_EVENTS_PER_POLL: usize = 64;

/// Telemetry channel bound to one endpoint at a time
pub struct TelemetryChannel<T: Transport, S: Scheduler> {
    transport: T,
    scheduler: S,
    policy: RetryPolicy,
    subscribers: Subscribers,
    endpoint: Option<Endpoint>,
    state: ConnectionState,
    /// Reconnect attempts since the last successful open
    retry_count: u32,
    pending_timer: Option<TimerId>,
    intentional_close: bool,
    gave_up: bool,
}

impl<T: Transport, S: Scheduler> TelemetryChannel<T, S> {
    pub fn new(transport: T, scheduler: S, policy: RetryPolicy) -> Self {
        Self {
            transport,
            scheduler,
            policy,
            subscribers: Subscribers::new(),
            endpoint: None,
            state: ConnectionState::Disconnected,
            retry_count: 0,
            pending_timer: None,
            intentional_close: false,
            gave_up: false,
        }
    }

    /// Open the socket to `url`.
    ///
    /// No-op while connected or connecting. From Disconnected this starts
    /// afresh: pending retries are cancelled and the retry budget restored.
    pub fn connect(&mut self, url: &str) -> Result<()> {
        if self.state != ConnectionState::Disconnected {
            tracing::debug!("connect({}) ignored, channel is {:?}", url, self.state);
            return Ok(());
        }

        let endpoint = Endpoint::parse(url)?;
        self.cancel_pending_timer();
        self.intentional_close = false;
        self.gave_up = false;
        self.retry_count = 0;
        self.endpoint = Some(endpoint);
        self.open();
        Ok(())
    }

    /// Intentional teardown: cancels any pending reconnect and closes the socket
    pub fn close(&mut self) {
        self.intentional_close = true;
        self.cancel_pending_timer();

        if self.state != ConnectionState::Disconnected {
            self.transport.close();
            self.state = ConnectionState::Disconnected;
            tracing::info!("Telemetry channel closed");
            self.subscribers
                .deliver(&ChannelEvent::Connection(ConnectionStatus::Disconnected {
                    reason: "closed by caller".into(),
                    intentional: true,
                }));
        }
    }

    /// Fire expired timers, then handle up to [`MAX_EVENTS_PER_POLL`]
    /// transport events.
    ///
    /// Returns the number of events handled. A feed that never goes quiet
    /// still hands control back to the caller after each batch.
    pub fn poll(&mut self) -> usize {
        let mut handled = 0;

        for id in self.scheduler.expired() {
            self.on_timer(id);
            handled += 1;
        }

        let mut budget = MAX_EVENTS_PER_POLL;
        while budget > 0
            && (self.transport.is_open() || self.state != ConnectionState::Disconnected)
        {
            budget -= 1;
            match self.transport.poll_event() {
                Ok(Some(event)) => {
                    self.handle_event(event);
                    handled += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!("Telemetry transport error: {}", e);
                    self.transport.close();
                    self.handle_event(SocketEvent::Closed(e.to_string()));
                    handled += 1;
                    break;
                }
            }
        }

        handled
    }

    /// Apply one socket event
    pub fn handle_event(&mut self, event: SocketEvent) {
        match event {
            SocketEvent::Opened => self.on_opened(),
            SocketEvent::Frame(text) => self.on_frame(&text),
            SocketEvent::Closed(reason) => self.on_closed(reason),
        }
    }

    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: FnMut(&ChannelEvent) + Send + 'static,
    {
        self.subscribers.subscribe(callback)
    }

    pub fn subscribe_stream(&self) -> (SubscriptionId, Receiver<ChannelEvent>) {
        self.subscribers.subscribe_stream()
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.unsubscribe(id)
    }

    /// Shared handle to the subscriber set, usable from inside callbacks.
    ///
    /// See [`Subscribers::deliver`] for nested delivery.
    pub fn subscribers(&self) -> Subscribers {
        self.subscribers.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn pending_timer(&self) -> Option<TimerId> {
        self.pending_timer
    }

    pub fn is_permanently_disconnected(&self) -> bool {
        self.gave_up
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    fn open(&mut self) {
        let endpoint = match self.endpoint.clone() {
            Some(ep) => ep,
            None => return,
        };

        self.state = ConnectionState::Connecting;
        tracing::debug!("Opening telemetry socket to {}", endpoint);

        if let Err(e) = self.transport.open(&endpoint) {
            tracing::warn!("Failed to connect to {}: {}", endpoint, e);
            self.on_closed(e.to_string());
        }
    }

    fn on_opened(&mut self) {
        if self.intentional_close {
            // Socket finished opening after close(); discard it
            self.transport.close();
            return;
        }

        self.state = ConnectionState::Connected;
        self.retry_count = 0;
        self.gave_up = false;
        tracing::info!(
            "Telemetry channel connected to {}",
            self.endpoint
                .as_ref()
                .map(|e| e.to_string())
                .unwrap_or_default()
        );
        self.subscribers
            .deliver(&ChannelEvent::Connection(ConnectionStatus::Connected));
    }

    fn on_frame(&mut self, text: &str) {
        if self.state != ConnectionState::Connected {
            tracing::debug!("Dropping frame received while {:?}", self.state);
            return;
        }

        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let event = match parse_frame(text) {
            Frame::Message(msg) => ChannelEvent::Telemetry(msg),
            Frame::Raw(raw) => {
                tracing::warn!("Unparseable telemetry frame, delivering raw payload");
                ChannelEvent::Raw(raw)
            }
        };
        self.subscribers.deliver(&event);
    }

    fn on_closed(&mut self, reason: String) {
        if self.intentional_close {
            tracing::debug!("Ignoring close after teardown: {}", reason);
            return;
        }

        self.state = ConnectionState::Disconnected;
        tracing::warn!("Telemetry channel disconnected: {}", reason);
        self.subscribers
            .deliver(&ChannelEvent::Connection(ConnectionStatus::Disconnected {
                reason,
                intentional: false,
            }));

        if self.pending_timer.is_some() {
            return;
        }

        if self.retry_count < self.policy.max_attempts {
            self.retry_count += 1;
            let delay = self.policy.delay_for(self.retry_count);
            self.pending_timer = Some(self.scheduler.schedule(delay));
            tracing::info!(
                "Reconnecting in {:?} (attempt {}/{})",
                delay,
                self.retry_count,
                self.policy.max_attempts
            );
            self.subscribers
                .deliver(&ChannelEvent::Connection(ConnectionStatus::Reconnecting {
                    attempt: self.retry_count,
                    max_attempts: self.policy.max_attempts,
                    delay,
                }));
        } else if !self.gave_up {
            self.gave_up = true;
            tracing::error!(
                "Telemetry channel gave up after {} reconnect attempts",
                self.retry_count
            );
            self.subscribers.deliver(&ChannelEvent::Connection(
                ConnectionStatus::PermanentlyDisconnected {
                    attempts: self.retry_count,
                },
            ));
        }
    }

    fn on_timer(&mut self, id: TimerId) {
        if self.pending_timer != Some(id) {
            return;
        }
        self.pending_timer = None;

        if self.intentional_close || self.state != ConnectionState::Disconnected {
            return;
        }
        self.open();
    }

    fn cancel_pending_timer(&mut self) {
        if let Some(id) = self.pending_timer.take() {
            self.scheduler.cancel(id);
            tracing::debug!("Cancelled pending reconnect");
        }
    }
}

impl<T: Transport, S: Scheduler> Drop for TelemetryChannel<T, S> {
    fn drop(&mut self) {
        self.intentional_close = true;
        self.cancel_pending_timer();
        self.transport.close();
    }
}
