//! Deferred work for the telemetry channel.
//!
//! Reconnect timers are the only scheduled work in the crate. The channel
//! owns a [`Scheduler`] and asks it for expired timers each time it is
//! polled, so nothing fires behind the caller's back. The [`Clock`] is
//! injected so tests can move time forward explicitly with [`ManualClock`].

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Handle of a scheduled timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

/// Source of the current time
pub trait Clock: Send {
    fn now(&self) -> Instant;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    /// Move time forward for every clone of this clock
    pub fn advance(&self, by: Duration) {
        *self.now.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock()
    }
}

/// One-shot timer registry
pub trait Scheduler: Send {
    /// Register a timer that expires after `delay`
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Cancel a pending timer. Returns false if it already fired or never existed.
    fn cancel(&mut self, id: TimerId) -> bool;

    /// Remove and return every timer whose deadline has passed, earliest first
    fn expired(&mut self) -> Vec<TimerId>;

    /// Earliest pending deadline
    fn next_deadline(&self) -> Option<Instant>;

    /// Number of timers not yet fired or cancelled
    fn pending(&self) -> usize;
}

/// Deadline-ordered timer queue over an injected clock
#[derive(Debug)]
pub struct TimerQueue<C: Clock = SystemClock> {
    clock: C,
    next_id: u64,
    timers: Vec<(Instant, TimerId)>,
}

impl TimerQueue<SystemClock> {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Default for TimerQueue<SystemClock> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Clock> TimerQueue<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            next_id: 0,
            timers: Vec::new(),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }
}

impl<C: Clock> Scheduler for TimerQueue<C> {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.next_id += 1;
        let id = TimerId(self.next_id);
        let deadline = self.clock.now() + delay;

        // Keep sorted by deadline; equal deadlines fire in scheduling order
        let pos = self.timers.partition_point(|(d, _)| *d <= deadline);
        self.timers.insert(pos, (deadline, id));
        id
    }

    fn cancel(&mut self, id: TimerId) -> bool {
        let before = self.timers.len();
        self.timers.retain(|(_, t)| *t != id);
        self.timers.len() != before
    }

    fn expired(&mut self) -> Vec<TimerId> {
        let now = self.clock.now();
        let due = self.timers.partition_point(|(d, _)| *d <= now);
        self.timers.drain(..due).map(|(_, id)| id).collect()
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.timers.first().map(|(d, _)| *d)
    }

    fn pending(&self) -> usize {
        self.timers.len()
    }
}
