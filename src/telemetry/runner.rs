//! Poll loop driving a telemetry channel.
//!
//! Runs on the caller's thread until shutdown is signalled or the channel
//! gives up reconnecting. Sleeps only when nothing happened, and never past
//! the next reconnect deadline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crate::telemetry::channel::{ConnectionState, TelemetryChannel};
use crate::telemetry::scheduler::Scheduler;
use crate::telemetry::transport::Transport;

/// Why the loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Shutdown flag cleared or stop condition met
    Stopped,
    /// Retry budget exhausted
    GaveUp,
}

/// Poll until `running` is cleared, `stop` returns true, or the channel gives up.
pub fn run_until<T, S, F>(
    channel: &mut TelemetryChannel<T, S>,
    running: &AtomicBool,
    idle_sleep: Duration,
    mut stop: F,
) -> RunOutcome
where
    T: Transport,
    S: Scheduler,
    F: FnMut(&TelemetryChannel<T, S>) -> bool,
{
    tracing::debug!("Telemetry loop started");

    loop {
        if !running.load(Ordering::Relaxed) {
            tracing::info!("Telemetry loop shutting down");
            channel.close();
            return RunOutcome::Stopped;
        }

        let handled = channel.poll();

        if stop(&*channel) {
            return RunOutcome::Stopped;
        }

        if channel.is_permanently_disconnected() {
            return RunOutcome::GaveUp;
        }

        if handled == 0 {
            std::thread::sleep(idle_duration(channel, idle_sleep));
        }
    }
}

/// Time to sleep when idle: connected sockets already block in their read
/// timeout, so only a disconnected channel needs to wait, up to its next timer.
fn idle_duration<T: Transport, S: Scheduler>(
    channel: &TelemetryChannel<T, S>,
    idle_sleep: Duration,
) -> Duration {
    if channel.state() == ConnectionState::Connected {
        return Duration::ZERO;
    }
    match channel.scheduler().next_deadline() {
        Some(deadline) => deadline
            .saturating_duration_since(Instant::now())
            .min(idle_sleep),
        None => idle_sleep,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::channel::{ChannelEvent, RetryPolicy, MAX_EVENTS_PER_POLL};
    use crate::telemetry::scheduler::TimerQueue;
    use crate::telemetry::transport::MockTransport;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const IMU_FRAME: &str = r#"{"sensor":"MPU6050","data":{"roll":0.1,"pitch":0.2,"yaw":90.0}}"#;

    /// Channel whose feed never runs dry: every delivered reading queues another
    fn endless_feed() -> (
        TelemetryChannel<MockTransport, TimerQueue>,
        MockTransport,
        Arc<AtomicUsize>,
    ) {
        let transport = MockTransport::new();
        let channel =
            TelemetryChannel::new(transport.clone(), TimerQueue::new(), RetryPolicy::default());
        let delivered = Arc::new(AtomicUsize::new(0));
        let count = Arc::clone(&delivered);
        let feed = transport.clone();
        channel.subscribe(move |event| {
            if let ChannelEvent::Telemetry(_) = event {
                count.fetch_add(1, Ordering::SeqCst);
                feed.inject_frame(IMU_FRAME);
            }
        });
        (channel, transport, delivered)
    }

    #[test]
    fn test_stops_when_flag_cleared() {
        let transport = MockTransport::new();
        let mut channel =
            TelemetryChannel::new(transport.clone(), TimerQueue::new(), RetryPolicy::default());
        channel.connect("127.0.0.1:1").unwrap();

        let running = AtomicBool::new(false);
        let outcome = run_until(&mut channel, &running, Duration::from_millis(1), |_| false);

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_stop_condition() {
        let transport = MockTransport::new();
        let mut channel =
            TelemetryChannel::new(transport.clone(), TimerQueue::new(), RetryPolicy::default());
        channel.connect("127.0.0.1:1").unwrap();

        let running = AtomicBool::new(true);
        let outcome = run_until(&mut channel, &running, Duration::from_millis(1), |c| {
            c.state() == ConnectionState::Connected
        });
        assert_eq!(outcome, RunOutcome::Stopped);
    }

    #[test]
    fn test_returns_when_retries_exhausted() {
        let transport = MockTransport::new();
        for _ in 0..3 {
            transport.fail_next_open("refused");
        }
        let policy = RetryPolicy {
            max_attempts: 2,
            delay: Duration::from_millis(5),
            ..RetryPolicy::default()
        };
        let mut channel = TelemetryChannel::new(transport.clone(), TimerQueue::new(), policy);
        channel.connect("127.0.0.1:1").unwrap();

        let running = AtomicBool::new(true);
        let outcome = run_until(&mut channel, &running, Duration::from_millis(2), |_| false);

        assert_eq!(outcome, RunOutcome::GaveUp);
        assert_eq!(transport.open_count(), 3);
    }

    #[test]
    fn test_stop_checked_while_frames_keep_arriving() {
        let (mut channel, transport, delivered) = endless_feed();
        channel.connect("127.0.0.1:1").unwrap();
        transport.inject_frame(IMU_FRAME);

        let running = AtomicBool::new(true);
        let mut checks = 0;
        let outcome = run_until(&mut channel, &running, Duration::from_millis(1), |_| {
            checks += 1;
            checks == 3
        });

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(checks, 3);
        assert!(delivered.load(Ordering::SeqCst) <= 3 * MAX_EVENTS_PER_POLL + 1);
    }

    #[test]
    fn test_shutdown_flag_honoured_during_busy_feed() {
        let (mut channel, transport, delivered) = endless_feed();
        let running = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&running);
        let seen = Arc::clone(&delivered);
        channel.subscribe(move |_| {
            if seen.load(Ordering::SeqCst) >= 100 {
                flag.store(false, Ordering::SeqCst);
            }
        });
        channel.connect("127.0.0.1:1").unwrap();
        transport.inject_frame(IMU_FRAME);

        let outcome = run_until(&mut channel, &running, Duration::from_millis(1), |_| false);

        assert_eq!(outcome, RunOutcome::Stopped);
        assert_eq!(channel.state(), ConnectionState::Disconnected);
        assert!(delivered.load(Ordering::SeqCst) < 100 + MAX_EVENTS_PER_POLL + 1);
    }
}
