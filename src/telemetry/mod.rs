//! Sensor telemetry: socket transport, reconnecting channel, and display helpers

pub mod channel;
pub mod display;
pub mod messages;
pub mod runner;
pub mod scheduler;
pub mod subscribers;
pub mod transport;

pub use channel::{ChannelEvent, ConnectionState, ConnectionStatus, RetryPolicy, TelemetryChannel};
pub use messages::{
    parse_frame, CameraQuality, DistanceReading, Frame, Orientation, SensorKind, TelemetryMessage,
};
pub use runner::{run_until, RunOutcome};
pub use scheduler::{Clock, ManualClock, Scheduler, SystemClock, TimerId, TimerQueue};
pub use subscribers::{Subscribers, SubscriptionId};
pub use transport::{Endpoint, MockTransport, SocketEvent, TcpLineTransport, Transport};

use crate::config::TelemetryConfig;

/// Channel type used against a live Raspberry Pi
pub type LiveChannel = TelemetryChannel<TcpLineTransport, TimerQueue<SystemClock>>;

/// Build a TCP-backed channel from configuration
pub fn live_channel(config: &TelemetryConfig) -> LiveChannel {
    let transport = TcpLineTransport::new(config.connect_timeout(), config.poll_interval());
    TelemetryChannel::new(
        transport,
        TimerQueue::new(),
        RetryPolicy::from_config(config),
    )
}
