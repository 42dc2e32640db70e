//! Gather one reading per sensor from the telemetry stream.

use super::records::MeasurementSet;
use crate::telemetry::channel::ChannelEvent;
use crate::telemetry::messages::{
    CameraQuality, DistanceReading, Orientation, SensorKind, TelemetryMessage,
};

/// Latest reading of each sensor seen so far
#[derive(Debug, Clone, Default)]
pub struct MeasurementCapture {
    camera: Option<CameraQuality>,
    distance: Option<DistanceReading>,
    orientation: Option<Orientation>,
}

impl MeasurementCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one channel event. Returns true once every sensor has reported.
    pub fn observe(&mut self, event: &ChannelEvent) -> bool {
        if let ChannelEvent::Telemetry(message) = event {
            self.record(message);
        }
        self.is_complete()
    }

    pub fn record(&mut self, message: &TelemetryMessage) {
        match message {
            TelemetryMessage::Camera(c) => self.camera = Some(c.clone()),
            TelemetryMessage::Distance(d) => self.distance = Some(d.clone()),
            TelemetryMessage::Orientation(o) => self.orientation = Some(o.clone()),
            TelemetryMessage::Unknown { .. } => {}
        }
    }

    pub fn is_complete(&self) -> bool {
        self.camera.is_some() && self.distance.is_some() && self.orientation.is_some()
    }

    /// Sensors that have not reported yet
    pub fn missing(&self) -> Vec<SensorKind> {
        let mut missing = Vec::new();
        if self.camera.is_none() {
            missing.push(SensorKind::Imx477);
        }
        if self.distance.is_none() {
            missing.push(SensorKind::TfLuna);
        }
        if self.orientation.is_none() {
            missing.push(SensorKind::Mpu6050);
        }
        missing
    }

    /// Take the complete set and start over; `None` while incomplete
    pub fn take(&mut self) -> Option<MeasurementSet> {
        if !self.is_complete() {
            return None;
        }
        let taken = std::mem::take(self);
        Some(MeasurementSet {
            camera: taken.camera?,
            distance: taken.distance?,
            orientation: taken.orientation?,
        })
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
