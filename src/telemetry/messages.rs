//! Telemetry message types for the sensor feed.
//!
//! The Raspberry Pi publishes one JSON object per line:
//!
//! ```text
//! {"sensor": "TF-Luna", "data": {"distancia_m": 1.2, "fuerza_senal": 5000, "temperatura": 25}}
//! ```
//!
//! | Tag | Payload | Source |
//! |-----|---------|--------|
//! | `IMX477` | [`CameraQuality`] | Camera image-quality metrics |
//! | `TF-Luna` | [`DistanceReading`] | LiDAR rangefinder |
//! | `MPU6050` | [`Orientation`] | Accelerometer/gyro attitude |
//!
//! Frames that are valid JSON but do not match a known tag are kept as
//! [`TelemetryMessage::Unknown`]; frames that are not JSON at all become
//! [`Frame::Raw`].

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Sensor origin of a telemetry message or stored record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SensorKind {
    /// IMX477 camera (image quality)
    Imx477,
    /// TF-Luna LiDAR (distance, signal strength, temperature)
    TfLuna,
    /// MPU6050 IMU (orientation)
    Mpu6050,
}

impl SensorKind {
    /// All sensors involved in one measurement step
    pub const ALL: [SensorKind; 3] = [SensorKind::Imx477, SensorKind::TfLuna, SensorKind::Mpu6050];

    /// Discriminator used on the wire
    pub fn tag(self) -> &'static str {
        match self {
            SensorKind::Imx477 => "IMX477",
            SensorKind::TfLuna => "TF-Luna",
            SensorKind::Mpu6050 => "MPU6050",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "IMX477" => Some(SensorKind::Imx477),
            "TF-Luna" => Some(SensorKind::TfLuna),
            "MPU6050" => Some(SensorKind::Mpu6050),
            _ => None,
        }
    }
}

impl fmt::Display for SensorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// IMX477 image-quality metrics
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CameraQuality {
    /// Variance of the Laplacian (higher is sharper)
    #[serde(rename = "nitidez")]
    pub sharpness: f64,
    /// Mean luminance (0-255)
    #[serde(rename = "brillo")]
    pub brightness: f64,
    /// Standard deviation of luminance
    #[serde(rename = "contraste")]
    pub contrast: f64,
}

/// TF-Luna range reading
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DistanceReading {
    /// Distance in meters
    #[serde(rename = "distancia_m")]
    pub distance_m: f64,
    /// Signal amplitude (0-65535)
    #[serde(rename = "fuerza_senal")]
    pub signal_strength: u32,
    /// Chip temperature in °C
    #[serde(rename = "temperatura")]
    pub temperature_c: f64,
}

/// MPU6050 attitude in degrees
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Orientation {
    pub roll: f64,
    pub pitch: f64,
    pub yaw: f64,
    /// Die temperature in °C, when the firmware reports it
    #[serde(
        rename = "temperatura",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub temperature_c: Option<f64>,
}

/// Parsed telemetry message, tagged by sensor
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "sensor", content = "data")]
pub enum TelemetryMessage {
    #[serde(rename = "IMX477")]
    Camera(CameraQuality),
    #[serde(rename = "TF-Luna")]
    Distance(DistanceReading),
    #[serde(rename = "MPU6050")]
    Orientation(Orientation),
    /// Valid JSON with an unrecognised tag or payload shape
    #[serde(skip)]
    Unknown { sensor: String, data: Value },
}

impl TelemetryMessage {
    /// Sensor this message came from, if recognised
    pub fn kind(&self) -> Option<SensorKind> {
        match self {
            TelemetryMessage::Camera(_) => Some(SensorKind::Imx477),
            TelemetryMessage::Distance(_) => Some(SensorKind::TfLuna),
            TelemetryMessage::Orientation(_) => Some(SensorKind::Mpu6050),
            TelemetryMessage::Unknown { .. } => None,
        }
    }

    /// Sensor tag as it appeared on the wire
    pub fn sensor_tag(&self) -> &str {
        match self {
            TelemetryMessage::Unknown { sensor, .. } => sensor,
            other => other.kind().map(SensorKind::tag).unwrap_or_default(),
        }
    }

    pub fn as_camera(&self) -> Option<&CameraQuality> {
        match self {
            TelemetryMessage::Camera(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_distance(&self) -> Option<&DistanceReading> {
        match self {
            TelemetryMessage::Distance(d) => Some(d),
            _ => None,
        }
    }

    pub fn as_orientation(&self) -> Option<&Orientation> {
        match self {
            TelemetryMessage::Orientation(o) => Some(o),
            _ => None,
        }
    }
}

/// Result of decoding one line from the socket
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Message(TelemetryMessage),
    /// Payload that was not valid JSON, passed through untouched
    Raw(String),
}

/// Decode a single text frame.
///
/// Never fails: malformed input degrades to [`Frame::Raw`].
pub fn parse_frame(text: &str) -> Frame {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!("Frame is not JSON ({}), delivering raw payload", e);
            return Frame::Raw(text.to_string());
        }
    };

    match TelemetryMessage::deserialize(&value) {
        Ok(msg) => Frame::Message(msg),
        Err(e) => {
            let sensor = value
                .get("sensor")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            tracing::debug!("Unrecognised telemetry frame from '{}': {}", sensor, e);
            let data = match value.get("data") {
                Some(data) => data.clone(),
                None => value,
            };
            Frame::Message(TelemetryMessage::Unknown { sensor, data })
        }
    }
}
