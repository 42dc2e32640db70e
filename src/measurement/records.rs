//! Sensor records stored per project.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::telemetry::messages::{CameraQuality, DistanceReading, Orientation, SensorKind};

/// Survey project identifier
pub type ProjectId = u64;

/// Identifier of a stored sensor record
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One reading of one sensor, as stored by the API
#[derive(Debug, Clone, PartialEq)]
pub enum SensorRecord {
    Camera(CameraQuality),
    Distance(DistanceReading),
    Orientation(Orientation),
}

impl SensorRecord {
    pub fn kind(&self) -> SensorKind {
        match self {
            SensorRecord::Camera(_) => SensorKind::Imx477,
            SensorRecord::Distance(_) => SensorKind::TfLuna,
            SensorRecord::Orientation(_) => SensorKind::Mpu6050,
        }
    }

    /// JSON body for create/update requests
    pub fn to_json(&self) -> serde_json::Result<Value> {
        match self {
            SensorRecord::Camera(c) => serde_json::to_value(c),
            SensorRecord::Distance(d) => serde_json::to_value(d),
            SensorRecord::Orientation(o) => serde_json::to_value(o),
        }
    }

    /// Decode a record body; unrelated fields such as `id` are ignored
    pub fn from_json(kind: SensorKind, value: &Value) -> serde_json::Result<Self> {
        Ok(match kind {
            SensorKind::Imx477 => SensorRecord::Camera(CameraQuality::deserialize(value)?),
            SensorKind::TfLuna => SensorRecord::Distance(DistanceReading::deserialize(value)?),
            SensorKind::Mpu6050 => SensorRecord::Orientation(Orientation::deserialize(value)?),
        })
    }

    /// Combine a first-step record with the second-step reading.
    ///
    /// Distance is summed (the two halves of a span measured front and back);
    /// every other quantity is averaged. Returns `None` if the kinds differ.
    pub fn merged_with(&self, second: &SensorRecord) -> Option<SensorRecord> {
        match (self, second) {
            (SensorRecord::Camera(a), SensorRecord::Camera(b)) => {
                Some(SensorRecord::Camera(CameraQuality {
                    sharpness: mean(a.sharpness, b.sharpness),
                    brightness: mean(a.brightness, b.brightness),
                    contrast: mean(a.contrast, b.contrast),
                }))
            }
            (SensorRecord::Distance(a), SensorRecord::Distance(b)) => {
                Some(SensorRecord::Distance(DistanceReading {
                    distance_m: a.distance_m + b.distance_m,
                    signal_strength: ((a.signal_strength as u64 + b.signal_strength as u64) / 2)
                        as u32,
                    temperature_c: mean(a.temperature_c, b.temperature_c),
                }))
            }
            (SensorRecord::Orientation(a), SensorRecord::Orientation(b)) => {
                let temperature_c = match (a.temperature_c, b.temperature_c) {
                    (Some(x), Some(y)) => Some(mean(x, y)),
                    (x, y) => x.or(y),
                };
                Some(SensorRecord::Orientation(Orientation {
                    roll: mean(a.roll, b.roll),
                    pitch: mean(a.pitch, b.pitch),
                    yaw: mean(a.yaw, b.yaw),
                    temperature_c,
                }))
            }
            _ => None,
        }
    }
}

fn mean(a: f64, b: f64) -> f64 {
    (a + b) / 2.0
}

/// Record as returned by the API
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub id: RecordId,
    pub project_id: ProjectId,
    pub record: SensorRecord,
}

/// One reading of every sensor, taken in a single device position
#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementSet {
    pub camera: CameraQuality,
    pub distance: DistanceReading,
    pub orientation: Orientation,
}

impl MeasurementSet {
    pub fn record(&self, kind: SensorKind) -> SensorRecord {
        match kind {
            SensorKind::Imx477 => SensorRecord::Camera(self.camera.clone()),
            SensorKind::TfLuna => SensorRecord::Distance(self.distance.clone()),
            SensorKind::Mpu6050 => SensorRecord::Orientation(self.orientation.clone()),
        }
    }
}

/// Ids of the three records created by the first measurement step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordIds {
    pub imx477: RecordId,
    pub tf_luna: RecordId,
    pub mpu6050: RecordId,
}

impl RecordIds {
    pub fn get(&self, kind: SensorKind) -> RecordId {
        match kind {
            SensorKind::Imx477 => self.imx477,
            SensorKind::TfLuna => self.tf_luna,
            SensorKind::Mpu6050 => self.mpu6050,
        }
    }
}
