//! Unit conversion and classification of readings for display.

use std::fmt;

use crate::telemetry::messages::{CameraQuality, DistanceReading, Orientation};

/// TF-Luna amplitude below which the distance is not trustworthy
pub const MIN_RELIABLE_SIGNAL: u32 = 100;

/// Amplitude above which the reading is considered strong
pub const GOOD_SIGNAL: u32 = 1000;

/// TF-Luna reports this amplitude when the receiver saturates
pub const SATURATED_SIGNAL: u32 = 65535;

/// Laplacian variance for a sharp frame
pub const SHARP_THRESHOLD: f64 = 100.0;

/// Laplacian variance for a usable frame
pub const ACCEPTABLE_THRESHOLD: f64 = 50.0;

/// Default tolerance for the level indicator (degrees)
pub const DEFAULT_LEVEL_TOLERANCE_DEG: f64 = 2.0;

/// Meters to centimeters, rounded to the millimeter
pub fn distance_cm(meters: f64) -> f64 {
    (meters * 1000.0).round() / 10.0
}

/// Mean luminance (0-255) as a percentage
pub fn brightness_percent(brightness: f64) -> f64 {
    (brightness / 255.0 * 100.0).clamp(0.0, 100.0)
}

/// Signal strength class of a TF-Luna reading
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalQuality {
    Unreliable,
    Weak,
    Good,
    Saturated,
}

impl SignalQuality {
    pub fn classify(amplitude: u32) -> Self {
        if amplitude >= SATURATED_SIGNAL {
            SignalQuality::Saturated
        } else if amplitude < MIN_RELIABLE_SIGNAL {
            SignalQuality::Unreliable
        } else if amplitude < GOOD_SIGNAL {
            SignalQuality::Weak
        } else {
            SignalQuality::Good
        }
    }

    /// Whether the distance accompanying this signal can be used
    pub fn is_usable(self) -> bool {
        matches!(self, SignalQuality::Weak | SignalQuality::Good)
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SignalQuality::Unreliable => "unreliable",
            SignalQuality::Weak => "weak",
            SignalQuality::Good => "good",
            SignalQuality::Saturated => "saturated",
        })
    }
}

/// Focus class of an IMX477 frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageQuality {
    Sharp,
    Acceptable,
    Blurry,
}

impl ImageQuality {
    pub fn classify(sharpness: f64) -> Self {
        if sharpness >= SHARP_THRESHOLD {
            ImageQuality::Sharp
        } else if sharpness >= ACCEPTABLE_THRESHOLD {
            ImageQuality::Acceptable
        } else {
            ImageQuality::Blurry
        }
    }
}

impl fmt::Display for ImageQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ImageQuality::Sharp => "sharp",
            ImageQuality::Acceptable => "acceptable",
            ImageQuality::Blurry => "blurry",
        })
    }
}

/// Whether the device is resting level
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LevelStatus {
    Level,
    /// Largest of |roll| and |pitch|, in degrees
    Tilted(f64),
}

impl LevelStatus {
    pub fn classify(roll: f64, pitch: f64, tolerance_deg: f64) -> Self {
        let tilt = roll.abs().max(pitch.abs());
        if tilt <= tolerance_deg {
            LevelStatus::Level
        } else {
            LevelStatus::Tilted(tilt)
        }
    }
}

impl fmt::Display for LevelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LevelStatus::Level => f.write_str("level"),
            LevelStatus::Tilted(deg) => write!(f, "tilted {:.1}°", deg),
        }
    }
}

/// Distance reading in display units
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceView {
    pub distance_cm: f64,
    pub signal: SignalQuality,
    pub temperature_c: f64,
}

impl From<&DistanceReading> for DistanceView {
    fn from(r: &DistanceReading) -> Self {
        Self {
            distance_cm: distance_cm(r.distance_m),
            signal: SignalQuality::classify(r.signal_strength),
            temperature_c: r.temperature_c,
        }
    }
}

/// Camera metrics in display units
#[derive(Debug, Clone, PartialEq)]
pub struct CameraView {
    pub quality: ImageQuality,
    pub brightness_percent: f64,
    pub contrast: f64,
}

impl From<&CameraQuality> for CameraView {
    fn from(c: &CameraQuality) -> Self {
        Self {
            quality: ImageQuality::classify(c.sharpness),
            brightness_percent: brightness_percent(c.brightness),
            contrast: c.contrast,
        }
    }
}

/// Orientation with level indicator
#[derive(Debug, Clone, PartialEq)]
pub struct OrientationView {
    pub roll: f64,
    pub pitch: f64,
    pub heading: f64,
    pub level: LevelStatus,
}

impl From<&Orientation> for OrientationView {
    fn from(o: &Orientation) -> Self {
        Self {
            roll: o.roll,
            pitch: o.pitch,
            heading: o.yaw.rem_euclid(360.0),
            level: LevelStatus::classify(o.roll, o.pitch, DEFAULT_LEVEL_TOLERANCE_DEG),
        }
    }
}
