use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod config;
pub use config::*;

pub mod events;
pub use events::*;

pub mod tracks;
pub use tracks::*;

pub type FloatType = f64;

/// Reference frame size of the tracking camera, in pixels.
pub const FRAME_WIDTH_PX: u32 = 1920;
pub const FRAME_HEIGHT_PX: u32 = 1080;

/// Camera field of view, in degrees.
pub const HFOV_DEG: FloatType = 81.0;
pub const VFOV_DEG: FloatType = 62.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    Yaw,
    Pitch,
}

impl std::fmt::Display for Axis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Axis::Yaw => write!(f, "yaw"),
            Axis::Pitch => write!(f, "pitch"),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
#[error("{axis} {value} outside travel range [{low}, {high}]")]
pub struct RangeError {
    pub axis: Axis,
    pub value: FloatType,
    pub low: FloatType,
    pub high: FloatType,
}

/// Inclusive travel range of one axis, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AxisRange {
    pub low: FloatType,
    pub high: FloatType,
}

impl AxisRange {
    pub const fn new(low: FloatType, high: FloatType) -> Self {
        Self { low, high }
    }

    pub fn clamp(&self, value: FloatType) -> FloatType {
        value.clamp(self.low, self.high)
    }

    pub fn contains(&self, value: FloatType) -> bool {
        self.low <= value && value <= self.high
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Limits {
    pub yaw: AxisRange,
    pub pitch: AxisRange,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            yaw: AxisRange::new(-135.0, 135.0),
            pitch: AxisRange::new(-90.0, 25.0),
        }
    }
}

impl Limits {
    pub fn range(&self, axis: Axis) -> &AxisRange {
        match axis {
            Axis::Yaw => &self.yaw,
            Axis::Pitch => &self.pitch,
        }
    }

    pub fn clamp(&self, angles: GimbalAngles) -> GimbalAngles {
        GimbalAngles {
            yaw: self.yaw.clamp(angles.yaw),
            pitch: self.pitch.clamp(angles.pitch),
        }
    }

    /// Rejects angles outside the travel range instead of clamping.
    pub fn check(&self, angles: GimbalAngles) -> Result<GimbalAngles, RangeError> {
        for (axis, value) in [(Axis::Yaw, angles.yaw), (Axis::Pitch, angles.pitch)] {
            let range = self.range(axis);
            if !range.contains(value) {
                return Err(RangeError {
                    axis,
                    value,
                    low: range.low,
                    high: range.high,
                });
            }
        }
        Ok(angles)
    }
}

/// Last commanded gimbal orientation, in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct GimbalAngles {
    pub yaw: FloatType,
    pub pitch: FloatType,
}

impl GimbalAngles {
    pub const ZERO: GimbalAngles = GimbalAngles {
        yaw: 0.0,
        pitch: 0.0,
    };

    pub fn new(yaw: FloatType, pitch: FloatType) -> Self {
        Self { yaw, pitch }
    }

    /// The sign convention the device expects for tracking corrections.
    pub fn negated(&self) -> Self {
        Self {
            yaw: -self.yaw,
            pitch: -self.pitch,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JogDirection {
    Up,
    Down,
    Left,
    Right,
}

impl JogDirection {
    /// Offset to apply for one jog step of `step` degrees.
    pub fn step(&self, step: FloatType) -> GimbalAngles {
        match self {
            JogDirection::Up => GimbalAngles::new(0.0, step),
            JogDirection::Down => GimbalAngles::new(0.0, -step),
            JogDirection::Left => GimbalAngles::new(-step, 0.0),
            JogDirection::Right => GimbalAngles::new(step, 0.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ControlMode {
    #[default]
    Idle,
    ManualJog,
    AutoTracking,
}

/// Pixel position in the tracking camera image. Origin is top left.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelPoint {
    pub x: FloatType,
    pub y: FloatType,
}

impl PixelPoint {
    pub fn new(x: FloatType, y: FloatType) -> Self {
        Self { x, y }
    }
}

/// Latest pixel position of the selected target, if it is visible.
pub type TargetHint = Option<PixelPoint>;
