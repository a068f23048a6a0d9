use crate::{ControlMode, FloatType, GimbalAngles, JogDirection, PixelPoint, Track, TrackId};

use serde::{Deserialize, Serialize};

/// Message sent to the pointing controller by the operator or by the
/// detection pipeline.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub enum OperatorCommand {
    JogStart { direction: JogDirection },
    JogStop,
    /// ignored unless a target is selected
    StartTracking,
    StopTracking,
    Home,
    /// rejected if outside the travel range
    SetAngles { yaw: FloatType, pitch: FloatType },
    /// confirmed tracks of the latest video frame
    Tracks { tracks: Vec<Track> },
    Click { x: i32, y: i32 },
    /// raw target position, bypassing track selection
    Target(Option<PixelPoint>),
    SelectTrack { id: TrackId },
    /// read the attitude back from the gimbal
    Attitude,
}

/// One-way notifications from the controller.
#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub enum StatusEvent {
    TrackingStatus(bool),
    TargetSelected(bool),
    TargetInfo(String),
    ModeChanged { from: ControlMode, to: ControlMode },
    /// Angles in the controller's frame after a successful write.
    AnglesCommanded(GimbalAngles),
    Attitude(AttitudeSample),
    CommandFailed(String),
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
pub struct AttitudeSample {
    pub timestamp: chrono::DateTime<chrono::Local>,
    pub yaw: FloatType,
    pub pitch: FloatType,
    pub roll: FloatType,
    pub yaw_rate: i16,
    pub pitch_rate: i16,
    pub roll_rate: i16,
    pub checksum_ok: bool,
}
