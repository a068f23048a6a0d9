use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    Axis, AxisRange, FloatType, Limits, PixelPoint, FRAME_HEIGHT_PX, FRAME_WIDTH_PX, HFOV_DEG,
    VFOV_DEG,
};

pub const DEFAULT_PORT_PATH: &str = "/dev/ttyUSB0";
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("{name} must be a finite positive number, got {value}")]
    NotPositive { name: &'static str, value: FloatType },
    #[error("{axis} limits [{low}, {high}] must be finite with low <= high")]
    BadLimits {
        axis: Axis,
        low: FloatType,
        high: FloatType,
    },
}

fn non_zero(name: &'static str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::Zero { name });
    }
    Ok(())
}

fn positive(name: &'static str, value: FloatType) -> Result<(), ConfigError> {
    if !(value.is_finite() && value > 0.0) {
        return Err(ConfigError::NotPositive { name, value });
    }
    Ok(())
}

fn valid_range(axis: Axis, range: &AxisRange) -> Result<(), ConfigError> {
    if !(range.low.is_finite() && range.high.is_finite() && range.low <= range.high) {
        return Err(ConfigError::BadLimits {
            axis,
            low: range.low,
            high: range.high,
        });
    }
    Ok(())
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone, Default)]
#[serde(deny_unknown_fields, default)]
pub struct GimbalTrackConfig {
    pub serial: SerialConfig,
    pub controller: ControllerConfig,
    /// Read the attitude back at this period in the background.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attitude_poll_ms: Option<u64>,
}

impl GimbalTrackConfig {
    /// Rejects values that parse but cannot drive the gimbal.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;
        if let Some(ms) = self.attitude_poll_ms {
            non_zero("attitude_poll_ms", ms)?;
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct SerialConfig {
    pub port_path: String,
    pub baud_rate: u32,
    /// Deadline for a complete attitude report.
    pub read_timeout_ms: u64,
    /// Read a reply after every command that does not otherwise expect one.
    pub wait_for_ack: bool,
    pub ack_len: usize,
    pub ack_timeout_ms: u64,
    /// Fail attitude reads on checksum mismatch instead of logging it.
    pub strict_checksum: bool,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_path: DEFAULT_PORT_PATH.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: 2000,
            wait_for_ack: false,
            ack_len: 10,
            ack_timeout_ms: 200,
            strict_checksum: false,
        }
    }
}

/// What the correction cycle does when the target is not visible.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize, Clone, Copy, Default)]
pub enum LostTargetPolicy {
    /// Recenter the gimbal. Selection and angle state are kept.
    #[default]
    Home,
    /// Send nothing.
    Hold,
}

#[derive(Debug, PartialEq, Serialize, Deserialize, Clone)]
#[serde(deny_unknown_fields, default)]
pub struct ControllerConfig {
    pub limits: Limits,
    pub jog_step_deg: FloatType,
    pub jog_period_ms: u64,
    pub track_period_ms: u64,
    pub frame_width: u32,
    pub frame_height: u32,
    pub hfov_deg: FloatType,
    pub vfov_deg: FloatType,
    /// No correction while the target is closer than this to the frame
    /// center on both axes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dead_zone_px: Option<FloatType>,
    pub on_target_lost: LostTargetPolicy,
    /// Command (0, 0) when the controller starts.
    pub center_on_start: bool,
    /// Seed the angle state from an attitude read when the controller starts.
    pub sync_attitude_on_start: bool,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            jog_step_deg: 5.0,
            jog_period_ms: 100,
            track_period_ms: 2000,
            frame_width: FRAME_WIDTH_PX,
            frame_height: FRAME_HEIGHT_PX,
            hfov_deg: HFOV_DEG,
            vfov_deg: VFOV_DEG,
            dead_zone_px: None,
            on_target_lost: LostTargetPolicy::Home,
            center_on_start: true,
            sync_attitude_on_start: false,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        valid_range(Axis::Yaw, &self.limits.yaw)?;
        valid_range(Axis::Pitch, &self.limits.pitch)?;
        positive("jog_step_deg", self.jog_step_deg)?;
        non_zero("jog_period_ms", self.jog_period_ms)?;
        non_zero("track_period_ms", self.track_period_ms)?;
        non_zero("frame_width", self.frame_width.into())?;
        non_zero("frame_height", self.frame_height.into())?;
        positive("hfov_deg", self.hfov_deg)?;
        positive("vfov_deg", self.vfov_deg)?;
        if let Some(dead_zone) = self.dead_zone_px {
            positive("dead_zone_px", dead_zone)?;
        }
        Ok(())
    }

    /// Degrees per pixel on each axis.
    pub fn gains(&self) -> (FloatType, FloatType) {
        (
            self.hfov_deg / FloatType::from(self.frame_width),
            self.vfov_deg / FloatType::from(self.frame_height),
        )
    }

    pub fn frame_center(&self) -> PixelPoint {
        PixelPoint::new(
            FloatType::from(self.frame_width) / 2.0,
            FloatType::from(self.frame_height) / 2.0,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn empty_yaml_is_default() -> eyre::Result<()> {
        let cfg: GimbalTrackConfig = serde_yaml::from_str("{}")?;
        assert_eq!(cfg, GimbalTrackConfig::default());
        assert_eq!(cfg.serial.port_path, "/dev/ttyUSB0");
        assert_eq!(cfg.controller.track_period_ms, 2000);
        Ok(())
    }

    #[test]
    fn partial_yaml() -> eyre::Result<()> {
        let buf = r#"
serial:
  port_path: /dev/ttyACM3
  strict_checksum: true
controller:
  dead_zone_px: 30
  on_target_lost: Hold
attitude_poll_ms: 500
"#;
        let cfg: GimbalTrackConfig = serde_yaml::from_str(buf)?;
        assert_eq!(cfg.serial.port_path, "/dev/ttyACM3");
        assert!(cfg.serial.strict_checksum);
        assert_eq!(cfg.serial.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(cfg.controller.dead_zone_px, Some(30.0));
        assert_eq!(cfg.controller.on_target_lost, LostTargetPolicy::Hold);
        assert_eq!(cfg.attitude_poll_ms, Some(500));
        Ok(())
    }

    #[test]
    fn unknown_fields_rejected() {
        let res: Result<GimbalTrackConfig, _> = serde_yaml::from_str("serial:\n  prot_path: x\n");
        assert!(res.is_err());
    }

    #[test]
    fn defaults_are_valid() {
        assert_eq!(GimbalTrackConfig::default().validate(), Ok(()));
    }

    #[test]
    fn zero_periods_rejected() -> eyre::Result<()> {
        for (buf, name) in [
            ("controller:\n  jog_period_ms: 0\n", "jog_period_ms"),
            ("controller:\n  track_period_ms: 0\n", "track_period_ms"),
            ("attitude_poll_ms: 0\n", "attitude_poll_ms"),
            ("controller:\n  frame_width: 0\n", "frame_width"),
        ] {
            let cfg: GimbalTrackConfig = serde_yaml::from_str(buf)?;
            assert_eq!(cfg.validate(), Err(ConfigError::Zero { name }));
        }
        Ok(())
    }

    #[test]
    fn inverted_limits_rejected() -> eyre::Result<()> {
        let buf = r#"
controller:
  limits:
    yaw: {low: 10.0, high: -10.0}
    pitch: {low: -90.0, high: 25.0}
"#;
        let cfg: GimbalTrackConfig = serde_yaml::from_str(buf)?;
        let err = cfg.validate().unwrap_err();
        assert_eq!(
            err,
            ConfigError::BadLimits {
                axis: Axis::Yaw,
                low: 10.0,
                high: -10.0
            }
        );
        assert_eq!(
            err.to_string(),
            "yaw limits [10, -10] must be finite with low <= high"
        );
        Ok(())
    }

    #[test]
    fn bad_optics_rejected() {
        let cfg = ControllerConfig {
            hfov_deg: 0.0,
            ..Default::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::NotPositive {
                name: "hfov_deg",
                ..
            })
        ));
        let cfg = ControllerConfig {
            dead_zone_px: Some(FloatType::NAN),
            ..Default::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn default_gains() {
        let (ax, ay) = ControllerConfig::default().gains();
        assert_relative_eq!(ax, 81.0 / 1920.0);
        assert_relative_eq!(ay, 62.1 / 1080.0);
        let c = ControllerConfig::default().frame_center();
        assert_eq!(c, PixelPoint::new(960.0, 540.0));
    }

    #[test]
    fn yaml_roundtrip() -> eyre::Result<()> {
        let mut cfg = GimbalTrackConfig::default();
        cfg.controller.dead_zone_px = Some(12.5);
        let buf = serde_yaml::to_string(&cfg)?;
        let back: GimbalTrackConfig = serde_yaml::from_str(&buf)?;
        assert_eq!(back, cfg);
        Ok(())
    }
}
