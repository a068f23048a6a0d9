use gimbal_core::{
    ControllerConfig, FloatType, GimbalAngles, JogDirection, Limits, PixelPoint, TargetHint,
};

/// Outcome of one auto-tracking correction cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Correction {
    /// No target position is known.
    TargetLost,
    /// Target is inside the dead zone.
    Centered,
    /// Clamping (or a zero offset) leaves the angles where they are.
    Unchanged,
    /// New angles in the controller's frame.
    Move(GimbalAngles),
}

/// Pixel offset of the target from the frame center.
pub fn pixel_offset(target: PixelPoint, cfg: &ControllerConfig) -> (FloatType, FloatType) {
    let center = cfg.frame_center();
    (target.x - center.x, target.y - center.y)
}

/// Angle change that would bring the target to the frame center. Image y
/// grows downwards, so both axes are inverted.
pub fn pixel_to_angle_delta(dx: FloatType, dy: FloatType, cfg: &ControllerConfig) -> GimbalAngles {
    let (alpha_x, alpha_y) = cfg.gains();
    GimbalAngles::new(-dx * alpha_x, -dy * alpha_y)
}

pub fn plan_correction(
    current: GimbalAngles,
    target: TargetHint,
    cfg: &ControllerConfig,
) -> Correction {
    let Some(target) = target else {
        return Correction::TargetLost;
    };

    let (dx, dy) = pixel_offset(target, cfg);
    if let Some(dead_zone) = cfg.dead_zone_px {
        if dx.abs() < dead_zone && dy.abs() < dead_zone {
            return Correction::Centered;
        }
    }

    let delta = pixel_to_angle_delta(dx, dy, cfg);
    let new = cfg.limits.clamp(GimbalAngles::new(
        current.yaw + delta.yaw,
        current.pitch + delta.pitch,
    ));

    if new == current {
        Correction::Unchanged
    } else {
        Correction::Move(new)
    }
}

/// Angles after one jog step, clamped silently to the travel range.
pub fn jog_target(
    current: GimbalAngles,
    direction: JogDirection,
    step: FloatType,
    limits: &Limits,
) -> GimbalAngles {
    let d = direction.step(step);
    limits.clamp(GimbalAngles::new(current.yaw + d.yaw, current.pitch + d.pitch))
}
