pub mod controller;
pub mod correction;

pub use controller::{
    attitude_sample, ControlError, ControllerHandle, ControllerInputs, PointingController,
};
pub use correction::{jog_target, pixel_to_angle_delta, plan_correction, Correction};
