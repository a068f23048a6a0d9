/// One value per gimbal axis, in the order the device reports them.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct YawPitchRoll<T> {
    pub yaw: T,
    pub pitch: T,
    pub roll: T,
}

impl<T> From<YawPitchRoll<T>> for (T, T, T) {
    fn from(val: YawPitchRoll<T>) -> Self {
        (val.yaw, val.pitch, val.roll)
    }
}
