use crate::checksum::checksum;
use crate::commands::{build_frame, constants::*};
use crate::{FrameError, YawPitchRoll};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Decoded attitude report. Angles are in degrees, rates are passed through as
/// reported.
#[derive(Clone, Debug, PartialEq)]
pub struct AttitudeReport {
    pub angles: YawPitchRoll<f64>,
    pub rates: YawPitchRoll<i16>,
    /// Checksum carried by the frame.
    pub checksum: u16,
    pub calculated_checksum: u16,
    pub raw: Bytes,
}

fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Scale a raw tenths-of-a-degree reading.
pub fn decode_angle(raw: i16) -> f64 {
    round1(raw as f64 / 10.0)
}

/// Pitch is reported relative to a wrap point at -90 degrees.
pub fn decode_pitch(raw: i16) -> f64 {
    if raw <= -900 {
        -round1(raw as f64 / 10.0)
    } else {
        round1(raw as f64 / 10.0 - 180.0)
    }
}

impl AttitudeReport {
    pub fn from_bytes(buf: &[u8]) -> Result<Self, FrameError> {
        if buf.len() < 2 {
            return Err(FrameError::Length {
                expected: ATTITUDE_FRAME_LEN,
                actual: buf.len(),
            });
        }

        let mut rdr = buf;
        let stx = rdr.get_u16_le();
        if stx != STX_LE {
            return Err(FrameError::Sync {
                expected: STX_LE,
                actual: stx,
            });
        }

        if buf.len() != ATTITUDE_FRAME_LEN {
            return Err(FrameError::Length {
                expected: ATTITUDE_FRAME_LEN,
                actual: buf.len(),
            });
        }

        let _ctrl = rdr.get_u8();
        let payload_len = rdr.get_u16_le() as usize;
        if payload_len != ATTITUDE_PAYLOAD_LEN {
            return Err(FrameError::Length {
                expected: ATTITUDE_PAYLOAD_LEN,
                actual: payload_len,
            });
        }
        let _seq = rdr.get_u16_le();
        let _cmd_id = rdr.get_u8();

        let raw_angles = YawPitchRoll {
            yaw: rdr.get_i16_le(),
            pitch: rdr.get_i16_le(),
            roll: rdr.get_i16_le(),
        };
        let rates = YawPitchRoll {
            yaw: rdr.get_i16_le(),
            pitch: rdr.get_i16_le(),
            roll: rdr.get_i16_le(),
        };
        let expected = rdr.get_u16_le();
        let calculated = checksum(&buf[..ATTITUDE_FRAME_LEN - CHECKSUM_LEN]);

        Ok(Self {
            angles: YawPitchRoll {
                yaw: decode_angle(raw_angles.yaw),
                pitch: decode_pitch(raw_angles.pitch),
                roll: decode_angle(raw_angles.roll),
            },
            rates,
            checksum: expected,
            calculated_checksum: calculated,
            raw: Bytes::copy_from_slice(buf),
        })
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.calculated_checksum
    }

    /// The mismatch as an error, if there is one.
    pub fn checksum_error(&self) -> Option<FrameError> {
        if self.checksum_ok() {
            None
        } else {
            Some(FrameError::ChecksumMismatch {
                expected: self.checksum,
                calculated: self.calculated_checksum,
                raw: hex::encode(&self.raw),
            })
        }
    }
}

/// Builds an attitude report frame from raw device readings, the way the
/// gimbal sends it.
pub fn encode_attitude_frame(angles: YawPitchRoll<i16>, rates: YawPitchRoll<i16>) -> Bytes {
    let mut payload = BytesMut::with_capacity(ATTITUDE_PAYLOAD_LEN);
    for v in [
        angles.yaw,
        angles.pitch,
        angles.roll,
        rates.yaw,
        rates.pitch,
        rates.roll,
    ] {
        payload.put_i16_le(v);
    }
    build_frame(0x02, 0, CMD_REQUEST_ATTITUDE, &payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use eyre::Result;

    fn frame(yaw: i16, pitch: i16, roll: i16) -> Bytes {
        encode_attitude_frame(
            YawPitchRoll { yaw, pitch, roll },
            YawPitchRoll {
                yaw: 3,
                pitch: -4,
                roll: 5,
            },
        )
    }

    #[test]
    fn decodes_report() -> Result<()> {
        let report = AttitudeReport::from_bytes(&frame(450, 300, -37))?;
        assert_relative_eq!(report.angles.yaw, 45.0);
        assert_relative_eq!(report.angles.pitch, -150.0);
        assert_relative_eq!(report.angles.roll, -3.7);
        assert_eq!(<(i16, i16, i16)>::from(report.rates), (3, -4, 5));
        assert!(report.checksum_ok());
        assert!(report.checksum_error().is_none());
        Ok(())
    }

    #[test]
    fn pitch_wrap_boundary() -> Result<()> {
        let at = AttitudeReport::from_bytes(&frame(0, -900, 0))?;
        assert_relative_eq!(at.angles.pitch, 90.0);

        let above = AttitudeReport::from_bytes(&frame(0, -899, 0))?;
        assert_relative_eq!(above.angles.pitch, -269.9, epsilon = 1e-9);

        let below = AttitudeReport::from_bytes(&frame(0, -1000, 0))?;
        assert_relative_eq!(below.angles.pitch, 100.0);
        Ok(())
    }

    #[test]
    fn rejects_bad_stx() {
        let mut bytes = frame(0, 0, 0).to_vec();
        bytes[0] = 0xAA;
        assert!(matches!(
            AttitudeReport::from_bytes(&bytes),
            Err(FrameError::Sync { .. })
        ));
    }

    #[test]
    fn rejects_bad_declared_length() {
        let mut bytes = frame(0, 0, 0).to_vec();
        bytes[3] = 0x0B;
        assert!(matches!(
            AttitudeReport::from_bytes(&bytes),
            Err(FrameError::Length {
                expected: 12,
                actual: 11
            })
        ));
    }

    #[test]
    fn rejects_short_buffer() {
        let bytes = frame(0, 0, 0);
        assert!(matches!(
            AttitudeReport::from_bytes(&bytes[..21]),
            Err(FrameError::Length {
                expected: 22,
                actual: 21
            })
        ));
    }

    #[test]
    fn checksum_mismatch_is_reported_not_rejected() -> Result<()> {
        let mut bytes = frame(100, 200, 300).to_vec();
        bytes[21] ^= 0x01;
        let report = AttitudeReport::from_bytes(&bytes)?;
        assert_relative_eq!(report.angles.yaw, 10.0);
        assert!(!report.checksum_ok());
        assert!(matches!(
            report.checksum_error(),
            Some(FrameError::ChecksumMismatch { .. })
        ));
        Ok(())
    }
}
