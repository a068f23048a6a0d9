use bytes::{BufMut, Bytes, BytesMut};

use crate::checksum::checksum;

pub mod constants {
    /// Frame start marker as it appears on the wire.
    pub const STX: [u8; 2] = [0x55, 0x66];
    /// [STX] read as a little-endian u16.
    pub const STX_LE: u16 = 0x6655;

    pub const CTRL_NEED_ACK: u8 = 0x01;

    pub const CMD_CENTER: u8 = 0x08;
    pub const CMD_REQUEST_ATTITUDE: u8 = 0x0D;
    pub const CMD_SET_ATTITUDE: u8 = 0x0E;

    /// Payload byte the device expects after [CMD_CENTER] to execute it.
    pub const CENTER_EXECUTE: u8 = 0x01;

    /// STX, ctrl, length, sequence and command id.
    pub const HEADER_LEN: usize = 8;
    pub const CHECKSUM_LEN: usize = 2;

    pub const ATTITUDE_PAYLOAD_LEN: usize = 12;
    pub const ATTITUDE_FRAME_LEN: usize = HEADER_LEN + ATTITUDE_PAYLOAD_LEN + CHECKSUM_LEN;

    /// Upper bound on a declared payload length before the decoder gives up on
    /// a candidate STX and resynchronizes.
    pub const MAX_PAYLOAD_LEN: usize = 0xFF;
}

use constants::*;

/// Angle in degrees to the device's tenths-of-a-degree wire unit.
pub fn encode_angle(degrees: f64) -> i16 {
    (degrees * 10.0).round() as i16
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OutgoingCommand {
    /// Absolute yaw/pitch target in degrees.
    SetAttitude { yaw: f64, pitch: f64 },
    /// One-key recenter.
    Center,
    RequestAttitude,
}

impl OutgoingCommand {
    pub fn command_id(&self) -> u8 {
        use OutgoingCommand::*;
        match self {
            SetAttitude { .. } => CMD_SET_ATTITUDE,
            Center => CMD_CENTER,
            RequestAttitude => CMD_REQUEST_ATTITUDE,
        }
    }

    pub fn to_payload_bytes(&self) -> Bytes {
        use OutgoingCommand::*;
        match self {
            SetAttitude { yaw, pitch } => {
                let mut buf = BytesMut::with_capacity(4);
                buf.put_i16_le(encode_angle(*yaw));
                buf.put_i16_le(encode_angle(*pitch));
                buf.freeze()
            }
            Center => Bytes::from_static(&[CENTER_EXECUTE]),
            RequestAttitude => Bytes::default(),
        }
    }

    /// Whether the device answers this command with a frame of its own.
    pub fn expects_reply(&self) -> bool {
        matches!(self, OutgoingCommand::RequestAttitude)
    }

    /// Complete frame, checksum included.
    pub fn to_bytes(&self) -> Bytes {
        build_frame(CTRL_NEED_ACK, 0, self.command_id(), &self.to_payload_bytes())
    }
}

pub(crate) fn build_frame(ctrl: u8, seq: u16, cmd_id: u8, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_LEN + payload.len() + CHECKSUM_LEN);

    buf.put_slice(&STX);
    buf.put_u8(ctrl);
    buf.put_u16_le(payload.len() as u16);
    buf.put_u16_le(seq);
    buf.put_u8(cmd_id);
    buf.put_slice(payload);

    let crc = checksum(&buf[..]);
    buf.put_u16_le(crc);

    buf.freeze()
}
