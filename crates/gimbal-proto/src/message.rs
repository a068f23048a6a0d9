use crate::checksum::checksum;
use crate::commands::constants::*;
use crate::OutgoingCommand;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("bad start marker, expected {expected:#06X}, got {actual:#06X}")]
    Sync { expected: u16, actual: u16 },
    #[error("bad frame length, expected {expected}, got {actual}")]
    Length { expected: usize, actual: usize },
    #[error("checksum mismatch, frame says {expected:#06X}, calculated {calculated:#06X} (raw: {raw})")]
    ChecksumMismatch {
        expected: u16,
        calculated: u16,
        raw: String,
    },
    #[error("there was an IO error")]
    IoError(std::io::Error),
}

impl From<std::io::Error> for FrameError {
    fn from(error: std::io::Error) -> Self {
        FrameError::IoError(error)
    }
}

/// One complete frame as read off the wire, not yet interpreted.
#[derive(Clone, Debug, PartialEq)]
pub struct RawFrame {
    pub ctrl: u8,
    pub seq: u16,
    pub cmd_id: u8,
    pub payload: Bytes,
    /// Checksum carried in the trailing two bytes.
    pub checksum: u16,
    /// The whole frame including STX and checksum.
    pub bytes: Bytes,
}

impl RawFrame {
    /// Parses a buffer holding exactly one frame.
    pub fn from_bytes(bytes: Bytes) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN + CHECKSUM_LEN {
            return Err(FrameError::Length {
                expected: HEADER_LEN + CHECKSUM_LEN,
                actual: bytes.len(),
            });
        }

        let mut buf = &bytes[..];
        let stx = buf.get_u16_le();
        if stx != STX_LE {
            return Err(FrameError::Sync {
                expected: STX_LE,
                actual: stx,
            });
        }
        let ctrl = buf.get_u8();
        let payload_len = buf.get_u16_le() as usize;
        let seq = buf.get_u16_le();
        let cmd_id = buf.get_u8();

        let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
        if bytes.len() != total {
            return Err(FrameError::Length {
                expected: total,
                actual: bytes.len(),
            });
        }

        let payload = bytes.slice(HEADER_LEN..HEADER_LEN + payload_len);
        let checksum = u16::from_le_bytes([bytes[total - 2], bytes[total - 1]]);

        Ok(Self {
            ctrl,
            seq,
            cmd_id,
            payload,
            checksum,
            bytes,
        })
    }

    pub fn calculated_checksum(&self) -> u16 {
        checksum(&self.bytes[..self.bytes.len() - CHECKSUM_LEN])
    }

    pub fn checksum_ok(&self) -> bool {
        self.checksum == self.calculated_checksum()
    }

    pub fn verify_checksum(&self) -> Result<(), FrameError> {
        let calculated = self.calculated_checksum();
        if calculated != self.checksum {
            return Err(FrameError::ChecksumMismatch {
                expected: self.checksum,
                calculated,
                raw: hex::encode(&self.bytes),
            });
        }
        Ok(())
    }
}

/// Splits a byte stream into frames.
///
/// Garbage before a start marker is discarded. A candidate start marker whose
/// declared payload length is implausible is skipped one byte at a time until
/// the stream resynchronizes. Checksums are not enforced here; callers decide
/// how strict to be via [RawFrame::verify_checksum].
pub struct FrameCodec {
    in_sync: bool,
    max_payload_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::with_max_payload(MAX_PAYLOAD_LEN)
    }
}

impl FrameCodec {
    /// Declared payload lengths above `max_payload_len` are treated as a false
    /// start marker in line noise.
    pub fn with_max_payload(max_payload_len: usize) -> Self {
        Self {
            in_sync: false,
            max_payload_len,
        }
    }

    pub fn reset(&mut self) {
        self.in_sync = false;
    }
}

fn find_stx(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == STX)
}

impl Decoder for FrameCodec {
    type Item = RawFrame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            match find_stx(&src[..]) {
                Some(0) => {}
                Some(i) => {
                    if self.in_sync {
                        tracing::debug!("lost sync, skipping {i} bytes");
                        self.in_sync = false;
                    }
                    src.advance(i);
                }
                None => {
                    // keep a trailing first STX byte, its partner may be in flight
                    let keep = usize::from(src.last() == Some(&STX[0]));
                    let n = src.len() - keep;
                    src.advance(n);
                    return Ok(None);
                }
            }

            if src.len() < HEADER_LEN {
                return Ok(None);
            }

            let payload_len = u16::from_le_bytes([src[3], src[4]]) as usize;
            if payload_len > self.max_payload_len {
                tracing::debug!("implausible payload length {payload_len}, resyncing");
                self.in_sync = false;
                src.advance(1);
                continue;
            }

            let total = HEADER_LEN + payload_len + CHECKSUM_LEN;
            if src.len() < total {
                return Ok(None);
            }

            let bytes = src.split_to(total).freeze();
            self.in_sync = true;
            return RawFrame::from_bytes(bytes).map(Some);
        }
    }
}

impl Encoder<OutgoingCommand> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, item: OutgoingCommand, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = item.to_bytes();
        dst.put_slice(&bytes[..]);
        Ok(())
    }
}
