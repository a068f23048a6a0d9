use bytes::{buf::Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use gimbal_core::{OperatorCommand, StatusEvent};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("serde JSON error {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("io error {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON representation contained newline")]
    NewlineInData,
}

// -------------------------

/// JSON Lines text format, also called newline-delimited JSON.
///
/// Lines that do not parse are logged and skipped so one typo does not end
/// the input stream.
#[derive(Default)]
pub struct JsonLinesCodec {}

impl JsonLinesCodec {
    pub fn new() -> Self {
        Self {}
    }

    fn parse_line(line: &[u8]) -> Option<OperatorCommand> {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        match serde_json::from_slice(line) {
            Ok(msg) => Some(msg),
            Err(e) => {
                tracing::warn!(
                    "ignoring operator input {:?}: {e}",
                    String::from_utf8_lossy(line)
                );
                None
            }
        }
    }
}

impl Decoder for JsonLinesCodec {
    type Item = OperatorCommand;
    type Error = Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        while let Some(pos) = memchr::memchr(b'\n', &buf[..]) {
            let line = buf.split_to(pos + 1);
            if let Some(msg) = Self::parse_line(&line[..pos]) {
                return Ok(Some(msg));
            }
        }
        Ok(None)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(msg) = self.decode(buf)? {
            return Ok(Some(msg));
        }
        // final line without a newline
        let rest = buf.split_to(buf.remaining());
        Ok(Self::parse_line(&rest[..]))
    }
}

// We encode `T` and not `&T` because we do not want to deal with
// the lifetime issues (this is used in async contexts.)
impl Encoder<StatusEvent> for JsonLinesCodec {
    type Error = Error;
    fn encode(
        &mut self,
        msg: StatusEvent,
        final_buf: &mut bytes::BytesMut,
    ) -> Result<(), Self::Error> {
        let mut v = serde_json::to_vec(&msg)?;
        if memchr::memchr2(b'\n', b'\r', &v).is_some() {
            return Err(Error::NewlineInData);
        }
        v.push(b'\n');
        final_buf.extend_from_slice(v.as_slice());
        Ok(())
    }
}
