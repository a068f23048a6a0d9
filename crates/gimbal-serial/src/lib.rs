use bytes::{Bytes, BytesMut};
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::Mutex,
    time::{timeout_at, Instant},
};
use tokio_serial::{SerialPortBuilderExt, SerialStream};
use tokio_util::codec::Decoder;

use gimbal_core::SerialConfig;
use gimbal_proto::{
    constants::{ATTITUDE_FRAME_LEN, ATTITUDE_PAYLOAD_LEN, CMD_REQUEST_ATTITUDE},
    AttitudeReport, FrameCodec, FrameError, OutgoingCommand,
};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("failed to open serial device {path}: {reason}")]
    Open { path: String, reason: String },
    #[error("timed out after receiving {received} of {expected} bytes")]
    Timeout { expected: usize, received: usize },
    #[error("no acknowledgement for command {cmd_id:#04X}")]
    NoAck { cmd_id: u8 },
    #[error("serial channel closed")]
    Closed,
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error("there was an IO error")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub read_timeout: Duration,
    pub wait_for_ack: bool,
    pub ack_len: usize,
    pub ack_timeout: Duration,
    pub strict_checksum: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::from(&SerialConfig::default())
    }
}

impl From<&SerialConfig> for TransportConfig {
    fn from(cfg: &SerialConfig) -> Self {
        Self {
            read_timeout: Duration::from_millis(cfg.read_timeout_ms),
            wait_for_ack: cfg.wait_for_ack,
            ack_len: cfg.ack_len,
            ack_timeout: Duration::from_millis(cfg.ack_timeout_ms),
            strict_checksum: cfg.strict_checksum,
        }
    }
}

struct Channel<P> {
    io: P,
    rx_buf: BytesMut,
    codec: FrameCodec,
}

impl<P: AsyncRead + AsyncWrite + Unpin> Channel<P> {
    async fn write_frame(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        tracing::trace!("tx {}", hex::encode(bytes));
        self.io.write_all(bytes).await?;
        self.io.flush().await?;
        Ok(())
    }

    /// Reads more bytes into `rx_buf`. Returns the number read, or `None` if
    /// the deadline passed first.
    async fn fill(&mut self, deadline: Instant) -> Result<Option<usize>, TransportError> {
        self.rx_buf.reserve(64);
        match timeout_at(deadline, self.io.read_buf(&mut self.rx_buf)).await {
            Ok(Ok(0)) => Err(TransportError::Closed),
            Ok(Ok(n)) => Ok(Some(n)),
            Ok(Err(e)) => Err(e.into()),
            Err(_elapsed) => Ok(None),
        }
    }

    async fn read_exact_until(&mut self, n: usize, deadline: Instant) -> Result<Bytes, TransportError> {
        while self.rx_buf.len() < n {
            if self.fill(deadline).await?.is_none() {
                return Err(TransportError::Timeout {
                    expected: n,
                    received: self.rx_buf.len(),
                });
            }
        }
        Ok(self.rx_buf.split_to(n).freeze())
    }

    /// Drops buffered input and whatever the channel already holds, such as a
    /// late reply to an earlier request that timed out.
    async fn discard_input(&mut self) -> Result<(), TransportError> {
        loop {
            self.rx_buf.reserve(64);
            match timeout_at(Instant::now(), self.io.read_buf(&mut self.rx_buf)).await {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e.into()),
            }
        }
        if !self.rx_buf.is_empty() {
            tracing::debug!("discarding stale input {}", hex::encode(&self.rx_buf));
            self.rx_buf.clear();
        }
        self.codec.reset();
        Ok(())
    }
}

/// Shared handle to the gimbal's serial channel.
///
/// Every exchange (a write plus whatever reply belongs to it) runs under one
/// lock, so clones of the transport never interleave bytes on the wire or
/// steal each other's replies.
pub struct Transport<P> {
    inner: Arc<Mutex<Channel<P>>>,
    cfg: TransportConfig,
}

impl<P> Clone for Transport<P> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            cfg: self.cfg.clone(),
        }
    }
}

pub type SerialTransport = Transport<SerialStream>;

impl Transport<SerialStream> {
    pub fn open(cfg: &SerialConfig) -> Result<Self, TransportError> {
        let device = tokio_serial::new(&cfg.port_path, cfg.baud_rate)
            .open_native_async()
            .map_err(|e| TransportError::Open {
                path: cfg.port_path.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!("opened {} at {} baud", cfg.port_path, cfg.baud_rate);
        Ok(Self::new(device, cfg.into()))
    }
}

impl<P: AsyncRead + AsyncWrite + Unpin + Send> Transport<P> {
    pub fn new(io: P, cfg: TransportConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Channel {
                io,
                rx_buf: BytesMut::with_capacity(256),
                codec: FrameCodec::with_max_payload(ATTITUDE_PAYLOAD_LEN),
            })),
            cfg,
        }
    }

    pub async fn write_frame(&self, bytes: &[u8]) -> Result<(), TransportError> {
        let mut chan = self.inner.lock().await;
        chan.write_frame(bytes).await
    }

    pub async fn read_exact_within_timeout(
        &self,
        n: usize,
        timeout: Duration,
    ) -> Result<Bytes, TransportError> {
        let mut chan = self.inner.lock().await;
        chan.read_exact_until(n, Instant::now() + timeout).await
    }

    /// Sends a command that has no reply of its own. When ACKs are enabled,
    /// the ACK read happens under the same lock; a missing ACK is logged only.
    pub async fn send_command(&self, cmd: &OutgoingCommand) -> Result<(), TransportError> {
        let bytes = cmd.to_bytes();
        let mut chan = self.inner.lock().await;
        chan.write_frame(&bytes).await?;

        if !self.cfg.wait_for_ack || cmd.expects_reply() {
            return Ok(());
        }

        let deadline = Instant::now() + self.cfg.ack_timeout;
        match chan.read_exact_until(self.cfg.ack_len, deadline).await {
            Ok(ack) => {
                tracing::debug!("ack {}", hex::encode(&ack));
            }
            Err(TransportError::Timeout { .. }) => {
                let e = TransportError::NoAck {
                    cmd_id: cmd.command_id(),
                };
                tracing::warn!("{e}");
                chan.discard_input().await?;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Requests the current attitude and waits for the report.
    ///
    /// Input already received or still queued in the channel is discarded
    /// first. Frames other than attitude reports are skipped. If the deadline
    /// passes with nothing received this is a [TransportError::Timeout], with a
    /// partial frame received it is a length error.
    pub async fn request_attitude(&self) -> Result<AttitudeReport, TransportError> {
        let mut chan = self.inner.lock().await;
        chan.discard_input().await?;

        let deadline = Instant::now() + self.cfg.read_timeout;
        chan.write_frame(&OutgoingCommand::RequestAttitude.to_bytes())
            .await?;

        let mut received = 0;
        loop {
            let Channel { rx_buf, codec, .. } = &mut *chan;
            if let Some(frame) = codec.decode(rx_buf)? {
                if frame.cmd_id != CMD_REQUEST_ATTITUDE {
                    tracing::debug!(
                        "skipping frame {:#04X} while waiting for attitude: {}",
                        frame.cmd_id,
                        hex::encode(&frame.bytes)
                    );
                    continue;
                }
                let report = AttitudeReport::from_bytes(&frame.bytes).map_err(|e| {
                    tracing::warn!("bad attitude frame {}: {e}", hex::encode(&frame.bytes));
                    e
                })?;
                if let Some(e) = report.checksum_error() {
                    if self.cfg.strict_checksum {
                        return Err(e.into());
                    }
                    tracing::warn!("{e}");
                }
                return Ok(report);
            }

            match chan.fill(deadline).await? {
                Some(n) => received += n,
                None if received == 0 => {
                    return Err(TransportError::Timeout {
                        expected: ATTITUDE_FRAME_LEN,
                        received,
                    })
                }
                None => {
                    tracing::warn!(
                        "incomplete attitude frame: {}",
                        hex::encode(&chan.rx_buf)
                    );
                    return Err(FrameError::Length {
                        expected: ATTITUDE_FRAME_LEN,
                        actual: received,
                    }
                    .into());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use gimbal_proto::{encode_attitude_frame, RawFrame, YawPitchRoll};
    use tokio::io::DuplexStream;
    use tokio_util::codec::FramedRead;

    fn test_config() -> TransportConfig {
        TransportConfig {
            read_timeout: Duration::from_millis(200),
            wait_for_ack: false,
            ack_len: 10,
            ack_timeout: Duration::from_millis(50),
            strict_checksum: false,
        }
    }

    fn pair(cfg: TransportConfig) -> (Transport<DuplexStream>, DuplexStream) {
        let (host, device) = tokio::io::duplex(256);
        (Transport::new(host, cfg), device)
    }

    fn attitude(yaw: i16, pitch: i16) -> Bytes {
        encode_attitude_frame(
            YawPitchRoll {
                yaw,
                pitch,
                roll: 0,
            },
            YawPitchRoll::default(),
        )
    }

    async fn expect_request(device: &mut DuplexStream) -> eyre::Result<()> {
        let mut buf = [0u8; 10];
        device.read_exact(&mut buf).await?;
        assert_eq!(&buf[..], &OutgoingCommand::RequestAttitude.to_bytes()[..]);
        Ok(())
    }

    #[tokio::test]
    async fn writes_whole_frame() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        let cmd = OutgoingCommand::SetAttitude {
            yaw: 12.0,
            pitch: -3.5,
        };
        transport.send_command(&cmd).await?;

        let mut buf = vec![0u8; 14];
        device.read_exact(&mut buf).await?;
        assert_eq!(&buf[..], &cmd.to_bytes()[..]);
        Ok(())
    }

    #[tokio::test]
    async fn attitude_roundtrip_skips_other_frames() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());

        let dev = tokio::spawn(async move {
            expect_request(&mut device).await?;
            // line noise, then an unrelated frame, then the report split in two
            device.write_all(&[0x00, 0x13]).await?;
            device
                .write_all(&OutgoingCommand::Center.to_bytes())
                .await?;
            let report = attitude(450, 300);
            device.write_all(&report[..7]).await?;
            device.write_all(&report[7..]).await?;
            Ok::<_, eyre::Report>(device)
        });

        let report = transport.request_attitude().await?;
        assert_eq!(report.angles.yaw, 45.0);
        assert_eq!(report.angles.pitch, -150.0);
        assert!(report.checksum_ok());
        dev.await??;
        Ok(())
    }

    #[tokio::test]
    async fn attitude_timeout_without_data() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        let res = transport.request_attitude().await;
        assert!(matches!(
            res,
            Err(TransportError::Timeout {
                expected: 22,
                received: 0
            })
        ));
        expect_request(&mut device).await?;
        Ok(())
    }

    #[tokio::test]
    async fn attitude_partial_frame_is_length_error() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        let dev = tokio::spawn(async move {
            expect_request(&mut device).await?;
            device.write_all(&attitude(0, 0)[..5]).await?;
            Ok::<_, eyre::Report>(device)
        });
        let res = transport.request_attitude().await;
        assert!(matches!(
            res,
            Err(TransportError::Frame(FrameError::Length {
                expected: 22,
                actual: 5
            }))
        ));
        dev.await??;
        Ok(())
    }

    #[tokio::test]
    async fn checksum_mismatch_tolerated_unless_strict() -> eyre::Result<()> {
        for strict in [false, true] {
            let cfg = TransportConfig {
                strict_checksum: strict,
                ..test_config()
            };
            let (transport, mut device) = pair(cfg);
            let dev = tokio::spawn(async move {
                expect_request(&mut device).await?;
                let mut report = attitude(100, 0).to_vec();
                report[21] ^= 0xFF;
                device.write_all(&report).await?;
                Ok::<_, eyre::Report>(device)
            });
            let res = transport.request_attitude().await;
            if strict {
                assert!(matches!(
                    res,
                    Err(TransportError::Frame(FrameError::ChecksumMismatch { .. }))
                ));
            } else {
                let report = res?;
                assert_eq!(report.angles.yaw, 10.0);
                assert!(!report.checksum_ok());
            }
            dev.await??;
        }
        Ok(())
    }

    #[tokio::test]
    async fn stale_input_does_not_poison_attitude_read() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        // a late ack left over from an earlier exchange
        device.write_all(&[0x55, 0x66, 0x02, 0x01]).await?;
        transport
            .read_exact_within_timeout(1, Duration::from_millis(50))
            .await?;

        let dev = tokio::spawn(async move {
            expect_request(&mut device).await?;
            device.write_all(&attitude(-10, -900)).await?;
            Ok::<_, eyre::Report>(device)
        });
        let report = transport.request_attitude().await?;
        assert_eq!(report.angles.yaw, -1.0);
        assert_eq!(report.angles.pitch, 90.0);
        dev.await??;
        Ok(())
    }

    #[tokio::test]
    async fn late_report_is_not_taken_as_the_next_reply() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        let res = transport.request_attitude().await;
        assert!(matches!(res, Err(TransportError::Timeout { .. })));

        // the device answers the first request only after it timed out
        device.write_all(&attitude(111, 0)).await?;

        let dev = tokio::spawn(async move {
            expect_request(&mut device).await?;
            expect_request(&mut device).await?;
            device.write_all(&attitude(222, 0)).await?;
            Ok::<_, eyre::Report>(device)
        });
        let report = transport.request_attitude().await?;
        assert_eq!(report.angles.yaw, 22.2);
        dev.await??;
        Ok(())
    }

    #[tokio::test]
    async fn noise_with_plausible_header_does_not_swallow_report() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        let dev = tokio::spawn(async move {
            expect_request(&mut device).await?;
            device
                .write_all(&[0x55, 0x66, 0x01, 0x40, 0x00, 0x00, 0x00, 0x0D])
                .await?;
            device.write_all(&attitude(-50, 0)).await?;
            Ok::<_, eyre::Report>(device)
        });
        let report = transport.request_attitude().await?;
        assert_eq!(report.angles.yaw, -5.0);
        dev.await??;
        Ok(())
    }

    #[tokio::test]
    async fn ack_is_read_when_enabled() -> eyre::Result<()> {
        let cfg = TransportConfig {
            wait_for_ack: true,
            ..test_config()
        };
        let (transport, mut device) = pair(cfg);
        let ack = [0xAAu8; 10];
        device.write_all(&ack).await?;
        transport.send_command(&OutgoingCommand::Center).await?;

        // ack consumed, nothing left to read
        let res = transport
            .read_exact_within_timeout(1, Duration::from_millis(20))
            .await;
        assert!(matches!(
            res,
            Err(TransportError::Timeout {
                expected: 1,
                received: 0
            })
        ));

        let mut buf = [0u8; 11];
        device.read_exact(&mut buf).await?;
        assert_eq!(&buf[..], &OutgoingCommand::Center.to_bytes()[..]);
        Ok(())
    }

    #[tokio::test]
    async fn missing_ack_is_not_an_error() -> eyre::Result<()> {
        let cfg = TransportConfig {
            wait_for_ack: true,
            ..test_config()
        };
        let (transport, _device) = pair(cfg);
        transport.send_command(&OutgoingCommand::Center).await?;
        Ok(())
    }

    #[tokio::test]
    async fn read_exact_within_timeout_reports_progress() -> eyre::Result<()> {
        let (transport, mut device) = pair(test_config());
        device.write_all(&[1, 2, 3]).await?;
        let res = transport
            .read_exact_within_timeout(4, Duration::from_millis(20))
            .await;
        assert!(matches!(
            res,
            Err(TransportError::Timeout {
                expected: 4,
                received: 3
            })
        ));
        device.write_all(&[4]).await?;
        let got = transport
            .read_exact_within_timeout(4, Duration::from_millis(20))
            .await?;
        assert_eq!(&got[..], &[1, 2, 3, 4]);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_senders_never_interleave() -> eyre::Result<()> {
        // a tiny pipe forces writes to be split across many polls
        let (host, device) = tokio::io::duplex(5);
        let transport = Transport::new(host, test_config());

        let reader = tokio::spawn(async move {
            let mut frames = FramedRead::new(device, FrameCodec::default());
            let mut out: Vec<RawFrame> = Vec::new();
            while out.len() < 100 {
                match frames.next().await {
                    Some(frame) => out.push(frame?),
                    None => break,
                }
            }
            Ok::<_, eyre::Report>(out)
        });

        let mut senders = Vec::new();
        for task in 0..2 {
            let transport = transport.clone();
            senders.push(tokio::spawn(async move {
                for i in 0..50 {
                    let cmd = if task == 0 {
                        OutgoingCommand::SetAttitude {
                            yaw: i as f64,
                            pitch: 0.0,
                        }
                    } else {
                        OutgoingCommand::SetAttitude {
                            yaw: 0.0,
                            pitch: -(i as f64),
                        }
                    };
                    transport.send_command(&cmd).await?;
                }
                Ok::<_, TransportError>(())
            }));
        }
        for s in senders {
            s.await??;
        }

        let frames = reader.await??;
        assert_eq!(frames.len(), 100);
        assert!(frames.iter().all(|f| f.checksum_ok() && f.bytes.len() == 14));

        // each sender's frames arrive in the order they were sent
        let yaws: Vec<i16> = frames
            .iter()
            .map(|f| i16::from_le_bytes([f.payload[0], f.payload[1]]))
            .filter(|v| *v != 0)
            .collect();
        assert!(yaws.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(yaws.len(), 49);
        Ok(())
    }
}
