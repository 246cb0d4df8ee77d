use bytes::BytesMut;
use dipc_transport::Transport;
use serde_json::Value;
use tracing::trace;

use crate::codec::{encode_frame, Frame, FrameConfig, HEADER_SIZE};
use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete frames to a [`Transport`].
///
/// Header and payload are encoded into one buffer and handed to
/// [`Transport::write_all`], so a frame is a single write unit. Callers that
/// share a writer across threads serialize access to it.
pub struct FrameWriter<T> {
    inner: T,
    buf: BytesMut,
    config: FrameConfig,
}

impl<T: Transport> FrameWriter<T> {
    /// Create a new frame writer with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame writer with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Write a complete frame (blocking).
    pub fn write_frame(&mut self, frame: &Frame) -> Result<()> {
        self.send(frame.opcode, &frame.payload)
    }

    /// Encode and send a payload with the given opcode.
    pub fn send(&mut self, opcode: Opcode, payload: &Value) -> Result<()> {
        self.buf.clear();
        encode_frame(opcode, payload, &mut self.buf)?;

        let body_len = self.buf.len() - HEADER_SIZE;
        if body_len > self.config.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size: body_len,
                max: self.config.max_payload_size,
            });
        }

        self.inner.write_all(&self.buf)?;
        trace!(%opcode, len = body_len, "frame sent");
        Ok(())
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the writer and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame writer configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use serde_json::json;

    use super::*;
    use crate::codec::{decode_frame, DEFAULT_MAX_PAYLOAD};

    /// Collects written bytes, accepting at most `chunk` per call.
    struct CaptureTransport {
        written: Mutex<Vec<u8>>,
        chunk: usize,
        broken: AtomicBool,
    }

    impl CaptureTransport {
        fn new(chunk: usize) -> Self {
            Self {
                written: Mutex::new(Vec::new()),
                chunk,
                broken: AtomicBool::new(false),
            }
        }

        fn wire(&self) -> BytesMut {
            BytesMut::from(self.written.lock().unwrap().as_slice())
        }
    }

    impl Transport for CaptureTransport {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            if self.broken.load(Ordering::Relaxed) {
                return Err(std::io::Error::from(std::io::ErrorKind::BrokenPipe));
            }
            let n = buf.len().min(self.chunk);
            self.written.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(&self) {
            self.broken.store(true, Ordering::Relaxed);
        }

        fn endpoint(&self) -> &Path {
            Path::new("capture")
        }
    }

    #[test]
    fn write_single_frame() {
        let mut writer = FrameWriter::new(CaptureTransport::new(usize::MAX));
        writer
            .send(Opcode::Handshake, &json!({"v": 1, "client_id": "123"}))
            .unwrap();

        let mut wire = writer.get_ref().wire();
        let frame = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD)
            .unwrap()
            .unwrap();
        assert_eq!(frame.opcode, Opcode::Handshake);
        assert_eq!(frame.payload, json!({"v": 1, "client_id": "123"}));
    }

    #[test]
    fn short_writes_still_deliver_whole_frames() {
        let mut writer = FrameWriter::new(CaptureTransport::new(3));
        let frames = [
            Frame::new(Opcode::Frame, json!({"cmd": "SET_ACTIVITY", "nonce": "1"})),
            Frame::new(Opcode::Close, json!({})),
        ];
        for frame in &frames {
            writer.write_frame(frame).unwrap();
        }

        let mut wire = writer.get_ref().wire();
        for expected in &frames {
            let frame = decode_frame(&mut wire, DEFAULT_MAX_PAYLOAD)
                .unwrap()
                .unwrap();
            assert_eq!(&frame, expected);
        }
        assert!(wire.is_empty());
    }

    #[test]
    fn rejects_payload_over_configured_max() {
        let cfg = FrameConfig {
            max_payload_size: 8,
        };
        let mut writer = FrameWriter::with_config(CaptureTransport::new(usize::MAX), cfg);
        let err = writer
            .send(Opcode::Frame, &json!({"data": "more than eight bytes"}))
            .unwrap_err();

        assert!(matches!(err, FrameError::PayloadTooLarge { max: 8, .. }));
        assert!(writer.get_ref().wire().is_empty(), "nothing hits the wire");
    }

    #[test]
    fn broken_transport_surfaces_io_error() {
        let mut writer = FrameWriter::new(CaptureTransport::new(usize::MAX));
        writer.get_ref().close();

        let err = writer.send(Opcode::Ping, &json!({})).unwrap_err();
        assert!(matches!(err, FrameError::Io(e) if e.kind() == std::io::ErrorKind::BrokenPipe));
    }
}
