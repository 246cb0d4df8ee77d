use dipc_transport::Transport;
use tracing::trace;

use crate::codec::{parse_header, parse_payload, Frame, FrameConfig, HEADER_SIZE};
use crate::error::Result;

/// Reads complete frames from a [`Transport`].
///
/// Waits for all 8 header bytes, then for exactly the declared payload
/// length. Partial reads are continuations; callers always get whole frames.
pub struct FrameReader<T> {
    inner: T,
    config: FrameConfig,
}

impl<T: Transport> FrameReader<T> {
    /// Create a new frame reader with default configuration.
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, FrameConfig::default())
    }

    /// Create a new frame reader with explicit configuration.
    pub fn with_config(inner: T, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next complete frame (blocking).
    ///
    /// Returns `Err(FrameError::TransportClosed)` when the stream ends, whether
    /// between frames or in the middle of one.
    pub fn read_frame(&mut self) -> Result<Frame> {
        let mut header = [0u8; HEADER_SIZE];
        self.inner.read_exact(&mut header)?;
        let (opcode, len) = parse_header(&header, self.config.max_payload_size)?;

        let mut body = vec![0u8; len];
        self.inner.read_exact(&mut body)?;
        let payload = parse_payload(&body)?;

        trace!(%opcode, len, "frame received");
        Ok(Frame { opcode, payload })
    }

    /// Borrow the underlying transport.
    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    /// Consume the reader and return the inner transport.
    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Current frame reader configuration.
    pub fn config(&self) -> &FrameConfig {
        &self.config
    }
}
