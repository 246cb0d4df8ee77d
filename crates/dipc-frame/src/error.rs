/// Errors that can occur during frame encoding/decoding.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame header carries an opcode outside the known set.
    #[error("protocol error: unknown opcode {0}")]
    Protocol(u32),

    /// The payload is not valid UTF-8 JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[source] serde_json::Error),

    /// The payload exceeds the configured maximum size.
    #[error("payload too large ({size} bytes, max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The transport closed before a complete frame was transferred.
    #[error("transport closed")]
    TransportClosed,

    /// An I/O error occurred while reading or writing frames.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<dipc_transport::TransportError> for FrameError {
    fn from(err: dipc_transport::TransportError) -> Self {
        match err {
            dipc_transport::TransportError::Closed => FrameError::TransportClosed,
            dipc_transport::TransportError::Io(io) => FrameError::Io(io),
            dipc_transport::TransportError::Connect { source, .. } => FrameError::Io(source),
            other => FrameError::Io(std::io::Error::other(other.to_string())),
        }
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;
