use dipc_frame::FrameError;
use dipc_transport::TransportError;

use crate::state::ConnectionState;

/// Errors that can occur in client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// No endpoint candidate accepted a connection.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] TransportError),

    /// The peer did not confirm readiness.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The operation needs a `Connected` connection.
    #[error("not connected (state: {0})")]
    NotConnected(ConnectionState),

    /// `connect` was called on a connection that is still live.
    #[error("already connected (state: {0})")]
    AlreadyConnected(ConnectionState),

    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// The peer sent a frame that is not valid at this point of the protocol.
    #[error("unexpected frame: {0}")]
    UnexpectedFrame(String),

    /// The peer closed the connection.
    #[error("peer closed connection ({code:?}): {message}")]
    PeerClosed { code: Option<i64>, message: String },

    /// The connection went away before the command was answered.
    #[error("disconnected: {0}")]
    Disconnected(String),

    /// The peer answered a command with an `ERROR` event.
    #[error("command failed ({code}): {message}")]
    CommandFailed { code: i64, message: String },

    /// A command or handshake payload was not a JSON object.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse classification of [`ClientError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConnectFailed,
    HandshakeFailed,
    ProtocolError,
    MalformedPayload,
    TransportClosed,
    NotConnected,
    CommandFailed,
    Other,
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::ConnectFailed(_) => ErrorKind::ConnectFailed,
            ClientError::HandshakeFailed(_) => ErrorKind::HandshakeFailed,
            ClientError::NotConnected(_) => ErrorKind::NotConnected,
            ClientError::AlreadyConnected(_) => ErrorKind::Other,
            ClientError::Transport(_) => ErrorKind::TransportClosed,
            ClientError::Frame(err) => match err {
                FrameError::Protocol(_) | FrameError::PayloadTooLarge { .. } => {
                    ErrorKind::ProtocolError
                }
                FrameError::MalformedPayload(_) => ErrorKind::MalformedPayload,
                FrameError::TransportClosed | FrameError::Io(_) => ErrorKind::TransportClosed,
            },
            ClientError::UnexpectedFrame(_) => ErrorKind::ProtocolError,
            ClientError::PeerClosed { .. } | ClientError::Disconnected(_) => {
                ErrorKind::TransportClosed
            }
            ClientError::CommandFailed { .. } => ErrorKind::CommandFailed,
            ClientError::InvalidPayload(_) | ClientError::Json(_) => ErrorKind::MalformedPayload,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_errors_map_to_taxonomy() {
        assert_eq!(
            ClientError::from(FrameError::Protocol(99)).kind(),
            ErrorKind::ProtocolError
        );
        assert_eq!(
            ClientError::from(FrameError::TransportClosed).kind(),
            ErrorKind::TransportClosed
        );
        let json_err = serde_json::from_slice::<serde_json::Value>(b"{").unwrap_err();
        assert_eq!(
            ClientError::from(FrameError::MalformedPayload(json_err)).kind(),
            ErrorKind::MalformedPayload
        );
    }

    #[test]
    fn lifecycle_errors_map_to_taxonomy() {
        assert_eq!(
            ClientError::NotConnected(ConnectionState::Idle).kind(),
            ErrorKind::NotConnected
        );
        assert_eq!(
            ClientError::ConnectFailed(TransportError::NoEndpoint { tried: 10 }).kind(),
            ErrorKind::ConnectFailed
        );
        assert_eq!(
            ClientError::HandshakeFailed("timeout".into()).kind(),
            ErrorKind::HandshakeFailed
        );
    }
}
