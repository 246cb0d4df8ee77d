use std::fmt;

/// Lifecycle state of a [`Connection`](crate::Connection).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Created, never connected.
    Idle,
    /// Probing endpoint candidates.
    Connecting,
    /// Handshake sent, waiting for the READY dispatch.
    AwaitingReady,
    /// Handshake complete; commands and events flow.
    Connected,
    /// Local `close()` in progress.
    Closing,
    /// Closed locally; transport released.
    Closed,
    /// Lost the peer (I/O failure, bad frame, peer CLOSE, failed handshake).
    Disconnected,
}

impl ConnectionState {
    /// States from which `connect()` may start a fresh session.
    pub fn can_connect(self) -> bool {
        matches!(
            self,
            ConnectionState::Idle | ConnectionState::Closed | ConnectionState::Disconnected
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Idle => "idle",
            ConnectionState::Connecting => "connecting",
            ConnectionState::AwaitingReady => "awaiting-ready",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
