//! Local IPC transport to the Discord client.
//!
//! Provides one [`Transport`] capability over the platform's local channel:
//! - Unix domain sockets (Linux/macOS)
//! - Named pipes (Windows)
//!
//! plus endpoint discovery ([`Locator`], [`probe`]). This is the lowest layer
//! of dipc; framing and the connection state machine build on it.

pub mod error;
pub mod locator;
pub mod traits;

#[cfg(unix)]
pub mod uds;

#[cfg(windows)]
pub mod pipe;

pub use error::{Result, TransportError};
pub use locator::{
    endpoint_name, probe, DirLocator, EndpointCandidate, Locator, SystemLocator,
    DEFAULT_CONNECT_TIMEOUT, MAX_CANDIDATES,
};
pub use traits::{IpcStream, Transport};
