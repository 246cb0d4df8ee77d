//! Discord IPC transport and protocol engine.
//!
//! dipc talks to an already-running Discord desktop client over its local
//! IPC endpoint (a Unix domain socket or a Windows named pipe), performs the
//! handshake, and carries rich presence commands and events.
//!
//! # Crate Structure
//!
//! - [`transport`]: Local channel abstraction and endpoint discovery
//! - [`frame`]: Opcode + length-prefixed JSON framing
//! - [`client`]: Connection lifecycle, command correlation, event dispatch
//!   (behind the `client` feature, on by default)

/// Re-export transport types.
pub mod transport {
    pub use dipc_transport::*;
}

/// Re-export frame types.
pub mod frame {
    pub use dipc_frame::*;
}

/// Re-export client types (requires `client` feature).
#[cfg(feature = "client")]
pub mod client {
    pub use dipc_client::*;
}
