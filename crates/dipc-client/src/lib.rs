//! Connection lifecycle, command correlation and event dispatch for the
//! Discord IPC protocol.
//!
//! This is the "just works" layer: [`connect`] finds the local desktop
//! client, performs the handshake and hands back a [`Connection`] that can
//! send commands, await their responses and deliver pushed events to
//! registered [`EventHandler`]s.

pub mod commands;
pub mod connection;
pub mod connector;
pub mod correlator;
pub mod dispatcher;
pub mod error;
pub mod handshake;
pub mod state;

pub use commands::{
    Command, CMD_DISPATCH, CMD_SET_ACTIVITY, CMD_SUBSCRIBE, CMD_UNSUBSCRIBE,
    EVT_ACTIVITY_JOIN, EVT_ACTIVITY_JOIN_REQUEST, EVT_ACTIVITY_SPECTATE, EVT_ERROR, EVT_READY,
};
pub use connection::Connection;
pub use connector::{connect, connect_with_config};
pub use correlator::{CommandHandle, CommandResult, Continuation, Correlator};
pub use dispatcher::{Dispatcher, Event, EventHandler};
pub use error::{ClientError, ErrorKind, Result};
pub use handshake::{
    evaluate_reply, handshake_payload, ClientConfig, HandshakeRequest, ReadyEvent,
    PROTOCOL_VERSION,
};
pub use state::ConnectionState;
