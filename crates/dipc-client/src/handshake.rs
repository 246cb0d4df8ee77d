use std::time::Duration;

use dipc_frame::{Frame, Opcode, DEFAULT_MAX_PAYLOAD};
use dipc_transport::DEFAULT_CONNECT_TIMEOUT;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::commands::{EVT_ERROR, EVT_READY};
use crate::error::{ClientError, Result};

/// RPC protocol version announced in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

const MAX_CLIENT_ID_LEN: usize = 64;

/// Outbound HANDSHAKE payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HandshakeRequest {
    /// Protocol version.
    pub v: u32,
    /// Application (client) id registered with the peer.
    pub client_id: String,
}

/// The READY dispatch that completes the handshake.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadyEvent {
    /// Protocol version the peer speaks, when reported.
    pub version: Option<u64>,
    /// Peer configuration block (`data.config`).
    pub config: Option<Value>,
    /// The signed-in user (`data.user`).
    pub user: Option<Value>,
    /// The full payload as received.
    pub raw: Value,
}

impl ReadyEvent {
    fn from_payload(raw: Value) -> Self {
        let data = raw.get("data");
        Self {
            version: data.and_then(|d| d.get("v")).and_then(Value::as_u64),
            config: data.and_then(|d| d.get("config")).cloned(),
            user: data.and_then(|d| d.get("user")).cloned(),
            raw,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Application id sent in the handshake.
    pub client_id: String,
    /// Protocol version sent in the handshake.
    pub protocol_version: u32,
    /// How long to wait for the READY reply after sending the handshake.
    pub handshake_timeout: Duration,
    /// Per-candidate connect timeout while probing endpoints.
    pub connect_timeout: Duration,
    /// Maximum frame payload size in bytes, both directions.
    pub max_payload_size: usize,
}

impl ClientConfig {
    /// Default configuration for `client_id`.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            ..Self::default()
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            protocol_version: PROTOCOL_VERSION,
            handshake_timeout: Duration::from_secs(5),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

/// Build the HANDSHAKE payload for `config`.
pub fn handshake_payload(config: &ClientConfig) -> Result<Value> {
    validate_client_id(&config.client_id)?;
    let request = HandshakeRequest {
        v: config.protocol_version,
        client_id: config.client_id.clone(),
    };
    Ok(serde_json::to_value(request)?)
}

/// Decide whether `frame` is a READY reply.
///
/// CLOSE, an `ERROR` dispatch, or any other payload fails the handshake.
pub fn evaluate_reply(frame: &Frame) -> Result<ReadyEvent> {
    match frame.opcode {
        Opcode::Frame => {}
        Opcode::Close => {
            let (code, message) = close_reason(&frame.payload);
            return Err(ClientError::HandshakeFailed(format!(
                "peer closed during handshake ({}): {message}",
                code.map_or_else(|| "no code".to_string(), |c| c.to_string())
            )));
        }
        other => {
            return Err(ClientError::HandshakeFailed(format!(
                "expected READY, got {other} frame"
            )));
        }
    }

    match frame.str_field("evt") {
        Some(EVT_READY) => Ok(ReadyEvent::from_payload(frame.payload.clone())),
        Some(EVT_ERROR) => {
            let (code, message) = error_details(&frame.payload);
            Err(ClientError::HandshakeFailed(format!(
                "peer rejected handshake ({code}): {message}"
            )))
        }
        Some(evt) => Err(ClientError::HandshakeFailed(format!(
            "expected READY, got event '{evt}'"
        ))),
        None => Err(ClientError::HandshakeFailed(
            "expected READY, got frame without evt".to_string(),
        )),
    }
}

/// `code` and `message` of a CLOSE payload.
pub fn close_reason(payload: &Value) -> (Option<i64>, String) {
    let code = payload.get("code").and_then(Value::as_i64);
    let message = payload
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("no reason given")
        .to_string();
    (code, message)
}

/// `data.code` and `data.message` of an `ERROR` dispatch.
pub fn error_details(payload: &Value) -> (i64, String) {
    let data = payload.get("data");
    let code = data
        .and_then(|d| d.get("code"))
        .and_then(Value::as_i64)
        .unwrap_or_default();
    let message = data
        .and_then(|d| d.get("message"))
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    (code, message)
}

fn validate_client_id(client_id: &str) -> Result<()> {
    if client_id.is_empty() || client_id.len() > MAX_CLIENT_ID_LEN {
        return Err(ClientError::HandshakeFailed(format!(
            "invalid client_id length: {}",
            client_id.len()
        )));
    }
    Ok(())
}
