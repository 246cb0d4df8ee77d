use bytes::{Buf, BufMut, BytesMut};
use serde_json::Value;

use crate::error::{FrameError, Result};
use crate::opcode::Opcode;

/// Frame header: opcode (4) + length (4) = 8 bytes.
pub const HEADER_SIZE: usize = 8;

/// Default maximum payload size: 16 MiB.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

/// One decoded protocol frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// What kind of frame this is.
    pub opcode: Opcode,
    /// The JSON payload.
    pub payload: Value,
}

impl Frame {
    /// Create a new frame.
    pub fn new(opcode: Opcode, payload: Value) -> Self {
        Self { opcode, payload }
    }

    /// String field of an object payload, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// The `nonce` carried by a command response, if any.
    pub fn nonce(&self) -> Option<&str> {
        self.str_field("nonce")
    }
}

/// Encode a frame into the wire format.
///
/// Wire format (both header fields little-endian, as the peer expects):
/// ```text
/// ┌──────────────┬──────────────┬──────────────────────────┐
/// │ Opcode (4B)  │ Length (4B)  │ Payload (Length bytes)   │
/// │ u32 LE       │ u32 LE       │ UTF-8 JSON               │
/// └──────────────┴──────────────┴──────────────────────────┘
/// ```
pub fn encode_frame(opcode: Opcode, payload: &Value, dst: &mut BytesMut) -> Result<()> {
    let body = serde_json::to_vec(payload).map_err(FrameError::MalformedPayload)?;
    if body.len() > u32::MAX as usize {
        return Err(FrameError::PayloadTooLarge {
            size: body.len(),
            max: u32::MAX as usize,
        });
    }
    dst.reserve(HEADER_SIZE + body.len());
    dst.put_u32_le(opcode.as_u32());
    dst.put_u32_le(body.len() as u32);
    dst.put_slice(&body);
    Ok(())
}

/// Parse the 8-byte header into an opcode and a payload length.
///
/// The opcode is validated before the length so a corrupt stream fails fast.
pub fn parse_header(header: &[u8; HEADER_SIZE], max_payload: usize) -> Result<(Opcode, usize)> {
    let raw_opcode = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let opcode = Opcode::try_from(raw_opcode)?;
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: len,
            max: max_payload,
        });
    }
    Ok((opcode, len))
}

/// Parse payload bytes as JSON.
///
/// An empty payload decodes to `null`.
pub fn parse_payload(body: &[u8]) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body).map_err(FrameError::MalformedPayload)
}

/// Decode a frame from a buffer.
///
/// Returns `Ok(None)` if the buffer doesn't contain a complete frame yet.
/// On success, consumes the frame bytes from the buffer.
pub fn decode_frame(src: &mut BytesMut, max_payload: usize) -> Result<Option<Frame>> {
    if src.len() < HEADER_SIZE {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_SIZE];
    header.copy_from_slice(&src[..HEADER_SIZE]);
    let (opcode, len) = parse_header(&header, max_payload)?;

    if src.len() < HEADER_SIZE + len {
        return Ok(None);
    }

    src.advance(HEADER_SIZE);
    let body = src.split_to(len);
    let payload = parse_payload(&body)?;

    Ok(Some(Frame { opcode, payload }))
}

/// Configuration for the frame codec.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum payload size in bytes. Default: 16 MiB.
    pub max_payload_size: usize,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}
