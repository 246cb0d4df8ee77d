//! Opcode + length-prefixed JSON framing for the Discord IPC protocol.
//!
//! Every message is framed with:
//! - A 4-byte little-endian opcode
//! - A 4-byte little-endian payload length
//! - Exactly that many bytes of UTF-8 JSON
//!
//! The byte order is a compatibility requirement: the peer reads both header
//! fields as native little-endian `uint32`, so any other order corrupts every
//! opcode and length it sees.

pub mod codec;
pub mod error;
pub mod opcode;
pub mod reader;
pub mod writer;

pub use codec::{
    decode_frame, encode_frame, parse_header, parse_payload, Frame, FrameConfig,
    DEFAULT_MAX_PAYLOAD, HEADER_SIZE,
};
pub use error::{FrameError, Result};
pub use opcode::Opcode;
pub use reader::FrameReader;
pub use writer::FrameWriter;
