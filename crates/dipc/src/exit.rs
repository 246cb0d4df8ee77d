use std::fmt;

use dipc_client::{ClientError, ErrorKind};

// Exit code constants; 69 follows sysexits EX_UNAVAILABLE.
pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const NO_PEER: i32 = 69;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn code_for(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::ConnectFailed => NO_PEER,
        ErrorKind::HandshakeFailed | ErrorKind::CommandFailed => FAILURE,
        ErrorKind::ProtocolError | ErrorKind::MalformedPayload => DATA_INVALID,
        ErrorKind::TransportClosed | ErrorKind::NotConnected => TRANSPORT_ERROR,
        ErrorKind::Other => INTERNAL,
    }
}

pub fn client_error(context: &str, err: ClientError) -> CliError {
    CliError::new(code_for(err.kind()), format!("{context}: {err}"))
}
