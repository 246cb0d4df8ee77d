use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Subcommand};
use dipc_transport::{DirLocator, Locator, SystemLocator};

use crate::exit::{CliError, CliResult, USAGE};
use crate::output::OutputFormat;

pub mod listen;
pub mod probe;
pub mod send;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Check which endpoint candidates accept a connection.
    Probe(ProbeArgs),
    /// Connect, send one command and print its response.
    Send(SendArgs),
    /// Connect, subscribe and print pushed events.
    Listen(ListenArgs),
    /// Show version information.
    Version(VersionArgs),
}

/// Settings shared by every subcommand.
#[derive(Debug)]
pub struct Context {
    pub format: OutputFormat,
    pub ipc_dir: Option<PathBuf>,
}

impl Context {
    pub fn locator(&self) -> Box<dyn Locator> {
        match &self.ipc_dir {
            Some(dir) => Box::new(DirLocator::new(dir.clone())),
            None => Box::new(SystemLocator::new()),
        }
    }
}

pub fn run(command: Command, ctx: &Context) -> CliResult<i32> {
    match command {
        Command::Probe(args) => probe::run(args, ctx),
        Command::Send(args) => send::run(args, ctx),
        Command::Listen(args) => listen::run(args, ctx),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ProbeArgs {
    /// Per-candidate connect timeout (e.g. 2s, 500ms).
    #[arg(long, default_value = "500ms")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Application id to handshake with.
    #[arg(long, env = "DIPC_CLIENT_ID")]
    pub client_id: String,
    /// Command name, e.g. SET_ACTIVITY.
    #[arg(long)]
    pub cmd: String,
    /// Command args as a JSON object.
    #[arg(long, value_name = "JSON")]
    pub args: Option<String>,
    /// Event name, for SUBSCRIBE and UNSUBSCRIBE.
    #[arg(long)]
    pub evt: Option<String>,
    /// Time allowed for the handshake and for the response (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Application id to handshake with.
    #[arg(long, env = "DIPC_CLIENT_ID")]
    pub client_id: String,
    /// Events to subscribe to (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub subscribe: Vec<String>,
    /// Exit after receiving N events.
    #[arg(long)]
    pub count: Option<usize>,
    /// Time allowed for the handshake and for each subscription (e.g. 5s, 500ms).
    #[arg(long, default_value = "5s")]
    pub timeout: String,
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

pub fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    Ok(match unit {
        "ms" => Duration::from_millis(value),
        _ => Duration::from_secs(value),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_duration_seconds_and_millis() {
        assert_eq!(parse_duration("2s").unwrap(), Duration::from_secs(2));
        assert_eq!(parse_duration("150ms").unwrap(), Duration::from_millis(150));
        assert_eq!(parse_duration("3").unwrap(), Duration::from_secs(3));
    }

    #[test]
    fn parse_duration_rejects_invalid_values() {
        assert_eq!(parse_duration("0s").unwrap_err().code, USAGE);
        assert!(parse_duration("bad").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn ipc_dir_selects_dir_locator() {
        let ctx = Context {
            format: OutputFormat::Json,
            ipc_dir: Some(PathBuf::from("/tmp/fake-discord")),
        };
        let candidates = ctx.locator().candidates();
        assert_eq!(candidates.len(), 10);
        assert_eq!(
            candidates[3].path,
            PathBuf::from("/tmp/fake-discord/discord-ipc-3")
        );
    }
}
