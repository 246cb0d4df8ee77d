//! Endpoint discovery.
//!
//! The peer listens on one of up to [`MAX_CANDIDATES`] endpoints named
//! `discord-ipc-{i}`. A [`Locator`] maps each index to a platform path and
//! knows how to open it; [`probe`] walks the indices in order and adopts the
//! first endpoint that accepts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::traits::{IpcStream, Transport};

/// Number of endpoint indices probed (0 through 9).
pub const MAX_CANDIDATES: u8 = 10;

/// Endpoint file/pipe name prefix.
pub const ENDPOINT_PREFIX: &str = "discord-ipc-";

/// Environment variables consulted, in order, for the Unix runtime directory.
pub const RUNTIME_DIR_VARS: [&str; 4] = ["XDG_RUNTIME_DIR", "TMPDIR", "TMP", "TEMP"];

/// Directory used when none of [`RUNTIME_DIR_VARS`] is set.
pub const FALLBACK_RUNTIME_DIR: &str = "/tmp";

/// Default per-candidate connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// One place the peer may be listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointCandidate {
    /// Candidate index, 0-9.
    pub index: u8,
    /// Resolved socket path or pipe name.
    pub path: PathBuf,
}

/// Resolves endpoint candidates and opens them.
pub trait Locator: Send + Sync {
    /// Map candidate `index` to a path, or `None` to skip it.
    fn resolve(&self, index: u8) -> Option<PathBuf>;

    /// All candidates in probing order.
    fn candidates(&self) -> Vec<EndpointCandidate> {
        (0..MAX_CANDIDATES)
            .filter_map(|index| self.resolve(index).map(|path| EndpointCandidate { index, path }))
            .collect()
    }

    /// Open a transport to `candidate`, bounded by `timeout`.
    fn open(&self, candidate: &EndpointCandidate, timeout: Duration) -> Result<Arc<dyn Transport>> {
        let stream = IpcStream::connect(&candidate.path, timeout)?;
        Ok(Arc::new(stream))
    }
}

/// The platform's standard endpoint locations.
///
/// Unix: `$XDG_RUNTIME_DIR`, `$TMPDIR`, `$TMP`, `$TEMP` (first one set), else
/// `/tmp`, joined with `discord-ipc-{i}`. Windows: `\\.\pipe\discord-ipc-{i}`.
#[derive(Debug, Clone, Default)]
pub struct SystemLocator {
    _private: (),
}

impl SystemLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding the endpoint sockets on Unix.
    pub fn runtime_dir() -> PathBuf {
        runtime_dir_from(|name| std::env::var_os(name))
    }
}

impl Locator for SystemLocator {
    #[cfg(unix)]
    fn resolve(&self, index: u8) -> Option<PathBuf> {
        Some(Self::runtime_dir().join(endpoint_name(index)))
    }

    #[cfg(windows)]
    fn resolve(&self, index: u8) -> Option<PathBuf> {
        Some(PathBuf::from(format!(r"\\.\pipe\{}", endpoint_name(index))))
    }

    #[cfg(not(any(unix, windows)))]
    fn resolve(&self, _index: u8) -> Option<PathBuf> {
        None
    }
}

/// Endpoints inside an explicit directory (`<dir>/discord-ipc-{i}`).
#[derive(Debug, Clone)]
pub struct DirLocator {
    dir: PathBuf,
}

impl DirLocator {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Locator for DirLocator {
    fn resolve(&self, index: u8) -> Option<PathBuf> {
        Some(self.dir.join(endpoint_name(index)))
    }
}

/// `discord-ipc-{index}`.
pub fn endpoint_name(index: u8) -> String {
    format!("{ENDPOINT_PREFIX}{index}")
}

fn runtime_dir_from(lookup: impl Fn(&str) -> Option<std::ffi::OsString>) -> PathBuf {
    RUNTIME_DIR_VARS
        .iter()
        .filter_map(|name| lookup(name))
        .find(|value| !value.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(FALLBACK_RUNTIME_DIR))
}

/// Try each candidate in increasing index order and return the first that opens.
///
/// Probing stops at the first success. When every candidate refuses, the
/// error is [`TransportError::NoEndpoint`].
pub fn probe(
    locator: &dyn Locator,
    timeout: Duration,
) -> Result<(EndpointCandidate, Arc<dyn Transport>)> {
    let candidates = locator.candidates();
    let tried = candidates.len();

    for candidate in candidates {
        match locator.open(&candidate, timeout) {
            Ok(transport) => {
                debug!(index = candidate.index, path = ?candidate.path, "endpoint accepted");
                return Ok((candidate, transport));
            }
            Err(err) => {
                trace!(index = candidate.index, error = %err, "endpoint refused");
            }
        }
    }

    debug!(tried, "no endpoint accepted");
    Err(TransportError::NoEndpoint { tried })
}
