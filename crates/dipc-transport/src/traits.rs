use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::error::{Result, TransportError};

/// A connected local byte stream to the peer.
///
/// Every method takes `&self` so one stream can be shared between the
/// receive loop (reading) and senders (writing) behind an `Arc`. Platform
/// variants only implement the primitive `read`/`write`/`close`; the framing
/// layer relies on the provided [`read_exact`](Transport::read_exact) and
/// [`write_all`](Transport::write_all), which are identical everywhere.
pub trait Transport: Send + Sync {
    /// Read whatever is available into `buf` (blocking). `Ok(0)` means EOF.
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Write some prefix of `buf` (blocking). May accept fewer bytes than given.
    fn write(&self, buf: &[u8]) -> std::io::Result<usize>;

    /// Close the stream. A read blocked on another thread returns EOF.
    fn close(&self);

    /// The endpoint this stream is connected to.
    fn endpoint(&self) -> &Path;

    /// Fill `buf` completely, treating short reads as continuations.
    ///
    /// Returns [`TransportError::Closed`] if the stream ends first.
    fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0usize;
        while filled < buf.len() {
            match self.read(&mut buf[filled..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }

    /// Write the whole buffer, looping until the OS has accepted every byte.
    fn write_all(&self, bytes: &[u8]) -> Result<()> {
        let mut offset = 0usize;
        while offset < bytes.len() {
            match self.write(&bytes[offset..]) {
                Ok(0) => return Err(TransportError::Closed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => return Err(TransportError::Io(err)),
            }
        }
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        (**self).read(buf)
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        (**self).write(buf)
    }

    fn close(&self) {
        (**self).close()
    }

    fn endpoint(&self) -> &Path {
        (**self).endpoint()
    }
}

/// A connected IPC stream.
///
/// On Unix, this wraps a Unix domain socket stream.
/// On Windows, this wraps a named pipe handle.
pub struct IpcStream {
    inner: IpcStreamInner,
    endpoint: PathBuf,
    closed: AtomicBool,
}

enum IpcStreamInner {
    #[cfg(unix)]
    Unix(std::os::unix::net::UnixStream),
    #[cfg(windows)]
    Pipe(std::fs::File),
}

impl IpcStream {
    /// Connect to the peer at `path`, giving up after `timeout`.
    pub fn connect(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();

        #[cfg(unix)]
        let stream = Self::from_unix(crate::uds::connect(path, timeout)?, path);

        #[cfg(windows)]
        let stream = Self::from_pipe(crate::pipe::connect(path, timeout)?, path);

        debug!(?path, "connected to ipc endpoint");
        Ok(stream)
    }

    /// Wrap an already-connected Unix domain socket stream.
    #[cfg(unix)]
    pub fn from_unix(stream: std::os::unix::net::UnixStream, endpoint: impl Into<PathBuf>) -> Self {
        Self {
            inner: IpcStreamInner::Unix(stream),
            endpoint: endpoint.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// Wrap an already-opened named pipe client handle.
    #[cfg(windows)]
    pub fn from_pipe(file: std::fs::File, endpoint: impl Into<PathBuf>) -> Self {
        Self {
            inner: IpcStreamInner::Pipe(file),
            endpoint: endpoint.into(),
            closed: AtomicBool::new(false),
        }
    }

    /// True once [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Transport name for diagnostics.
    pub fn transport_name(&self) -> &'static str {
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(_) => "unix-domain-socket",
            #[cfg(windows)]
            IpcStreamInner::Pipe(_) => "named-pipe",
        }
    }
}

impl Transport for IpcStream {
    fn read(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        if self.is_closed() {
            return Ok(0);
        }
        let result = match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => (&*stream).read(buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(file) => crate::pipe::read(file, buf, &self.closed),
        };
        // A local close surfaces as EOF regardless of how the platform aborts the read.
        match result {
            Err(_) if self.is_closed() => Ok(0),
            other => other,
        }
    }

    fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_closed() {
            return Err(std::io::Error::from(ErrorKind::NotConnected));
        }
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => (&*stream).write(buf),
            #[cfg(windows)]
            IpcStreamInner::Pipe(file) => crate::pipe::write(file, buf, &self.closed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!(endpoint = ?self.endpoint, "closing ipc stream");
        match &self.inner {
            #[cfg(unix)]
            IpcStreamInner::Unix(stream) => {
                let _ = stream.shutdown(std::net::Shutdown::Both);
            }
            #[cfg(windows)]
            IpcStreamInner::Pipe(file) => crate::pipe::cancel_pending_io(file),
        }
    }

    fn endpoint(&self) -> &Path {
        &self.endpoint
    }
}

impl std::fmt::Debug for IpcStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcStream")
            .field("type", &self.transport_name())
            .field("endpoint", &self.endpoint)
            .field("closed", &self.is_closed())
            .finish()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::os::unix::net::UnixStream;
    use std::thread;

    use super::*;

    /// Accepts at most `chunk` bytes per write call.
    struct StingyWriter {
        chunk: usize,
        accepted: std::sync::Mutex<Vec<u8>>,
        calls: std::sync::atomic::AtomicUsize,
    }

    impl Transport for StingyWriter {
        fn read(&self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(0)
        }

        fn write(&self, buf: &[u8]) -> std::io::Result<usize> {
            let n = buf.len().min(self.chunk);
            self.calls.fetch_add(1, Ordering::Relaxed);
            self.accepted.lock().unwrap().extend_from_slice(&buf[..n]);
            Ok(n)
        }

        fn close(&self) {}

        fn endpoint(&self) -> &Path {
            Path::new("stingy")
        }
    }

    #[test]
    fn write_all_loops_over_short_writes() {
        let writer = StingyWriter {
            chunk: 3,
            accepted: std::sync::Mutex::new(Vec::new()),
            calls: std::sync::atomic::AtomicUsize::new(0),
        };
        writer.write_all(b"0123456789").unwrap();

        assert_eq!(writer.accepted.lock().unwrap().as_slice(), b"0123456789");
        assert_eq!(writer.calls.load(Ordering::Relaxed), 4);
    }

    #[test]
    fn read_exact_reports_closed_on_early_eof() {
        let (left, right) = UnixStream::pair().unwrap();
        let stream = IpcStream::from_unix(right, "pair");
        (&left).write_all(b"abc").unwrap();
        drop(left);

        let mut buf = [0u8; 8];
        let err = stream.read_exact(&mut buf).unwrap_err();
        assert!(matches!(err, TransportError::Closed));
    }

    #[test]
    fn close_unblocks_pending_read() {
        let (_left, right) = UnixStream::pair().unwrap();
        let stream = Arc::new(IpcStream::from_unix(right, "pair"));

        let reader = {
            let stream = Arc::clone(&stream);
            thread::spawn(move || {
                let mut buf = [0u8; 4];
                stream.read_exact(&mut buf)
            })
        };

        thread::sleep(Duration::from_millis(50));
        stream.close();

        let result = reader.join().unwrap();
        assert!(matches!(result, Err(TransportError::Closed)));
        assert!(stream.is_closed());
    }

    #[test]
    fn write_after_close_fails() {
        let (_left, right) = UnixStream::pair().unwrap();
        let stream = IpcStream::from_unix(right, "pair");
        stream.close();
        assert!(stream.write_all(b"late").is_err());
    }

    #[test]
    fn shared_stream_reads_and_writes_concurrently() {
        let (left, right) = UnixStream::pair().unwrap();
        let local = Arc::new(IpcStream::from_unix(right, "pair"));

        let echo = thread::spawn(move || {
            let mut buf = [0u8; 5];
            (&left).read_exact(&mut buf).unwrap();
            (&left).write_all(&buf).unwrap();
        });

        let reader = {
            let local = Arc::clone(&local);
            thread::spawn(move || {
                let mut buf = [0u8; 5];
                local.read_exact(&mut buf).unwrap();
                buf
            })
        };

        local.write_all(b"hello").unwrap();
        assert_eq!(&reader.join().unwrap(), b"hello");
        echo.join().unwrap();
    }
}
