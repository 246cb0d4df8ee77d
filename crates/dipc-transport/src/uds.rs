use std::os::fd::{FromRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::time::{Duration, Instant};

use tracing::trace;

use crate::error::{Result, TransportError};

/// Maximum socket path length.
/// Unix `sockaddr_un.sun_path` is typically 108 bytes on Linux, 104 on macOS.
#[cfg(target_os = "linux")]
pub const MAX_PATH_LEN: usize = 108;
#[cfg(not(target_os = "linux"))]
pub const MAX_PATH_LEN: usize = 104;

/// Connect to a listening Unix domain socket, bounded by `timeout`.
///
/// The connect is issued non-blocking and completed with `poll`, then the
/// socket is switched back to blocking mode for the caller.
pub fn connect(path: &Path, timeout: Duration) -> Result<UnixStream> {
    let path_bytes = path.as_os_str().as_bytes();
    if path_bytes.len() >= MAX_PATH_LEN {
        return Err(TransportError::PathTooLong {
            path: path.to_path_buf(),
            len: path_bytes.len(),
            max: MAX_PATH_LEN,
        });
    }

    let connect_err = |source: std::io::Error| TransportError::Connect {
        path: path.to_path_buf(),
        source,
    };

    let fd = new_socket().map_err(connect_err)?;
    let raw = std::os::fd::AsRawFd::as_raw_fd(&fd);
    set_nonblocking(raw, true).map_err(connect_err)?;

    // SAFETY: `sockaddr_un` is plain old data; all-zero is a valid initial value.
    let mut addr: libc::sockaddr_un = unsafe { std::mem::zeroed() };
    addr.sun_family = libc::AF_UNIX as libc::sa_family_t;
    for (dst, src) in addr.sun_path.iter_mut().zip(path_bytes) {
        *dst = *src as libc::c_char;
    }
    let addr_len = std::mem::size_of::<libc::sockaddr_un>() as libc::socklen_t;

    // SAFETY: `addr` is a fully initialized `sockaddr_un` and `addr_len` is its size.
    let rc = unsafe {
        libc::connect(
            raw,
            (&addr as *const libc::sockaddr_un).cast::<libc::sockaddr>(),
            addr_len,
        )
    };

    if rc != 0 {
        let err = std::io::Error::last_os_error();
        match err.raw_os_error() {
            Some(libc::EINPROGRESS) | Some(libc::EAGAIN) => {
                trace!(?path, "connect in progress, waiting");
                wait_writable(raw, timeout).map_err(connect_err)?;
                take_socket_error(raw).map_err(connect_err)?;
            }
            _ => return Err(connect_err(err)),
        }
    }

    set_nonblocking(raw, false).map_err(connect_err)?;
    Ok(UnixStream::from(fd))
}

fn new_socket() -> std::io::Result<OwnedFd> {
    // SAFETY: plain socket(2) call; the result is checked before use.
    let raw = unsafe { libc::socket(libc::AF_UNIX, libc::SOCK_STREAM, 0) };
    if raw < 0 {
        return Err(std::io::Error::last_os_error());
    }
    // SAFETY: `raw` is a freshly created descriptor owned by nobody else.
    let fd = unsafe { OwnedFd::from_raw_fd(raw) };

    // SAFETY: `raw` is a valid open descriptor.
    if unsafe { libc::fcntl(raw, libc::F_SETFD, libc::FD_CLOEXEC) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(fd)
}

fn set_nonblocking(fd: RawFd, nonblocking: bool) -> std::io::Result<()> {
    // SAFETY: `fd` is a valid open descriptor for the duration of the call.
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(std::io::Error::last_os_error());
    }
    let flags = if nonblocking {
        flags | libc::O_NONBLOCK
    } else {
        flags & !libc::O_NONBLOCK
    };
    // SAFETY: as above.
    if unsafe { libc::fcntl(fd, libc::F_SETFL, flags) } < 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

fn wait_writable(fd: RawFd, timeout: Duration) -> std::io::Result<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(std::io::Error::from(std::io::ErrorKind::TimedOut));
        }
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLOUT,
            revents: 0,
        };
        let millis = remaining.as_millis().clamp(1, libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: `pfd` is a valid pollfd and we pass a count of exactly one.
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        match rc {
            0 => return Err(std::io::Error::from(std::io::ErrorKind::TimedOut)),
            n if n > 0 => return Ok(()),
            _ => {
                let err = std::io::Error::last_os_error();
                if err.kind() != std::io::ErrorKind::Interrupted {
                    return Err(err);
                }
            }
        }
    }
}

fn take_socket_error(fd: RawFd) -> std::io::Result<()> {
    let mut value: libc::c_int = 0;
    let mut len = std::mem::size_of::<libc::c_int>() as libc::socklen_t;
    // SAFETY: `value` and `len` are valid writable pointers for the provided sizes.
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_ERROR,
            (&mut value as *mut libc::c_int).cast::<libc::c_void>(),
            &mut len,
        )
    };
    if rc != 0 {
        return Err(std::io::Error::last_os_error());
    }
    if value != 0 {
        return Err(std::io::Error::from_raw_os_error(value));
    }
    Ok(())
}
