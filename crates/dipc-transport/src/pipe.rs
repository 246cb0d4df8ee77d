use std::fs::{File, OpenOptions};
use std::os::windows::ffi::OsStrExt;
use std::os::windows::fs::OpenOptionsExt;
use std::os::windows::io::AsRawHandle;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tracing::{debug, trace};
use windows_sys::Win32::Foundation::{
    CloseHandle, ERROR_BROKEN_PIPE, ERROR_IO_PENDING, ERROR_PIPE_BUSY, HANDLE,
};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile, FILE_FLAG_OVERLAPPED};
use windows_sys::Win32::System::Pipes::WaitNamedPipeW;
use windows_sys::Win32::System::Threading::CreateEventW;
use windows_sys::Win32::System::IO::{CancelIoEx, GetOverlappedResult, OVERLAPPED};

use crate::error::{Result, TransportError};

/// Open the client end of a named pipe such as `\\.\pipe\discord-ipc-0`.
///
/// A busy pipe (all server instances taken) is waited on for up to
/// `timeout` and then opened once more. The handle is opened for overlapped
/// I/O so a read pending on the receive thread does not hold up writers.
pub fn connect(path: &Path, timeout: Duration) -> Result<File> {
    match open(path) {
        Ok(file) => Ok(file),
        Err(err) if err.raw_os_error() == Some(ERROR_PIPE_BUSY as i32) => {
            trace!(?path, "pipe busy, waiting for a free instance");
            let wide: Vec<u16> = path.as_os_str().encode_wide().chain(Some(0)).collect();
            let millis = timeout.as_millis().clamp(1, u32::MAX as u128) as u32;
            // SAFETY: `wide` is a NUL-terminated UTF-16 string that outlives the call.
            let ok = unsafe { WaitNamedPipeW(wide.as_ptr(), millis) };
            if ok == 0 {
                return Err(TransportError::Connect {
                    path: path.to_path_buf(),
                    source: std::io::Error::last_os_error(),
                });
            }
            open(path).map_err(|source| TransportError::Connect {
                path: path.to_path_buf(),
                source,
            })
        }
        Err(source) => Err(TransportError::Connect {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn open(path: &Path) -> std::io::Result<File> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .custom_flags(FILE_FLAG_OVERLAPPED)
        .open(path)?;
    debug!(?path, "opened named pipe");
    Ok(file)
}

/// Blocking read on an overlapped pipe handle. A broken pipe reads as EOF.
///
/// `closed` is the owning stream's close flag; see [`overlapped_io`].
pub(crate) fn read(file: &File, buf: &mut [u8], closed: &AtomicBool) -> std::io::Result<usize> {
    let len = buf.len().min(u32::MAX as usize) as u32;
    let ptr = buf.as_mut_ptr();
    let result = overlapped_io(file, closed, |handle, overlapped| {
        // SAFETY: `ptr` is valid for `len` bytes until the operation completes,
        // which `overlapped_io` waits for before returning.
        unsafe { ReadFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
    });
    match result {
        Err(err) if err.raw_os_error() == Some(ERROR_BROKEN_PIPE as i32) => Ok(0),
        other => other,
    }
}

/// Blocking write on an overlapped pipe handle.
pub(crate) fn write(file: &File, buf: &[u8], closed: &AtomicBool) -> std::io::Result<usize> {
    let len = buf.len().min(u32::MAX as usize) as u32;
    let ptr = buf.as_ptr();
    overlapped_io(file, closed, |handle, overlapped| {
        // SAFETY: as for `read`; the buffer outlives the awaited operation.
        unsafe { WriteFile(handle, ptr, len, std::ptr::null_mut(), overlapped) }
    })
}

/// Abort any read or write pending on the pipe handle.
///
/// Only reaches I/O already issued. Callers set the close flag first so an
/// operation issued afterwards cancels itself in [`overlapped_io`].
pub(crate) fn cancel_pending_io(file: &File) {
    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: `handle` is owned by `file`, which is alive for the call.
    unsafe {
        CancelIoEx(handle, std::ptr::null());
    }
}

/// Start one overlapped operation and wait for it on a private event.
///
/// If `closed` is set once the operation is pending, it is cancelled here:
/// a close that raced ahead of `ReadFile`/`WriteFile` had nothing to cancel.
fn overlapped_io(
    file: &File,
    closed: &AtomicBool,
    start: impl FnOnce(HANDLE, *mut OVERLAPPED) -> i32,
) -> std::io::Result<usize> {
    let handle = file.as_raw_handle() as HANDLE;
    // SAFETY: null attributes and name are allowed; manual-reset, initially unset.
    let event = unsafe { CreateEventW(std::ptr::null(), 1, 0, std::ptr::null()) };
    if event.is_null() {
        return Err(std::io::Error::last_os_error());
    }

    // SAFETY: OVERLAPPED is plain data; all-zero is its documented initial state.
    let mut overlapped: OVERLAPPED = unsafe { std::mem::zeroed() };
    overlapped.hEvent = event;

    let result = if start(handle, &mut overlapped as *mut OVERLAPPED) != 0 {
        transferred(handle, &overlapped)
    } else {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(ERROR_IO_PENDING as i32) {
            if closed.load(Ordering::SeqCst) {
                // SAFETY: `overlapped` identifies the operation just started on `handle`.
                unsafe {
                    CancelIoEx(handle, &overlapped);
                }
            }
            transferred(handle, &overlapped)
        } else {
            Err(err)
        }
    };

    // SAFETY: `event` was created above and is no longer referenced by any I/O.
    unsafe {
        CloseHandle(event);
    }
    result
}

fn transferred(handle: HANDLE, overlapped: &OVERLAPPED) -> std::io::Result<usize> {
    let mut bytes = 0u32;
    // SAFETY: `overlapped` belongs to an operation started on `handle`; waiting
    // (bWait = TRUE) keeps it alive until completion or cancellation.
    let ok = unsafe { GetOverlappedResult(handle, overlapped, &mut bytes, 1) };
    if ok == 0 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(bytes as usize)
}

#[cfg(all(test, windows))]
mod tests {
    use windows_sys::Win32::Foundation::{ERROR_OPERATION_ABORTED, INVALID_HANDLE_VALUE};
    use windows_sys::Win32::Storage::FileSystem::PIPE_ACCESS_DUPLEX;
    use windows_sys::Win32::System::Pipes::{
        CreateNamedPipeW, PIPE_READMODE_BYTE, PIPE_TYPE_BYTE, PIPE_WAIT,
    };

    use super::*;

    /// Server end of a fresh pipe instance; closed on drop.
    struct Server(HANDLE);

    impl Server {
        fn create(name: &str) -> Self {
            let wide: Vec<u16> = std::ffi::OsStr::new(name)
                .encode_wide()
                .chain(Some(0))
                .collect();
            // SAFETY: `wide` is NUL-terminated; null security attributes are allowed.
            let handle = unsafe {
                CreateNamedPipeW(
                    wide.as_ptr(),
                    PIPE_ACCESS_DUPLEX | FILE_FLAG_OVERLAPPED,
                    PIPE_TYPE_BYTE | PIPE_READMODE_BYTE | PIPE_WAIT,
                    1,
                    4096,
                    4096,
                    0,
                    std::ptr::null(),
                )
            };
            assert_ne!(handle, INVALID_HANDLE_VALUE, "pipe server should be created");
            Self(handle)
        }
    }

    impl Drop for Server {
        fn drop(&mut self) {
            // SAFETY: the handle came from CreateNamedPipeW and is closed once.
            unsafe {
                CloseHandle(self.0);
            }
        }
    }

    fn pipe_name(tag: &str) -> String {
        format!(r"\\.\pipe\dipc-test-{tag}-{}", std::process::id())
    }

    #[test]
    fn read_issued_after_close_cancels_itself() {
        let name = pipe_name("lateread");
        let _server = Server::create(&name);
        let file = connect(Path::new(&name), Duration::from_secs(1)).unwrap();

        // The flag is already set but nothing was pending when close ran.
        let closed = AtomicBool::new(true);
        let mut buf = [0u8; 8];
        let err = read(&file, &mut buf, &closed).unwrap_err();
        assert_eq!(err.raw_os_error(), Some(ERROR_OPERATION_ABORTED as i32));
    }

    #[test]
    fn read_after_server_closes_is_eof() {
        let name = pipe_name("open");
        let server = Server::create(&name);
        let file = connect(Path::new(&name), Duration::from_secs(1)).unwrap();
        let closed = AtomicBool::new(false);

        drop(server);
        let mut buf = [0u8; 8];
        assert_eq!(read(&file, &mut buf, &closed).unwrap(), 0);
    }
}
