//! Anonymous unidirectional pipe: creation, blocking read/write, and the
//! two-way output multiplex (spec.md §3 "Pipe", §4.2).

use crate::error::{Error, Result};
use crate::handle::Handle;

/// Signals which end of a two-way `pipe_wait` became ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ready {
    Out,
    Err,
}

/// Creates an anonymous pipe, returning `(read_end, write_end)`. Both ends
/// are created non-inheritable by default (close-on-exec on POSIX, the
/// non-inheritable security attribute on Windows); the specific end that
/// must reach the child is marked inheritable later, just before process
/// creation (see [`crate::spawn`]).
pub fn create() -> Result<(Handle, Handle)> {
    imp::create()
}

/// Blocks until at least one byte is read, the peer closes its end (then
/// fails with [`Error::StreamClosed`]), or the call is interrupted. Never
/// returns `Ok(0)`: zero bytes is always reported as stream closure.
pub fn read(end: &Handle, buffer: &mut [u8]) -> Result<usize> {
    imp::read(end, buffer)
}

/// Blocks until the full length is written, the peer has closed its end
/// (fails [`Error::StreamClosed`]), or the call is interrupted. If fewer
/// bytes are written than requested without any other error, fails with
/// [`Error::PartialWrite`] — the caller must retry with the remainder.
pub fn write(end: &Handle, buffer: &[u8]) -> Result<usize> {
    imp::write(end, buffer)
}

/// Blocks until one of `out` or `err` is readable (or closed) and returns
/// which one. A permanently closed end (the null sentinel, representing an
/// end the caller already released) is skipped rather than treated as
/// ready, so the multiplex keeps serving the other stream when only one
/// output has been closed (spec.md §9 Open Question). Fails with
/// [`Error::StreamClosed`] only when both ends are the null sentinel.
pub fn wait(out: &Handle, err: &Handle) -> Result<Ready> {
    imp::wait(out, err)
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::os::unix::io::RawFd;

    pub fn create() -> Result<(Handle, Handle)> {
        let mut fds = [0 as RawFd; 2];

        let rv = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        if rv == -1 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return Err(match errno {
                libc::ENFILE | libc::EMFILE => Error::PipeLimitReached,
                other => Error::System(std::io::Error::from_raw_os_error(other)),
            });
        }

        tracing::debug!(read_fd = fds[0], write_fd = fds[1], "pipe created");
        Ok((Handle::new(fds[0]), Handle::new(fds[1])))
    }

    pub fn read(end: &Handle, buffer: &mut [u8]) -> Result<usize> {
        loop {
            let rv = unsafe {
                libc::read(
                    end.raw(),
                    buffer.as_mut_ptr() as *mut libc::c_void,
                    buffer.len(),
                )
            };

            if rv == 0 {
                return Err(Error::StreamClosed);
            }

            if rv < 0 {
                let errno = std::io::Error::last_os_error()
                    .raw_os_error()
                    .unwrap_or(0);
                match errno {
                    libc::EINTR => return Err(Error::Interrupted),
                    other => return Err(Error::System(std::io::Error::from_raw_os_error(other))),
                }
            }

            return Ok(rv as usize);
        }
    }

    pub fn write(end: &Handle, buffer: &[u8]) -> Result<usize> {
        let rv = unsafe {
            libc::write(
                end.raw(),
                buffer.as_ptr() as *const libc::c_void,
                buffer.len(),
            )
        };

        if rv < 0 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return Err(match errno {
                libc::EPIPE => Error::StreamClosed,
                libc::EINTR => Error::Interrupted,
                other => Error::System(std::io::Error::from_raw_os_error(other)),
            });
        }

        let written = rv as usize;
        if written < buffer.len() {
            return Err(Error::PartialWrite {
                written,
                requested: buffer.len(),
            });
        }

        Ok(written)
    }

    pub fn wait(out: &Handle, err: &Handle) -> Result<Ready> {
        if out.is_null() && err.is_null() {
            return Err(Error::StreamClosed);
        }

        let mut fds = Vec::with_capacity(2);
        if !out.is_null() {
            fds.push(libc::pollfd {
                fd: out.raw(),
                events: libc::POLLIN,
                revents: 0,
            });
        }
        if !err.is_null() {
            fds.push(libc::pollfd {
                fd: err.raw(),
                events: libc::POLLIN,
                revents: 0,
            });
        }

        let rv = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, -1) };
        if rv < 0 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return Err(match errno {
                libc::EINTR => Error::Interrupted,
                other => Error::System(std::io::Error::from_raw_os_error(other)),
            });
        }

        for pfd in &fds {
            if pfd.revents != 0 {
                if pfd.fd == out.raw() {
                    return Ok(Ready::Out);
                }
                return Ok(Ready::Err);
            }
        }

        // poll(2) guarantees at least one pollfd has revents set when it
        // returns > 0 with an infinite timeout; this is unreachable in
        // practice but avoids ever returning a bogus Ready value.
        Err(Error::System(std::io::Error::from_raw_os_error(libc::EAGAIN)))
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use windows::Win32::Foundation::{GetLastError, BOOL, HANDLE};
    use windows::Win32::Security::SECURITY_ATTRIBUTES;
    use windows::Win32::System::Pipes::CreatePipe;
    use windows::Win32::Storage::FileSystem::{ReadFile, WriteFile};

    pub fn create() -> Result<(Handle, Handle)> {
        // Pipes are created non-inheritable by default; the spawner marks
        // the specific child-side handle inheritable just before
        // `CreateProcessW` via the explicit handle-inherit-list mechanism
        // (see `crate::spawn::windows`), matching spec.md §3.
        let mut attrs = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: BOOL(0),
        };

        let mut read_handle = HANDLE::default();
        let mut write_handle = HANDLE::default();

        let ok = unsafe { CreatePipe(&mut read_handle, &mut write_handle, Some(&mut attrs), 0) };
        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(Error::from_win32(code));
        }

        Ok((Handle::new(read_handle), Handle::new(write_handle)))
    }

    pub fn read(end: &Handle, buffer: &mut [u8]) -> Result<usize> {
        let mut read_bytes: u32 = 0;
        let ok = unsafe {
            ReadFile(
                end.raw(),
                Some(buffer),
                Some(&mut read_bytes),
                None,
            )
        };

        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(match code {
                // ERROR_BROKEN_PIPE: the write end was closed.
                109 => Error::StreamClosed,
                other => Error::from_win32(other),
            });
        }

        if read_bytes == 0 {
            return Err(Error::StreamClosed);
        }

        Ok(read_bytes as usize)
    }

    pub fn write(end: &Handle, buffer: &[u8]) -> Result<usize> {
        let mut written: u32 = 0;
        let ok = unsafe { WriteFile(end.raw(), Some(buffer), Some(&mut written), None) };

        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(match code {
                109 | 232 => Error::StreamClosed, // BROKEN_PIPE / NO_DATA
                other => Error::from_win32(other),
            });
        }

        let written = written as usize;
        if written < buffer.len() {
            return Err(Error::PartialWrite {
                written,
                requested: buffer.len(),
            });
        }

        Ok(written)
    }

    /// Windows has no equivalent of `poll`/`select` over anonymous pipe
    /// handles, so the multiplex falls back to alternately peeking each
    /// end with `PeekNamedPipe` and sleeping briefly between rounds.
    pub fn wait(out: &Handle, err: &Handle) -> Result<Ready> {
        use windows::Win32::System::Pipes::PeekNamedPipe;

        if out.is_null() && err.is_null() {
            return Err(Error::StreamClosed);
        }

        fn peek_has_data_or_closed(end: &Handle) -> Result<bool> {
            let mut available: u32 = 0;
            let ok = unsafe {
                PeekNamedPipe(
                    end.raw(),
                    None,
                    0,
                    None,
                    Some(&mut available),
                    None,
                )
            };
            if ok.is_err() {
                let code = unsafe { GetLastError().0 };
                return match code {
                    109 => Ok(true), // broken pipe: report ready so the caller observes closure
                    other => Err(Error::from_win32(other)),
                };
            }
            Ok(available > 0)
        }

        loop {
            if !out.is_null() && peek_has_data_or_closed(out)? {
                return Ok(Ready::Out);
            }
            if !err.is_null() && peek_has_data_or_closed(err)? {
                return Ok(Ready::Err);
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_write_then_read() {
        let (read_end, write_end) = create().unwrap();
        let n = write(&write_end, b"hello").unwrap();
        assert_eq!(n, 5);

        let mut buf = [0u8; 16];
        let n = read(&read_end, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_reports_stream_closed_after_write_end_drops() {
        let (read_end, write_end) = create().unwrap();
        drop(write_end);

        let mut buf = [0u8; 16];
        let err = read(&read_end, &mut buf).unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[test]
    fn wait_reports_stream_closed_when_both_ends_null() {
        let err = wait(&Handle::null(), &Handle::null()).unwrap_err();
        assert!(matches!(err, Error::StreamClosed));
    }

    #[test]
    fn wait_returns_the_ready_end() {
        let (out_read, out_write) = create().unwrap();
        let (err_read, _err_write) = create().unwrap();

        write(&out_write, b"x").unwrap();

        let ready = wait(&out_read, &err_read).unwrap();
        assert_eq!(ready, Ready::Out);
    }
}
