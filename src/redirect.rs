//! Redirection planning: turns a per-stream [`Mode`] into a `(parent, child)`
//! [`Handle`] pair (spec.md §3 "RedirectionPlan", §4.3).

use crate::error::Result;
use crate::handle::Handle;
use crate::pipe;

/// Which of the three standard streams a redirection applies to. Only
/// relevant on POSIX, where INHERIT must know which of stdin/stdout/stderr
/// to duplicate, and DISCARD must know which direction to open
/// `/dev/null` in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stream {
    In,
    Out,
    Err,
}

/// How a single stream is redirected when starting a child.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Create a fresh pipe; the parent keeps one end, the child gets the
    /// other.
    #[default]
    Pipe,
    /// Duplicate the parent's own stream into the child. Falls back to
    /// [`Mode::Discard`] if the parent's stream is itself closed.
    Inherit,
    /// Open the platform null device (`/dev/null`, `NUL`).
    Discard,
}

/// A `(parent_handle, child_handle)` pair for one stream.
///
/// `parent_handle` is owned only when the mode was [`Mode::Pipe`]; it is the
/// null sentinel otherwise. `child_handle` is owned transiently: the
/// spawner releases it unconditionally after process creation, whether
/// creation succeeded or failed, because by then it has either been
/// duplicated into the child's descriptor table (POSIX) or captured by the
/// Windows inherit list.
pub struct Redirected {
    pub parent: Handle,
    pub child: Handle,
}

/// Produces the `(parent, child)` pair for `stream` redirected per `mode`.
pub fn plan(stream: Stream, mode: Mode) -> Result<Redirected> {
    match mode {
        Mode::Pipe => plan_pipe(stream),
        Mode::Inherit => plan_inherit(stream),
        Mode::Discard => plan_discard(stream),
    }
}

fn plan_pipe(stream: Stream) -> Result<Redirected> {
    let (read_end, write_end) = pipe::create()?;

    // IN: the parent writes, so it keeps the write end and the child gets
    // the read end. OUT/ERR: the parent reads, so it keeps the read end.
    Ok(match stream {
        Stream::In => Redirected {
            parent: write_end,
            child: read_end,
        },
        Stream::Out | Stream::Err => Redirected {
            parent: read_end,
            child: write_end,
        },
    })
}

fn plan_inherit(stream: Stream) -> Result<Redirected> {
    match imp::duplicate_standard_stream(stream) {
        Ok(child) => Ok(Redirected {
            parent: Handle::null(),
            child,
        }),
        Err(_) => {
            // The parent's own stream is closed; fall back transparently to
            // DISCARD per spec.md §4.3.
            tracing::debug!(?stream, "inherit target closed, falling back to discard");
            plan_discard(stream)
        }
    }
}

fn plan_discard(stream: Stream) -> Result<Redirected> {
    let child = imp::open_null(stream)?;
    Ok(Redirected {
        parent: Handle::null(),
        child,
    })
}

#[cfg(unix)]
mod imp {
    use super::*;
    use crate::error::Error;
    use std::ffi::CString;

    pub fn duplicate_standard_stream(stream: Stream) -> Result<Handle> {
        let fd = match stream {
            Stream::In => libc::STDIN_FILENO,
            Stream::Out => libc::STDOUT_FILENO,
            Stream::Err => libc::STDERR_FILENO,
        };

        // `fcntl(fd, F_GETFD)` cheaply confirms the descriptor is open
        // before we try to duplicate it, mirroring the original's
        // `fileno()`-failure path for a closed standard stream.
        let check = unsafe { libc::fcntl(fd, libc::F_GETFD) };
        if check == -1 {
            return Err(Error::StreamClosed);
        }

        let dup = unsafe { libc::dup(fd) };
        if dup == -1 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return Err(Error::System(std::io::Error::from_raw_os_error(errno)));
        }

        Ok(Handle::new(dup))
    }

    /// Opens `/dev/null` for IN (read-only) or OUT/ERR (write-only), with
    /// `O_CREAT | O_CLOEXEC` and mode `0640`, matching
    /// `examples/original_source/reproc/src/redirect.posix.c`'s
    /// `redirect_path` exactly (see SPEC_FULL.md §4.2).
    pub fn open_null(stream: Stream) -> Result<Handle> {
        let mode = match stream {
            Stream::In => libc::O_RDONLY,
            Stream::Out | Stream::Err => libc::O_WRONLY,
        };

        let path = CString::new("/dev/null").expect("no interior NUL");
        let fd = unsafe {
            libc::open(
                path.as_ptr(),
                mode | libc::O_CREAT | libc::O_CLOEXEC,
                0o640,
            )
        };

        if fd == -1 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return Err(Error::System(std::io::Error::from_raw_os_error(errno)));
        }

        Ok(Handle::new(fd))
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use crate::error::Error;
    use windows::Win32::Foundation::{GetLastError, HANDLE};
    use windows::Win32::Security::SECURITY_ATTRIBUTES;
    use windows::Win32::Storage::FileSystem::{
        CreateFileW, FILE_ATTRIBUTE_NORMAL, FILE_GENERIC_READ, FILE_GENERIC_WRITE, FILE_SHARE_READ,
        FILE_SHARE_WRITE, OPEN_ALWAYS,
    };
    use windows::Win32::System::Console::{
        GetStdHandle, STD_ERROR_HANDLE, STD_INPUT_HANDLE, STD_OUTPUT_HANDLE,
    };
    use windows::Win32::System::Threading::{
        DuplicateHandle, GetCurrentProcess, DUPLICATE_SAME_ACCESS,
    };
    use windows::core::PCWSTR;

    pub fn duplicate_standard_stream(stream: Stream) -> Result<Handle> {
        let which = match stream {
            Stream::In => STD_INPUT_HANDLE,
            Stream::Out => STD_OUTPUT_HANDLE,
            Stream::Err => STD_ERROR_HANDLE,
        };

        let source = unsafe { GetStdHandle(which) }.map_err(|_| Error::StreamClosed)?;
        if source.is_invalid() || source.0.is_null() {
            return Err(Error::StreamClosed);
        }

        // `GetStdHandle` hands back the parent's own standard handle, not a
        // duplicate. The spawner closes whatever child handle it is given
        // once the child has been created, so passing that handle through
        // unchanged would close the parent's real stdin/stdout/stderr.
        // `DuplicateHandle` onto a freshly owned, inheritable handle (spec.md
        // §4.3 "duplicate ... into a freshly owned handle") is the Windows
        // counterpart of the POSIX path's plain `dup`.
        let current_process = unsafe { GetCurrentProcess() };
        let mut duplicated = HANDLE::default();
        let ok = unsafe {
            DuplicateHandle(
                current_process,
                source,
                current_process,
                &mut duplicated,
                0,
                true,
                DUPLICATE_SAME_ACCESS,
            )
        };

        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(Error::from_win32(code));
        }

        Ok(Handle::new(duplicated))
    }

    pub fn open_null(stream: Stream) -> Result<Handle> {
        let access = match stream {
            Stream::In => FILE_GENERIC_READ.0,
            Stream::Out | Stream::Err => FILE_GENERIC_WRITE.0,
        };

        let mut wpath: Vec<u16> = "NUL\0".encode_utf16().collect();
        let attrs = SECURITY_ATTRIBUTES {
            nLength: std::mem::size_of::<SECURITY_ATTRIBUTES>() as u32,
            lpSecurityDescriptor: std::ptr::null_mut(),
            bInheritHandle: windows::Win32::Foundation::BOOL(0),
        };

        let handle: std::result::Result<HANDLE, _> = unsafe {
            CreateFileW(
                PCWSTR(wpath.as_mut_ptr()),
                access,
                FILE_SHARE_READ | FILE_SHARE_WRITE,
                Some(&attrs),
                OPEN_ALWAYS,
                FILE_ATTRIBUTE_NORMAL,
                None,
            )
        };

        match handle {
            Ok(h) => Ok(Handle::new(h)),
            Err(_) => {
                let code = unsafe { GetLastError().0 };
                Err(Error::from_win32(code))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipe_mode_keeps_write_end_for_stdin() {
        let redirected = plan(Stream::In, Mode::Pipe).unwrap();
        assert!(!redirected.parent.is_null());
        assert!(!redirected.child.is_null());
    }

    #[test]
    fn discard_mode_has_no_parent_handle() {
        let redirected = plan(Stream::Out, Mode::Discard).unwrap();
        assert!(redirected.parent.is_null());
        assert!(!redirected.child.is_null());
    }
}
