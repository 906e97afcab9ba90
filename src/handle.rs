//! Owning wrapper over a platform descriptor (spec.md §3 "Handle", §4.1).
//!
//! Invariants upheld here: at most one owner at a time, the null sentinel
//! means "not owned", release is idempotent, and release never clobbers the
//! caller's ambient OS error (`errno` / `GetLastError`).

#[cfg(unix)]
pub type Raw = std::os::unix::io::RawFd;
#[cfg(windows)]
pub type Raw = windows::Win32::Foundation::HANDLE;

/// The "not owned" sentinel for each platform: `0` on POSIX (file descriptor
/// 0 is never reassigned by `pipe()`/`open()` because it is already
/// stdin), `INVALID_HANDLE_VALUE` on Windows.
#[cfg(unix)]
pub const NULL: Raw = 0;
#[cfg(windows)]
pub const NULL: Raw = windows::Win32::Foundation::INVALID_HANDLE_VALUE;

/// An owning handle to a kernel object. Dropping it releases the underlying
/// resource exactly once.
#[derive(Debug)]
pub struct Handle(Raw);

impl Handle {
    /// Wraps a raw platform handle. The caller transfers ownership.
    pub fn new(raw: Raw) -> Self {
        Handle(raw)
    }

    /// The null sentinel, representing "not owned".
    pub fn null() -> Self {
        Handle(NULL)
    }

    /// True when this handle does not own a resource.
    pub fn is_null(&self) -> bool {
        self.0 == NULL
    }

    /// Borrows the raw platform value without transferring ownership.
    pub fn raw(&self) -> Raw {
        self.0
    }

    /// Releases ownership of the raw value to the caller without closing it.
    /// The `Handle` becomes the null sentinel.
    pub fn into_raw(mut self) -> Raw {
        std::mem::replace(&mut self.0, NULL)
    }

    /// Closes the handle now rather than waiting for `Drop`, so callers can
    /// observe and propagate close-time errors when they care to (most
    /// callers don't: close failures on an otherwise-valid handle aren't
    /// actionable).
    pub fn release(&mut self) {
        release_raw(&mut self.0);
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Releases `raw` if it isn't already the null sentinel, then resets it to
/// null. Always restores the caller's ambient OS error around the close
/// syscall so a close on an already-invalid descriptor never overwrites the
/// error the caller actually cares about.
fn release_raw(raw: &mut Raw) {
    if *raw == NULL {
        return;
    }

    #[cfg(unix)]
    {
        let saved_errno = errno_now();
        unsafe { libc::close(*raw) };
        set_errno(saved_errno);
    }

    #[cfg(windows)]
    {
        use windows::Win32::Foundation::{CloseHandle, GetLastError, SetLastError};
        let saved = unsafe { GetLastError() };
        unsafe { let _ = CloseHandle(*raw); }
        unsafe { SetLastError(saved) };
    }

    *raw = NULL;
}

#[cfg(unix)]
fn errno_now() -> i32 {
    std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(0)
}

#[cfg(target_os = "linux")]
fn set_errno(value: i32) {
    unsafe {
        *libc::__errno_location() = value;
    }
}

#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "openbsd",
    target_os = "netbsd"
))]
fn set_errno(value: i32) {
    unsafe {
        *libc::__error() = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_handle_release_is_a_no_op() {
        let mut h = Handle::null();
        h.release();
        assert!(h.is_null());
    }

    #[cfg(unix)]
    #[test]
    fn into_raw_leaves_handle_null_without_closing() {
        // dup stdin to get a harmless, always-valid descriptor to test with.
        let dup = unsafe { libc::dup(0) };
        assert!(dup >= 0);
        let h = Handle::new(dup);
        let raw = h.into_raw();
        assert_eq!(raw, dup);
        unsafe { libc::close(raw) };
    }

    #[cfg(unix)]
    #[test]
    fn drop_closes_the_descriptor() {
        let dup = unsafe { libc::dup(0) };
        assert!(dup >= 0);
        {
            let _h = Handle::new(dup);
        }
        // The descriptor should now be closed; fcntl(F_GETFD) on it fails.
        let rv = unsafe { libc::fcntl(dup, libc::F_GETFD) };
        assert_eq!(rv, -1);
    }
}
