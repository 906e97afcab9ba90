//! Error taxonomy shared across every platform backend.
//!
//! The variants mirror the kinds a caller needs to branch on (timeouts,
//! stream closure, interrupted syscalls, the exec-family failure modes) and
//! collapse everything else into [`Error::System`], which preserves the raw
//! OS error for callers that need to inspect it (see
//! [`Error::raw_os_error`]).

use std::io;

/// Result alias used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A timed operation (`wait`, `stop`) expired before completion.
    #[error("operation timed out")]
    WaitTimeout,

    /// The peer closed its end of the pipe. For reads this is reported only
    /// after all buffered data has been consumed.
    #[error("stream closed")]
    StreamClosed,

    /// A write transferred fewer bytes than requested with no other error
    /// present; the caller must retry with the remaining bytes.
    #[error("partial write of {written} of {requested} bytes")]
    PartialWrite { written: usize, requested: usize },

    /// A blocking OS call was interrupted by a signal.
    #[error("operation interrupted")]
    Interrupted,

    /// The per-process or system-wide open file descriptor ceiling was hit
    /// while creating a pipe.
    #[error("pipe limit reached")]
    PipeLimitReached,

    /// The process or thread ceiling was hit while forking/creating a
    /// process.
    #[error("process limit reached")]
    ProcessLimitReached,

    /// A kernel- or user-space allocation failed.
    #[error("not enough memory")]
    NotEnoughMemory,

    /// A string supplied at the OS boundary could not be converted to the
    /// platform's required encoding (UTF-16 on Windows).
    #[error("invalid unicode in argument, environment, or path")]
    InvalidUnicode,

    /// The exec-family resolver (POSIX) or `CreateProcessW` (Windows) failed
    /// because the caller lacked permission to execute the program.
    #[error("permission denied")]
    PermissionDenied,

    /// Too many levels of symbolic links were encountered resolving the
    /// program path.
    #[error("symlink loop resolving program path")]
    SymlinkLoop,

    /// The program could not be found.
    #[error("program not found")]
    FileNotFound,

    /// A path component exceeded the platform's maximum name length.
    #[error("name too long")]
    NameTooLong,

    /// The combined argument vector (and, on POSIX, environment) exceeded
    /// the platform's maximum argument list size.
    #[error("argument list too long")]
    ArgsTooLong,

    /// The resolved program exists but is not executable.
    #[error("not executable")]
    NotExecutable,

    /// An unclassified OS error. The original [`io::Error`] is preserved so
    /// callers can retrieve the raw OS error code.
    #[error(transparent)]
    System(#[from] io::Error),
}

impl Error {
    /// Returns the raw OS error code carried by this error, if any.
    ///
    /// Only [`Error::System`] carries one; every other variant is already a
    /// library-level classification and returns `None`.
    pub fn raw_os_error(&self) -> Option<i32> {
        match self {
            Error::System(e) => e.raw_os_error(),
            _ => None,
        }
    }

    /// Classifies a POSIX `errno` value observed either from a pre-exec
    /// child failure (see [`crate::spawn`]) or from a direct syscall
    /// failure, following spec.md §4.4 / §7's exec-family mapping.
    #[cfg(unix)]
    pub(crate) fn from_errno(errno: i32) -> Error {
        match errno {
            libc::EACCES | libc::EPERM => Error::PermissionDenied,
            libc::ELOOP => Error::SymlinkLoop,
            libc::ENOENT | libc::ENOTDIR => Error::FileNotFound,
            libc::ENAMETOOLONG => Error::NameTooLong,
            libc::E2BIG => Error::ArgsTooLong,
            libc::ENOEXEC => Error::NotExecutable,
            libc::ENOMEM => Error::NotEnoughMemory,
            libc::EMFILE | libc::ENFILE => Error::PipeLimitReached,
            libc::EAGAIN => Error::ProcessLimitReached,
            libc::EINTR => Error::Interrupted,
            other => Error::System(io::Error::from_raw_os_error(other)),
        }
    }

    /// Maps a Windows system error code observed from `CreateProcessW` to
    /// the taxonomy, per spec.md §4.5 step 7.
    #[cfg(windows)]
    pub(crate) fn from_win32(code: u32) -> Error {
        use windows::Win32::Foundation::{
            ERROR_ACCESS_DENIED, ERROR_DIRECTORY, ERROR_FILENAME_EXCED_RANGE, ERROR_FILE_NOT_FOUND,
            ERROR_NOT_ENOUGH_MEMORY, ERROR_NO_UNICODE_TRANSLATION, ERROR_OUTOFMEMORY,
            ERROR_PATH_NOT_FOUND,
        };

        match windows::core::HRESULT::from_win32(code) {
            hr if hr == ERROR_FILE_NOT_FOUND.to_hresult() => Error::FileNotFound,
            hr if hr == ERROR_PATH_NOT_FOUND.to_hresult() => Error::FileNotFound,
            hr if hr == ERROR_DIRECTORY.to_hresult() => Error::FileNotFound,
            hr if hr == ERROR_ACCESS_DENIED.to_hresult() => Error::PermissionDenied,
            hr if hr == ERROR_FILENAME_EXCED_RANGE.to_hresult() => Error::NameTooLong,
            hr if hr == ERROR_NOT_ENOUGH_MEMORY.to_hresult() => Error::NotEnoughMemory,
            hr if hr == ERROR_OUTOFMEMORY.to_hresult() => Error::NotEnoughMemory,
            hr if hr == ERROR_NO_UNICODE_TRANSLATION.to_hresult() => Error::InvalidUnicode,
            _ => Error::System(io::Error::from_raw_os_error(code as i32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    #[test]
    fn errno_mapping_covers_exec_family() {
        assert!(matches!(Error::from_errno(libc::ENOENT), Error::FileNotFound));
        assert!(matches!(Error::from_errno(libc::EACCES), Error::PermissionDenied));
        assert!(matches!(Error::from_errno(libc::ELOOP), Error::SymlinkLoop));
        assert!(matches!(Error::from_errno(libc::ENOEXEC), Error::NotExecutable));
        assert!(matches!(Error::from_errno(libc::E2BIG), Error::ArgsTooLong));
    }

    #[test]
    fn system_error_preserves_raw_os_error() {
        let err = Error::System(io::Error::from_raw_os_error(42));
        assert_eq!(err.raw_os_error(), Some(42));
    }

    #[test]
    fn classified_variants_have_no_raw_os_error() {
        assert_eq!(Error::WaitTimeout.raw_os_error(), None);
    }
}
