//! Process creation (spec.md §4.4 POSIX, §4.5 Windows).
//!
//! Both platform backends share the same contract: given an argument
//! vector, optional working directory and environment, and the child half
//! of each stream's [`crate::redirect::Redirected`] pair for IN/OUT/ERR,
//! produce a started [`Spawned`] process or a mapped error. The caller (the
//! façade in [`crate::process`]) has already built the redirection plan and
//! keeps the parent halves itself; this module only turns the child halves
//! into a running child.

use crate::error::Result;
use crate::handle::Handle;

#[cfg(unix)]
mod unix;
#[cfg(windows)]
mod windows;

/// Platform process identifier type.
#[cfg(unix)]
pub type Pid = libc::pid_t;
#[cfg(windows)]
pub type Pid = u32;

/// A process that has successfully started.
pub struct Spawned {
    pub pid: Pid,
    /// The Windows process handle; absent on POSIX, where the pid alone
    /// suffices for `waitpid` and `kill`.
    #[cfg(windows)]
    pub handle: crate::handle::Handle,
}

/// What program to run and how, independent of redirection.
pub struct SpawnOptions<'a> {
    pub argv: &'a [String],
    pub working_directory: Option<&'a str>,
    /// `None` means inherit the parent's environment unmodified; `Some`
    /// replaces it entirely with the given `NAME=VALUE` pairs.
    pub environment: Option<&'a [String]>,
}

/// Creates the child process described by `options`, wiring `stdin`,
/// `stdout`, and `stderr` to the given child-side handles (the `child` half
/// of each stream's [`crate::redirect::Redirected`] pair; the caller keeps
/// the `parent` half itself). These handles are consumed unconditionally: on
/// every exit path, success or failure, ownership passes to this call and
/// they are released before it returns.
pub fn spawn(
    options: &SpawnOptions<'_>,
    stdin: Handle,
    stdout: Handle,
    stderr: Handle,
) -> Result<Spawned> {
    #[cfg(unix)]
    {
        unix::spawn(options, stdin, stdout, stderr)
    }
    #[cfg(windows)]
    {
        windows::spawn(options, stdin, stdout, stderr)
    }
}
