//! Wait, terminate, kill, and the composed stop sequence (spec.md §4.6).
//! The POSIX wait blocks `SIGCHLD` before probing so there is no race
//! between checking whether the child has already exited and waiting for
//! the signal that says so; termination and forced kill use the matching
//! signal/Win32-API pair for each platform.

use crate::error::{Error, Result};
use crate::spawn::Pid;
use std::time::Duration;

/// A single step of a [`stop`] sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Noop,
    Wait,
    Terminate,
    Kill,
}

/// One (action, timeout) pair. `timeout` of `None` means block forever.
#[derive(Debug, Clone, Copy)]
pub struct StopAction {
    pub action: Action,
    pub timeout: Option<Duration>,
}

/// The exit status harvested from a terminated child: the program's own
/// exit code on normal termination, or the terminating signal number on
/// POSIX signal termination, or 137 for a Windows forceful kill (parity
/// with POSIX `SIGKILL`, spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus(pub i64);

/// Blocks the calling thread until `pid` has exited or `timeout` elapses.
/// `timeout` of `None` blocks forever; `Some(Duration::ZERO)` is a
/// non-blocking probe.
pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<ExitStatus> {
    tracing::debug!(pid, ?timeout, "waiting for process");
    let result = imp::wait(pid, timeout);
    match &result {
        Ok(status) => tracing::debug!(pid, status = status.0, "process exited"),
        Err(Error::WaitTimeout) => {}
        Err(e) => tracing::warn!(pid, error = %e, "wait failed"),
    }
    result
}

/// Sends the graceful-termination signal: POSIX `SIGTERM`, Windows
/// `CTRL_BREAK_EVENT` to the child's own process group.
pub fn terminate(pid: Pid) -> Result<()> {
    tracing::info!(pid, "sending terminate signal to process");
    let result = imp::terminate(pid);
    if let Err(e) = &result {
        tracing::warn!(pid, error = %e, "terminate failed");
    }
    result
}

/// Sends the forceful-termination signal: POSIX `SIGKILL`, Windows
/// `TerminateProcess` with exit code 137.
pub fn kill(pid: Pid) -> Result<()> {
    tracing::warn!(pid, "sending kill signal to process");
    let result = imp::kill(pid);
    if let Err(e) = &result {
        tracing::warn!(pid, error = %e, "kill failed");
    }
    result
}

/// Canonicalizes an all-[`Action::Noop`] sequence to a single unconditional
/// wait, so destruction can never leak a running child (spec.md §3
/// "StopActions" invariant).
fn canonicalize(sequence: &[StopAction; 3]) -> [StopAction; 3] {
    let all_noop = sequence.iter().all(|s| s.action == Action::Noop);
    if !all_noop {
        return *sequence;
    }

    [
        StopAction {
            action: Action::Wait,
            timeout: None,
        },
        StopAction {
            action: Action::Noop,
            timeout: None,
        },
        StopAction {
            action: Action::Noop,
            timeout: None,
        },
    ]
}

/// Runs a three-step stop sequence left to right (spec.md §4.6). For each
/// step: WAIT waits with the step's own timeout; TERMINATE/KILL send their
/// signal and then wait; NOOP sends nothing and only probes non-blockingly
/// (the spec's "mark the overall outcome as success and continue" is
/// realized here as a zero-timeout probe rather than a fabricated exit
/// status — see DESIGN.md). The first step whose wait observes the child
/// has exited ends the sequence. A step reporting [`Error::WaitTimeout`]
/// advances to the next step; any other error aborts the sequence.
pub fn stop(pid: Pid, sequence: [StopAction; 3]) -> Result<ExitStatus> {
    let sequence = canonicalize(&sequence);

    for step in sequence {
        let step_timeout = match step.action {
            Action::Noop => {
                // No signal sent; just check whether the child is already
                // gone before moving on.
                Some(Duration::ZERO)
            }
            Action::Wait => step.timeout,
            Action::Terminate => {
                terminate(pid)?;
                step.timeout
            }
            Action::Kill => {
                kill(pid)?;
                step.timeout
            }
        };

        match wait(pid, step_timeout) {
            Ok(status) => return Ok(status),
            Err(Error::WaitTimeout) => continue,
            Err(other) => return Err(other),
        }
    }

    Err(Error::WaitTimeout)
}

#[cfg(unix)]
mod imp {
    use super::*;
    use std::mem::MaybeUninit;
    use std::time::Instant;

    pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<ExitStatus> {
        unsafe {
            let mut mask: libc::sigset_t = std::mem::zeroed();
            libc::sigemptyset(&mut mask);
            libc::sigaddset(&mut mask, libc::SIGCHLD);

            let mut old_mask: libc::sigset_t = std::mem::zeroed();
            if libc::pthread_sigmask(libc::SIG_BLOCK, &mask, &mut old_mask) != 0 {
                return Err(Error::System(std::io::Error::last_os_error()));
            }

            let result = wait_locked(pid, timeout, &mask);

            libc::pthread_sigmask(libc::SIG_SETMASK, &old_mask, std::ptr::null_mut());

            result
        }
    }

    unsafe fn wait_locked(
        pid: Pid,
        timeout: Option<Duration>,
        mask: &libc::sigset_t,
    ) -> Result<ExitStatus> {
        let mut remaining = timeout;

        loop {
            if let Some(status) = try_reap(pid)? {
                return Ok(status);
            }

            if remaining == Some(Duration::ZERO) {
                return Err(Error::WaitTimeout);
            }

            let before = Instant::now();
            let woke = unsafe { signal_wait(mask, remaining) };

            match woke {
                Ok(()) => {}
                Err(Error::WaitTimeout) => return Err(Error::WaitTimeout),
                Err(other) => return Err(other),
            }

            if let Some(t) = remaining {
                let elapsed = before.elapsed();
                remaining = Some(t.saturating_sub(elapsed));
            }
        }
    }

    fn try_reap(pid: Pid) -> Result<Option<ExitStatus>> {
        let mut status: libc::c_int = 0;
        let rv = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };

        if rv == -1 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            // ECHILD means a previous wait already reaped the process; treat
            // that like success with a status we can no longer recover and
            // let the caller fall back to its cached status.
            if errno == libc::ECHILD {
                return Ok(Some(ExitStatus(0)));
            }
            return Err(Error::from_errno(errno));
        }

        if rv == 0 {
            return Ok(None);
        }

        Ok(Some(parse_exit_status(status)))
    }

    fn parse_exit_status(status: libc::c_int) -> ExitStatus {
        unsafe {
            if libc::WIFEXITED(status) {
                ExitStatus(libc::WEXITSTATUS(status) as i64)
            } else if libc::WIFSIGNALED(status) {
                ExitStatus(libc::WTERMSIG(status) as i64)
            } else {
                ExitStatus(status as i64)
            }
        }
    }

    /// Blocks until `SIGCHLD` is delivered or `timeout` elapses, using
    /// `sigtimedwait` (or `kqueue`/`EVFILT_SIGNAL` on Apple platforms, which
    /// lack `sigtimedwait`), per
    /// `examples/original_source/reproc/src/posix/process.c`'s
    /// `signal_wait`.
    #[cfg(not(any(target_os = "macos", target_os = "ios")))]
    unsafe fn signal_wait(mask: &libc::sigset_t, timeout: Option<Duration>) -> Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });

        let rv = unsafe {
            match &ts {
                Some(ts) => libc::sigtimedwait(mask, std::ptr::null_mut(), ts),
                None => libc::sigwaitinfo(mask, std::ptr::null_mut()),
            }
        };

        if rv == -1 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            return match errno {
                libc::EAGAIN => Err(Error::WaitTimeout),
                libc::EINTR => Ok(()), // spurious wake; caller re-checks exit_check
                other => Err(Error::from_errno(other)),
            };
        }

        Ok(())
    }

    #[cfg(any(target_os = "macos", target_os = "ios"))]
    unsafe fn signal_wait(_mask: &libc::sigset_t, timeout: Option<Duration>) -> Result<()> {
        let queue = unsafe { libc::kqueue() };
        if queue == -1 {
            return Err(Error::System(std::io::Error::last_os_error()));
        }

        let mut event: MaybeUninit<libc::kevent> = MaybeUninit::zeroed();
        unsafe {
            libc::EV_SET(
                event.as_mut_ptr(),
                libc::SIGCHLD as libc::uintptr_t,
                libc::EVFILT_SIGNAL,
                libc::EV_ADD,
                0,
                0,
                std::ptr::null_mut(),
            );
        }

        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts
            .as_ref()
            .map(|t| t as *const libc::timespec)
            .unwrap_or(std::ptr::null());

        let mut out: MaybeUninit<libc::kevent> = MaybeUninit::zeroed();
        let rv = unsafe {
            libc::kevent(queue, event.as_ptr(), 1, out.as_mut_ptr(), 1, ts_ptr)
        };

        unsafe { libc::close(queue) };

        if rv == 0 {
            return Err(Error::WaitTimeout);
        }
        if rv < 0 {
            return Err(Error::System(std::io::Error::last_os_error()));
        }

        Ok(())
    }

    pub fn terminate(pid: Pid) -> Result<()> {
        let rv = unsafe { libc::kill(pid, libc::SIGTERM) };
        if rv == -1 {
            return Err(Error::System(std::io::Error::last_os_error()));
        }
        Ok(())
    }

    pub fn kill(pid: Pid) -> Result<()> {
        let rv = unsafe { libc::kill(pid, libc::SIGKILL) };
        if rv == -1 {
            return Err(Error::System(std::io::Error::last_os_error()));
        }
        Ok(())
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use windows::Win32::Foundation::{GetLastError, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
    use windows::Win32::System::Console::GenerateConsoleCtrlEvent;
    use windows::Win32::System::Console::CTRL_BREAK_EVENT;
    use windows::Win32::System::Threading::{
        GetExitCodeProcess, OpenProcess, TerminateProcess, WaitForSingleObject,
        PROCESS_QUERY_LIMITED_INFORMATION, PROCESS_SYNCHRONIZE, PROCESS_TERMINATE,
    };

    fn open(pid: Pid, access: windows::Win32::System::Threading::PROCESS_ACCESS_RIGHTS) -> Result<HANDLE> {
        let handle = unsafe { OpenProcess(access, false, pid) };
        handle.map_err(|_| Error::from_win32(unsafe { GetLastError().0 }))
    }

    pub fn wait(pid: Pid, timeout: Option<Duration>) -> Result<ExitStatus> {
        let handle = open(pid, PROCESS_QUERY_LIMITED_INFORMATION | PROCESS_SYNCHRONIZE)?;

        let millis = match timeout {
            None => u32::MAX,
            Some(d) => d.as_millis().min(u32::MAX as u128) as u32,
        };

        let rv = unsafe { WaitForSingleObject(handle, millis) };

        if rv == WAIT_TIMEOUT {
            unsafe { let _ = windows::Win32::Foundation::CloseHandle(handle); }
            return Err(Error::WaitTimeout);
        }
        if rv != WAIT_OBJECT_0 {
            unsafe { let _ = windows::Win32::Foundation::CloseHandle(handle); }
            return Err(Error::System(std::io::Error::last_os_error()));
        }

        let mut code: u32 = 0;
        let ok = unsafe { GetExitCodeProcess(handle, &mut code) };
        unsafe { let _ = windows::Win32::Foundation::CloseHandle(handle); }

        if ok.is_err() {
            let err = unsafe { GetLastError().0 };
            return Err(Error::from_win32(err));
        }

        Ok(ExitStatus(code as i64))
    }

    pub fn terminate(pid: Pid) -> Result<()> {
        let ok = unsafe { GenerateConsoleCtrlEvent(CTRL_BREAK_EVENT, pid) };
        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(Error::from_win32(code));
        }
        Ok(())
    }

    pub fn kill(pid: Pid) -> Result<()> {
        let handle = open(pid, PROCESS_TERMINATE)?;
        let ok = unsafe { TerminateProcess(handle, 137) };
        unsafe { let _ = windows::Win32::Foundation::CloseHandle(handle); }

        if ok.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(Error::from_win32(code));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_noop_sequence_canonicalizes_to_unconditional_wait() {
        let sequence = [
            StopAction {
                action: Action::Noop,
                timeout: None,
            },
            StopAction {
                action: Action::Noop,
                timeout: None,
            },
            StopAction {
                action: Action::Noop,
                timeout: None,
            },
        ];

        let canonical = canonicalize(&sequence);
        assert_eq!(canonical[0].action, Action::Wait);
        assert_eq!(canonical[0].timeout, None);
    }

    #[test]
    fn non_noop_sequence_is_unchanged() {
        let sequence = [
            StopAction {
                action: Action::Terminate,
                timeout: Some(Duration::from_millis(500)),
            },
            StopAction {
                action: Action::Kill,
                timeout: Some(Duration::from_millis(500)),
            },
            StopAction {
                action: Action::Noop,
                timeout: None,
            },
        ];

        let canonical = canonicalize(&sequence);
        assert_eq!(canonical[0].action, Action::Terminate);
        assert_eq!(canonical[1].action, Action::Kill);
    }
}
