//! The public process façade (spec.md §4.7): owns the parent-side pipe
//! handles and platform process handle, and exposes start/read/write/
//! close/wait/terminate/kill/stop/destroy over a NOT_STARTED → RUNNING →
//! EXITED state machine.

use crate::error::{Error, Result};
use crate::handle::Handle;
use crate::redirect::{self, Mode, Stream};
use crate::spawn::{self, Pid, SpawnOptions};
use crate::stop::{self, Action, ExitStatus, StopAction};
use std::time::Duration;

/// Which output stream a [`Process::read`] call should service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selector {
    Out,
    Err,
    /// Blocks on whichever of OUT/ERR becomes ready first.
    Any,
}

/// Redirection modes and process-creation parameters for [`Process::start`].
pub struct Options {
    pub stdin: Mode,
    pub stdout: Mode,
    pub stderr: Mode,
    pub working_directory: Option<String>,
    /// `None` inherits the parent's environment; `Some` replaces it
    /// entirely.
    pub environment: Option<Vec<String>>,
    /// The sequence [`Process::destroy`] runs if the process is still
    /// RUNNING when destroy is called.
    pub stop_on_destroy: [StopAction; 3],
}

impl Default for Options {
    fn default() -> Self {
        Options {
            stdin: Mode::Pipe,
            stdout: Mode::Pipe,
            stderr: Mode::Pipe,
            working_directory: None,
            environment: None,
            // Terminate, then kill, each given half a second before
            // escalating, so `destroy` on a still-running process can
            // never block forever waiting on a child that ignores
            // SIGTERM/CTRL_BREAK (SPEC_FULL.md §3.3).
            stop_on_destroy: [
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
            ],
        }
    }
}

enum State {
    NotStarted,
    Running { pid: Pid },
    Exited { pid: Pid, status: ExitStatus },
    Destroyed,
}

/// A handle to a child process and its redirected standard streams.
pub struct Process {
    state: State,
    stdin: Handle,
    stdout: Handle,
    stderr: Handle,
    #[cfg(windows)]
    process_handle: Handle,
    stop_on_destroy: [StopAction; 3],
}

impl Process {
    /// Constructs a process value in the NOT_STARTED state. Performs no I/O;
    /// cannot fail (spec.md §4.7 "Failure semantics").
    pub fn new() -> Self {
        Process {
            state: State::NotStarted,
            stdin: Handle::null(),
            stdout: Handle::null(),
            stderr: Handle::null(),
            #[cfg(windows)]
            process_handle: Handle::null(),
            stop_on_destroy: Options::default().stop_on_destroy,
        }
    }

    /// Spawns `argv[0]` with the given `options`. `argv` must have at least
    /// one element. On success, transitions NOT_STARTED → RUNNING. On
    /// failure, no resources are left owned by this `Process` (spec.md §7
    /// "start either produces a RUNNING process or reclaims all partial
    /// resources").
    pub fn start(&mut self, argv: &[String], options: Options) -> Result<()> {
        if !matches!(self.state, State::NotStarted) {
            return Err(Error::System(std::io::Error::new(
                std::io::ErrorKind::Other,
                "process already started",
            )));
        }

        self.stop_on_destroy = options.stop_on_destroy;

        let stdin = redirect::plan(Stream::In, options.stdin)?;
        let stdout = redirect::plan(Stream::Out, options.stdout)?;
        let stderr = redirect::plan(Stream::Err, options.stderr)?;

        let spawn_options = SpawnOptions {
            argv,
            working_directory: options.working_directory.as_deref(),
            environment: options.environment.as_deref(),
        };

        // Destructure each plan fully so the parent half can be kept here
        // while only the child half is handed to the spawner; partially
        // moving `.parent` out and then passing the whole `Redirected`
        // value below wouldn't compile.
        let redirect::Redirected {
            parent: parent_stdin,
            child: child_stdin,
        } = stdin;
        let redirect::Redirected {
            parent: parent_stdout,
            child: child_stdout,
        } = stdout;
        let redirect::Redirected {
            parent: parent_stderr,
            child: child_stderr,
        } = stderr;

        let spawned = spawn::spawn(&spawn_options, child_stdin, child_stdout, child_stderr)?;

        self.stdin = parent_stdin;
        self.stdout = parent_stdout;
        self.stderr = parent_stderr;
        #[cfg(windows)]
        {
            self.process_handle = spawned.handle;
        }
        self.state = State::Running { pid: spawned.pid };

        Ok(())
    }

    fn pid(&self) -> Result<Pid> {
        match self.state {
            State::Running { pid } | State::Exited { pid, .. } => Ok(pid),
            _ => Err(not_running()),
        }
    }

    /// Blocks on the selected output stream and returns the bytes read and
    /// which stream they came from.
    pub fn read(&self, selector: Selector, buffer: &mut [u8]) -> Result<(Selector, usize)> {
        self.pid()?;

        match selector {
            Selector::Out => crate::pipe::read(&self.stdout, buffer).map(|n| (Selector::Out, n)),
            Selector::Err => crate::pipe::read(&self.stderr, buffer).map(|n| (Selector::Err, n)),
            Selector::Any => {
                let ready = crate::pipe::wait(&self.stdout, &self.stderr)?;
                match ready {
                    crate::pipe::Ready::Out => {
                        crate::pipe::read(&self.stdout, buffer).map(|n| (Selector::Out, n))
                    }
                    crate::pipe::Ready::Err => {
                        crate::pipe::read(&self.stderr, buffer).map(|n| (Selector::Err, n))
                    }
                }
            }
        }
    }

    /// Blocks writing `buffer` to the child's stdin.
    pub fn write(&self, buffer: &[u8]) -> Result<usize> {
        self.pid()?;
        crate::pipe::write(&self.stdin, buffer)
    }

    /// Releases the parent-side handle for one stream, so further
    /// read/write on it fails fast instead of blocking on a stream the
    /// caller no longer cares about.
    pub fn close(&mut self, selector: Selector) -> Result<()> {
        self.pid()?;
        match selector {
            Selector::Out => self.stdout.release(),
            Selector::Err => self.stderr.release(),
            Selector::Any => {
                self.stdout.release();
                self.stderr.release();
            }
        }
        Ok(())
    }

    /// Releases the parent-side handle for stdin, so the child observes
    /// EOF on its next read. Distinct from [`Process::close`] because IN
    /// isn't one of the [`Selector`] values read accepts.
    pub fn close_stdin(&mut self) -> Result<()> {
        self.pid()?;
        self.stdin.release();
        Ok(())
    }

    /// Blocks until the process exits or `timeout` elapses. `timeout` of
    /// `None` blocks forever; `Some(Duration::ZERO)` is a non-blocking
    /// probe. Once EXITED, further calls return the cached status without
    /// touching the OS.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<ExitStatus> {
        if let State::Exited { status, .. } = self.state {
            return Ok(status);
        }

        let pid = self.pid()?;
        let status = stop::wait(pid, timeout)?;
        self.state = State::Exited { pid, status };
        Ok(status)
    }

    /// Sends the graceful-termination signal. No-op success if already
    /// EXITED.
    pub fn terminate(&mut self) -> Result<()> {
        if matches!(self.state, State::Exited { .. }) {
            return Ok(());
        }
        stop::terminate(self.pid()?)
    }

    /// Sends the forceful-termination signal. No-op success if already
    /// EXITED.
    pub fn kill(&mut self) -> Result<()> {
        if matches!(self.state, State::Exited { .. }) {
            return Ok(());
        }
        stop::kill(self.pid()?)
    }

    /// Runs a composed stop sequence (spec.md §4.6) and transitions to
    /// EXITED on success.
    pub fn stop(&mut self, sequence: [StopAction; 3]) -> Result<ExitStatus> {
        if let State::Exited { status, .. } = self.state {
            return Ok(status);
        }

        let pid = self.pid()?;
        let status = stop::stop(pid, sequence)?;
        self.state = State::Exited { pid, status };
        Ok(status)
    }

    /// Best-effort stop (using the sequence configured at [`Process::start`]
    /// time) if still RUNNING, then releases every owned handle. Idempotent
    /// and safe after any subset of the other operations, including a
    /// previous `destroy` (spec.md §4.7).
    pub fn destroy(&mut self) {
        if matches!(self.state, State::Running { .. }) {
            let _ = self.stop(self.stop_on_destroy);
        }

        self.stdin.release();
        self.stdout.release();
        self.stderr.release();
        #[cfg(windows)]
        {
            self.process_handle.release();
        }

        self.state = State::Destroyed;
    }
}

impl Default for Process {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn not_running() -> Error {
    Error::System(std::io::Error::new(
        std::io::ErrorKind::Other,
        "process is not running",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_process_starts_not_started_and_destroy_is_idempotent() {
        let mut process = Process::new();
        process.destroy();
        process.destroy();
    }

    #[test]
    fn read_before_start_fails() {
        let process = Process::new();
        let mut buf = [0u8; 8];
        assert!(process.read(Selector::Out, &mut buf).is_err());
    }
}
