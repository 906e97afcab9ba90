//! POSIX process creation via `fork`/`exec`, using a close-on-exec error
//! pipe so the parent can distinguish a child that failed to start from
//! one that started and exited on its own.

use super::{Pid, SpawnOptions, Spawned};
use crate::error::{Error, Result};
use crate::handle::Handle;
use std::ffi::CString;
use std::os::unix::io::RawFd;

/// Forks and execs `options.argv[0]`, redirecting descriptors 0/1/2 to the
/// planned child-side handles. `stdin`/`stdout`/`stderr` are released here
/// on every exit path; the caller keeps the corresponding parent handles
/// separately and never sees these.
pub fn spawn(
    options: &SpawnOptions<'_>,
    mut stdin: Handle,
    mut stdout: Handle,
    mut stderr: Handle,
) -> Result<Spawned> {
    let (err_read, err_write) = crate::pipe::create()?;

    let argv = build_argv(options.argv)?;
    let envp = options
        .environment
        .map(|vars| build_envp(vars))
        .transpose()?;
    let cwd = options
        .working_directory
        .map(|dir| CString::new(dir).map_err(|_| Error::InvalidUnicode))
        .transpose()?;

    // Built here, in the parent, not after `fork()`: the child may not
    // allocate (another thread could hold the allocator lock at fork
    // time), so the null-terminated pointer vectors `execve`/`execvp` need
    // are materialized up front and only read via `.as_ptr()` in the child
    // branch, mirroring `examples/original_source/reproc/src/posix/
    // process.c`'s `(char *const *) argv` cast that allocates nothing
    // between fork and exec.
    let argv_ptrs = argv_ptrs(&argv);
    let envp_ptrs = envp.as_ref().map(|envp| envp_ptrs(envp));

    let child_in = stdin.raw();
    let child_out = stdout.raw();
    let child_err = stderr.raw();
    let err_write_fd = err_write.raw();

    // Resolved before forking so `resolve_program` (which reads the
    // parent's cwd) always sees the cwd the caller is running in, not the
    // child's post-`chdir` cwd.
    let program = if cwd.is_some() {
        resolve_program(&argv[0])
    } else {
        argv[0].clone()
    };

    tracing::debug!(program = %program.to_string_lossy(), argc = argv.len(), "forking child process");

    let pid = unsafe { libc::fork() };

    if pid == 0 {
        // Child: failures write errno to err_write then _exit. There is no
        // way to propagate a Result out of here, so every fallible step
        // reports through `child_bail`.
        unsafe {
            if libc::setpgid(0, 0) == -1 {
                child_bail(err_write_fd);
            }

            if let Some(cwd) = &cwd {
                if libc::chdir(cwd.as_ptr()) == -1 {
                    child_bail(err_write_fd);
                }
            }

            if libc::dup2(child_in, libc::STDIN_FILENO) == -1 {
                child_bail(err_write_fd);
            }
            if libc::dup2(child_out, libc::STDOUT_FILENO) == -1 {
                child_bail(err_write_fd);
            }
            if libc::dup2(child_err, libc::STDERR_FILENO) == -1 {
                child_bail(err_write_fd);
            }

            let max_fd = libc::sysconf(libc::_SC_OPEN_MAX);
            let max_fd = if max_fd < 0 { 1024 } else { max_fd as RawFd };
            for fd in 3..max_fd {
                if fd == err_write_fd {
                    continue;
                }
                libc::close(fd);
            }

            match &envp_ptrs {
                Some(envp_ptrs) => {
                    libc::execve(program.as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                }
                None => {
                    libc::execvp(program.as_ptr(), argv_ptrs.as_ptr());
                }
            }

            // Only reached if exec failed.
            child_bail(err_write_fd);
        }
    }

    if pid == -1 {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        tracing::warn!(errno, "fork failed");
        return Err(Error::from_errno(errno));
    }

    // Parent. The child-side handles were duplicated via dup2 (or never
    // touched, on the exec-failure path, but _exit closes them anyway); the
    // parent's own copies must be released now regardless of outcome.
    stdin.release();
    stdout.release();
    stderr.release();
    drop(err_write);

    let mut buf = [0u8; std::mem::size_of::<i32>()];
    let read_result = read_error_pipe(&err_read, &mut buf);
    drop(err_read);

    match read_result {
        ErrPipeOutcome::Closed => {
            tracing::info!(pid, "child process started");
            Ok(Spawned { pid })
        }
        ErrPipeOutcome::ChildErrno(errno) => {
            tracing::warn!(pid, errno, "child failed to start before exec");
            reap(pid);
            Err(Error::from_errno(errno))
        }
        ErrPipeOutcome::System(err) => {
            tracing::warn!(pid, error = %err, "failed reading child error pipe");
            reap(pid);
            Err(err)
        }
    }
}

enum ErrPipeOutcome {
    Closed,
    ChildErrno(i32),
    System(Error),
}

fn read_error_pipe(end: &Handle, buf: &mut [u8; std::mem::size_of::<i32>()]) -> ErrPipeOutcome {
    loop {
        let rv = unsafe {
            libc::read(end.raw(), buf.as_mut_ptr() as *mut libc::c_void, buf.len())
        };

        if rv == 0 {
            return ErrPipeOutcome::Closed;
        }
        if rv < 0 {
            let errno = std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(0);
            if errno == libc::EINTR {
                continue;
            }
            return ErrPipeOutcome::System(Error::from_errno(errno));
        }
        if (rv as usize) < buf.len() {
            // Short read of the errno payload; treat as a generic failure
            // rather than guessing at the partial value.
            return ErrPipeOutcome::System(Error::System(std::io::Error::from_raw_os_error(
                libc::EIO,
            )));
        }
        return ErrPipeOutcome::ChildErrno(i32::from_ne_bytes(*buf));
    }
}

fn reap(pid: Pid) {
    unsafe {
        let mut status = 0;
        libc::waitpid(pid, &mut status, 0);
    }
}

/// Writes the current `errno` to the error pipe and exits, mirroring every
/// failure path in the original `process_create`'s child branch.
unsafe fn child_bail(err_write_fd: RawFd) -> ! {
    let errno = std::io::Error::last_os_error()
        .raw_os_error()
        .unwrap_or(libc::EIO);
    let bytes = errno.to_ne_bytes();
    unsafe {
        libc::write(err_write_fd, bytes.as_ptr() as *const libc::c_void, bytes.len());
        libc::_exit(errno);
    }
}

fn build_argv(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|s| CString::new(s.as_str()).map_err(|_| Error::InvalidUnicode))
        .collect()
}

fn build_envp(vars: &[String]) -> Result<Vec<CString>> {
    vars.iter()
        .map(|s| CString::new(s.as_str()).map_err(|_| Error::InvalidUnicode))
        .collect()
}

fn argv_ptrs(argv: &[CString]) -> Vec<*const libc::c_char> {
    let mut ptrs: Vec<*const libc::c_char> = argv.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

fn envp_ptrs(envp: &[CString]) -> Vec<*const libc::c_char> {
    let mut ptrs: Vec<*const libc::c_char> = envp.iter().map(|s| s.as_ptr()).collect();
    ptrs.push(std::ptr::null());
    ptrs
}

/// If `program` is a relative path containing a directory separator (so
/// `execvp`'s own `$PATH` search would not apply), prepend the current
/// working directory so the lookup still succeeds after the child's `chdir`
/// call has already taken effect (see SPEC_FULL.md §4.1).
fn resolve_program(program: &CString) -> CString {
    let bytes = program.as_bytes();
    let is_relative_with_separator = !bytes.is_empty() && bytes[0] != b'/' && bytes.contains(&b'/');

    if !is_relative_with_separator {
        return program.clone();
    }

    let mut cwd_buf = vec![0u8; libc::PATH_MAX as usize];
    let cwd = unsafe {
        libc::getcwd(cwd_buf.as_mut_ptr() as *mut libc::c_char, cwd_buf.len())
    };

    if cwd.is_null() {
        return program.clone();
    }

    let len = cwd_buf.iter().position(|&b| b == 0).unwrap_or(0);
    let mut joined = cwd_buf[..len].to_vec();
    if joined.last() != Some(&b'/') {
        joined.push(b'/');
    }
    joined.extend_from_slice(bytes);

    CString::new(joined).unwrap_or_else(|_| program.clone())
}
