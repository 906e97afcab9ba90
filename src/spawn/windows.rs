//! Windows process creation via `CreateProcessW`: command-line quoting,
//! an explicit handle-inherit list, and the `STARTUPINFOEXW`/
//! `CreateProcessW` call itself.

use super::{SpawnOptions, Spawned};
use crate::error::{Error, Result};
use crate::handle::Handle;
use windows::Win32::Foundation::{CloseHandle, GetLastError, HANDLE};
use windows::Win32::System::Threading::{
    CreateProcessW, DeleteProcThreadAttributeList, InitializeProcThreadAttributeList,
    UpdateProcThreadAttribute, CREATE_NEW_PROCESS_GROUP, CREATE_UNICODE_ENVIRONMENT,
    EXTENDED_STARTUPINFO_PRESENT, LPPROC_THREAD_ATTRIBUTE_LIST, PROCESS_INFORMATION,
    PROC_THREAD_ATTRIBUTE_HANDLE_LIST, STARTUPINFOEXW, STARTUPINFOW, STARTF_USESHOWWINDOW,
    STARTF_USESTDHANDLES,
};
use windows::Win32::System::Diagnostics::Debug::{SetErrorMode, SEM_NOGPFAULTERRORBOX};
use windows::Win32::UI::WindowsAndMessaging::SW_HIDE;
use windows::core::{PCWSTR, PWSTR};

pub fn spawn(
    options: &SpawnOptions<'_>,
    mut stdin: Handle,
    mut stdout: Handle,
    mut stderr: Handle,
) -> Result<Spawned> {
    let mut command_line = to_wide(&join_command_line(options.argv));
    let mut environment_block = options.environment.map(|vars| to_environment_block(vars));
    let mut working_directory = options
        .working_directory
        .map(to_wide_from_str)
        .transpose()?;

    let inherit = [stdin.raw(), stdout.raw(), stderr.raw()];
    let mut attribute_list = HandleInheritList::new(&inherit)?;

    let mut startup_info = STARTUPINFOEXW {
        StartupInfo: STARTUPINFOW {
            cb: std::mem::size_of::<STARTUPINFOEXW>() as u32,
            dwFlags: STARTF_USESTDHANDLES | STARTF_USESHOWWINDOW,
            wShowWindow: SW_HIDE.0 as u16,
            hStdInput: stdin.raw(),
            hStdOutput: stdout.raw(),
            hStdError: stderr.raw(),
            ..Default::default()
        },
        lpAttributeList: attribute_list.as_ptr(),
    };

    let mut process_info = PROCESS_INFORMATION::default();

    // The child inherits the current error mode; suppressing the
    // general-protection-fault dialog here so it doesn't pop a modal box on
    // the caller's behalf, then restoring it unconditionally.
    let previous_error_mode = unsafe { set_no_gpfault_dialog() };

    let environment_ptr = environment_block
        .as_mut()
        .map(|b| b.as_mut_ptr() as *const std::ffi::c_void);
    let working_directory_ptr = working_directory
        .as_mut()
        .map(|w| PCWSTR(w.as_ptr()))
        .unwrap_or(PCWSTR::null());

    tracing::debug!(argc = options.argv.len(), "calling CreateProcessW");

    let create_result = unsafe {
        CreateProcessW(
            PCWSTR::null(),
            Some(PWSTR(command_line.as_mut_ptr())),
            None,
            None,
            true,
            CREATE_NEW_PROCESS_GROUP | CREATE_UNICODE_ENVIRONMENT | EXTENDED_STARTUPINFO_PRESENT,
            environment_ptr,
            working_directory_ptr,
            &startup_info.StartupInfo,
            &mut process_info,
        )
    };

    unsafe { restore_error_mode(previous_error_mode) };

    // The child-side handles were captured by the inherit list and the
    // startup-info standard-handle fields; the parent's own copies are
    // released now regardless of outcome.
    stdin.release();
    stdout.release();
    stderr.release();
    drop(attribute_list);

    match create_result {
        Ok(()) => {
            unsafe { let _ = CloseHandle(process_info.hThread); }
            tracing::info!(pid = process_info.dwProcessId, "child process started");
            Ok(Spawned {
                pid: process_info.dwProcessId,
                handle: Handle::new(process_info.hProcess),
            })
        }
        Err(_) => {
            let code = unsafe { GetLastError().0 };
            tracing::warn!(code, "CreateProcessW failed");
            Err(Error::from_win32(code))
        }
    }
}

/// Joins `argv` into a single command-line string applying Microsoft's
/// quoting rule (spec.md §4.5 step 1): an argument is wrapped in quotes if
/// it contains whitespace or a literal quote, and a run of backslashes is
/// doubled only when it immediately precedes a closing or embedded quote.
fn join_command_line(argv: &[String]) -> String {
    let mut out = String::new();
    for (i, arg) in argv.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        push_quoted_argument(&mut out, arg);
    }
    out
}

fn push_quoted_argument(out: &mut String, arg: &str) {
    let needs_quoting = arg.is_empty()
        || arg
            .chars()
            .any(|c| c == ' ' || c == '\t' || c == '\n' || c == '\x0b' || c == '"');

    if !needs_quoting {
        out.push_str(arg);
        return;
    }

    out.push('"');

    let chars: Vec<char> = arg.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let mut backslashes = 0;
        while i < chars.len() && chars[i] == '\\' {
            backslashes += 1;
            i += 1;
        }

        if i == chars.len() {
            out.extend(std::iter::repeat('\\').take(backslashes * 2));
        } else if chars[i] == '"' {
            out.extend(std::iter::repeat('\\').take(backslashes * 2 + 1));
            out.push('"');
            i += 1;
        } else {
            out.extend(std::iter::repeat('\\').take(backslashes));
            out.push(chars[i]);
            i += 1;
        }
    }

    out.push('"');
}

fn to_wide(s: &str) -> Vec<u16> {
    s.encode_utf16().chain(std::iter::once(0)).collect()
}

fn to_wide_from_str(s: &str) -> Result<Vec<u16>> {
    if s.contains('\0') {
        return Err(Error::InvalidUnicode);
    }
    Ok(to_wide(s))
}

/// Flattens `NAME=VALUE` pairs into the double-null-terminated UTF-16 block
/// `CreateProcessW` requires when `CREATE_UNICODE_ENVIRONMENT` is set.
fn to_environment_block(vars: &[String]) -> Vec<u16> {
    let mut block = Vec::new();
    for var in vars {
        block.extend(var.encode_utf16());
        block.push(0);
    }
    block.push(0);
    block
}

/// Owns a `PROC_THREAD_ATTRIBUTE_LIST` containing exactly the three planned
/// child-side handles, matching `handle_inherit_list_create`.
struct HandleInheritList {
    buffer: Vec<u8>,
    handles: [HANDLE; 3],
}

impl HandleInheritList {
    fn new(raw: &[HANDLE; 3]) -> Result<Self> {
        let mut size: usize = 0;
        unsafe {
            let _ = InitializeProcThreadAttributeList(None, 1, 0, &mut size);
        }

        let mut buffer = vec![0u8; size];
        let list = LPPROC_THREAD_ATTRIBUTE_LIST(buffer.as_mut_ptr() as *mut _);

        let init = unsafe {
            InitializeProcThreadAttributeList(Some(list), 1, 0, &mut size)
        };
        if init.is_err() {
            let code = unsafe { GetLastError().0 };
            return Err(Error::from_win32(code));
        }

        let mut this = HandleInheritList {
            buffer,
            handles: *raw,
        };

        let list = this.as_ptr();
        let update = unsafe {
            UpdateProcThreadAttribute(
                list,
                0,
                PROC_THREAD_ATTRIBUTE_HANDLE_LIST as usize,
                Some(this.handles.as_ptr() as *const std::ffi::c_void),
                std::mem::size_of::<[HANDLE; 3]>(),
                None,
                None,
            )
        };
        if update.is_err() {
            let code = unsafe { GetLastError().0 };
            unsafe { DeleteProcThreadAttributeList(list) };
            return Err(Error::from_win32(code));
        }

        Ok(this)
    }

    fn as_ptr(&mut self) -> LPPROC_THREAD_ATTRIBUTE_LIST {
        LPPROC_THREAD_ATTRIBUTE_LIST(self.buffer.as_mut_ptr() as *mut _)
    }
}

impl Drop for HandleInheritList {
    fn drop(&mut self) {
        unsafe { DeleteProcThreadAttributeList(self.as_ptr()) };
    }
}

unsafe fn set_no_gpfault_dialog() -> windows::Win32::System::Diagnostics::Debug::THREAD_ERROR_MODE {
    unsafe { SetErrorMode(SEM_NOGPFAULTERRORBOX) }
}

unsafe fn restore_error_mode(previous: windows::Win32::System::Diagnostics::Debug::THREAD_ERROR_MODE) {
    unsafe { SetErrorMode(previous) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_argument_needs_no_quoting() {
        let mut out = String::new();
        push_quoted_argument(&mut out, "hello");
        assert_eq!(out, "hello");
    }

    #[test]
    fn argument_with_space_is_quoted() {
        let mut out = String::new();
        push_quoted_argument(&mut out, "hello world");
        assert_eq!(out, "\"hello world\"");
    }

    #[test]
    fn trailing_backslashes_are_doubled_before_closing_quote() {
        let mut out = String::new();
        push_quoted_argument(&mut out, "a b\\\\");
        assert_eq!(out, "\"a b\\\\\\\\\"");
    }

    #[test]
    fn embedded_quote_is_escaped() {
        let mut out = String::new();
        push_quoted_argument(&mut out, "say \"hi\"");
        assert_eq!(out, "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn environment_block_is_double_null_terminated() {
        let block = to_environment_block(&["A=1".to_string(), "B=2".to_string()]);
        let as_string = String::from_utf16(&block).unwrap();
        assert!(as_string.ends_with("B=2\u{0}\u{0}"));
    }
}
