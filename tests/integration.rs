//! End-to-end scenarios against the five `demos/` helper binaries (spec.md
//! §8). Requires the crate to be built with `--features test-helpers` so
//! the helper binaries exist alongside the test binary.

#![cfg(feature = "test-helpers")]

use childproc::{Mode, Options, Process, Selector};
use std::time::Duration;

fn helper_path(name: &str) -> String {
    let mut path = std::env::current_exe().expect("current exe");
    path.pop(); // drop the test binary's own file name
    if path.ends_with("deps") {
        path.pop();
    }
    path.push(name);
    path.to_string_lossy().into_owned()
}

fn read_to_eof(process: &Process, selector: Selector) -> Vec<u8> {
    let mut collected = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        match process.read(selector, &mut buf) {
            Ok((_, n)) => collected.extend_from_slice(&buf[..n]),
            Err(childproc::Error::StreamClosed) => break,
            Err(e) => panic!("unexpected read error: {e}"),
        }
    }
    collected
}

#[test]
fn echo_to_stdout() {
    let mut process = Process::new();
    process
        .start(
            &[helper_path("echo_stdout_child"), "hello world".to_string()],
            Options {
                stdout: Mode::Pipe,
                stderr: Mode::Discard,
                stdin: Mode::Discard,
                ..Options::default()
            },
        )
        .expect("start");

    let out = read_to_eof(&process, Selector::Out);
    assert_eq!(out, b"hello world");

    let status = process.wait(None).expect("wait");
    assert_eq!(status.0, 0);
}

#[test]
fn mixed_streams() {
    let mut process = Process::new();
    process
        .start(
            &[helper_path("two_stream_child"), "both".to_string()],
            Options::default(),
        )
        .expect("start");

    process.write(b"ping\n").expect("write");
    process.close_stdin().expect("close stdin");

    let out = read_to_eof(&process, Selector::Out);
    let err = read_to_eof(&process, Selector::Err);

    assert_eq!(out, b"ping");
    assert_eq!(err, b"ping");

    let status = process.wait(None).expect("wait");
    assert_eq!(status.0, 0);
}

#[test]
fn terminate_an_infinite_sleeper() {
    let mut process = Process::new();
    process
        .start(
            &[helper_path("sleeper_child")],
            Options {
                stdin: Mode::Discard,
                stdout: Mode::Discard,
                stderr: Mode::Discard,
                ..Options::default()
            },
        )
        .expect("start");

    let timeout = process.wait(Some(Duration::from_millis(50)));
    assert!(matches!(timeout, Err(childproc::Error::WaitTimeout)));

    let status = process
        .stop([
            childproc::StopAction {
                action: childproc::Action::Terminate,
                timeout: Some(Duration::from_millis(500)),
            },
            childproc::StopAction {
                action: childproc::Action::Noop,
                timeout: None,
            },
            childproc::StopAction {
                action: childproc::Action::Noop,
                timeout: None,
            },
        ])
        .expect("stop");

    #[cfg(unix)]
    assert_eq!(status.0, 15); // SIGTERM
}

#[test]
fn forced_kill() {
    let mut process = Process::new();
    process
        .start(
            &[helper_path("sleeper_child")],
            Options {
                stdin: Mode::Discard,
                stdout: Mode::Discard,
                stderr: Mode::Discard,
                ..Options::default()
            },
        )
        .expect("start");

    let status = process
        .stop([
            childproc::StopAction {
                action: childproc::Action::Kill,
                timeout: Some(Duration::from_millis(500)),
            },
            childproc::StopAction {
                action: childproc::Action::Noop,
                timeout: None,
            },
            childproc::StopAction {
                action: childproc::Action::Noop,
                timeout: None,
            },
        ])
        .expect("stop");

    #[cfg(unix)]
    assert_eq!(status.0, 9); // SIGKILL
    #[cfg(windows)]
    assert_eq!(status.0, 137);
}

#[test]
fn working_directory_is_applied() {
    let dir = tempfile::tempdir().expect("tempdir");
    let canonical = dir.path().canonicalize().expect("canonicalize");

    let mut process = Process::new();
    process
        .start(
            &[helper_path("print_cwd_child")],
            Options {
                stdout: Mode::Pipe,
                stderr: Mode::Discard,
                stdin: Mode::Discard,
                working_directory: Some(canonical.to_string_lossy().into_owned()),
                ..Options::default()
            },
        )
        .expect("start");

    let out = read_to_eof(&process, Selector::Out);
    let printed = String::from_utf8(out).expect("utf8");
    assert_eq!(
        std::path::Path::new(&printed).canonicalize().unwrap(),
        canonical
    );

    process.wait(None).expect("wait");
}

#[test]
fn environment_override_replaces_inherited_environment() {
    let mut process = Process::new();
    process
        .start(
            &[helper_path("print_env_child")],
            Options {
                stdout: Mode::Pipe,
                stderr: Mode::Discard,
                stdin: Mode::Discard,
                environment: Some(vec!["IP=127.0.0.1".to_string(), "PORT=8080".to_string()]),
                ..Options::default()
            },
        )
        .expect("start");

    let out = read_to_eof(&process, Selector::Out);
    assert_eq!(out, b"IP=127.0.0.1PORT=8080");

    process.wait(None).expect("wait");
}
