extern crate nix;
extern crate taskmaster;
extern crate tempfile;

use std::fs::read_to_string;
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::signal::{kill, Signal};
use taskmaster::error::ProcessError;
use taskmaster::tasks::{Process, ProcessSpec, ProcessState};

fn sh(script: &str) -> ProcessSpec {
    let mut spec = ProcessSpec::new("/bin/sh");
    spec.args = vec!["-c".to_owned(), script.to_owned()];
    return spec;
}

fn poll_until<F: Fn(ProcessState) -> bool>(process: &mut Process, check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        process.poll(false);
        if check(process.state()) {
            return true;
        }
        sleep(Duration::from_millis(10));
    }

    return false;
}

#[test]
fn test_new_process_is_not_started() {
    let process = Process::new(Arc::new(sh("exit 0")));
    assert_eq!(process.state(), ProcessState::NotStarted);
    assert!(process.pid().is_none());
    assert!(process.exit_code().is_none());
}

#[test]
fn test_exit_code_is_recorded() {
    let mut process = Process::new(Arc::new(sh("exit 3")));
    assert!(process.spawn().is_ok());
    assert_eq!(process.state(), ProcessState::Running);
    assert!(process.pid().is_some());

    assert!(process.poll(true));
    assert_eq!(process.state(), ProcessState::Exited(3));
    assert_eq!(process.exit_code(), Some(3));
    assert!(process.pid().is_none());
}

#[test]
fn test_spawn_of_missing_binary_fails() {
    let mut process = Process::new(Arc::new(ProcessSpec::new("/this/does/not/exist")));
    match process.spawn() {
        Err(ProcessError::NotExecutable { .. }) => {}
        other => panic!("expected NotExecutable, got {:?}", other),
    }
    assert_eq!(process.state(), ProcessState::Error);
}

#[test]
fn test_spawn_of_non_executable_file_fails() {
    let file = tempfile::NamedTempFile::new().unwrap();
    let mut process = Process::new(Arc::new(ProcessSpec::new(file.path())));
    assert!(process.spawn().is_err());
    assert_eq!(process.state(), ProcessState::Error);
}

#[test]
fn test_graceful_stop() {
    let mut process = Process::new(Arc::new(sh("exec sleep 30")));
    process.spawn().unwrap();

    process.request_stop(Signal::SIGTERM);
    process.poll(true);
    assert_eq!(process.state(), ProcessState::Signaled(Signal::SIGTERM));
    assert_eq!(process.term_signal(), Some(Signal::SIGTERM));
}

#[test]
fn test_grace_period_ends_in_a_kill() {
    let mut spec = sh("trap '' TERM; exec sleep 30");
    spec.stop_grace = Duration::from_millis(200);
    let mut process = Process::new(Arc::new(spec));
    process.spawn().unwrap();

    // Give the shell time to install its trap
    sleep(Duration::from_millis(200));

    let start = Instant::now();
    process.request_stop(Signal::SIGTERM);
    process.poll(true);
    assert_eq!(process.state(), ProcessState::Terminated);
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[test]
fn test_second_stop_rearms_the_grace_period() {
    let mut spec = sh("trap '' TERM; exec sleep 30");
    spec.stop_grace = Duration::from_millis(600);
    let mut process = Process::new(Arc::new(spec));
    process.spawn().unwrap();
    sleep(Duration::from_millis(200));

    let start = Instant::now();
    process.request_stop(Signal::SIGTERM);
    sleep(Duration::from_millis(300));
    process.request_stop(Signal::SIGTERM);

    // Past the first deadline, the first timer must not have fired
    sleep(Duration::from_millis(500));
    process.poll(false);
    assert_eq!(process.state(), ProcessState::Running);

    process.poll(true);
    assert_eq!(process.state(), ProcessState::Terminated);
    assert!(start.elapsed() >= Duration::from_millis(900));
}

#[test]
fn test_sigkill_is_synchronous() {
    let mut process = Process::new(Arc::new(sh("exec sleep 30")));
    let pid = process.spawn().unwrap();

    process.request_stop(Signal::SIGKILL);
    assert_eq!(process.state(), ProcessState::Terminated);
    assert!(process.pid().is_none());

    // Reaped, so the pid is gone
    assert!(kill(pid, None).is_err());
}

#[test]
fn test_stop_of_unstarted_process_is_a_noop() {
    let mut process = Process::new(Arc::new(sh("exit 0")));
    process.request_stop(Signal::SIGTERM);
    assert_eq!(process.state(), ProcessState::NotStarted);
}

#[test]
fn test_signal_requires_a_live_process() {
    let mut process = Process::new(Arc::new(sh("exit 0")));
    match process.signal(Signal::SIGTERM) {
        Err(ProcessError::NoSuchProcess) => {}
        other => panic!("expected NoSuchProcess, got {:?}", other),
    }

    process.spawn().unwrap();
    process.poll(true);
    assert!(process.signal(Signal::SIGTERM).is_err());
}

#[test]
fn test_job_control_states() {
    let mut process = Process::new(Arc::new(sh("exec sleep 30")));
    process.spawn().unwrap();

    process.signal(Signal::SIGSTOP).unwrap();
    assert!(poll_until(&mut process, |state| state == ProcessState::Stopped(Signal::SIGSTOP)));
    assert!(process.pid().is_some());

    process.signal(Signal::SIGCONT).unwrap();
    assert!(poll_until(&mut process, |state| state == ProcessState::Running));

    process.request_stop(Signal::SIGKILL);
    assert_eq!(process.state(), ProcessState::Terminated);
}

#[test]
fn test_stop_wakes_a_suspended_process() {
    let mut process = Process::new(Arc::new(sh("exec sleep 30")));
    process.spawn().unwrap();
    process.signal(Signal::SIGSTOP).unwrap();
    assert!(poll_until(&mut process, |state| state == ProcessState::Stopped(Signal::SIGSTOP)));

    process.request_stop(Signal::SIGTERM);
    assert!(poll_until(&mut process, |state| !state.is_launched()));
    assert_eq!(process.state(), ProcessState::Signaled(Signal::SIGTERM));
}

#[test]
fn test_redirection_env_and_working_dir() {
    let dir = tempfile::tempdir().unwrap();
    let workdir = dir.path().canonicalize().unwrap();
    let out_path = workdir.join("out.log");

    let mut spec = sh("echo $GREETING; pwd");
    spec.env.insert("GREETING".to_owned(), "hello".to_owned());
    spec.working_dir = workdir.clone();
    spec.stdout = out_path.clone();

    let mut process = Process::new(Arc::new(spec));
    process.spawn().unwrap();
    process.poll(true);
    assert_eq!(process.state(), ProcessState::Exited(0));

    let output = read_to_string(&out_path).unwrap();
    assert_eq!(output, format!("hello\n{}\n", workdir.display()));
}

#[test]
fn test_output_is_appended() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("out.log");

    let mut spec = sh("echo line");
    spec.stdout = out_path.clone();
    let mut process = Process::new(Arc::new(spec));
    for _ in 0..2 {
        process.spawn().unwrap();
        process.poll(true);
    }

    assert_eq!(read_to_string(&out_path).unwrap(), "line\nline\n");
}

#[test]
fn test_unopenable_redirect_falls_back_to_null() {
    let mut spec = sh("echo hidden");
    spec.stdout = "/this/does/not/exist/out.log".into();
    let mut process = Process::new(Arc::new(spec));
    process.spawn().unwrap();
    process.poll(true);
    assert_eq!(process.state(), ProcessState::Exited(0));
}

#[test]
fn test_bad_working_dir_fails_the_child() {
    let mut spec = sh("exit 0");
    spec.working_dir = "/this/does/not/exist".into();
    let mut process = Process::new(Arc::new(spec));
    process.spawn().unwrap();
    process.poll(true);
    match process.state() {
        ProcessState::Exited(code) => assert_ne!(code, 0),
        other => panic!("expected a failed exit, got {:?}", other),
    }
}

#[test]
fn test_respawn_gets_a_new_pid() {
    let mut process = Process::new(Arc::new(sh("exit 0")));
    let first = process.spawn().unwrap();
    process.poll(true);
    let second = process.spawn().unwrap();
    assert_ne!(first, second);
    assert_eq!(process.state(), ProcessState::Running);
    process.poll(true);
}
