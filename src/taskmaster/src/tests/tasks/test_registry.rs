extern crate nix;
extern crate taskmaster;
extern crate tempfile;

use std::fs::write;
use std::path::Path;
use std::thread::sleep;
use std::time::{Duration, Instant};

use nix::sys::signal::kill;
use taskmaster::error::{ConfigError, MasterError};
use taskmaster::master::Master;
use taskmaster::tasks::{ProcessSpec, TaskConfig, TaskRegistry, TaskState};

const SLEEPER_CONFIG: &str = "
[programs.sleeper]
cmd = \"/bin/sh\"
args = [\"-c\", \"exec sleep 30\"]
autostart = true
stoptime = 1

[programs.idle]
cmd = \"/bin/sh\"
args = [\"-c\", \"exec sleep 30\"]
";

const OTHER_CONFIG: &str = "
[programs.other]
cmd = \"/bin/sh\"
args = [\"-c\", \"exec sleep 30\"]
";

fn write_config(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    write(&path, contents).unwrap();
    return path.display().to_string();
}

fn wait_for<F: Fn() -> bool>(check: F) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        sleep(Duration::from_millis(20));
    }

    return false;
}

#[test]
fn test_empty_registry_status() {
    let mut registry = TaskRegistry::new();
    assert!(registry.is_empty());
    assert_eq!(registry.status("").unwrap(), "no tasks");
}

#[test]
fn test_unknown_task() {
    let mut registry = TaskRegistry::new();
    for result in vec![registry.start("nope"), registry.stop("nope"), registry.restart("nope"), registry.status("nope")] {
        match result {
            Err(MasterError::NoSuchTask(name)) => assert_eq!(name, "nope"),
            other => panic!("expected NoSuchTask, got {:?}", other),
        }
    }

    assert_eq!(MasterError::NoSuchTask("nope".to_owned()).to_string(), "no such task");
}

#[test]
fn test_start_stop_replies() {
    let mut registry = TaskRegistry::new();
    let mut spec = ProcessSpec::new("/bin/sh");
    spec.args = vec!["-c".to_owned(), "exec sleep 30".to_owned()];
    registry.add_task(TaskConfig::new("sleeper", spec));

    assert_eq!(registry.start("sleeper").unwrap(), "sleeper: started");
    assert_eq!(registry.get_task("sleeper").unwrap().get_state(), TaskState::Starting);
    match registry.start("sleeper") {
        Err(MasterError::Task(_)) => {}
        other => panic!("expected a task error, got {:?}", other),
    }

    assert_eq!(registry.restart("sleeper").unwrap(), "sleeper: restarted");
    assert!(registry.status("sleeper").unwrap().starts_with("sleeper: starting"));
    assert_eq!(registry.stop("sleeper").unwrap(), "sleeper: stopped");
    assert_eq!(registry.status("sleeper").unwrap(), "sleeper: stopped");
}

#[test]
fn test_status_of_everything() {
    let mut registry = TaskRegistry::new();
    registry.add_task(TaskConfig::new("b", ProcessSpec::new("/bin/true")));
    registry.add_task(TaskConfig::new("a", ProcessSpec::new("/bin/true")));

    assert_eq!(registry.status("").unwrap(), "status:\na: stopped\nb: stopped");
}

#[test]
fn test_load_autostarts() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "taskmaster.toml", SLEEPER_CONFIG);

    let mut registry = TaskRegistry::load_from_disk(Path::new(&path)).unwrap();
    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get_config_path(), Some(Path::new(&path)));
    assert_eq!(registry.get_task("sleeper").unwrap().get_state(), TaskState::Starting);
    assert_eq!(registry.get_task("idle").unwrap().get_state(), TaskState::Stopped);

    registry.stop_all();
}

#[test]
fn test_failed_reload_keeps_the_old_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "taskmaster.toml", SLEEPER_CONFIG);
    let mut registry = TaskRegistry::load_from_disk(Path::new(&path)).unwrap();

    write_config(dir.path(), "taskmaster.toml", "[programs.broken\ncmd = ");
    match registry.reload_config("") {
        Err(MasterError::Config(_)) => {}
        other => panic!("expected a config error, got {:?}", other),
    }

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get_task("sleeper").unwrap().get_state(), TaskState::Starting);
    registry.stop_all();
}

#[test]
fn test_reload_of_missing_file() {
    let mut registry = TaskRegistry::new();
    match registry.reload_config("") {
        Err(MasterError::Config(ConfigError::NoPath)) => {}
        other => panic!("expected NoPath, got {:?}", other),
    }

    assert!(registry.reload_config("/this/does/not/exist.toml").is_err());
    assert!(registry.is_empty());
}

#[test]
fn test_reload_replaces_and_stops_old_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let first = write_config(dir.path(), "first.toml", SLEEPER_CONFIG);
    let second = write_config(dir.path(), "second.toml", OTHER_CONFIG);

    let mut registry = TaskRegistry::load_from_disk(Path::new(&first)).unwrap();
    let pid = registry
        .get_task("sleeper")
        .unwrap()
        .replicas()
        .filter_map(|replica| replica.pid())
        .next()
        .unwrap();

    assert_eq!(registry.reload_config(&second).unwrap(), format!("config {} loaded", second));
    assert_eq!(registry.len(), 1);
    assert!(registry.get_task("sleeper").is_none());
    assert_eq!(registry.get_task("other").unwrap().get_state(), TaskState::Stopped);

    // The old process gets stopped and reaped in the background
    assert!(wait_for(|| kill(pid, None).is_err()));
}

#[test]
fn test_exit() {
    let mut registry = TaskRegistry::new();
    assert!(!registry.is_exiting());
    assert_eq!(registry.exit().unwrap(), "taskmaster: exiting");
    assert!(registry.is_exiting());
}

#[test]
fn test_status_reconciles() {
    let mut spec = ProcessSpec::new("/bin/echo");
    spec.args = vec!["hello".to_owned()];
    let mut config = TaskConfig::new("echo", spec);
    config.starttime = Duration::from_secs(0);

    let mut registry = TaskRegistry::new();
    registry.add_task(config);
    registry.start("echo").unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while registry.status("echo").unwrap() != "echo: exited" && Instant::now() < deadline {
        sleep(Duration::from_millis(20));
    }

    assert_eq!(registry.status("echo").unwrap(), "echo: exited");
    assert_eq!(registry.start("echo").unwrap(), "echo: started");
}

#[test]
fn test_shutdown_waits_for_processes() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_config(dir.path(), "taskmaster.toml", SLEEPER_CONFIG);
    let mut registry = TaskRegistry::load_from_disk(Path::new(&path)).unwrap();
    let pid = registry
        .get_task("sleeper")
        .unwrap()
        .replicas()
        .filter_map(|replica| replica.pid())
        .next()
        .unwrap();

    registry.shutdown();
    assert_eq!(registry.get_task("sleeper").unwrap().get_state(), TaskState::Stopped);
    assert!(registry.get_task("sleeper").unwrap().replicas().all(|replica| replica.pid().is_none()));
    assert!(kill(pid, None).is_err());
}
