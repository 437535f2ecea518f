extern crate nix;
extern crate serde;
extern crate taskmaster;
extern crate tempfile;
extern crate toml;

use std::path::PathBuf;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use serde::Deserialize;
use taskmaster::error::ConfigError;
use taskmaster::tasks::serde::{RestartDef, SignalDef, UmaskDef};
use taskmaster::tasks::{load_config, parse_config, render_config, RestartPolicy};

const FULL_CONFIG: &str = "
[programs.web]
cmd = \"/usr/bin/python3\"
args = [\"-m\", \"http.server\", \"8080\"]
numprocs = 2
umask = \"077\"
workingdir = \"/tmp\"
autostart = true
autorestart = \"unexpected\"
exitcodes = [0, 2]
startretries = 3
starttime = 1
stopsignal = \"INT\"
stoptime = 4
stdin = \"/tmp/web.in\"
stdout = \"/tmp/web.out\"
stderr = \"/tmp/web.err\"

[programs.web.env]
STARTED_BY = \"taskmaster\"
ANSWER = \"42\"
";

#[test]
fn test_signal_def_deserializes() {
    #[derive(Deserialize)]
    struct Test {
        signal: SignalDef,
    }

    let test = toml::from_str::<Test>("signal = 9");
    assert_eq!(test.unwrap().signal, SignalDef(Signal::SIGKILL));

    let test = toml::from_str::<Test>("signal = \"SIGUSR1\"");
    assert_eq!(test.unwrap().signal, SignalDef(Signal::SIGUSR1));

    let test = toml::from_str::<Test>("signal = \"hup\"");
    assert_eq!(test.unwrap().signal, SignalDef(Signal::SIGHUP));

    assert!(toml::from_str::<Test>("signal = \"NOTASIGNAL\"").is_err());
    assert!(toml::from_str::<Test>("signal = 4000").is_err());
}

#[test]
fn test_umask_def_deserializes() {
    #[derive(Deserialize)]
    struct Test {
        umask: UmaskDef,
    }

    let test = toml::from_str::<Test>("umask = \"022\"");
    assert_eq!(test.unwrap().umask, UmaskDef(Mode::from_bits_truncate(0o022)));

    let test = toml::from_str::<Test>("umask = 0o027");
    assert_eq!(test.unwrap().umask, UmaskDef(Mode::from_bits_truncate(0o027)));

    assert!(toml::from_str::<Test>("umask = \"999\"").is_err());
    assert!(toml::from_str::<Test>("umask = -1").is_err());
}

#[test]
fn test_restart_def_deserializes() {
    #[derive(Deserialize)]
    struct Test {
        autorestart: RestartDef,
    }

    let test = toml::from_str::<Test>("autorestart = true");
    assert_eq!(test.unwrap().autorestart, RestartDef(RestartPolicy::Always));

    let test = toml::from_str::<Test>("autorestart = false");
    assert_eq!(test.unwrap().autorestart, RestartDef(RestartPolicy::Never));

    let test = toml::from_str::<Test>("autorestart = \"unexpected\"");
    assert_eq!(test.unwrap().autorestart, RestartDef(RestartPolicy::OnUnexpectedExit));

    assert!(toml::from_str::<Test>("autorestart = \"sometimes\"").is_err());
}

#[test]
fn test_full_config_parses() {
    let loaded = parse_config(FULL_CONFIG).unwrap();
    assert!(loaded.warnings.is_empty());
    assert_eq!(loaded.tasks.len(), 1);

    let web = &loaded.tasks[0];
    assert_eq!(web.name, "web");
    assert_eq!(web.spec.command, PathBuf::from("/usr/bin/python3"));
    assert_eq!(web.spec.args, vec!["-m", "http.server", "8080"]);
    assert_eq!(web.numprocs, 2);
    assert_eq!(web.spec.umask, Mode::from_bits_truncate(0o077));
    assert_eq!(web.spec.working_dir, PathBuf::from("/tmp"));
    assert!(web.autostart);
    assert_eq!(web.autorestart, RestartPolicy::OnUnexpectedExit);
    assert_eq!(web.exitcodes, vec![0, 2]);
    assert_eq!(web.startretries, 3);
    assert_eq!(web.starttime, Duration::from_secs(1));
    assert_eq!(web.spec.stop_signal, Signal::SIGINT);
    assert_eq!(web.spec.stop_grace, Duration::from_secs(4));
    assert_eq!(web.spec.stdin, PathBuf::from("/tmp/web.in"));
    assert_eq!(web.spec.stdout, PathBuf::from("/tmp/web.out"));
    assert_eq!(web.spec.stderr, PathBuf::from("/tmp/web.err"));
    assert_eq!(web.spec.env.get("STARTED_BY").map(|v| v.as_str()), Some("taskmaster"));
    assert_eq!(web.spec.env.get("ANSWER").map(|v| v.as_str()), Some("42"));
}

#[test]
fn test_defaults() {
    let loaded = parse_config("[programs.echo]\ncmd = \"/bin/echo\"").unwrap();
    let echo = &loaded.tasks[0];

    assert!(echo.spec.args.is_empty());
    assert!(echo.spec.env.is_empty());
    assert_eq!(echo.numprocs, 1);
    assert_eq!(echo.spec.umask, Mode::from_bits_truncate(0o022));
    assert_eq!(echo.spec.working_dir, PathBuf::from("/"));
    assert!(!echo.autostart);
    assert_eq!(echo.autorestart, RestartPolicy::Never);
    assert_eq!(echo.exitcodes, vec![0]);
    assert_eq!(echo.startretries, 0);
    assert_eq!(echo.starttime, Duration::from_secs(5));
    assert_eq!(echo.spec.stop_signal, Signal::SIGTERM);
    assert_eq!(echo.spec.stop_grace, Duration::from_secs(10));
    assert_eq!(echo.spec.stdin, PathBuf::from("/dev/null"));
    assert_eq!(echo.spec.stdout, PathBuf::from("/dev/null"));
    assert_eq!(echo.spec.stderr, PathBuf::from("/dev/null"));
}

#[test]
fn test_tasks_are_sorted_by_name() {
    let loaded = parse_config("[programs.zeta]\ncmd = \"/bin/true\"\n[programs.alpha]\ncmd = \"/bin/true\"").unwrap();
    let names: Vec<&str> = loaded.tasks.iter().map(|task| task.name.as_str()).collect();
    assert_eq!(names, vec!["alpha", "zeta"]);
}

#[test]
fn test_unknown_keys_are_warnings() {
    let loaded = parse_config("colour = \"blue\"\n[programs.echo]\ncmd = \"/bin/echo\"\nnumprocz = 3").unwrap();
    assert_eq!(loaded.tasks.len(), 1);
    assert_eq!(loaded.tasks[0].numprocs, 1);
    assert_eq!(loaded.warnings.len(), 2);
    assert!(loaded.warnings.iter().any(|warning| warning.contains("colour")));
    assert!(loaded.warnings.iter().any(|warning| warning.contains("numprocz")));
}

#[test]
fn test_bad_documents() {
    match parse_config("") {
        Err(ConfigError::Empty) => {}
        other => panic!("expected Empty, got {:?}", other),
    }

    match parse_config("[programs]") {
        Err(ConfigError::Empty) => {}
        other => panic!("expected Empty, got {:?}", other),
    }

    match parse_config("[programs.echo]\ncmd = \"/bin/echo\"\nnumprocs = 0") {
        Err(ConfigError::Invalid { name, .. }) => assert_eq!(name, "echo"),
        other => panic!("expected Invalid, got {:?}", other),
    }

    match parse_config("[programs.echo]\ncmd = \"/bin/echo\"\n[programs.echo]\ncmd = \"/bin/true\"") {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected a parse error for the duplicate, got {:?}", other),
    }

    match parse_config("[programs.echo]\nargs = []") {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected a parse error for the missing cmd, got {:?}", other),
    }

    match parse_config("[programs.echo]\ncmd = \"/bin/echo\"\nstopsignal = \"LOUD\"") {
        Err(ConfigError::Parse(_)) => {}
        other => panic!("expected a parse error for the signal, got {:?}", other),
    }
}

#[test]
fn test_render_round_trips() {
    let loaded = parse_config(FULL_CONFIG).unwrap();
    let rendered = render_config(&loaded.tasks).unwrap();
    let reloaded = parse_config(&rendered).unwrap();

    assert!(reloaded.warnings.is_empty());
    assert_eq!(reloaded.tasks, loaded.tasks);
}

#[test]
fn test_render_round_trips_defaults() {
    let loaded = parse_config("[programs.echo]\ncmd = \"/bin/echo\"\nautorestart = true\nstopsignal = 12").unwrap();
    let reloaded = parse_config(&render_config(&loaded.tasks).unwrap()).unwrap();
    assert_eq!(reloaded.tasks, loaded.tasks);
    assert_eq!(reloaded.tasks[0].spec.stop_signal, Signal::SIGUSR2);
}

#[test]
fn test_load_config_from_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskmaster.toml");
    std::fs::write(&path, FULL_CONFIG).unwrap();

    let loaded = load_config(&path).unwrap();
    assert_eq!(loaded.tasks[0].name, "web");

    match load_config(&dir.path().join("missing.toml")) {
        Err(ConfigError::Io { .. }) => {}
        other => panic!("expected an io error, got {:?}", other),
    }
}

#[test]
fn test_display() {
    let loaded = parse_config(FULL_CONFIG).unwrap();
    let shown = loaded.tasks[0].to_string();
    assert!(shown.starts_with("web:\n"));
    assert!(shown.contains("  cmd: /usr/bin/python3\n"));
    assert!(shown.contains("  args: -m, http.server, 8080\n"));
    assert!(shown.contains("  umask: 077\n"));
    assert!(shown.contains("  autorestart: unexpected\n"));
    assert!(shown.contains("  stopsignal: INT\n"));
    assert!(shown.contains("  env: ANSWER=42"));
}
