extern crate clap;
extern crate libq;
extern crate taskmaster;

use std::io;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{App, Arg, ArgMatches};
use libq::daemon::{check_pid_file, remove_pid_file, write_pid_file};
use libq::logger;

use taskmaster::client::{RemoteMaster, DEFAULT_TIMEOUT};
use taskmaster::console::Console;
use taskmaster::signals::SignalWatcher;
use taskmaster::socket::ControlSocket;
use taskmaster::supervisor::{run_daemon, run_embedded};
use taskmaster::tasks::{load_config, TaskRegistry};

const DEFAULT_CONFIG: &str = "/tmp/taskmaster.toml";
const DEFAULT_SOCKET: &str = "/tmp/taskmaster.sock";
const DEFAULT_PIDFILE: &str = "/tmp/taskmaster.pid";

#[derive(Debug, PartialEq)]
enum Mode {
    Embedded,
    Daemon,
    Cli,
}

struct Settings {
    mode: Mode,
    config: PathBuf,
    socket: PathBuf,
    pidfile: PathBuf,
    logfile: Option<PathBuf>,
    debug: bool,
    timeout: Duration,
}

impl Settings {
    fn from_args(args: &ArgMatches) -> Result<Settings, String> {
        let mode = if args.is_present("daemon") {
            Mode::Daemon
        } else if args.is_present("cli") {
            Mode::Cli
        } else {
            Mode::Embedded
        };

        let timeout = match args.value_of("timeout") {
            Some(secs) => Duration::from_secs(secs.parse::<u64>().map_err(|_| format!("invalid timeout: {}", secs))?),
            None => DEFAULT_TIMEOUT,
        };

        return Ok(Settings {
            mode: mode,
            config: PathBuf::from(args.value_of("config").unwrap_or(DEFAULT_CONFIG)),
            socket: PathBuf::from(args.value_of("socket").unwrap_or(DEFAULT_SOCKET)),
            pidfile: PathBuf::from(args.value_of("pidfile").unwrap_or(DEFAULT_PIDFILE)),
            logfile: args.value_of("logfile").map(PathBuf::from),
            debug: args.is_present("debug"),
            timeout: timeout,
        });
    }
}

/// Reports a startup failure on stderr, whatever the log sink is, and exits
fn die(msg: String) -> ! {
    let logger = logger::with_name_as_console("taskmaster");
    let record = logger.warn().with_message(&msg);
    let _ = logger.format_record(&mut io::stderr(), &record);
    process::exit(1);
}

fn setup_logging(settings: &Settings) {
    match settings.logfile.as_ref() {
        Some(path) => {
            if let Err(err) = logger::log_to_file(path) {
                die(format!("failed to open log file {}: {}", path.display(), err));
            }
        }
        None if settings.mode == Mode::Daemon => {}
        None => logger::discard_logs(),
    }

    logger::set_global_debug(settings.debug);
}

fn install_watcher() -> SignalWatcher {
    return match SignalWatcher::install() {
        Ok(watcher) => watcher,
        Err(err) => die(err.to_string()),
    };
}

fn load_registry(config: &Path) -> TaskRegistry {
    return match TaskRegistry::load_from_disk(config) {
        Ok(registry) => registry,
        Err(err) => die(err.to_string()),
    };
}

fn run_cli(settings: &Settings) {
    let mut master = RemoteMaster::new(&settings.socket, settings.timeout);
    let stdin = io::stdin();
    Console::stdio("taskmaster").run(stdin.lock(), &mut master);
}

fn run_as_daemon(settings: &Settings) {
    if let Err(err) = check_pid_file(&settings.pidfile) {
        die(err.to_string());
    }

    // Surface config errors while we still have a terminal
    if let Err(err) = load_config(&settings.config) {
        die(err.to_string());
    }

    let socket = match ControlSocket::bind(&settings.socket) {
        Ok(socket) => socket,
        Err(err) => die(err.to_string()),
    };

    if let Err(err) = nix::unistd::daemon(true, true) {
        die(format!("failed to daemonize: {}", err));
    }

    let logger = logger::with_name_as_json("taskmaster");
    if let Err(err) = write_pid_file(&settings.pidfile) {
        logger.warn().with_string("error", err.to_string()).smsg("Failed to write pid file");
        drop(socket);
        process::exit(1);
    }

    let watcher = install_watcher();
    let mut registry = load_registry(&settings.config);
    logger
        .info()
        .with_u32("pid", process::id())
        .with_u64("tasks", registry.len() as u64)
        .smsg("Daemon started");

    run_daemon(&mut registry, &socket, &watcher);

    drop(registry);
    drop(socket);
    remove_pid_file(&settings.pidfile);
    logger.info().smsg("Daemon exited");
}

fn main() {
    let args = App::new("taskmaster")
        .version("0.1")
        .author("Colin D. <colin@quirl.co.nz>")
        .about("Supervises a set of programs described by a config file")
        .arg(Arg::with_name("daemon").short("d").long("daemon").help("Runs the supervisor in the background, controlled over a socket"))
        .arg(Arg::with_name("cli").long("cli").conflicts_with("daemon").help("Connects a console to a running daemon"))
        .arg(Arg::with_name("config").short("c").long("config").takes_value(true).help("The task config file"))
        .arg(Arg::with_name("socket").long("socket").takes_value(true).help("The control socket file"))
        .arg(Arg::with_name("pidfile").long("pidfile").takes_value(true).help("The daemon's pid file"))
        .arg(Arg::with_name("logfile").long("logfile").takes_value(true).help("Appends logs to this file"))
        .arg(Arg::with_name("debug").long("debug").help("Enables debug logging"))
        .arg(Arg::with_name("timeout").long("timeout").takes_value(true).help("Seconds the console waits for a daemon reply"))
        .get_matches();

    let settings = match Settings::from_args(&args) {
        Ok(settings) => settings,
        Err(err) => die(err),
    };

    setup_logging(&settings);

    match settings.mode {
        Mode::Cli => run_cli(&settings),
        Mode::Daemon => run_as_daemon(&settings),
        Mode::Embedded => {
            let watcher = install_watcher();
            let mut registry = load_registry(&settings.config);
            run_embedded(&mut registry, &watcher);
        }
    }
}
