use std::io::{self, BufRead};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use libq::logger;

use crate::console::{Console, ConsoleAction};
use crate::signals::SignalWatcher;
use crate::socket::ControlSocket;
use crate::tasks::TaskRegistry;

/// How often the main loop reconciles tasks when nothing else wakes it
pub const TICK: Duration = Duration::from_millis(100);

/// Runs one pass of housekeeping. Returns whether the loop should keep going
fn tick(registry: &mut TaskRegistry, watcher: &SignalWatcher) -> bool {
    if watcher.take_child_exited() {
        logger::with_name_as_json("taskmaster;loop").debug().smsg("Got SIGCHLD");
    }

    registry.reconcile();

    if watcher.shutdown_requested() {
        logger::with_name_as_json("taskmaster;loop").info().smsg("Got shutdown signal");
        return false;
    }

    return !registry.is_exiting();
}

/// Reads stdin on its own thread so the main loop can keep ticking while the user types
fn spawn_stdin_reader() -> Receiver<String> {
    let (sender, receiver) = channel();
    thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(_) => break,
            };

            if sender.send(line).is_err() {
                break;
            }
        }
    });

    return receiver;
}

/// Runs the registry and an interactive console in this process
pub fn run_embedded(registry: &mut TaskRegistry, watcher: &SignalWatcher) {
    let lines = spawn_stdin_reader();
    let mut console = Console::stdio("taskmaster");
    console.prompt();

    loop {
        match lines.recv_timeout(TICK) {
            Ok(line) => {
                if console.execute(&line, registry) == ConsoleAction::Exit {
                    break;
                }

                if !registry.is_exiting() {
                    console.prompt();
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if !tick(registry, watcher) {
            break;
        }
    }

    registry.shutdown();
}

/// Serves the control socket until an exit request or a shutdown signal
pub fn run_daemon(registry: &mut TaskRegistry, socket: &ControlSocket, watcher: &SignalWatcher) {
    logger::with_name_as_json("taskmaster;loop")
        .info()
        .with_string("socket", socket.path().display().to_string())
        .smsg("Listening");

    loop {
        socket.serve_pending(registry);
        if !tick(registry, watcher) {
            break;
        }

        thread::sleep(TICK);
    }

    registry.shutdown();
}
