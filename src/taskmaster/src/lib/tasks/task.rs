use std::fmt;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use libq::logger;
use nix::sys::signal::Signal;

use super::process::{Process, ProcessSpec, ProcessState, REAP_INTERVAL};
use crate::error::TaskError;

pub const DEFAULT_MIN_UPTIME: Duration = Duration::from_secs(5);

/// What to do with a replica that dies after its task has come up
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RestartPolicy {
    Never,

    /// Restart unless the replica exited with one of the accepted exit codes
    OnUnexpectedExit,
    Always,
}

impl fmt::Display for RestartPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            RestartPolicy::Never => write!(f, "false"),
            RestartPolicy::OnUnexpectedExit => write!(f, "unexpected"),
            RestartPolicy::Always => write!(f, "true"),
        };
    }
}

/// The configuration of a task, as loaded from a config document
#[derive(Debug, Clone, PartialEq)]
pub struct TaskConfig {
    pub name: String,
    pub spec: ProcessSpec,
    pub numprocs: usize,
    pub autostart: bool,
    pub autorestart: RestartPolicy,
    pub exitcodes: Vec<i32>,

    /// How many times the group may be respawned while coming up
    pub startretries: u32,

    /// How long every replica must stay alive before the task counts as running
    pub starttime: Duration,
}

impl TaskConfig {
    pub fn new<S: Into<String>>(name: S, spec: ProcessSpec) -> TaskConfig {
        return TaskConfig {
            name: name.into(),
            spec: spec,
            numprocs: 1,
            autostart: false,
            autorestart: RestartPolicy::Never,
            exitcodes: vec![0],
            startretries: 0,
            starttime: DEFAULT_MIN_UPTIME,
        };
    }

    /// Whether a replica that ended in `state` died the way it was expected to
    fn is_expected_exit(&self, state: ProcessState) -> bool {
        return match state {
            ProcessState::Exited(code) => self.exitcodes.contains(&code),
            _ => false,
        };
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TaskState {
    Stopped,
    Starting,
    Running,
    Exited,
    Fatal,
    Error,
    Unknown,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            TaskState::Stopped => "stopped",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Exited => "exited",
            TaskState::Fatal => "fatal",
            TaskState::Error => "error",
            TaskState::Unknown => "unknown",
        };

        return write!(f, "{}", tag);
    }
}

struct StartTime {
    instant: Instant,
    wall: DateTime<Local>,
}

impl StartTime {
    fn now() -> StartTime {
        return StartTime {
            instant: Instant::now(),
            wall: Local::now(),
        };
    }
}

/// A group of identical replicas of one program, driven through the
/// stopped / starting / running lifecycle
pub struct Task {
    config: TaskConfig,
    state: TaskState,
    starttries: u32,
    started: Option<StartTime>,
    replicas: Vec<Process>,
}

impl From<TaskConfig> for Task {
    fn from(config: TaskConfig) -> Self {
        let spec = Arc::new(config.spec.clone());
        let replicas = (0..config.numprocs.max(1)).map(|_| Process::new(Arc::clone(&spec))).collect();

        return Task {
            config: config,
            state: TaskState::Stopped,
            starttries: 0,
            started: None,
            replicas: replicas,
        };
    }
}

impl Task {
    pub fn get_name(&self) -> &str {
        return &self.config.name;
    }

    pub fn get_config(&self) -> &TaskConfig {
        return &self.config;
    }

    pub fn get_state(&self) -> TaskState {
        return self.state;
    }

    pub fn get_starttries(&self) -> u32 {
        return self.starttries;
    }

    pub fn get_start_time(&self) -> Option<DateTime<Local>> {
        return self.started.as_ref().map(|started| started.wall);
    }

    pub fn replicas(&self) -> std::slice::Iter<'_, Process> {
        return self.replicas.iter();
    }

    fn set_state(&mut self, state: TaskState) {
        if self.state != state {
            logger::with_name_as_json("task;state")
                .info()
                .with_str("task", &self.config.name)
                .with_string("from", self.state.to_string())
                .with_string("to", state.to_string())
                .smsg("Task changed state");
        }

        self.state = state;
    }

    pub fn start(&mut self) -> Result<(), TaskError> {
        match self.state {
            TaskState::Starting | TaskState::Running => {
                return Err(TaskError::AlreadyStarted);
            }
            TaskState::Fatal => {
                return Err(TaskError::Fatal);
            }
            TaskState::Unknown => {
                return Err(TaskError::Unrecoverable);
            }
            TaskState::Stopped | TaskState::Exited | TaskState::Error => {}
        }

        self.starttries = 0;
        if let Err(err) = self.spawn_all() {
            self.set_state(TaskState::Error);
            return Err(err);
        }

        self.started = Some(StartTime::now());
        self.set_state(TaskState::Starting);
        return Ok(());
    }

    /// Spawns every replica. If one fails, the ones already spawned are stopped again
    fn spawn_all(&mut self) -> Result<(), TaskError> {
        let stop_signal = self.config.spec.stop_signal;
        for i in 0..self.replicas.len() {
            if let Err(err) = self.replicas[i].spawn() {
                logger::with_name_as_json("task;start")
                    .warn()
                    .with_str("task", &self.config.name)
                    .with_string("error", err.to_string())
                    .smsg("Failed to spawn replica");

                for replica in self.replicas[..i].iter_mut() {
                    replica.request_stop(stop_signal);
                }

                return Err(TaskError::from(err));
            }
        }

        return Ok(());
    }

    /// Asks every replica to stop. Always leaves the task stopped
    pub fn stop(&mut self) {
        let stop_signal = self.config.spec.stop_signal;
        for replica in self.replicas.iter_mut() {
            replica.request_stop(stop_signal);
        }

        self.starttries = 0;
        self.started = None;
        self.set_state(TaskState::Stopped);
    }

    /// Polls the replicas until none of them is alive or `deadline` passes.
    /// Returns whether they all went away
    pub fn wait_stopped(&mut self, deadline: Instant) -> bool {
        loop {
            for replica in self.replicas.iter_mut() {
                replica.poll(false);
            }

            if !self.replicas.iter().any(|replica| replica.is_launched()) {
                return true;
            }

            if Instant::now() >= deadline {
                return false;
            }

            thread::sleep(REAP_INTERVAL);
        }
    }

    pub fn restart(&mut self) -> Result<(), TaskError> {
        self.stop();
        return self.start();
    }

    /// Advances the state machine from what the replicas are doing now
    pub fn update(&mut self) {
        if self.state != TaskState::Starting && self.state != TaskState::Running {
            return;
        }

        if self.state == TaskState::Starting {
            let up_for = self.started.as_ref().map(|started| started.instant.elapsed()).unwrap_or_default();
            if up_for >= self.config.starttime {
                self.set_state(TaskState::Running);
            }
        }

        for i in 0..self.replicas.len() {
            self.replicas[i].poll(false);
            let replica_state = self.replicas[i].state();
            if replica_state.is_launched() {
                continue;
            }

            if self.state == TaskState::Starting {
                self.on_startup_death(i, replica_state);
                return;
            }

            let respawn = match self.config.autorestart {
                RestartPolicy::Always => true,
                RestartPolicy::OnUnexpectedExit => !self.config.is_expected_exit(replica_state),
                RestartPolicy::Never => false,
            };

            // A replica already sitting in Error failed its respawn on an earlier pass
            if respawn && replica_state != ProcessState::Error {
                logger::with_name_as_json("task;update")
                    .info()
                    .with_str("task", &self.config.name)
                    .with_u64("replica", i as u64)
                    .with_string("status", replica_state.to_string())
                    .smsg("Restarting replica");

                if let Err(err) = self.replicas[i].spawn() {
                    logger::with_name_as_json("task;update")
                        .warn()
                        .with_str("task", &self.config.name)
                        .with_string("error", err.to_string())
                        .smsg("Failed to restart replica");
                }
            }
        }

        if self.state == TaskState::Running && !self.replicas.iter().any(|replica| replica.is_launched()) {
            self.set_state(TaskState::Exited);
        }
    }

    fn on_startup_death(&mut self, index: usize, replica_state: ProcessState) {
        let logger = logger::with_name_as_json("task;update");
        for replica in self.replicas.iter_mut() {
            replica.request_stop(Signal::SIGKILL);
        }

        if self.starttries >= self.config.startretries {
            logger
                .warn()
                .with_str("task", &self.config.name)
                .with_u32("attempts", self.starttries + 1)
                .smsg("Task died while starting and is out of retries");
            self.set_state(TaskState::Fatal);
            return;
        }

        self.starttries += 1;
        logger
            .info()
            .with_str("task", &self.config.name)
            .with_u64("replica", index as u64)
            .with_string("status", replica_state.to_string())
            .with_u32("retry", self.starttries)
            .smsg("Replica died while starting, respawning the group");

        if let Err(err) = self.spawn_all() {
            logger
                .warn()
                .with_str("task", &self.config.name)
                .with_string("error", err.to_string())
                .smsg("Failed to respawn task");
            self.set_state(TaskState::Error);
            return;
        }

        self.started = Some(StartTime::now());
    }

    /// A human readable summary of the task
    pub fn status(&self) -> String {
        let mut out = format!("{}: {}", self.config.name, self.state);
        if self.state != TaskState::Starting && self.state != TaskState::Running {
            return out;
        }

        if let Some(started) = self.started.as_ref() {
            out.push_str(&format!(
                "\n  started: {}, uptime: {}s, attempts: {}",
                started.wall.format("%Y-%m-%d %H:%M:%S"),
                started.instant.elapsed().as_secs(),
                self.starttries + 1
            ));
        }

        for (i, replica) in self.replicas.iter().enumerate() {
            match replica.pid() {
                Some(pid) => out.push_str(&format!("\n  #{} pid {} {}", i, pid, replica.state())),
                None => out.push_str(&format!("\n  #{} {}", i, replica.state())),
            }
        }

        return out;
    }
}
