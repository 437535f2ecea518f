use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use libq::logger::{self, JSONRecordWriter, Logger};

use super::serde::{load_config, LoadedConfig};
use super::task::{Task, TaskConfig};
use crate::error::{ConfigError, MasterError};
use crate::master::Master;

/// The name-keyed set of tasks the supervisor owns
pub struct TaskRegistry {
    tasks: BTreeMap<String, Task>,
    config_path: Option<PathBuf>,
    exiting: bool,
    logger: Logger<JSONRecordWriter>,
}

impl TaskRegistry {
    pub fn new() -> TaskRegistry {
        return TaskRegistry {
            tasks: BTreeMap::new(),
            config_path: None,
            exiting: false,
            logger: logger::with_name_as_json("TaskRegistry"),
        };
    }

    /// Builds a registry from the config document at `path` and autostarts its tasks
    pub fn load_from_disk(path: &Path) -> Result<TaskRegistry, ConfigError> {
        let mut registry = TaskRegistry::new();
        let loaded = load_config(path)?;
        registry.replace(path, loaded);
        return Ok(registry);
    }

    /// Adds a task, replacing (and stopping) any task of the same name
    pub fn add_task(&mut self, config: TaskConfig) {
        if let Some(mut old) = self.tasks.insert(config.name.clone(), Task::from(config)) {
            old.stop();
        }
    }

    pub fn get_task(&self, name: &str) -> Option<&Task> {
        return self.tasks.get(name);
    }

    pub fn len(&self) -> usize {
        return self.tasks.len();
    }

    pub fn is_empty(&self) -> bool {
        return self.tasks.is_empty();
    }

    pub fn get_config_path(&self) -> Option<&Path> {
        return self.config_path.as_ref().map(|path| path.as_path());
    }

    /// Whether an exit has been requested
    pub fn is_exiting(&self) -> bool {
        return self.exiting;
    }

    fn get_task_mut(&mut self, name: &str) -> Result<&mut Task, MasterError> {
        return self.tasks.get_mut(name).ok_or_else(|| MasterError::NoSuchTask(name.to_owned()));
    }

    /// Brings every task's state in line with what its processes are doing
    pub fn reconcile(&mut self) {
        for task in self.tasks.values_mut() {
            task.update();
        }
    }

    pub fn stop_all(&mut self) {
        for task in self.tasks.values_mut() {
            task.stop();
        }
    }

    /// Stops every task and waits for their processes to be gone. Grace timers
    /// force-kill stragglers, so this takes at most the longest grace period
    pub fn shutdown(&mut self) {
        self.stop_all();

        let grace = self.tasks.values().map(|task| task.get_config().spec.stop_grace).max().unwrap_or_default();
        let deadline = Instant::now() + grace + Duration::from_secs(1);
        for task in self.tasks.values_mut() {
            if !task.wait_stopped(deadline) {
                self.logger
                    .warn()
                    .with_str("task", task.get_name())
                    .smsg("Task still has processes after shutdown");
            }
        }
    }

    /// Starts every task marked autostart. Failures are logged and skipped
    pub fn autostart(&mut self) {
        for task in self.tasks.values_mut() {
            if !task.get_config().autostart {
                continue;
            }

            if let Err(err) = task.start() {
                self.logger
                    .warn()
                    .with_str("task", task.get_name())
                    .with_string("error", err.to_string())
                    .smsg("Failed to autostart task");
            }
        }
    }

    /// Stops the current task set and swaps in a freshly loaded one
    fn replace(&mut self, path: &Path, loaded: LoadedConfig) {
        for warning in loaded.warnings.iter() {
            self.logger
                .warn()
                .with_string("path", path.display().to_string())
                .msg(warning.clone());
        }

        self.stop_all();
        self.tasks.clear();
        for config in loaded.tasks.into_iter() {
            self.logger.debug().msg(format!("Loaded task {}", config));
            self.tasks.insert(config.name.clone(), Task::from(config));
        }

        self.config_path = Some(path.to_path_buf());
        self.logger
            .info()
            .with_string("path", path.display().to_string())
            .with_u64("tasks", self.tasks.len() as u64)
            .smsg("Loaded config");

        self.autostart();
    }
}

impl Master for TaskRegistry {
    fn start(&mut self, name: &str) -> Result<String, MasterError> {
        self.logger.info().with_str("task", name).smsg("Start requested");
        self.get_task_mut(name)?.start()?;
        return Ok(format!("{}: started", name));
    }

    fn stop(&mut self, name: &str) -> Result<String, MasterError> {
        self.logger.info().with_str("task", name).smsg("Stop requested");
        self.get_task_mut(name)?.stop();
        return Ok(format!("{}: stopped", name));
    }

    fn restart(&mut self, name: &str) -> Result<String, MasterError> {
        self.logger.info().with_str("task", name).smsg("Restart requested");
        self.get_task_mut(name)?.restart()?;
        return Ok(format!("{}: restarted", name));
    }

    fn status(&mut self, name: &str) -> Result<String, MasterError> {
        self.reconcile();
        if !name.is_empty() {
            return Ok(self.get_task_mut(name)?.status());
        }

        if self.tasks.is_empty() {
            return Ok("no tasks".to_owned());
        }

        let lines: Vec<String> = self.tasks.values().map(|task| task.status()).collect();
        return Ok(format!("status:\n{}", lines.join("\n")));
    }

    fn reload_config(&mut self, path: &str) -> Result<String, MasterError> {
        let path = if path.is_empty() {
            match self.config_path.as_ref() {
                Some(path) => path.clone(),
                None => {
                    return Err(MasterError::Config(ConfigError::NoPath));
                }
            }
        } else {
            PathBuf::from(path)
        };

        self.logger.info().with_string("path", path.display().to_string()).smsg("Reload requested");

        // Nothing changes unless the new document loads cleanly
        let loaded = match load_config(&path) {
            Ok(loaded) => loaded,
            Err(err) => {
                self.logger
                    .warn()
                    .with_string("path", path.display().to_string())
                    .with_string("error", err.to_string())
                    .smsg("Failed to reload config");
                return Err(MasterError::from(err));
            }
        };

        self.replace(&path, loaded);
        return Ok(format!("config {} loaded", path.display()));
    }

    fn exit(&mut self) -> Result<String, MasterError> {
        self.logger.info().smsg("Exit requested");
        self.exiting = true;
        return Ok("taskmaster: exiting".to_owned());
    }
}

impl Drop for TaskRegistry {
    fn drop(&mut self) {
        self.stop_all();
    }
}
