use std::collections::BTreeMap;
use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};
use std::time::Duration;

use libq::qnix::{signal_name, to_mode, to_signal, to_signal_num};
use libq::strings::CommaList;
use nix::sys::signal::Signal;
use nix::sys::stat::Mode;
use serde::de::{self, Deserializer, Visitor};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use super::process::ProcessSpec;
use super::task::{RestartPolicy, TaskConfig};
use crate::error::ConfigError;

/// Every key a `[programs.NAME]` table may carry
const TASK_KEYS: &[&str] = &[
    "cmd",
    "args",
    "numprocs",
    "umask",
    "workingdir",
    "autostart",
    "autorestart",
    "exitcodes",
    "startretries",
    "starttime",
    "stopsignal",
    "stoptime",
    "stdin",
    "stdout",
    "stderr",
    "env",
];

/// A stop signal, given either by name ("TERM", "SIGTERM") or by number
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalDef(pub Signal);

struct SignalVisitor;
impl<'de> Visitor<'de> for SignalVisitor {
    type Value = SignalDef;
    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return f.write_str("either a signal name or a signal number");
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        let num: i32 = value.try_into().map_err(|_| E::custom(format!("Invalid signal number: {}", value)))?;
        return to_signal_num(num).map(SignalDef).map_err(E::custom);
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        return to_signal(value).map(SignalDef).map_err(E::custom);
    }
}

impl<'de> Deserialize<'de> for SignalDef {
    fn deserialize<D>(deserializer: D) -> Result<SignalDef, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SignalVisitor)
    }
}

impl Serialize for SignalDef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(signal_name(self.0))
    }
}

/// A file mode mask, given either as an octal string ("022") or as an integer (0o022)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UmaskDef(pub Mode);

struct UmaskVisitor;
impl<'de> Visitor<'de> for UmaskVisitor {
    type Value = UmaskDef;
    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return f.write_str("an octal umask, either as a string or an integer");
    }

    fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if value < 0 || value > 0o777 {
            return Err(E::custom(format!("umask out of range: {:o}", value)));
        }

        return Ok(UmaskDef(Mode::from_bits_truncate(value as nix::libc::mode_t)));
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        return to_mode(value).map(UmaskDef).map_err(E::custom);
    }
}

impl<'de> Deserialize<'de> for UmaskDef {
    fn deserialize<D>(deserializer: D) -> Result<UmaskDef, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(UmaskVisitor)
    }
}

impl Serialize for UmaskDef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:03o}", self.0.bits()))
    }
}

/// `autorestart`: `true`, `false` or `"unexpected"`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RestartDef(pub RestartPolicy);

struct RestartVisitor;
impl<'de> Visitor<'de> for RestartVisitor {
    type Value = RestartDef;
    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        return f.write_str("true, false or \"unexpected\"");
    }

    fn visit_bool<E>(self, value: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        if value {
            return Ok(RestartDef(RestartPolicy::Always));
        }

        return Ok(RestartDef(RestartPolicy::Never));
    }

    fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        return match value.to_lowercase().as_str() {
            "unexpected" => Ok(RestartDef(RestartPolicy::OnUnexpectedExit)),
            "true" | "always" => Ok(RestartDef(RestartPolicy::Always)),
            "false" | "never" => Ok(RestartDef(RestartPolicy::Never)),
            _ => Err(E::custom(format!("Invalid restart policy: {}", value))),
        };
    }
}

impl<'de> Deserialize<'de> for RestartDef {
    fn deserialize<D>(deserializer: D) -> Result<RestartDef, D::Error>
    where
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(RestartVisitor)
    }
}

impl Serialize for RestartDef {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self.0 {
            RestartPolicy::Never => serializer.serialize_bool(false),
            RestartPolicy::Always => serializer.serialize_bool(true),
            RestartPolicy::OnUnexpectedExit => serializer.serialize_str("unexpected"),
        }
    }
}

/// One `[programs.NAME]` table. Anything missing takes its default
#[derive(Debug, Deserialize, Serialize, PartialEq)]
pub struct TaskDef {
    pub cmd: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub numprocs: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umask: Option<UmaskDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workingdir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autostart: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub autorestart: Option<RestartDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exitcodes: Option<Vec<i32>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startretries: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starttime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stopsignal: Option<SignalDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stoptime: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,

    // Tables have to come after plain values when rendered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct ConfigDef {
    #[serde(default)]
    pub programs: BTreeMap<String, TaskDef>,
}

impl TryFrom<(String, TaskDef)> for TaskConfig {
    type Error = ConfigError;

    fn try_from((name, def): (String, TaskDef)) -> Result<Self, Self::Error> {
        let invalid = |message: &str| ConfigError::Invalid {
            name: name.clone(),
            message: message.to_owned(),
        };

        if def.cmd.is_empty() {
            return Err(invalid("cmd must not be empty"));
        }

        if def.numprocs == Some(0) {
            return Err(invalid("numprocs must be at least 1"));
        }

        let mut spec = ProcessSpec::new(def.cmd);
        spec.args = def.args.unwrap_or_default();
        spec.env = def.env.unwrap_or_default();
        if let Some(dir) = def.workingdir {
            spec.working_dir = PathBuf::from(dir);
        }
        if let Some(UmaskDef(mask)) = def.umask {
            spec.umask = mask;
        }
        if let Some(path) = def.stdin {
            spec.stdin = PathBuf::from(path);
        }
        if let Some(path) = def.stdout {
            spec.stdout = PathBuf::from(path);
        }
        if let Some(path) = def.stderr {
            spec.stderr = PathBuf::from(path);
        }
        if let Some(SignalDef(signal)) = def.stopsignal {
            spec.stop_signal = signal;
        }
        if let Some(secs) = def.stoptime {
            spec.stop_grace = Duration::from_secs(secs);
        }

        let mut config = TaskConfig::new(name.clone(), spec);
        if let Some(numprocs) = def.numprocs {
            config.numprocs = numprocs as usize;
        }
        if let Some(autostart) = def.autostart {
            config.autostart = autostart;
        }
        if let Some(RestartDef(policy)) = def.autorestart {
            config.autorestart = policy;
        }
        if let Some(codes) = def.exitcodes {
            config.exitcodes = codes;
        }
        if let Some(retries) = def.startretries {
            config.startretries = retries;
        }
        if let Some(secs) = def.starttime {
            config.starttime = Duration::from_secs(secs);
        }

        return Ok(config);
    }
}

fn path_string(path: &Path) -> String {
    return path.display().to_string();
}

impl From<&TaskConfig> for TaskDef {
    fn from(config: &TaskConfig) -> Self {
        let spec = &config.spec;
        return TaskDef {
            cmd: path_string(&spec.command),
            args: Some(spec.args.clone()),
            numprocs: Some(config.numprocs as u32),
            umask: Some(UmaskDef(spec.umask)),
            workingdir: Some(path_string(&spec.working_dir)),
            autostart: Some(config.autostart),
            autorestart: Some(RestartDef(config.autorestart)),
            exitcodes: Some(config.exitcodes.clone()),
            startretries: Some(config.startretries),
            starttime: Some(config.starttime.as_secs()),
            stopsignal: Some(SignalDef(spec.stop_signal)),
            stoptime: Some(spec.stop_grace.as_secs()),
            stdin: Some(path_string(&spec.stdin)),
            stdout: Some(path_string(&spec.stdout)),
            stderr: Some(path_string(&spec.stderr)),
            env: if spec.env.is_empty() { None } else { Some(spec.env.clone()) },
        };
    }
}

impl fmt::Display for TaskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = &self.spec;
        writeln!(f, "{}:", self.name)?;
        writeln!(f, "  cmd: {}", spec.command.display())?;
        writeln!(f, "  args: {}", CommaList(&spec.args))?;
        writeln!(f, "  numprocs: {}", self.numprocs)?;
        writeln!(f, "  umask: {:03o}", spec.umask.bits())?;
        writeln!(f, "  workingdir: {}", spec.working_dir.display())?;
        writeln!(f, "  autostart: {}", self.autostart)?;
        writeln!(f, "  autorestart: {}", self.autorestart)?;
        writeln!(f, "  exitcodes: {}", CommaList(&self.exitcodes))?;
        writeln!(f, "  startretries: {}", self.startretries)?;
        writeln!(f, "  starttime: {}", self.starttime.as_secs())?;
        writeln!(f, "  stopsignal: {}", signal_name(spec.stop_signal))?;
        writeln!(f, "  stoptime: {}", spec.stop_grace.as_secs())?;
        writeln!(f, "  stdin: {}", spec.stdin.display())?;
        writeln!(f, "  stdout: {}", spec.stdout.display())?;
        write!(f, "  stderr: {}", spec.stderr.display())?;
        for (key, value) in spec.env.iter() {
            write!(f, "\n  env: {}={}", key, value)?;
        }

        return Ok(());
    }
}

/// The result of loading a config document
#[derive(Debug)]
pub struct LoadedConfig {
    /// Sorted by name
    pub tasks: Vec<TaskConfig>,
    pub warnings: Vec<String>,
}

/// Collects a warning for every key we don't know about
fn unknown_keys(document: &toml::Value) -> Vec<String> {
    let mut warnings = Vec::new();
    let table = match document.as_table() {
        Some(table) => table,
        None => {
            return warnings;
        }
    };

    for (key, value) in table.iter() {
        if key != "programs" {
            warnings.push(format!("unknown top level key `{}`", key));
            continue;
        }

        let programs = match value.as_table() {
            Some(programs) => programs,
            None => continue,
        };

        for (name, program) in programs.iter() {
            if let Some(fields) = program.as_table() {
                for field in fields.keys() {
                    if !TASK_KEYS.contains(&field.as_str()) {
                        warnings.push(format!("program {}: unknown field `{}`", name, field));
                    }
                }
            }
        }
    }

    return warnings;
}

pub fn parse_config(text: &str) -> Result<LoadedConfig, ConfigError> {
    let document: toml::Value = toml::from_str(text).map_err(|err| ConfigError::Parse(err.to_string()))?;
    let warnings = unknown_keys(&document);

    let def: ConfigDef = document.try_into().map_err(|err| ConfigError::Parse(err.to_string()))?;
    if def.programs.is_empty() {
        return Err(ConfigError::Empty);
    }

    let mut tasks = Vec::with_capacity(def.programs.len());
    for (name, task_def) in def.programs.into_iter() {
        tasks.push(TaskConfig::try_from((name, task_def))?);
    }

    return Ok(LoadedConfig {
        tasks: tasks,
        warnings: warnings,
    });
}

pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let text = read_to_string(path).map_err(|err| ConfigError::Io {
        path: path.to_path_buf(),
        source: err,
    })?;

    return parse_config(&text);
}

/// Renders configurations back into a document that `parse_config` accepts
pub fn render_config(configs: &[TaskConfig]) -> Result<String, ConfigError> {
    let def = ConfigDef {
        programs: configs.iter().map(|config| (config.name.clone(), TaskDef::from(config))).collect(),
    };

    return toml::to_string(&def).map_err(|err| ConfigError::Render(err.to_string()));
}
