use std::fs::{create_dir_all, read_to_string, remove_file, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process;

use nix::sys::signal::kill;
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("the daemon is already running as pid {pid} (if not, delete {})", path.display())]
    AlreadyRunning { pid: i32, path: PathBuf },

    #[error("failed to access pid file {}: {source}", path.display())]
    PidFile { path: PathBuf, source: io::Error },
}

/// Reads the pid out of the given pid file, returning None if the file doesn't
/// exist or doesn't contain a pid
pub fn read_pid_file(path: &Path) -> Option<i32> {
    let contents = read_to_string(path).ok()?;
    return contents.lines().next()?.trim().parse::<i32>().ok();
}

/// Errors if the pid file at `path` names a process that is still alive.
/// A missing or stale pid file is fine
pub fn check_pid_file(path: &Path) -> Result<(), DaemonError> {
    let pid = match read_pid_file(path) {
        Some(pid) if pid > 0 => pid,
        _ => {
            return Ok(());
        }
    };

    // Signal 0 only checks for the existence of the process
    if kill(Pid::from_raw(pid), None).is_ok() {
        return Err(DaemonError::AlreadyRunning {
            pid: pid,
            path: path.to_path_buf(),
        });
    }

    return Ok(());
}

/// Writes the pid of the current process into `path`, refusing to if a previous
/// process is still running
pub fn write_pid_file(path: &Path) -> Result<(), DaemonError> {
    check_pid_file(path)?;

    let to_err = |err: io::Error| DaemonError::PidFile {
        path: path.to_path_buf(),
        source: err,
    };

    if let Some(parent_dir) = path.parent() {
        if !parent_dir.as_os_str().is_empty() && !parent_dir.is_dir() {
            create_dir_all(parent_dir).map_err(to_err)?;
        }
    }

    let mut file = File::create(path).map_err(to_err)?;
    file.write_all(format!("{}", process::id()).as_bytes()).map_err(to_err)?;

    return Ok(());
}

/// Removes the pid file, but only if it still belongs to this process
pub fn remove_pid_file(path: &Path) {
    if read_pid_file(path) == Some(process::id() as i32) {
        let _ = remove_file(path);
    }
}
