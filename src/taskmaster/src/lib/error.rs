use std::io;
use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::Signal;
use thiserror::Error;

/// Errors from driving a single OS process
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("{}: not executable: {source}", path.display())]
    NotExecutable { path: PathBuf, source: Errno },

    #[error("{what} contains a NUL byte: {value:?}")]
    InvalidString { what: &'static str, value: String },

    #[error("fork failed: {0}")]
    Fork(Errno),

    #[error("no such process")]
    NoSuchProcess,

    #[error("failed to send {signal}: {source}")]
    Signal { signal: Signal, source: Errno },
}

/// Errors from a task's lifecycle operations
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("already started")]
    AlreadyStarted,

    #[error("task is in a fatal state, stop it before starting it again")]
    Fatal,

    #[error("task is in an unknown state and cannot be recovered")]
    Unrecoverable,

    #[error("spawn failed: {0}")]
    Spawn(#[from] ProcessError),
}

/// Errors from loading a configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io { path: PathBuf, source: io::Error },

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no config has been loaded yet")]
    NoPath,

    #[error("no programs defined")]
    Empty,

    #[error("program {name}: {message}")]
    Invalid { name: String, message: String },

    #[error("failed to render config: {0}")]
    Render(String),
}

/// Errors from the wire protocol
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown message kind {0}")]
    UnknownKind(u32),

    #[error("malformed message: {0}")]
    Malformed(&'static str),

    #[error("unexpected {0:?} message")]
    Unexpected(super::api::MessageKind),
}

/// Errors from binding the control socket
#[derive(Debug, Error)]
pub enum SocketError {
    #[error("another daemon is already listening on {}", .0.display())]
    AlreadyRunning(PathBuf),

    #[error("control socket error: {0}")]
    Io(#[from] io::Error),
}

/// Errors surfaced through the six master operations
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("no such task")]
    NoSuchTask(String),

    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot reach the daemon at {}: {source} (is it running? start it with `taskmaster --daemon`)", socket.display())]
    Connection { socket: PathBuf, source: io::Error },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An error reported by a remote master, already formatted by it
    #[error("{0}")]
    Remote(String),
}

/// Errors from installing the signal watcher
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("a signal watcher is already installed in this process")]
    AlreadyInstalled,

    #[error("sigaction failed: {0}")]
    Sigaction(Errno),
}
