use std::collections::BTreeMap;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::raw::c_char;
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::os::unix::io::RawFd;
use std::path::{Path, PathBuf};
use std::ptr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use libq::io::{DEV_NULL, STDERR_FD, STDIN_FD, STDOUT_FD};
use libq::logger;
use libq::qnix::signal_name;
use nix::errno::Errno;
use nix::fcntl::{open, OFlag};
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::{umask, Mode};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{access, chdir, close, dup2, fork, setpgid, AccessFlags, ForkResult, Pid};

use crate::error::ProcessError;

/// How often grace timers and blocking polls look at the process table
pub const REAP_INTERVAL: Duration = Duration::from_millis(20);

/// Exit status of a child that couldn't be set up or exec'd
const EXEC_FAILED: i32 = 127;

pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

/// Everything needed to launch one program. Shared between all the replicas of a task
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessSpec {
    pub command: PathBuf,
    pub args: Vec<String>,

    /// Added on top of (and overriding) the supervisor's own environment
    pub env: BTreeMap<String, String>,
    pub working_dir: PathBuf,
    pub umask: Mode,
    pub stdin: PathBuf,
    pub stdout: PathBuf,
    pub stderr: PathBuf,
    pub stop_signal: Signal,
    pub stop_grace: Duration,
}

impl ProcessSpec {
    pub fn new<P: Into<PathBuf>>(command: P) -> ProcessSpec {
        return ProcessSpec {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_dir: PathBuf::from("/"),
            umask: Mode::from_bits_truncate(0o022),
            stdin: PathBuf::from(DEV_NULL),
            stdout: PathBuf::from(DEV_NULL),
            stderr: PathBuf::from(DEV_NULL),
            stop_signal: Signal::SIGTERM,
            stop_grace: DEFAULT_STOP_GRACE,
        };
    }
}

/// The observed state of a process handle
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProcessState {
    NotStarted,
    Running,

    /// Suspended by job control. Still alive
    Stopped(Signal),
    Exited(i32),
    Signaled(Signal),

    /// Force-killed by the supervisor
    Terminated,

    /// The last spawn failed
    Error,
}

impl ProcessState {
    /// Whether the handle's pid refers to a live (possibly suspended) process
    pub fn is_launched(&self) -> bool {
        return match self {
            ProcessState::Running | ProcessState::Stopped(_) => true,
            _ => false,
        };
    }
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        return match self {
            ProcessState::NotStarted => write!(f, "not started"),
            ProcessState::Running => write!(f, "running"),
            ProcessState::Stopped(sig) => write!(f, "stopped ({})", signal_name(*sig)),
            ProcessState::Exited(code) => write!(f, "exited ({})", code),
            ProcessState::Signaled(sig) => write!(f, "killed by {}", signal_name(*sig)),
            ProcessState::Terminated => write!(f, "terminated"),
            ProcessState::Error => write!(f, "error"),
        };
    }
}

/// How a child was finally reaped
#[derive(Debug, Clone, Copy, PartialEq)]
enum Reaped {
    Exited(i32),
    Signaled(Signal),

    /// We had to SIGKILL it, or it vanished from under us
    Killed,
}

/// The single record of a child's death. Whoever reaps the pid first (a poll,
/// a hard kill or a grace timer) writes it here while holding the lock, and every
/// later kill or reap of that pid checks it first so a reaped pid is never touched again
#[derive(Default)]
struct ReapSlot {
    reaped: Option<Reaped>,
}

fn lock_slot(slot: &Mutex<ReapSlot>) -> MutexGuard<'_, ReapSlot> {
    return match slot.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
}

fn reaped_from(status: WaitStatus) -> Option<Reaped> {
    return match status {
        WaitStatus::Exited(_, code) => Some(Reaped::Exited(code)),
        WaitStatus::Signaled(_, sig, _) => Some(Reaped::Signaled(sig)),
        _ => None,
    };
}

/// SIGKILLs the pid and blocks until it's reaped. The caller must hold the slot lock
fn kill_and_reap(pid: Pid, slot: &mut ReapSlot) {
    if slot.reaped.is_some() {
        return;
    }

    let _ = kill(pid, Signal::SIGKILL);
    loop {
        match waitpid(pid, None) {
            Ok(status) => {
                if let Some(reaped) = reaped_from(status) {
                    slot.reaped = Some(match reaped {
                        Reaped::Signaled(Signal::SIGKILL) => Reaped::Killed,
                        other => other,
                    });
                    return;
                }
            }
            Err(Errno::EINTR) => {}
            Err(_) => {
                slot.reaped = Some(Reaped::Killed);
                return;
            }
        }
    }
}

/// A cancellable delayed force-kill. While armed, the timer also reaps the child
/// if it exits on its own, so a stopped task never leaves zombies behind
pub struct StopTimer {
    cancelled: Arc<AtomicBool>,
}

impl StopTimer {
    fn arm(pid: Pid, slot: Arc<Mutex<ReapSlot>>, grace: Duration) -> StopTimer {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let deadline = Instant::now() + grace;

        thread::spawn(move || loop {
            thread::sleep(REAP_INTERVAL);
            if flag.load(Ordering::SeqCst) {
                return;
            }

            let mut slot = lock_slot(&slot);
            if slot.reaped.is_some() {
                return;
            }

            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(status) => {
                    if let Some(reaped) = reaped_from(status) {
                        slot.reaped = Some(reaped);
                        return;
                    }
                }
                Err(Errno::EINTR) => {}
                Err(_) => {
                    slot.reaped = Some(Reaped::Killed);
                    return;
                }
            }

            if Instant::now() >= deadline {
                logger::with_name_as_json("process;stop_timer")
                    .info()
                    .with_i32("pid", pid.as_raw())
                    .smsg("Grace period elapsed, killing process");
                kill_and_reap(pid, &mut slot);
                return;
            }
        });

        return StopTimer { cancelled: cancelled };
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// One spawned OS process
struct Child {
    pid: Pid,
    slot: Arc<Mutex<ReapSlot>>,
    timer: Option<StopTimer>,
}

impl Child {
    fn cancel_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel();
        }
    }
}

/// Everything the forked child needs, built before the fork so the child never allocates
struct ExecPlan {
    command: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
    working_dir: CString,
    stdin: CString,
    stdout: CString,
    stderr: CString,
    dev_null: CString,
    umask: Mode,
}

fn path_to_cstring(what: &'static str, path: &Path) -> Result<CString, ProcessError> {
    return CString::new(path.as_os_str().as_bytes()).map_err(|_| ProcessError::InvalidString {
        what: what,
        value: path.display().to_string(),
    });
}

fn str_to_cstring(what: &'static str, value: Vec<u8>) -> Result<CString, ProcessError> {
    return CString::new(value).map_err(|err| ProcessError::InvalidString {
        what: what,
        value: String::from_utf8_lossy(&err.into_vec()).into_owned(),
    });
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    return strings.iter().map(|s| s.as_ptr()).chain(std::iter::once(ptr::null())).collect();
}

impl ExecPlan {
    fn build(spec: &ProcessSpec) -> Result<ExecPlan, ProcessError> {
        let command = path_to_cstring("command", &spec.command)?;

        let mut argv = vec![command.clone()];
        for arg in spec.args.iter() {
            argv.push(str_to_cstring("argument", arg.clone().into_bytes())?);
        }

        let mut env: BTreeMap<Vec<u8>, Vec<u8>> = std::env::vars_os()
            .map(|(key, value)| (key.into_vec(), value.into_vec()))
            .collect();
        for (key, value) in spec.env.iter() {
            env.insert(key.clone().into_bytes(), value.clone().into_bytes());
        }

        let mut envp = Vec::with_capacity(env.len());
        for (mut key, mut value) in env.into_iter() {
            key.push(b'=');
            key.append(&mut value);
            envp.push(str_to_cstring("environment variable", key)?);
        }

        return Ok(ExecPlan {
            command: command,
            argv: argv,
            envp: envp,
            working_dir: path_to_cstring("working directory", &spec.working_dir)?,
            stdin: path_to_cstring("stdin", &spec.stdin)?,
            stdout: path_to_cstring("stdout", &spec.stdout)?,
            stderr: path_to_cstring("stderr", &spec.stderr)?,
            dev_null: path_to_cstring("null device", Path::new(DEV_NULL))?,
            umask: spec.umask,
        });
    }
}

/// Points `fd` at `target`, falling back to the null device if `target` can't be opened
fn redirect(target: &CStr, flags: OFlag, fd: RawFd, dev_null: &CStr) {
    let opened = match open(target, flags | OFlag::O_CLOEXEC, Mode::from_bits_truncate(0o644)) {
        Ok(new_fd) => Ok(new_fd),
        Err(_) => open(dev_null, OFlag::O_RDWR | OFlag::O_CLOEXEC, Mode::empty()),
    };

    match opened {
        Ok(new_fd) => {
            // dup2 clears O_CLOEXEC on the new descriptor
            let _ = dup2(new_fd, fd);
            let _ = close(new_fd);
        }
        Err(_) => {
            let _ = close(fd);
        }
    }
}

/// Runs in the forked child. Never returns into supervisor code
fn exec_child(plan: &ExecPlan, argv: &[*const c_char], envp: &[*const c_char]) -> ! {
    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
    umask(plan.umask);

    if chdir(plan.working_dir.as_c_str()).is_err() {
        unsafe { libc::_exit(EXEC_FAILED) };
    }

    let write_flags = OFlag::O_WRONLY | OFlag::O_CREAT | OFlag::O_APPEND;
    redirect(&plan.stdin, OFlag::O_RDONLY, STDIN_FD, &plan.dev_null);
    redirect(&plan.stdout, write_flags, STDOUT_FD, &plan.dev_null);
    redirect(&plan.stderr, write_flags, STDERR_FD, &plan.dev_null);

    unsafe {
        libc::execve(plan.command.as_ptr(), argv.as_ptr(), envp.as_ptr());
        libc::_exit(EXEC_FAILED);
    }
}

/// A handle on one supervised OS process. Holds at most one live child at a time;
/// re-spawning replaces the child but keeps the spec
pub struct Process {
    spec: Arc<ProcessSpec>,
    state: ProcessState,
    child: Option<Child>,
    exit_code: Option<i32>,
    term_signal: Option<Signal>,
}

impl Process {
    pub fn new(spec: Arc<ProcessSpec>) -> Process {
        return Process {
            spec: spec,
            state: ProcessState::NotStarted,
            child: None,
            exit_code: None,
            term_signal: None,
        };
    }

    pub fn state(&self) -> ProcessState {
        return self.state;
    }

    pub fn is_launched(&self) -> bool {
        return self.state.is_launched();
    }

    /// The pid of the child, only while it's running or stopped
    pub fn pid(&self) -> Option<Pid> {
        if !self.is_launched() {
            return None;
        }

        return self.child.as_ref().map(|child| child.pid);
    }

    pub fn exit_code(&self) -> Option<i32> {
        return self.exit_code;
    }

    pub fn term_signal(&self) -> Option<Signal> {
        return self.term_signal;
    }

    /// Forks and execs a new child from the spec
    pub fn spawn(&mut self) -> Result<Pid, ProcessError> {
        let logger = logger::with_name_as_json("process;spawn");

        self.retire_child();

        if let Err(errno) = access(self.spec.command.as_path(), AccessFlags::X_OK) {
            self.state = ProcessState::Error;
            return Err(ProcessError::NotExecutable {
                path: self.spec.command.clone(),
                source: errno,
            });
        }

        let plan = match ExecPlan::build(&self.spec) {
            Ok(plan) => plan,
            Err(err) => {
                self.state = ProcessState::Error;
                return Err(err);
            }
        };
        let argv = null_terminated(&plan.argv);
        let envp = null_terminated(&plan.envp);

        let pid = loop {
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => break child,
                Ok(ForkResult::Child) => exec_child(&plan, &argv, &envp),
                Err(Errno::EAGAIN) => {
                    logger.debug().smsg("fork hit EAGAIN, retrying");
                    thread::sleep(REAP_INTERVAL);
                }
                Err(errno) => {
                    self.state = ProcessState::Error;
                    logger.info().with_string("error", errno.to_string()).smsg("Failed to fork child");
                    return Err(ProcessError::Fork(errno));
                }
            }
        };

        logger
            .debug()
            .with_string("command", self.spec.command.display().to_string())
            .with_i32("pid", pid.as_raw())
            .smsg("Spawned process");

        self.child = Some(Child {
            pid: pid,
            slot: Arc::new(Mutex::new(ReapSlot::default())),
            timer: None,
        });
        self.state = ProcessState::Running;
        self.exit_code = None;
        self.term_signal = None;

        return Ok(pid);
    }

    /// Asks the process to stop with `signal`. SIGKILL is synchronous; any other
    /// signal arms a grace timer that force-kills the process if it outlives the
    /// spec's grace period. Does nothing if the process isn't running
    pub fn request_stop(&mut self, signal: Signal) {
        if !self.is_launched() {
            return;
        }

        let was_suspended = match self.state {
            ProcessState::Stopped(_) => true,
            _ => false,
        };

        let child = match self.child.as_mut() {
            Some(child) => child,
            None => {
                return;
            }
        };

        child.cancel_timer();

        if signal == Signal::SIGKILL {
            kill_and_reap(child.pid, &mut lock_slot(&child.slot));
            self.poll(false);
            return;
        }

        {
            let slot = lock_slot(&child.slot);
            if slot.reaped.is_none() {
                let _ = kill(child.pid, signal);
                if was_suspended {
                    // A suspended process can't act on anything but SIGKILL
                    let _ = kill(child.pid, Signal::SIGCONT);
                }
            }
        }

        child.timer = Some(StopTimer::arm(child.pid, Arc::clone(&child.slot), self.spec.stop_grace));
    }

    /// Checks for a change in the state of the child. A blocking poll waits until
    /// the process is no longer running. Returns whether the state changed
    pub fn poll(&mut self, blocking: bool) -> bool {
        let before = self.state;
        loop {
            self.poll_once();
            if !blocking || self.state != ProcessState::Running {
                break;
            }
            thread::sleep(REAP_INTERVAL);
        }

        return self.state != before;
    }

    fn poll_once(&mut self) {
        if !self.is_launched() {
            return;
        }

        let child = match self.child.as_ref() {
            Some(child) => child,
            None => {
                return;
            }
        };

        let mut slot = lock_slot(&child.slot);
        if slot.reaped.is_none() {
            let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
            match waitpid(child.pid, Some(flags)) {
                Ok(WaitStatus::Stopped(_, sig)) => {
                    self.state = ProcessState::Stopped(sig);
                }
                Ok(WaitStatus::Continued(_)) => {
                    self.state = ProcessState::Running;
                }
                Ok(status) => {
                    slot.reaped = reaped_from(status);
                }
                Err(Errno::EINTR) => {}
                Err(_) => {
                    slot.reaped = Some(Reaped::Killed);
                }
            }
        }

        match slot.reaped {
            Some(Reaped::Exited(code)) => {
                self.state = ProcessState::Exited(code);
                self.exit_code = Some(code);
            }
            Some(Reaped::Signaled(sig)) => {
                self.state = ProcessState::Signaled(sig);
                self.term_signal = Some(sig);
            }
            Some(Reaped::Killed) => {
                self.state = ProcessState::Terminated;
                self.term_signal = Some(Signal::SIGKILL);
            }
            None => {}
        }
    }

    /// Sends `sig` to the child
    pub fn signal(&self, sig: Signal) -> Result<(), ProcessError> {
        if !self.is_launched() {
            return Err(ProcessError::NoSuchProcess);
        }

        let child = self.child.as_ref().ok_or(ProcessError::NoSuchProcess)?;
        let slot = lock_slot(&child.slot);
        if slot.reaped.is_some() {
            return Err(ProcessError::NoSuchProcess);
        }

        return kill(child.pid, sig).map_err(|errno| ProcessError::Signal {
            signal: sig,
            source: errno,
        });
    }

    /// Lets go of the current child before it's replaced. A child with a pending
    /// grace timer is left to the timer; anything else still alive is killed
    fn retire_child(&mut self) {
        if let Some(child) = self.child.take() {
            if child.timer.is_none() {
                kill_and_reap(child.pid, &mut lock_slot(&child.slot));
            }
        }
    }
}

impl Drop for Process {
    fn drop(&mut self) {
        self.retire_child();
    }
}
