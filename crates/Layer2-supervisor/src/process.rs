//! Supervised process - one long-running child with captured output
//!
//! Features:
//! - stdout/stderr drained by two detached tasks into a bounded buffer
//! - Buffer, handle and state share one mutex
//! - Exit detection that reaps the handle when the child dies on its own
//! - Graceful shutdown with SIGTERM -> SIGKILL escalation (whole process group on Unix)
//! - The child is killed if the owner drops this without stopping it

use crate::log::{is_error_line, DiagnosticReport, LogEntry, OutputBuffer, OutputStream};
use crate::state::{ProcessState, ProcessStatus};
use devhost_foundation::{Error, Result};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

/// What to launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: PathBuf,

    /// Overlay merged over the ambient environment
    pub env: BTreeMap<String, String>,
}

impl ProcessSpec {
    pub fn new(program: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: cwd.into(),
            env: BTreeMap::new(),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn envs(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Everything the capture tasks and the foreground share
#[derive(Debug)]
struct Shared {
    child: Option<Child>,
    pid: Option<u32>,
    spawned: bool,
    exit_code: Option<i32>,
    state: ProcessState,
    buffer: OutputBuffer,
}

/// Owner of at most one live child process
#[derive(Debug)]
pub struct SupervisedProcess {
    shared: Arc<Mutex<Shared>>,
}

impl SupervisedProcess {
    pub fn new(buffer_capacity: usize) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                child: None,
                pid: None,
                spawned: false,
                exit_code: None,
                state: ProcessState::NotStarted,
                buffer: OutputBuffer::new(buffer_capacity),
            })),
        }
    }

    /// Spawn the child and its two capture tasks. Returns the pid.
    pub fn spawn(&self, spec: &ProcessSpec) -> Result<u32> {
        let mut shared = self.shared.lock();
        if shared.child.is_some() {
            return Err(Error::Process("a process is already running".to_string()));
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .current_dir(&spec.cwd)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Own process group so shutdown reaches the whole tree
        #[cfg(unix)]
        {
            cmd.process_group(0);
        }

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to start `{}`: {}", spec.display(), e)))?;

        let pid = child.id().unwrap_or_default();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        shared.buffer.clear();
        shared.child = Some(child);
        shared.pid = Some(pid);
        shared.spawned = true;
        shared.exit_code = None;
        if !shared.state.is_running() {
            shared.state = ProcessState::Starting;
        }
        drop(shared);

        if let Some(stdout) = stdout {
            tokio::spawn(capture(stdout, OutputStream::Stdout, Arc::downgrade(&self.shared)));
        }
        if let Some(stderr) = stderr {
            tokio::spawn(capture(stderr, OutputStream::Stderr, Arc::downgrade(&self.shared)));
        }

        info!("Started `{}` (PID: {})", spec.display(), pid);
        Ok(pid)
    }

    /// Whether the child is still alive. Reaps the handle when it has exited.
    pub fn is_alive(&self) -> bool {
        let mut shared = self.shared.lock();
        let Some(child) = shared.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                let code = exit_code(status);
                shared.child = None;
                shared.exit_code = code;
                shared.state = ProcessState::Crashed(code);
                shared.buffer.push_system(match code {
                    Some(c) if c < 0 => format!("Process killed by signal {}", -c),
                    Some(c) => format!("Process exited with code {}", c),
                    None => "Process exited".to_string(),
                });
                debug!("Supervised process exited on its own ({:?})", code);
                false
            }
            Err(e) => {
                warn!("Failed to poll process status: {}", e);
                true
            }
        }
    }

    /// SIGTERM, wait up to `timeout`, then SIGKILL. No-op without a child.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let child = {
            let mut shared = self.shared.lock();
            match shared.child.take() {
                Some(child) => {
                    shared.state = ProcessState::Stopping;
                    child
                }
                None => return Ok(()),
            }
        };
        let mut child = child;

        info!("Stopping supervised process...");
        if let Err(e) = terminate(&child) {
            warn!("{}", e);
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => exit_code(status),
            Ok(Err(e)) => {
                warn!("Failed to wait for process: {}", e);
                None
            }
            Err(_) => {
                warn!("Force killing supervised process...");
                force_kill(&mut child).await
            }
        };

        let mut shared = self.shared.lock();
        shared.exit_code = code;
        shared.state = ProcessState::Stopped(code);
        shared.buffer.push_system("Process stopped");
        info!("Supervised process stopped");
        Ok(())
    }

    pub fn status(&self) -> ProcessStatus {
        self.is_alive();
        let shared = self.shared.lock();
        match (&shared.child, shared.spawned) {
            (Some(_), _) => ProcessStatus::Running {
                pid: shared.pid.unwrap_or_default(),
            },
            (None, true) => ProcessStatus::Stopped {
                exit_code: shared.exit_code,
            },
            (None, false) => ProcessStatus::NotStarted,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.shared.lock().state.clone()
    }

    pub fn set_state(&self, state: ProcessState) {
        self.shared.lock().state = state;
    }

    pub fn pid(&self) -> Option<u32> {
        let shared = self.shared.lock();
        shared.child.as_ref().and(shared.pid)
    }

    /// Last `n` captured lines, tagged by stream
    pub fn tail_lines(&self, n: usize) -> Vec<String> {
        self.shared.lock().buffer.tail_lines(n)
    }

    pub fn diagnostics(&self, recent: usize, errors: usize) -> DiagnosticReport {
        self.shared.lock().buffer.diagnostics(recent, errors)
    }

    /// Run `f` against the buffer under the lock
    pub fn with_buffer<R>(&self, f: impl FnOnce(&OutputBuffer) -> R) -> R {
        f(&self.shared.lock().buffer)
    }
}

/// Consecutive read errors tolerated before a capture task gives up
const MAX_READ_ERRORS: u32 = 8;

/// Drain one stream line by line until EOF or until the owner is gone.
/// Bytes that are not UTF-8 are replaced, never treated as end of stream.
async fn capture<R>(stream: R, source: OutputStream, owner: Weak<Mutex<Shared>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    let mut errors = 0u32;

    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => errors = 0,
            Err(e) => {
                errors += 1;
                warn!("Failed to read {} of supervised process: {}", source.as_str(), e);
                if errors >= MAX_READ_ERRORS {
                    break;
                }
                continue;
            }
        }

        let line = String::from_utf8_lossy(&raw).trim_end().to_string();
        let Some(shared) = owner.upgrade() else {
            break;
        };
        shared.lock().buffer.push(LogEntry::new(source, line.clone()));
        drop(shared);

        match source {
            OutputStream::Stderr => warn!("[STDERR] {}", line),
            _ if is_error_line(&line) => warn!("[STDOUT] {}", line),
            _ => debug!("[STDOUT] {}", line),
        }
    }
}

/// Exit code, or the negated signal number when a signal ended the process
fn exit_code(status: ExitStatus) -> Option<i32> {
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return Some(-signal);
        }
    }
    status.code()
}

#[cfg(unix)]
fn terminate(child: &Child) -> Result<()> {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        killpg(Pid::from_raw(pid as i32), Signal::SIGTERM)
            .map_err(|e| Error::Process(format!("Failed to send SIGTERM: {}", e)))?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn terminate(_child: &Child) -> Result<()> {
    // No graceful signal here; the timeout path kills
    debug!("Graceful termination unsupported on this platform, will kill");
    Ok(())
}

async fn force_kill(child: &mut Child) -> Option<i32> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;
        if let Some(pid) = child.id() {
            let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
        }
    }

    if let Err(e) = child.kill().await {
        warn!("Failed to kill process: {}", e);
    }
    child.wait().await.ok().and_then(exit_code)
}
