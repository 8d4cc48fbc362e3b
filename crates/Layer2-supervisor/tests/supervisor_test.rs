//! Start/stop sequence against real child processes
//!
//! Helper commands (tool checks, clone, install) are scripted; the supervised
//! child is a real `sh -c` script and readiness ports are bound by the test.
//!
//! `cargo test -p devhost-supervisor --test supervisor_test`

#![cfg(unix)]

use async_trait::async_trait;
use devhost_foundation::{Error, PhaseConfig, Result, SupervisorConfig};
use devhost_supervisor::{
    CommandOutput, CommandRunner, CommandSpec, ProcessState, ProcessStatus, Supervisor,
};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

// ============================================================================
// Helpers
// ============================================================================

struct ScriptedRunner {
    responses: Mutex<VecDeque<CommandOutput>>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    fn new(responses: Vec<CommandOutput>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().clone()
    }

    /// Calls made from the checkout directory, i.e. install runs
    fn install_calls(&self, dir: &Path) -> Vec<CommandSpec> {
        self.calls()
            .into_iter()
            .filter(|c| c.cwd.as_deref() == Some(dir))
            .collect()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        self.calls.lock().push(spec.clone());
        Ok(self
            .responses
            .lock()
            .pop_front()
            .unwrap_or_else(|| CommandOutput::success("")))
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

async fn bound_port() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

async fn unused_port() -> u16 {
    bound_port().await.1
}

/// Minimal HTTP server answering 404 to everything
async fn serve_not_found() -> u16 {
    let (listener, port) = bound_port().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let _ = socket
                .write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\nConnection: close\r\n\r\n")
                .await;
        }
    });
    port
}

fn phase(name: &str, port: u16, timeout: Duration, required: bool) -> PhaseConfig {
    PhaseConfig {
        name: name.to_string(),
        port,
        timeout,
        required,
        await_compile: false,
        http_probe: false,
    }
}

/// Fast config with a single required gateway phase
async fn config(dir: &Path, gateway_port: u16, script: &str) -> SupervisorConfig {
    let mut config = SupervisorConfig::default();
    config.host = "127.0.0.1".to_string();
    config.backend_port = unused_port().await;
    config.required_tools = vec!["sh".to_string()];
    config.exclusive_ports = Vec::new();
    config.tool_check_timeout = Duration::from_secs(1);
    config.set_checkout_dir(dir);

    config.launch.program = "sh".to_string();
    config.launch.args = vec!["-c".to_string(), script.to_string()];
    config.launch.settle = Duration::from_millis(300);
    config.launch.stop_timeout = Duration::from_secs(2);

    config.readiness.poll_interval = Duration::from_millis(50);
    config.readiness.phases = vec![phase("gateway", gateway_port, Duration::from_secs(2), true)];
    config.readiness.compile_window = Duration::from_secs(3);
    config.readiness.compile_poll = Duration::from_millis(50);
    config.readiness.http_attempts = 3;
    config.readiness.http_backoff = Duration::from_millis(50);
    config.readiness.http_timeout = Duration::from_secs(1);
    config
}

// ============================================================================
// Start sequence
// ============================================================================

#[tokio::test]
async fn test_end_to_end_start() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let dev_port = serve_not_found().await;

    let mut config = config(
        dir.path(),
        gateway_port,
        "echo 'ready - started server'; echo '✓ Compiled / in 812ms'; exec sleep 30",
    )
    .await;
    config.readiness.phases.push(PhaseConfig {
        await_compile: true,
        http_probe: true,
        ..phase("dev server", dev_port, Duration::from_secs(2), false)
    });

    let runner = ScriptedRunner::new(vec![
        CommandOutput::success("sh 5.2"),
        CommandOutput::success("added 812 packages"),
    ]);
    let supervisor = Supervisor::new(config, runner.clone());

    let report = supervisor.start().await.unwrap();
    let install = report.install.as_ref().unwrap();
    assert_eq!(install.attempts_used, 1);
    assert!(!install.strategy.relaxed && !install.strategy.peer_compat);
    assert!(report.warnings.iter().all(|w| !w.contains("dev server")));

    assert_eq!(supervisor.state(), ProcessState::Running);
    assert_eq!(supervisor.status(), ProcessStatus::Running { pid: report.pid });
    assert!(supervisor
        .recent_output(10)
        .iter()
        .any(|l| l.contains("Compiled")));

    let env = std::fs::read_to_string(dir.path().join(".env")).unwrap();
    assert!(env.contains("NAT_BACKEND_URL="));

    supervisor.stop().await.unwrap();
    assert!(!supervisor.is_alive());
}

#[tokio::test]
async fn test_missing_tool_short_circuits() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), unused_port().await, "exec sleep 30").await;
    config.required_tools = vec!["devhost-missing-tool-xyz".to_string()];

    let runner = ScriptedRunner::new(vec![]);
    let supervisor = Supervisor::new(config, runner.clone());

    let err = supervisor.start().await.unwrap_err();
    assert!(err.is_precondition());
    assert!(runner.calls().is_empty());
    assert_eq!(supervisor.status(), ProcessStatus::NotStarted);
    assert!(matches!(supervisor.state(), ProcessState::FailedToStart(_)));
}

#[tokio::test]
async fn test_occupied_port_is_precondition_failure() {
    let dir = TempDir::new().unwrap();
    let (_taken, taken_port) = bound_port().await;
    let mut config = config(dir.path(), taken_port, "exec sleep 30").await;
    config.exclusive_ports = vec![taken_port];

    let runner = ScriptedRunner::new(vec![]);
    let supervisor = Supervisor::new(config, runner.clone());

    let err = supervisor.start().await.unwrap_err();
    assert!(err.is_precondition());
    assert!(err.to_string().contains(&format!("Port {} is already in use", taken_port)));
    assert!(runner.install_calls(dir.path()).is_empty());
    assert_eq!(supervisor.status(), ProcessStatus::NotStarted);
}

#[tokio::test]
async fn test_lockfile_mismatch_retries_for_free() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let mut config = config(dir.path(), gateway_port, "exec sleep 30").await;
    config.install.max_attempts = 2;

    let runner = ScriptedRunner::new(vec![
        CommandOutput::success("sh 5.2"),
        CommandOutput::failure(1, "", "npm ERR! package-lock.json is not in sync"),
        CommandOutput::failure(1, "", "npm ERR! network reset"),
        CommandOutput::success(""),
    ]);
    let supervisor = Supervisor::new(config, runner.clone());

    let report = supervisor.start().await.unwrap();
    let install = report.install.unwrap();
    assert!(install.strategy.relaxed);
    assert_eq!(install.attempts_used, 2);
    assert_eq!(install.runs, 3);

    let installs = runner.install_calls(dir.path());
    assert_eq!(installs[0].args, vec!["ci"]);
    assert_eq!(installs[1].args, vec!["install"]);
    assert_eq!(installs[2].args, vec!["install"]);

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_required_phase_timeout_stops_child() {
    let dir = TempDir::new().unwrap();
    let mut config = config(dir.path(), unused_port().await, "echo booting; exec sleep 30").await;
    config.readiness.phases[0].timeout = Duration::from_millis(500);

    let supervisor = Supervisor::new(config, ScriptedRunner::new(vec![]));

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, Error::Readiness(_)), "{}", err);
    assert!(err.to_string().contains("booting"));

    assert!(!supervisor.is_alive());
    assert!(matches!(supervisor.status(), ProcessStatus::Stopped { .. }));
    assert!(matches!(supervisor.state(), ProcessState::FailedToStart(_)));
}

#[tokio::test]
async fn test_secondary_phase_timeout_is_warning() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let mut config = config(dir.path(), gateway_port, "exec sleep 30").await;
    config
        .readiness
        .phases
        .push(phase("dev server", unused_port().await, Duration::from_millis(300), false));

    let supervisor = Supervisor::new(config, ScriptedRunner::new(vec![]));

    let report = supervisor.start().await.unwrap();
    assert!(report
        .warnings
        .iter()
        .any(|w| w.contains("dev server may not be ready yet")));
    assert!(supervisor.is_alive());

    supervisor.stop().await.unwrap();
}

#[tokio::test]
async fn test_immediate_crash_reports_output() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let config = config(
        dir.path(),
        gateway_port,
        "echo 'starting next dev'; echo 'Error: listen EADDRINUSE :::3000' >&2; exit 1",
    )
    .await;

    let supervisor = Supervisor::new(config, ScriptedRunner::new(vec![]));

    let err = supervisor.start().await.unwrap_err();
    assert!(matches!(err, Error::Crashed { .. }), "{}", err);

    let text = err.to_string();
    assert!(text.contains("exit code 1"));
    assert!(text.contains("starting next dev"));
    assert!(text.contains("EADDRINUSE"));
    assert_eq!(supervisor.status(), ProcessStatus::Stopped { exit_code: Some(1) });
}

// ============================================================================
// Stop
// ============================================================================

#[tokio::test]
async fn test_stop_twice() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let config = config(dir.path(), gateway_port, "exec sleep 30").await;
    let supervisor = Supervisor::new(config, ScriptedRunner::new(vec![]));

    supervisor.start().await.unwrap();

    supervisor.stop().await.unwrap();
    assert_eq!(supervisor.state(), ProcessState::Stopped(Some(-15)));
    assert_eq!(supervisor.status().to_string(), "Stopped (exit code: -15)");
    supervisor.stop().await.unwrap();
    assert!(matches!(supervisor.state(), ProcessState::Stopped(_)));
    assert!(matches!(supervisor.status(), ProcessStatus::Stopped { .. }));
}

#[tokio::test]
async fn test_wait_for_exit_reports_code() {
    let dir = TempDir::new().unwrap();
    let (_gateway, gateway_port) = bound_port().await;
    let config = config(dir.path(), gateway_port, "echo last words; sleep 1; exit 3").await;
    let supervisor = Supervisor::new(config, ScriptedRunner::new(vec![]));

    supervisor.start().await.unwrap();

    let status = tokio::time::timeout(
        Duration::from_secs(5),
        supervisor.wait_for_exit(Duration::from_millis(50)),
    )
    .await
    .unwrap();
    assert_eq!(status, ProcessStatus::Stopped { exit_code: Some(3) });
    assert_eq!(supervisor.state(), ProcessState::Crashed(Some(3)));

    let dump = supervisor.recent_output_timestamped(30);
    assert!(dump.iter().any(|l| l.ends_with("[STDOUT] last words")), "{:?}", dump);
    assert!(dump
        .last()
        .unwrap()
        .ends_with("[SYSTEM] Process exited with code 3"));
}
