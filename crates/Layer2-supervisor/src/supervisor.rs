//! Supervisor - the start/stop sequence for the UI dev server
//!
//! One explicitly constructed `Supervisor` owns one `SupervisedProcess`.
//! `start` runs every step in order and cleans up after itself on failure;
//! `stop` is safe to call any number of times.

use crate::checkout::{ensure_checkout, resolve_checkout_dir, CheckoutOutcome};
use crate::executor::{CommandRunner, LocalRunner};
use crate::install::{install_dependencies, InstallReport};
use crate::precheck::{check_tools, ensure_ports_free, is_port_available, resolve_command, ToolCheck};
use crate::process::{ProcessSpec, SupervisedProcess};
use crate::readiness::{probe_http, wait_for_compilation, wait_for_port_while, CompileStatus, PortWait};
use crate::state::{ProcessState, ProcessStatus};
use devhost_foundation::{EnvFile, Error, PhaseConfig, Result, SupervisorConfig};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Key pointing the UI at the agent backend
pub const BACKEND_URL_KEY: &str = "NAT_BACKEND_URL";

/// Key holding the UI port, only written when absent
pub const PORT_KEY: &str = "PORT";

/// Lines attached to a crash report
const CRASH_RECENT_LINES: usize = 50;
const CRASH_ERROR_LINES: usize = 15;

/// Lines shown when the final health check finds the process gone
const HEALTH_CHECK_LINES: usize = 30;

/// Lines shown when the dev server does not answer HTTP
const DEV_SERVER_LINES: usize = 15;

/// Lets the capture tasks drain what the child wrote right before exiting
const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// What a successful `start` did
#[derive(Debug, Clone)]
pub struct StartReport {
    pub pid: u32,
    pub checkout: CheckoutOutcome,
    pub tools: Vec<ToolCheck>,

    /// `None` when installation is disabled
    pub install: Option<InstallReport>,

    /// `.env` file written before launch, if any
    pub env_file: Option<PathBuf>,

    /// Non-fatal problems, in the order they were found
    pub warnings: Vec<String>,
}

// ============================================================================
// Supervisor
// ============================================================================

pub struct Supervisor {
    config: SupervisorConfig,
    runner: Arc<dyn CommandRunner>,
    process: SupervisedProcess,

    /// Extra environment for the child, below the launch env in precedence
    env_overlay: BTreeMap<String, String>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let process = SupervisedProcess::new(config.buffer_capacity);
        Self {
            config,
            runner,
            process,
            env_overlay: BTreeMap::new(),
        }
    }

    /// Supervisor running helper commands on the local machine
    pub fn local(config: SupervisorConfig) -> Self {
        Self::new(config, Arc::new(LocalRunner::new()))
    }

    pub fn with_env_overlay(mut self, overlay: BTreeMap<String, String>) -> Self {
        self.env_overlay.extend(overlay);
        self
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn process(&self) -> &SupervisedProcess {
        &self.process
    }

    // ========================================================================
    // Start
    // ========================================================================

    /// Run the whole start sequence. On failure the child, if any, is stopped
    /// before the error is returned.
    pub async fn start(&self) -> Result<StartReport> {
        if self.process.is_alive() {
            return Err(Error::Process("UI server is already running".to_string()));
        }

        self.process.set_state(ProcessState::Starting);
        match self.start_sequence().await {
            Ok(report) => {
                self.process.set_state(ProcessState::Running);
                info!("UI started successfully on port {}", self.config.ui_port);
                Ok(report)
            }
            Err(e) => {
                error!("Failed to start UI: {}", e);
                if let Err(stop_err) = self.stop().await {
                    warn!("Cleanup after failed start: {}", stop_err);
                }
                self.process.set_state(ProcessState::FailedToStart(e.to_string()));
                Err(e)
            }
        }
    }

    async fn start_sequence(&self) -> Result<StartReport> {
        let config = &self.config;
        let mut warnings = Vec::new();

        info!("Checking prerequisites...");
        let tools = check_tools(
            self.runner.as_ref(),
            &config.required_tools,
            config.tool_check_timeout,
        )
        .await?;

        if is_port_available(&config.host, config.backend_port).await {
            let message = format!(
                "Backend doesn't appear to be running on port {}. The UI may not work properly without it.",
                config.backend_port
            );
            warn!("{}", message);
            warnings.push(message);
        } else {
            info!("Backend is running on port {}", config.backend_port);
        }

        ensure_ports_free(&config.host, &config.exclusive_ports).await?;

        let dir = resolve_checkout_dir(&config.checkout.candidates)
            .ok_or_else(|| Error::Config("no checkout directory configured".to_string()))?;
        let checkout = ensure_checkout(
            self.runner.as_ref(),
            &dir,
            &config.checkout.remote,
            config.checkout.clone_timeout,
        )
        .await?;

        let install = if config.install.skip {
            None
        } else {
            info!("Installing UI dependencies (this may take a few minutes)...");
            Some(install_dependencies(self.runner.as_ref(), &config.install, &dir).await?)
        };

        let env_file = if config.configure_env {
            Some(self.write_env_file(&dir)?)
        } else {
            None
        };

        let pid = self.spawn_child(&dir)?;
        self.check_settled().await?;

        for phase in &config.readiness.phases {
            self.run_phase(phase, &mut warnings).await?;
        }

        self.final_health_check().await?;

        Ok(StartReport {
            pid,
            checkout,
            tools,
            install,
            env_file,
            warnings,
        })
    }

    /// Point the checkout at the backend. Unknown keys are preserved.
    fn write_env_file(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(".env");
        let mut env = EnvFile::load_or_default(&path)?;

        env.set(BACKEND_URL_KEY, self.config.backend_url());
        env.set_if_absent(PORT_KEY, self.config.ui_port.to_string());
        env.save(&path)?;

        if !path.exists() {
            return Err(Error::Setup(format!(
                "Failed to create .env file at {}",
                path.display()
            )));
        }
        info!("Configured {}", path.display());
        Ok(path)
    }

    fn spawn_child(&self, dir: &Path) -> Result<u32> {
        let launch = &self.config.launch;
        let program = resolve_command(&launch.program)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|| launch.program.clone());

        let mut env = self.env_overlay.clone();
        env.extend(launch.env.clone());

        let spec = ProcessSpec::new(program, dir)
            .args(launch.args.iter().cloned())
            .envs(env);
        info!("Starting UI development server...");
        self.process.spawn(&spec)
    }

    /// Give the child a moment, then make sure it did not die right away
    async fn check_settled(&self) -> Result<()> {
        tokio::time::sleep(self.config.launch.settle).await;
        if self.process.is_alive() {
            return Ok(());
        }
        Err(self.crash_error("UI server process exited immediately").await)
    }

    async fn run_phase(&self, phase: &PhaseConfig, warnings: &mut Vec<String>) -> Result<()> {
        let host = &self.config.host;
        info!(
            "Waiting for {} on port {} (up to {}s)...",
            phase.name,
            phase.port,
            phase.timeout.as_secs()
        );

        let outcome = wait_for_port_while(
            host,
            phase.port,
            phase.timeout,
            self.config.readiness.poll_interval,
            || self.process.is_alive(),
        )
        .await;

        match outcome {
            PortWait::Ready => info!("{} is ready on port {}", phase.name, phase.port),
            PortWait::ProcessExited => {
                let message = format!("UI server crashed while waiting for {}", phase.name);
                return Err(self.crash_error(&message).await);
            }
            PortWait::TimedOut if phase.required => {
                let diagnostics = self.process.diagnostics(CRASH_RECENT_LINES, CRASH_ERROR_LINES);
                return Err(Error::Readiness(format!(
                    "{} did not start on port {} within {}s\n{}",
                    phase.name,
                    phase.port,
                    phase.timeout.as_secs(),
                    diagnostics
                )));
            }
            PortWait::TimedOut => {
                let message = format!(
                    "{} may not be ready yet on port {}",
                    phase.name, phase.port
                );
                warn!("{}", message);
                warnings.push(message);
                return Ok(());
            }
        }

        if phase.await_compile {
            self.await_compilation(phase, warnings).await;
        }
        if phase.http_probe {
            self.probe_phase(phase, warnings).await;
        }
        Ok(())
    }

    async fn await_compilation(&self, phase: &PhaseConfig, warnings: &mut Vec<String>) {
        let readiness = &self.config.readiness;
        info!("Waiting for {} to compile...", phase.name);

        match wait_for_compilation(&self.process, readiness.compile_window, readiness.compile_poll)
            .await
        {
            CompileStatus::Compiled => info!("{} compiled", phase.name),
            CompileStatus::Pending => {
                let message = format!(
                    "{} may still be compiling after {}s",
                    phase.name,
                    readiness.compile_window.as_secs()
                );
                warn!("{}", message);
                warnings.push(message);
            }
            // Reported by the final health check
            CompileStatus::ProcessExited => {
                warn!("UI server exited while {} was compiling", phase.name)
            }
        }
    }

    async fn probe_phase(&self, phase: &PhaseConfig, warnings: &mut Vec<String>) {
        let readiness = &self.config.readiness;
        let url = format!("http://{}:{}", self.config.host, phase.port);

        match probe_http(
            &url,
            readiness.http_attempts,
            readiness.http_backoff,
            readiness.http_timeout,
        )
        .await
        {
            Ok(status) => info!("{} is responding at {} ({})", phase.name, url, status),
            Err(e) => {
                let message = format!("{} not responding to HTTP requests: {}", phase.name, e);
                warn!("{}", message);
                warnings.push(message);

                let lines = self.dev_server_lines();
                if !lines.is_empty() {
                    warn!("Recent {} output:\n{}", phase.name, lines.join("\n"));
                }
            }
        }
    }

    /// Recent lines from the dev server itself, else the plain tail
    fn dev_server_lines(&self) -> Vec<String> {
        self.process.with_buffer(|buffer| {
            let lines: Vec<String> = buffer
                .entries()
                .map(|e| e.tagged())
                .filter(|l| l.contains("[1]") || l.to_lowercase().contains("next"))
                .collect();
            if lines.is_empty() {
                buffer.tail_lines(DEV_SERVER_LINES)
            } else {
                lines[lines.len().saturating_sub(DEV_SERVER_LINES)..].to_vec()
            }
        })
    }

    async fn final_health_check(&self) -> Result<()> {
        if self.process.is_alive() {
            return Ok(());
        }
        tokio::time::sleep(DRAIN_GRACE).await;
        let recent = self.process.tail_lines(HEALTH_CHECK_LINES);
        Err(Error::crashed(
            "UI server process has crashed",
            format!(
                "\nLast {} lines of output:\n{}",
                recent.len(),
                recent.join("\n")
            ),
        ))
    }

    async fn crash_error(&self, message: &str) -> Error {
        tokio::time::sleep(DRAIN_GRACE).await;
        let diagnostics = self.process.diagnostics(CRASH_RECENT_LINES, CRASH_ERROR_LINES);
        let detail = match self.process.state().exit_code() {
            Some(code) => format!("{} (exit code {})", message, code),
            None => message.to_string(),
        };
        Error::crashed(detail, diagnostics.to_string())
    }

    // ========================================================================
    // Stop / Status
    // ========================================================================

    /// Graceful then forced shutdown. No-op when nothing is running.
    pub async fn stop(&self) -> Result<()> {
        self.process.stop(self.config.launch.stop_timeout).await
    }

    pub fn status(&self) -> ProcessStatus {
        self.process.status()
    }

    pub fn state(&self) -> ProcessState {
        self.process.state()
    }

    pub fn is_alive(&self) -> bool {
        self.process.is_alive()
    }

    /// Last `n` captured lines
    pub fn recent_output(&self, n: usize) -> Vec<String> {
        self.process.tail_lines(n)
    }

    /// Last `n` captured lines with arrival time and line number
    pub fn recent_output_timestamped(&self, n: usize) -> Vec<String> {
        self.process.with_buffer(|buffer| buffer.tail_timestamped(n))
    }

    /// Poll until the child exits on its own, returning its final status
    pub async fn wait_for_exit(&self, poll: Duration) -> ProcessStatus {
        while self.process.is_alive() {
            tokio::time::sleep(poll).await;
        }
        self.process.status()
    }
}

impl std::fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Supervisor")
            .field("runner", &self.runner.name())
            .field("process", &self.process)
            .finish()
    }
}
