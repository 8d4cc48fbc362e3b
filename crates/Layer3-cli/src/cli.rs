//! Start / check commands

use devhost_foundation::SupervisorConfig;
use devhost_supervisor::precheck::is_port_open;
use devhost_supervisor::{check_tool, is_port_available, LocalRunner, StartReport, Supervisor};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tracing::{error, info, warn};

/// How often the supervision loop looks at the child
const EXIT_POLL: Duration = Duration::from_secs(5);

/// Output lines printed when the child exits on its own
const EXIT_TAIL_LINES: usize = 30;

/// Start the UI and keep it running until it exits or we are signalled
pub async fn run_start(
    config: SupervisorConfig,
    overlay: BTreeMap<String, String>,
) -> anyhow::Result<()> {
    let supervisor = Supervisor::local(config).with_env_overlay(overlay);

    // Shared by both selects below
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    let started = tokio::select! {
        result = supervisor.start() => result,
        signal = &mut shutdown => {
            info!("Received {}, shutting down...", signal);
            supervisor.stop().await?;
            return Ok(());
        }
    };

    let report = match started {
        Ok(report) => report,
        Err(e) => {
            supervisor.stop().await?;
            return Err(e.into());
        }
    };
    print_summary(&supervisor, &report).await;

    let result = supervise(&supervisor, shutdown.as_mut()).await;
    supervisor.stop().await?;
    result
}

async fn print_summary(supervisor: &Supervisor, report: &StartReport) {
    let config = supervisor.config();

    println!();
    println!("UI status: {}", supervisor.status());
    if is_port_open(&config.host, config.ui_port).await {
        println!("UI is responding on port {}", config.ui_port);
    } else {
        println!("UI port {} is not responding yet", config.ui_port);
    }
    println!("Open {} in your browser", config.ui_url());

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }
    println!("\nPress Ctrl+C to stop\n");
}

/// Block until the child exits (error) or a shutdown signal arrives (ok)
async fn supervise(
    supervisor: &Supervisor,
    shutdown: Pin<&mut impl Future<Output = &'static str>>,
) -> anyhow::Result<()> {
    tokio::select! {
        status = supervisor.wait_for_exit(EXIT_POLL) => {
            error!("UI server stopped unexpectedly: {}", status);
            let lines = supervisor.recent_output_timestamped(EXIT_TAIL_LINES);
            if !lines.is_empty() {
                eprintln!("\nLast {} lines of output:", lines.len());
                for line in &lines {
                    eprintln!("{}", line);
                }
            }
            anyhow::bail!("UI server exited ({})", status)
        }
        signal = shutdown => {
            info!("Received {}, shutting down...", signal);
            Ok(())
        }
    }
}

/// Report prerequisites and ports without spawning anything long-lived
pub async fn run_check(config: &SupervisorConfig) -> anyhow::Result<()> {
    let runner = LocalRunner::new();
    let mut ok = true;

    for name in &config.required_tools {
        let check = check_tool(&runner, name, config.tool_check_timeout).await;
        match (&check.error, &check.version) {
            (None, version) => info!(
                "{}: {}",
                name,
                version.as_deref().unwrap_or("found")
            ),
            (Some(e), _) => {
                error!("{}", e);
                ok = false;
            }
        }
    }

    for &port in &config.exclusive_ports {
        if is_port_available(&config.host, port).await {
            info!("Port {} is free", port);
        } else {
            error!("Port {} is already in use", port);
            ok = false;
        }
    }

    if is_port_available(&config.host, config.backend_port).await {
        warn!("Backend is not running on port {}", config.backend_port);
    } else {
        info!("Backend is running on port {}", config.backend_port);
    }

    if !ok {
        anyhow::bail!("prerequisite check failed");
    }
    Ok(())
}

/// Resolves on Ctrl+C, or SIGTERM on Unix
async fn shutdown_signal() -> &'static str {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => "SIGINT",
                    _ = sigterm.recv() => "SIGTERM",
                }
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                "SIGINT"
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        "Ctrl+C"
    }
}
