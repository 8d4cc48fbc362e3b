//! Readiness probes
//!
//! Bounded poll loops only. Nothing here decides whether a failure is fatal;
//! the supervisor does that per phase.

use crate::precheck::is_port_open;
use crate::process::SupervisedProcess;
use devhost_foundation::{Error, Result};
use std::time::{Duration, Instant};
use tracing::debug;

/// Output markers of a finished compilation
pub const COMPILED_MARKERS: &[&str] = &["✓ Compiled", "Compiled in"];

/// Output marker of a compilation still in progress
pub const COMPILING_MARKER: &str = "○ Compiling";

/// Lines inspected for the compile markers
const COMPILE_TAIL_LINES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortWait {
    Ready,
    TimedOut,
    /// The supervised process died while waiting
    ProcessExited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileStatus {
    Compiled,
    /// Window elapsed without a success marker
    Pending,
    ProcessExited,
}

/// Poll `host:port` until it accepts a connection or `timeout` elapses.
/// Gives up early once `alive` reports false.
pub async fn wait_for_port_while(
    host: &str,
    port: u16,
    timeout: Duration,
    interval: Duration,
    alive: impl Fn() -> bool,
) -> PortWait {
    let started = Instant::now();
    while started.elapsed() < timeout {
        if is_port_open(host, port).await {
            debug!("Port {} ready after {:.1}s", port, started.elapsed().as_secs_f64());
            return PortWait::Ready;
        }
        if !alive() {
            return PortWait::ProcessExited;
        }
        tokio::time::sleep(interval).await;
    }
    PortWait::TimedOut
}

/// Success marker present and no compilation in progress
pub fn is_compiled(recent: &[String]) -> bool {
    let text = recent.join("\n");
    COMPILED_MARKERS.iter().any(|m| text.contains(m)) && !text.contains(COMPILING_MARKER)
}

/// Watch recent output for the compile markers for up to `window`
pub async fn wait_for_compilation(
    process: &SupervisedProcess,
    window: Duration,
    poll: Duration,
) -> CompileStatus {
    let started = Instant::now();
    while started.elapsed() < window {
        tokio::time::sleep(poll).await;

        if is_compiled(&process.tail_lines(COMPILE_TAIL_LINES)) {
            return CompileStatus::Compiled;
        }
        if !process.is_alive() {
            return CompileStatus::ProcessExited;
        }
    }
    CompileStatus::Pending
}

/// GET `url` until it answers 200 or 404. Returns the status code.
pub async fn probe_http(
    url: &str,
    attempts: u32,
    backoff: Duration,
    timeout: Duration,
) -> Result<u16> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::Http(format!("Failed to build HTTP client: {}", e)))?;

    let attempts = attempts.max(1);
    let mut last_error = String::new();

    for attempt in 1..=attempts {
        match client.get(url).send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                // 404 still means something is serving
                if status == 200 || status == 404 {
                    return Ok(status);
                }
                last_error = format!("unexpected status {}", status);
            }
            Err(e) => last_error = e.to_string(),
        }

        debug!("HTTP probe {} attempt {}/{} failed: {}", url, attempt, attempts, last_error);
        if attempt < attempts {
            tokio::time::sleep(backoff).await;
        }
    }

    Err(Error::Http(format!("{} not responding: {}", url, last_error)))
}
