//! Preconditions - required tools and port availability
//!
//! Both checks are point-in-time. A free port can be taken a moment later,
//! so callers treat the answer as advisory.

use crate::executor::{CommandRunner, CommandSpec};
use devhost_foundation::{Error, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Upper bound for a single connect attempt
const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);

/// Outcome of checking one tool
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCheck {
    pub name: String,

    /// Resolved executable, platform suffix included
    pub path: Option<PathBuf>,

    /// First line of `--version`
    pub version: Option<String>,

    pub error: Option<String>,
}

impl ToolCheck {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    fn failed(name: &str, path: Option<PathBuf>, error: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            path,
            version: None,
            error: Some(error.into()),
        }
    }
}

/// Resolve a command on PATH. `which` handles `.exe`/`.cmd`/`.bat` on Windows.
pub fn resolve_command(name: &str) -> Option<PathBuf> {
    which::which(name).ok()
}

/// Resolve `name` and make sure `<name> --version` exits 0 within `timeout`
pub async fn check_tool(runner: &dyn CommandRunner, name: &str, timeout: Duration) -> ToolCheck {
    let Some(path) = resolve_command(name) else {
        return ToolCheck::failed(name, None, format!("{} is not installed", name));
    };

    let spec = CommandSpec::new(path.to_string_lossy())
        .arg("--version")
        .timeout(timeout);

    match runner.run(&spec).await {
        Ok(output) if output.is_success() => {
            let version = output.stdout.lines().next().map(|l| l.trim().to_string());
            debug!("{} found at {} ({:?})", name, path.display(), version);
            ToolCheck {
                name: name.to_string(),
                path: Some(path),
                version,
                error: None,
            }
        }
        Ok(output) if output.timed_out => {
            ToolCheck::failed(name, Some(path), format!("{} --version timed out", name))
        }
        Ok(output) => ToolCheck::failed(
            name,
            Some(path),
            format!(
                "{} --version exited with {}",
                name,
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "a signal".to_string())
            ),
        ),
        Err(e) => ToolCheck::failed(name, Some(path), e.to_string()),
    }
}

/// Check every tool in order, failing on the first one that is missing or broken
pub async fn check_tools(
    runner: &dyn CommandRunner,
    names: &[String],
    timeout: Duration,
) -> Result<Vec<ToolCheck>> {
    let mut checks = Vec::with_capacity(names.len());
    for name in names {
        let check = check_tool(runner, name, timeout).await;
        if let Some(error) = &check.error {
            return Err(Error::Precondition(error.clone()));
        }
        checks.push(check);
    }
    info!("All prerequisites found");
    Ok(checks)
}

/// Nothing accepts connections on `host:port`
pub async fn is_port_available(host: &str, port: u16) -> bool {
    !is_port_open(host, port).await
}

/// Something accepts connections on `host:port`
pub async fn is_port_open(host: &str, port: u16) -> bool {
    matches!(
        tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await,
        Ok(Ok(_))
    )
}

/// Fail when any of `ports` is already taken
pub async fn ensure_ports_free(host: &str, ports: &[u16]) -> Result<()> {
    for &port in ports {
        if !is_port_available(host, port).await {
            return Err(Error::Precondition(format!(
                "Port {} is already in use. Please stop the process using it manually.",
                port
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::LocalRunner;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_port_open_and_available() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        assert!(is_port_open("127.0.0.1", port).await);
        assert!(!is_port_available("127.0.0.1", port).await);
        assert!(ensure_ports_free("127.0.0.1", &[port]).await.is_err());

        drop(listener);
        assert!(is_port_available("127.0.0.1", port).await);
    }

    #[tokio::test]
    async fn test_missing_tool_is_precondition_failure() {
        let runner = LocalRunner::new();
        let names = vec!["devhost-missing-tool-xyz".to_string()];

        let err = check_tools(&runner, &names, Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.is_precondition());
        assert!(err.to_string().contains("devhost-missing-tool-xyz is not installed"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_existing_tool_resolves() {
        let runner = LocalRunner::new();
        // `sh --version` is not portable, `true` ignores its arguments
        let check = check_tool(&runner, "true", Duration::from_secs(5)).await;
        assert!(check.is_ok(), "{:?}", check.error);
        assert!(check.path.is_some());
    }
}
