//! Local runner - runs one-shot commands on the host
//!
//! Output is captured, never inherited. On timeout the child is dropped,
//! which kills it (`kill_on_drop`).

use crate::executor::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use devhost_foundation::{Error, Result};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalRunner;

impl LocalRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        debug!("Running `{}` (timeout {:.0}s)", spec, spec.timeout.as_secs_f64());

        let child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("Failed to spawn `{}`: {}", spec.program, e)))?;

        match tokio::time::timeout(spec.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => Ok(CommandOutput {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                timed_out: false,
            }),
            Ok(Err(e)) => Err(Error::Process(format!("`{}` failed: {}", spec, e))),
            Err(_) => {
                warn!("`{}` timed out after {:.0}s", spec, spec.timeout.as_secs_f64());
                Ok(CommandOutput::timed_out())
            }
        }
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_captures_output() {
        let runner = LocalRunner::new();
        let spec = CommandSpec::new("sh").args(["-c", "echo hello; echo oops >&2; exit 3"]);

        let output = runner.run(&spec).await.unwrap();
        assert_eq!(output.exit_code, Some(3));
        assert_eq!(output.stdout.trim(), "hello");
        assert_eq!(output.stderr.trim(), "oops");
        assert!(!output.is_success());
    }

    #[tokio::test]
    async fn test_run_applies_env_and_cwd() {
        let dir = tempfile::tempdir().unwrap();
        let runner = LocalRunner::new();
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $DEVHOST_TEST_VAR; pwd"])
            .env("DEVHOST_TEST_VAR", "overlay")
            .current_dir(dir.path());

        let output = runner.run(&spec).await.unwrap();
        assert!(output.is_success());
        assert!(output.stdout.starts_with("overlay"));
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let runner = LocalRunner::new();
        let spec = CommandSpec::new("sleep")
            .arg("5")
            .timeout(Duration::from_millis(100));

        let output = runner.run(&spec).await.unwrap();
        assert!(output.timed_out);
        assert_eq!(output.exit_code, None);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_error() {
        let runner = LocalRunner::new();
        let spec = CommandSpec::new("definitely-not-a-real-binary-devhost");
        assert!(runner.run(&spec).await.is_err());
    }
}
