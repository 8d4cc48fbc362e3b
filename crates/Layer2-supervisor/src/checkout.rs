//! Checkout - make sure the UI source tree exists
//!
//! Cloning is idempotent from the operator's side: an existing directory is
//! used as is, and a failed clone leaves whatever it wrote behind so a rerun
//! can be inspected or retried.

use crate::executor::{CommandRunner, CommandSpec};
use devhost_foundation::{Error, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    /// Directory was already there
    Existing(PathBuf),
    /// Directory was cloned just now
    Cloned(PathBuf),
}

impl CheckoutOutcome {
    pub fn path(&self) -> &Path {
        match self {
            CheckoutOutcome::Existing(p) | CheckoutOutcome::Cloned(p) => p,
        }
    }
}

/// First candidate that is an existing directory, else the last candidate
pub fn resolve_checkout_dir(candidates: &[PathBuf]) -> Option<PathBuf> {
    candidates
        .iter()
        .find(|p| p.is_dir())
        .or_else(|| candidates.last())
        .cloned()
}

/// Clone `remote` into `dir` unless `dir` already exists
pub async fn ensure_checkout(
    runner: &dyn CommandRunner,
    dir: &Path,
    remote: &str,
    timeout: Duration,
) -> Result<CheckoutOutcome> {
    if dir.exists() {
        info!("UI repository already exists at {}", dir.display());
        return Ok(CheckoutOutcome::Existing(dir.to_path_buf()));
    }

    info!("Cloning {} into {}", remote, dir.display());
    let spec = CommandSpec::new("git")
        .arg("clone")
        .arg(remote)
        .arg(dir.to_string_lossy())
        .timeout(timeout);

    let output = runner
        .run(&spec)
        .await
        .map_err(|e| Error::Setup(format!("Failed to clone repository: {}", e)))?;

    if output.timed_out {
        return Err(Error::Setup(
            "Git clone timed out - check your internet connection".to_string(),
        ));
    }
    if !output.is_success() {
        let detail = if output.stderr.trim().is_empty() {
            format!(
                "git exited with code {}",
                output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "unknown".to_string())
            )
        } else {
            output.stderr.trim().to_string()
        };
        return Err(Error::Setup(format!("Failed to clone repository: {}", detail)));
    }

    info!("UI repository cloned");
    Ok(CheckoutOutcome::Cloned(dir.to_path_buf()))
}
