//! Dependency install with retry
//!
//! Two failure signatures are reclassified instead of retried blindly:
//! - lockfile mismatch: switch from the strict subcommand to the relaxed one
//! - peer-dependency conflict: append the compatibility flag
//!
//! Each switch is sticky for the rest of the call and does not consume an
//! attempt. Timeouts and anything unrecognized do.

use crate::executor::{CommandOutput, CommandRunner, CommandSpec};
use crate::precheck::resolve_command;
use devhost_foundation::{Error, InstallConfig, Result};
use std::path::Path;
use tracing::{info, warn};

/// Upper bound on free strategy switches within one call
const MAX_FREE_SWITCHES: u32 = 4;

const LOCKFILE_MARKERS: &[&str] = &["package-lock.json", "lockfile", "cannot be installed"];

const PEER_DEPENDENCY_MARKERS: &[&str] = &[
    "eresolve",
    "peer dependency",
    "conflicting peer dependency",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallFailureKind {
    LockfileMismatch,
    PeerDependencyConflict,
    Timeout,
    Generic,
}

/// Sticky flags for one install call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallStrategy {
    /// Use the relaxed subcommand
    pub relaxed: bool,
    /// Append the peer-dependency compatibility flag
    pub peer_compat: bool,
}

impl InstallStrategy {
    pub fn args(&self, config: &InstallConfig) -> Vec<String> {
        let mut args = vec![if self.relaxed {
            config.relaxed_subcommand.clone()
        } else {
            config.strict_subcommand.clone()
        }];
        if self.peer_compat {
            args.push(config.peer_compat_flag.clone());
        }
        args
    }
}

/// Classify a failed install. Signatures whose flag is already set are
/// skipped, so a repeat of the same failure falls through to `Generic`.
pub fn classify_install_failure(output: &str, strategy: &InstallStrategy) -> InstallFailureKind {
    let lower = output.to_lowercase();

    if !strategy.relaxed && LOCKFILE_MARKERS.iter().any(|m| lower.contains(m)) {
        return InstallFailureKind::LockfileMismatch;
    }
    if !strategy.peer_compat && PEER_DEPENDENCY_MARKERS.iter().any(|m| lower.contains(m)) {
        return InstallFailureKind::PeerDependencyConflict;
    }
    InstallFailureKind::Generic
}

fn classify_output(output: &CommandOutput, strategy: &InstallStrategy) -> InstallFailureKind {
    if output.timed_out {
        return InstallFailureKind::Timeout;
    }
    classify_install_failure(&output.combined(), strategy)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    /// Budgeted attempts consumed, the successful one included
    pub attempts_used: u32,

    /// Install invocations, free switches included
    pub runs: u32,

    pub strategy: InstallStrategy,
}

/// Run the install command in `dir` until it succeeds or the budget is spent
pub async fn install_dependencies(
    runner: &dyn CommandRunner,
    config: &InstallConfig,
    dir: &Path,
) -> Result<InstallReport> {
    let program = resolve_command(&config.program)
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_else(|| config.program.clone());

    let mut strategy = InstallStrategy::default();
    let mut attempt = 0u32;
    let mut free_switches = 0u32;
    let mut runs = 0u32;

    loop {
        let spec = CommandSpec::new(&program)
            .args(strategy.args(config))
            .current_dir(dir)
            .timeout(config.timeout);

        runs += 1;
        let output = runner
            .run(&spec)
            .await
            .map_err(|e| Error::Install(format!("Failed to run `{}`: {}", spec, e)))?;

        if output.is_success() {
            info!("Dependencies installed");
            return Ok(InstallReport {
                attempts_used: attempt + 1,
                runs,
                strategy,
            });
        }

        let kind = classify_output(&output, &strategy);
        match kind {
            InstallFailureKind::LockfileMismatch if free_switches < MAX_FREE_SWITCHES => {
                warn!(
                    "Lockfile is out of sync, switching to '{} {}'",
                    config.program, config.relaxed_subcommand
                );
                strategy.relaxed = true;
                free_switches += 1;
                continue;
            }
            InstallFailureKind::PeerDependencyConflict if free_switches < MAX_FREE_SWITCHES => {
                warn!(
                    "Peer dependency conflict detected, retrying with {}",
                    config.peer_compat_flag
                );
                strategy.peer_compat = true;
                free_switches += 1;
                continue;
            }
            InstallFailureKind::Timeout => {
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(Error::Install(format!(
                        "{} {} timed out after retries",
                        config.program,
                        strategy.args(config).join(" ")
                    )));
                }
                warn!(
                    "Install timed out, retrying ({}/{})...",
                    attempt, config.max_attempts
                );
            }
            _ => {
                let message = failure_message(&output, config, dir);
                attempt += 1;
                if attempt >= config.max_attempts {
                    return Err(Error::Install(message));
                }
                warn!(
                    "Install failed, retrying ({}/{})...\n{}",
                    attempt, config.max_attempts, message
                );
            }
        }
    }
}

fn failure_message(output: &CommandOutput, config: &InstallConfig, dir: &Path) -> String {
    let mut message = String::from("dependencies could not be installed:\n");
    let stderr = output.stderr.trim();
    let stdout = output.stdout.trim();

    if !stderr.is_empty() {
        message.push_str(&format!("\nSTDERR:\n{}\n", stderr));
    }
    if !stdout.is_empty() {
        message.push_str(&format!("\nSTDOUT:\n{}\n", stdout));
    }
    if stderr.is_empty() && stdout.is_empty() {
        let code = output
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        message.push_str(&format!("\n(Process exited with code {})\n", code));
        message.push_str(&format!(
            "Try running '{} {}' manually in {} to see the full error.\n",
            config.program,
            config.relaxed_subcommand,
            dir.display()
        ));
    }
    message
}
