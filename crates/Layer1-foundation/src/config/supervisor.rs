//! Supervisor Config - everything the start sequence needs
//!
//! Stored as JSON. The global file is overlaid by the project file, key by
//! key, so a project only has to spell out what it changes.

use crate::storage::JsonStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file name inside a store
pub const SUPERVISOR_CONFIG_FILE: &str = "devhost.json";

/// Where the UI checkout is cloned from when it is missing
pub const DEFAULT_UI_REMOTE: &str = "https://github.com/NVIDIA/NeMo-Agent-Toolkit-UI.git";

/// Directory name of the UI checkout
pub const DEFAULT_UI_DIR: &str = "NeMo-Agent-Toolkit-UI";

// ============================================================================
// Supervisor Config
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SupervisorConfig {
    /// Host used for every port probe
    pub host: String,

    /// Gateway port the UI is served on
    pub ui_port: u16,

    /// Port of the agent backend the UI talks to
    pub backend_port: u16,

    /// Tools that must resolve on PATH and answer `--version`
    pub required_tools: Vec<String>,

    /// Ports that must be free before anything is spawned
    pub exclusive_ports: Vec<u16>,

    /// Timeout for each `--version` check
    #[serde(with = "duration_ms", rename = "toolCheckTimeoutMs")]
    pub tool_check_timeout: Duration,

    /// Rewrite the checkout's `.env` before launch
    pub configure_env: bool,

    /// Max captured output lines kept in memory
    pub buffer_capacity: usize,

    pub checkout: CheckoutConfig,
    pub install: InstallConfig,
    pub launch: LaunchConfig,
    pub readiness: ReadinessConfig,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            ui_port: 3000,
            backend_port: 8000,
            required_tools: vec!["git".into(), "node".into(), "npm".into()],
            exclusive_ports: vec![3000],
            tool_check_timeout: Duration::from_secs(5),
            configure_env: true,
            buffer_capacity: 100,
            checkout: CheckoutConfig::default(),
            install: InstallConfig::default(),
            launch: LaunchConfig::default(),
            readiness: ReadinessConfig::default(),
        }
    }
}

impl SupervisorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Load / Save
    // ========================================================================

    /// Global + project, project wins
    pub fn load() -> Result<Self> {
        let mut merged = serde_json::to_value(Self::default())?;

        if let Ok(global) = JsonStore::global() {
            if let Some(value) = global.load_optional::<serde_json::Value>(SUPERVISOR_CONFIG_FILE)? {
                merge_json(&mut merged, value);
            }
        }

        if let Ok(project) = JsonStore::current_project() {
            if let Some(value) = project.load_optional::<serde_json::Value>(SUPERVISOR_CONFIG_FILE)? {
                merge_json(&mut merged, value);
            }
        }

        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", SUPERVISOR_CONFIG_FILE, e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults overlaid by one explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| Error::Config(format!("Invalid config path: {}", path.display())))?;

        let value: serde_json::Value = JsonStore::new(dir).load(name)?;
        let mut merged = serde_json::to_value(Self::default())?;
        merge_json(&mut merged, value);

        let config: Self = serde_json::from_value(merged)
            .map_err(|e| Error::Config(format!("Invalid {}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    // ========================================================================
    // Validation
    // ========================================================================

    pub fn validate(&self) -> Result<()> {
        let required = self.readiness.phases.iter().filter(|p| p.required).count();
        if required != 1 {
            return Err(Error::Config(format!(
                "exactly one readiness phase must be required, found {}",
                required
            )));
        }
        if self.install.max_attempts == 0 {
            return Err(Error::Config("install.maxAttempts must be at least 1".into()));
        }
        if self.buffer_capacity == 0 {
            return Err(Error::Config("bufferCapacity must be at least 1".into()));
        }
        if self.launch.program.trim().is_empty() {
            return Err(Error::Config("launch.program must not be empty".into()));
        }
        Ok(())
    }

    // ========================================================================
    // Overrides
    // ========================================================================

    /// Move the UI port, carrying the exclusive-port list and phases along
    pub fn set_ui_port(&mut self, port: u16) {
        let old = self.ui_port;
        for p in self.exclusive_ports.iter_mut().filter(|p| **p == old) {
            *p = port;
        }
        for phase in self.readiness.phases.iter_mut().filter(|p| p.port == old) {
            phase.port = port;
        }
        self.ui_port = port;
    }

    /// Use a single checkout directory instead of the candidate list
    pub fn set_checkout_dir(&mut self, dir: impl Into<PathBuf>) {
        self.checkout.candidates = vec![dir.into()];
    }

    pub fn backend_url(&self) -> String {
        format!("http://localhost:{}", self.backend_port)
    }

    pub fn ui_url(&self) -> String {
        format!("http://localhost:{}", self.ui_port)
    }
}

// ============================================================================
// Checkout
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CheckoutConfig {
    /// Checked in order; the first existing directory wins, otherwise the
    /// last one is the clone target
    pub candidates: Vec<PathBuf>,

    pub remote: String,

    #[serde(with = "duration_ms", rename = "cloneTimeoutMs")]
    pub clone_timeout: Duration,
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            candidates: vec![PathBuf::from(DEFAULT_UI_DIR)],
            remote: DEFAULT_UI_REMOTE.to_string(),
            clone_timeout: Duration::from_secs(120),
        }
    }
}

// ============================================================================
// Install
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InstallConfig {
    pub skip: bool,
    pub program: String,

    /// Reproducible install, used until a lockfile mismatch is seen
    pub strict_subcommand: String,

    /// Looser install used after a lockfile mismatch
    pub relaxed_subcommand: String,

    /// Appended after a peer-dependency conflict
    pub peer_compat_flag: String,

    pub max_attempts: u32,

    #[serde(with = "duration_ms", rename = "timeoutMs")]
    pub timeout: Duration,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            skip: false,
            program: "npm".to_string(),
            strict_subcommand: "ci".to_string(),
            relaxed_subcommand: "install".to_string(),
            peer_compat_flag: "--legacy-peer-deps".to_string(),
            max_attempts: 2,
            timeout: Duration::from_secs(180),
        }
    }
}

// ============================================================================
// Launch
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LaunchConfig {
    pub program: String,
    pub args: Vec<String>,

    /// Overlay merged over the ambient environment
    pub env: BTreeMap<String, String>,

    /// Wait after spawn before the first crash check
    #[serde(with = "duration_ms", rename = "settleMs")]
    pub settle: Duration,

    /// Grace period between SIGTERM and SIGKILL
    #[serde(with = "duration_ms", rename = "stopTimeoutMs")]
    pub stop_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        let mut env = BTreeMap::new();
        env.insert("NEXT_TELEMETRY_DISABLED".to_string(), "1".to_string());
        Self {
            program: "npm".to_string(),
            args: vec!["run".into(), "dev".into()],
            env,
            settle: Duration::from_secs(3),
            stop_timeout: Duration::from_secs(5),
        }
    }
}

// ============================================================================
// Readiness
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReadinessConfig {
    /// Sleep between port probes
    #[serde(with = "duration_ms", rename = "pollIntervalMs")]
    pub poll_interval: Duration,

    /// Checked in order
    pub phases: Vec<PhaseConfig>,

    #[serde(with = "duration_ms", rename = "compileWindowMs")]
    pub compile_window: Duration,

    #[serde(with = "duration_ms", rename = "compilePollMs")]
    pub compile_poll: Duration,

    pub http_attempts: u32,

    #[serde(with = "duration_ms", rename = "httpBackoffMs")]
    pub http_backoff: Duration,

    #[serde(with = "duration_ms", rename = "httpTimeoutMs")]
    pub http_timeout: Duration,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            phases: vec![
                PhaseConfig {
                    name: "gateway".to_string(),
                    port: 3000,
                    timeout: Duration::from_secs(30),
                    required: true,
                    await_compile: false,
                    http_probe: false,
                },
                PhaseConfig {
                    name: "dev server".to_string(),
                    port: 3099,
                    timeout: Duration::from_secs(60),
                    required: false,
                    await_compile: true,
                    http_probe: true,
                },
            ],
            compile_window: Duration::from_secs(60),
            compile_poll: Duration::from_secs(2),
            http_attempts: 5,
            http_backoff: Duration::from_secs(2),
            http_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseConfig {
    pub name: String,
    pub port: u16,

    #[serde(with = "duration_ms", rename = "timeoutMs")]
    pub timeout: Duration,

    /// Failure aborts the start instead of downgrading to a warning
    #[serde(default)]
    pub required: bool,

    /// Watch output for the compile marker once the port answers
    #[serde(default)]
    pub await_compile: bool,

    /// HTTP GET the port once it answers
    #[serde(default)]
    pub http_probe: bool,
}

// ============================================================================
// Helpers
// ============================================================================

/// Recursively overlay `overlay` onto `base`; objects merge, anything else
/// is replaced
pub fn merge_json(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base), serde_json::Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_json(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let config = SupervisorConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ui_port, 3000);
        assert_eq!(config.install.max_attempts, 2);
        assert_eq!(config.launch.env.get("NEXT_TELEMETRY_DISABLED").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_merge_json_overlays_nested_keys() {
        let mut base = serde_json::to_value(SupervisorConfig::default()).unwrap();
        merge_json(
            &mut base,
            serde_json::json!({ "uiPort": 4000, "launch": { "settleMs": 10 } }),
        );
        let config: SupervisorConfig = serde_json::from_value(base).unwrap();

        assert_eq!(config.ui_port, 4000);
        assert_eq!(config.launch.settle, Duration::from_millis(10));
        // untouched siblings survive
        assert_eq!(config.launch.program, "npm");
        assert_eq!(config.launch.stop_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_load_from_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("custom.json");
        std::fs::write(&path, r#"{ "backendPort": 9000, "install": { "maxAttempts": 3 } }"#).unwrap();

        let config = SupervisorConfig::load_from(&path).unwrap();
        assert_eq!(config.backend_port, 9000);
        assert_eq!(config.install.max_attempts, 3);
        assert_eq!(config.backend_url(), "http://localhost:9000");
    }

    #[test]
    fn test_validate_requires_single_primary_phase() {
        let mut config = SupervisorConfig::default();
        config.readiness.phases[1].required = true;
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        config.readiness.phases.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_set_ui_port_moves_dependents() {
        let mut config = SupervisorConfig::default();
        config.set_ui_port(4100);

        assert_eq!(config.exclusive_ports, vec![4100]);
        assert_eq!(config.readiness.phases[0].port, 4100);
        assert_eq!(config.readiness.phases[1].port, 3099);
        assert_eq!(config.ui_url(), "http://localhost:4100");
    }
}
