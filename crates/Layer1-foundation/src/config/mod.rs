//! Config - supervisor settings
//!
//! - `supervisor.rs` - SupervisorConfig and its sections

mod supervisor;

pub use supervisor::{
    merge_json, CheckoutConfig, InstallConfig, LaunchConfig, PhaseConfig, ReadinessConfig,
    SupervisorConfig, DEFAULT_UI_DIR, DEFAULT_UI_REMOTE, SUPERVISOR_CONFIG_FILE,
};
