//! # devhost-foundation
//!
//! Foundation layer for devhost:
//! - Error: the single error type every layer returns
//! - Config: `SupervisorConfig` and its sections
//! - Storage: `JsonStore` for global/project config files
//! - EnvFile: ordered `.env` reader/writer

pub mod config;
pub mod env_file;
pub mod error;
pub mod storage;

// ============================================================================
// Error
// ============================================================================
pub use error::{Error, Result};

// ============================================================================
// Config
// ============================================================================
pub use config::{
    CheckoutConfig, InstallConfig, LaunchConfig, PhaseConfig, ReadinessConfig, SupervisorConfig,
    DEFAULT_UI_DIR, DEFAULT_UI_REMOTE, SUPERVISOR_CONFIG_FILE,
};

// ============================================================================
// Storage / files
// ============================================================================
pub use env_file::EnvFile;
pub use storage::JsonStore;
