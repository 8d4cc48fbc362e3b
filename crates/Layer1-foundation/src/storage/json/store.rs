//! Config file locations
//!
//! Read-only: devhost never writes its own config, so a missing file is a
//! normal answer (`load_optional`) rather than an error.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::PathBuf;

/// Directory name for both the global and the per-project location
const STORE_DIR: &str = "devhost";

/// A directory holding JSON config files
#[derive(Debug, Clone)]
pub struct JsonStore {
    dir: PathBuf,
}

impl JsonStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<config_dir>/devhost/`
    pub fn global() -> Result<Self> {
        let dir = dirs::config_dir()
            .ok_or_else(|| Error::Config("Cannot find config directory".to_string()))?;
        Ok(Self::new(dir.join(STORE_DIR)))
    }

    /// `<root>/.devhost/`
    pub fn project(root: impl Into<PathBuf>) -> Self {
        Self::new(root.into().join(format!(".{}", STORE_DIR)))
    }

    pub fn current_project() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| Error::Config(format!("Cannot get current directory: {}", e)))?;
        Ok(Self::project(cwd))
    }

    pub fn path(&self, filename: &str) -> PathBuf {
        self.dir.join(filename)
    }

    /// Read and parse `filename`. Both failures are config errors.
    pub fn load<T: DeserializeOwned>(&self, filename: &str) -> Result<T> {
        let path = self.path(filename);
        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Like `load`, `None` when the file is absent
    pub fn load_optional<T: DeserializeOwned>(&self, filename: &str) -> Result<Option<T>> {
        if !self.path(filename).is_file() {
            return Ok(None);
        }
        self.load(filename).map(Some)
    }
}
