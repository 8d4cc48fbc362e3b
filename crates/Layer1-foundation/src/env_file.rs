//! `.env` files - ordered `KEY=value` lines
//!
//! Reading keeps unknown keys in their original order so a rewrite only
//! touches what the caller sets. Blank lines and `#` comments are not kept.

use crate::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvFile {
    entries: Vec<(String, String)>,
}

impl EnvFile {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse file content. Lines without `=` are ignored; the split happens
    /// on the first `=` and both sides are trimmed.
    pub fn parse(content: &str) -> Self {
        let mut file = Self::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                file.set(key.trim(), value.trim());
            }
        }
        file
    }

    /// Read a file, empty when it does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        Self::load(path)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        let file = Self::parse(&content);
        debug!("Loaded {} entries from {}", file.len(), path.display());
        Ok(file)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Overwrite in place, or append when new
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Set only when the key is missing. Returns whether it was written.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: impl Into<String>) -> bool {
        let key = key.into();
        if self.contains(&key) {
            return false;
        }
        self.entries.push((key, value.into()));
        true
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.entries {
            out.push_str(key);
            out.push('=');
            out.push_str(value);
            out.push('\n');
        }
        out
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.render())
            .map_err(|e| Error::Config(format!("Failed to write {}: {}", path.display(), e)))
    }

    /// Values ready to hand to a child process: an `export ` prefix is
    /// dropped and matching surrounding quotes are stripped
    pub fn to_overlay(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|(k, v)| {
                let key = k.strip_prefix("export ").unwrap_or(k).trim().to_string();
                (key, unquote(v).to_string())
            })
            .collect()
    }
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let file = EnvFile::parse("# comment\n\nA=1\n  B = two words \nnot a pair\nC=x=y\n");
        assert_eq!(file.len(), 3);
        assert_eq!(file.get("A"), Some("1"));
        assert_eq!(file.get("B"), Some("two words"));
        assert_eq!(file.get("C"), Some("x=y"));
    }

    #[test]
    fn test_set_preserves_order() {
        let mut file = EnvFile::parse("FIRST=1\nPORT=4000\nLAST=z\n");
        file.set("PORT", "5000");
        file.set("NEW", "n");
        assert!(!file.set_if_absent("FIRST", "ignored"));
        assert!(file.set_if_absent("EXTRA", "e"));

        assert_eq!(file.render(), "FIRST=1\nPORT=5000\nLAST=z\nNEW=n\nEXTRA=e\n");
    }

    #[test]
    fn test_load_missing_is_empty_and_save_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");

        let mut file = EnvFile::load_or_default(&path).unwrap();
        assert!(file.is_empty());

        file.set("KEY", "value");
        file.save(&path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "KEY=value\n");
    }

    #[test]
    fn test_overlay_strips_quotes_and_export() {
        let file = EnvFile::parse("export TOKEN=\"abc\"\nNAME='x y'\nRAW=\"half\n");
        let overlay = file.to_overlay();
        assert_eq!(overlay.get("TOKEN").map(String::as_str), Some("abc"));
        assert_eq!(overlay.get("NAME").map(String::as_str), Some("x y"));
        assert_eq!(overlay.get("RAW").map(String::as_str), Some("\"half"));
    }
}
