use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    ThresholdOutOfRange { name: &'static str, value: f64 },

    #[error("hash precision must be a positive multiple of 8, got {0}")]
    InvalidPrecision(u32),

    #[error("Failed to read config file {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// What happens to the non-surviving members of a byte-identical group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateAction {
    /// Move into the sibling `<dir>_duplicates` directory
    #[default]
    Archive,
    /// Remove from disk
    Delete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub dry_run: bool,
    /// Clusters scoring at or below this are treated as accidental copies
    pub exact_copy_threshold: f64,
    /// Pairs at or below this normalized distance become similarity edges
    pub similarity_threshold: f64,
    /// Perceptual hash length in bits
    pub hash_precision: u32,
    pub duplicate_action: DuplicateAction,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dry_run: true,
            exact_copy_threshold: 0.01,
            similarity_threshold: 0.16,
            hash_precision: 64,
            duplicate_action: DuplicateAction::Archive,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_range("exact_copy_threshold", self.exact_copy_threshold)?;
        check_unit_range("similarity_threshold", self.similarity_threshold)?;
        if self.hash_precision == 0 || self.hash_precision % 8 != 0 {
            return Err(ConfigError::InvalidPrecision(self.hash_precision));
        }
        Ok(())
    }

    /// Load a JSON config file; missing keys fall back to defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// `<config_dir>/sticker-dedup/config.json`, if the platform has a config dir.
    pub fn default_location() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sticker-dedup").join("config.json"))
    }

    /// Explicit file first, then the default location if it exists, then built-in defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match Self::default_location() {
            Some(path) if path.is_file() => {
                log::debug!("Loading config from {}", path.display());
                Self::from_file(&path)
            }
            _ => Ok(Self::default()),
        }
    }
}

fn check_unit_range(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::ThresholdOutOfRange { name, value })
    }
}
