use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Scanner configuration. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ocr: OcrSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OcrSettings {
    /// Deadline for a single engine call; unbounded when unset.
    pub timeout_secs: Option<u64>,
    /// Tesseract language code
    pub language: String,
    /// Directory holding `*.traineddata`; the engine default when unset.
    pub data_path: Option<String>,
}

impl Default for OcrSettings {
    fn default() -> Self {
        Self { timeout_secs: None, language: "eng".to_string(), data_path: None }
    }
}

impl OcrSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// `EnvFilter` directive used when `RUST_LOG` and `-v` are absent.
    pub filter: String,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self { filter: "info".to_string() }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }
}
