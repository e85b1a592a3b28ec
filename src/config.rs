use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// VM limits and codec settings. Every field has a default, so a config file
/// only needs the keys it overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// operand stack depth
    pub max_stack: usize,
    /// call frame depth
    pub max_frames: usize,
    /// zstd level used when writing bytecode
    pub compression_level: i32,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_stack: 4096,
            max_frames: 256,
            compression_level: 3,
        }
    }
}

impl VmConfig {
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn with_max_stack(mut self, max_stack: usize) -> Self {
        self.max_stack = max_stack;
        self
    }

    pub fn with_max_frames(mut self, max_frames: usize) -> Self {
        self.max_frames = max_frames;
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_keeps_defaults() {
        let cfg = VmConfig::from_json(r#"{ "max_frames": 64 }"#).unwrap();
        assert_eq!(cfg.max_frames, 64);
        assert_eq!(cfg.max_stack, 4096);
        assert_eq!(cfg.compression_level, 3);
    }

    #[test]
    fn test_builder() {
        let cfg = VmConfig::default().with_max_stack(16).with_compression_level(19);
        assert_eq!(cfg.max_stack, 16);
        assert_eq!(cfg.compression_level, 19);
    }

    #[test]
    fn test_bad_json() {
        assert!(matches!(
            VmConfig::from_json("{ max_stack: }"),
            Err(ConfigError::Parse(_))
        ));
    }
}
