//! Filesystem configuration.
//!
//! Loaded from TOML. Every field has a default, so an empty document (or no
//! file at all) yields a usable configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForgetFsConfig {
    /// Whether the host kernel reliably sends forgets for every live inode
    /// before unmount completes. When false, the post-unmount check is
    /// skipped.
    ///
    /// Linux often drops forgets at unmount and never sends destroy, so the
    /// default is false there and true elsewhere.
    #[serde(default = "default_forget_delivery_reliable")]
    pub forget_delivery_reliable: bool,

    /// Attribute cache timeout in seconds.
    #[serde(default = "default_timeout")]
    pub attr_timeout: u64,

    /// Entry (lookup) cache timeout in seconds.
    #[serde(default = "default_timeout")]
    pub entry_timeout: u64,

    /// Capacity of the request channel between dispatcher and server.
    #[serde(default = "default_request_queue_depth")]
    pub request_queue_depth: usize,
}

fn default_forget_delivery_reliable() -> bool {
    !cfg!(target_os = "linux")
}

fn default_timeout() -> u64 {
    30
}

fn default_request_queue_depth() -> usize {
    128
}

impl Default for ForgetFsConfig {
    fn default() -> Self {
        Self {
            forget_delivery_reliable: default_forget_delivery_reliable(),
            attr_timeout: default_timeout(),
            entry_timeout: default_timeout(),
            request_queue_depth: default_request_queue_depth(),
        }
    }
}

impl ForgetFsConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.request_queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "request_queue_depth must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn attr_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.attr_timeout)
    }

    pub fn entry_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.entry_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = ForgetFsConfig::default();
        assert_eq!(cfg.attr_timeout, 30);
        assert_eq!(cfg.entry_timeout, 30);
        assert_eq!(cfg.request_queue_depth, 128);
        assert_eq!(cfg.forget_delivery_reliable, !cfg!(target_os = "linux"));
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_empty_toml_matches_defaults() {
        let cfg = ForgetFsConfig::from_toml_str("").unwrap();
        let default = ForgetFsConfig::default();
        assert_eq!(cfg.forget_delivery_reliable, default.forget_delivery_reliable);
        assert_eq!(cfg.attr_timeout, default.attr_timeout);
    }

    #[test]
    fn test_from_toml() {
        let cfg = ForgetFsConfig::from_toml_str(
            r#"
            forget_delivery_reliable = true
            attr_timeout = 5
            request_queue_depth = 16
            "#,
        )
        .unwrap();
        assert!(cfg.forget_delivery_reliable);
        assert_eq!(cfg.attr_timeout_duration(), Duration::from_secs(5));
        assert_eq!(cfg.entry_timeout_duration(), Duration::from_secs(30));
        assert_eq!(cfg.request_queue_depth, 16);
    }

    #[test]
    fn test_zero_queue_depth_rejected() {
        let err = ForgetFsConfig::from_toml_str("request_queue_depth = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        let err = ForgetFsConfig::from_toml_str("attr_timeout = \"soon\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ForgetFsConfig::load("/nonexistent/forgetfs.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
