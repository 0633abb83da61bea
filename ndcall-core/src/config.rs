#![forbid(unsafe_code)]

//! Runtime configuration for ndcall
//!
//! Controls how dispatchers treat duplicate keys and promotion, and whether
//! the global registry starts with the builtin callables.

use std::path::Path;

use miette::Report;
use serde::{Deserialize, Serialize};

pub type ConfigError = Report;

/// Environment variable naming a TOML config file.
pub const CONFIG_ENV: &str = "NDCALL_CONFIG";

fn config_msg(message: impl Into<String>) -> ConfigError {
    Report::msg(message.into())
}

/// What a dispatcher does when a key is registered twice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DuplicatePolicy {
    /// Keep the first registration, log a warning
    #[default]
    FirstWins,
    /// Replace the earlier registration in place
    LastWins,
    /// Fail registration
    Reject,
}

/// Dispatch settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Duplicate key handling
    #[serde(default)]
    pub duplicate_policy: DuplicatePolicy,

    /// Fall back to a key every argument promotes to when no exact key exists
    #[serde(default = "default_promotion")]
    pub promotion: bool,
}

fn default_promotion() -> bool {
    true
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfig {
            duplicate_policy: DuplicatePolicy::FirstWins,
            promotion: true,
        }
    }
}

/// Registry settings
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RegistryConfig {
    /// Preload the builtin arithmetic callables
    #[serde(default = "default_builtins")]
    pub builtins: bool,
}

fn default_builtins() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig { builtins: true }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct NdcallConfig {
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub registry: RegistryConfig,
}

impl NdcallConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse TOML from string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| config_msg(format!("Invalid config: {e}")))
    }

    /// Load configuration from file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_msg(format!("Failed to read config {}: {e}", path.display())))?;
        Self::from_toml_str(&content)
    }

    /// Load from the file named by `NDCALL_CONFIG`, or defaults when unset
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(Path::new(&path)),
            None => Ok(Self::default()),
        }
    }

    /// Serialize to TOML string
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| config_msg(format!("Failed to serialize: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let cfg = NdcallConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, NdcallConfig::default());
        assert!(cfg.dispatch.promotion);
        assert!(cfg.registry.builtins);
    }

    #[test]
    fn parses_policy_names() {
        let cfg = NdcallConfig::from_toml_str(
            r#"
            [dispatch]
            duplicate_policy = "last-wins"
            promotion = false

            [registry]
            builtins = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.dispatch.duplicate_policy, DuplicatePolicy::LastWins);
        assert!(!cfg.dispatch.promotion);
        assert!(!cfg.registry.builtins);
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = NdcallConfig::from_toml_str("[dispatch]\nduplicate_policy = \"coin-flip\"").unwrap_err();
        assert!(err.to_string().contains("Invalid config"));
    }

    #[test]
    fn round_trips_through_toml() {
        let mut cfg = NdcallConfig::new();
        cfg.dispatch.duplicate_policy = DuplicatePolicy::Reject;
        let text = cfg.to_toml_string().unwrap();
        assert_eq!(NdcallConfig::from_toml_str(&text).unwrap(), cfg);
    }
}
