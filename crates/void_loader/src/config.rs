//! Loader configuration

use crate::error::{LoaderError, Result};
use crate::hot_reload::DEFAULT_DEBOUNCE;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

/// How a [`ModuleLoader`](crate::loader::ModuleLoader) builds its context
///
/// Deserializes from JSON with every field optional:
///
/// ```json
/// { "sharedNames": ["Contracts"], "enableHotReload": true, "debounceMs": 250 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoaderConfig {
    /// Names always resolved from the module's own files
    pub private_names: Vec<String>,
    /// Names resolved through the host first
    pub shared_names: Vec<String>,
    /// Try the host for every name not marked private
    pub prefer_shared: bool,
    /// Allow unload to release the module's code
    pub is_unloadable: bool,
    /// Rebuild the context when the module's files change
    pub enable_hot_reload: bool,
    /// Quiet period before a reload, in milliseconds
    pub debounce_ms: u64,
    /// Also read `{main}.runtimeconfig.dev.json`
    pub include_dev_config: bool,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            private_names: Vec::new(),
            shared_names: Vec::new(),
            prefer_shared: false,
            is_unloadable: false,
            enable_hot_reload: false,
            debounce_ms: millis(DEFAULT_DEBOUNCE),
            include_dev_config: true,
        }
    }
}

impl LoaderConfig {
    /// Parse a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| LoaderError::invalid_argument("config", format!("invalid loader config: {}", e)))
    }

    /// Read and parse a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }

    /// Hot reload requires unload
    pub fn is_unloadable(&self) -> bool {
        self.is_unloadable || self.enable_hot_reload
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Share `name` with the host
    pub fn share(mut self, name: impl Into<String>) -> Self {
        self.shared_names.push(name.into());
        self
    }

    /// Keep `name` private to the module
    pub fn keep_private(mut self, name: impl Into<String>) -> Self {
        self.private_names.push(name.into());
        self
    }

    pub fn with_hot_reload(mut self, debounce: Duration) -> Self {
        self.enable_hot_reload = true;
        self.debounce_ms = millis(debounce);
        self
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = LoaderConfig::default();
        assert!(!config.is_unloadable());
        assert_eq!(config.debounce(), Duration::from_millis(200));
        assert!(config.include_dev_config);
    }

    #[test]
    fn test_from_json() {
        let config = LoaderConfig::from_json(
            r#"{ "sharedNames": ["Contracts"], "enableHotReload": true, "debounceMs": 250 }"#,
        )
        .unwrap();
        assert_eq!(config.shared_names, vec!["Contracts".to_string()]);
        assert!(config.is_unloadable());
        assert_eq!(config.debounce(), Duration::from_millis(250));
        assert!(config.private_names.is_empty());
    }

    #[test]
    fn test_invalid_json() {
        let err = LoaderConfig::from_json("{ \"preferShared\": 3 }").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArgument { argument: "config", .. }));
    }

    #[test]
    fn test_long_debounce_saturates() {
        let config = LoaderConfig::default().with_hot_reload(Duration::MAX);
        assert_eq!(config.debounce_ms, u64::MAX);
        assert_eq!(config.debounce(), Duration::from_millis(u64::MAX));

        let config = LoaderConfig::default().with_hot_reload(Duration::from_secs(3));
        assert_eq!(config.debounce_ms, 3000);
    }
}
