//! Probing paths from a module's runtime config
//!
//! A module may ship `{main}.runtimeconfig.json` (and, during development,
//! `{main}.runtimeconfig.dev.json`) naming extra package stores:
//!
//! ```json
//! { "runtimeOptions": { "tfm": "v1", "additionalProbingPaths": ["/opt/store/|arch|/|tfm|"] } }
//! ```
//!
//! Both files are optional and best-effort: anything unreadable is skipped.

use crate::builder::LoadContextBuilder;
use crate::rid;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// File name suffix of a runtime config
pub const RUNTIME_CONFIG_SUFFIX: &str = ".runtimeconfig.json";

const DEV_CONFIG_SUFFIX: &str = ".runtimeconfig.dev.json";
const ARCH_TOKEN: &str = "|arch|";
const TFM_TOKEN: &str = "|tfm|";

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RuntimeConfigFile {
    runtime_options: Option<RuntimeOptions>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct RuntimeOptions {
    tfm: Option<String>,
    additional_probing_paths: Vec<String>,
}

/// Path of the dev config that accompanies `config_path`
pub fn dev_config_path(config_path: &Path) -> PathBuf {
    let text = config_path.to_string_lossy();
    match text.strip_suffix(RUNTIME_CONFIG_SUFFIX) {
        Some(stem) => PathBuf::from(format!("{}{}", stem, DEV_CONFIG_SUFFIX)),
        None => config_path.with_extension("dev.json"),
    }
}

/// Probing paths named by `config_path` and optionally its dev config
///
/// Tokens are substituted; entries needing a target framework the configs do
/// not name are dropped.
pub fn probing_paths(config_path: &Path, include_dev_config: bool) -> Vec<PathBuf> {
    let Some(config) = read_config(config_path) else {
        return Vec::new();
    };
    let dev = if include_dev_config {
        read_config(&dev_config_path(config_path))
    } else {
        None
    };

    let tfm = config
        .runtime_options
        .as_ref()
        .and_then(|o| o.tfm.clone())
        .or_else(|| dev.as_ref().and_then(|d| d.runtime_options.as_ref()).and_then(|o| o.tfm.clone()));

    [Some(&config), dev.as_ref()]
        .into_iter()
        .flatten()
        .filter_map(|c| c.runtime_options.as_ref())
        .flat_map(|o| o.additional_probing_paths.iter())
        .filter_map(|entry| expand(entry, tfm.as_deref()))
        .collect()
}

fn expand(entry: &str, tfm: Option<&str>) -> Option<PathBuf> {
    let mut path = entry.to_string();
    if path.contains(ARCH_TOKEN) {
        let arch = rid::arch_suffix().unwrap_or(std::env::consts::ARCH);
        path = path.replace(ARCH_TOKEN, arch);
    }
    if path.contains(TFM_TOKEN) {
        match tfm {
            Some(tfm) => path = path.replace(TFM_TOKEN, tfm),
            None => {
                log::debug!("Skipping probing path '{}': no target framework", entry);
                return None;
            }
        }
    }
    Some(PathBuf::from(path))
}

fn read_config(path: &Path) -> Option<RuntimeConfigFile> {
    let bytes = std::fs::read(path).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(config) => Some(config),
        Err(e) => {
            log::debug!("Ignoring unreadable runtime config {}: {}", path.display(), e);
            None
        }
    }
}

impl LoadContextBuilder {
    /// Add the probing paths a runtime config names
    ///
    /// Missing files, parse errors and relative entries are skipped.
    pub fn add_runtime_config(&mut self, config_path: impl AsRef<Path>, include_dev_config: bool) -> &mut Self {
        let config_path = config_path.as_ref();
        for path in probing_paths(config_path, include_dev_config) {
            if let Err(e) = self.add_probing_path(&path) {
                log::debug!("Skipping probing path from {}: {}", config_path.display(), e);
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dev_config_path() {
        assert_eq!(
            dev_config_path(Path::new("/plugins/Banana.runtimeconfig.json")),
            PathBuf::from("/plugins/Banana.runtimeconfig.dev.json")
        );
    }

    #[test]
    fn test_missing_config_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(probing_paths(&dir.path().join("Banana.runtimeconfig.json"), true).is_empty());
    }

    #[test]
    fn test_malformed_config_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Banana.runtimeconfig.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(probing_paths(&path, true).is_empty());
    }

    #[test]
    fn test_tokens_and_dev_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Banana.runtimeconfig.json");
        std::fs::write(
            &path,
            r#"{ "runtimeOptions": { "tfm": "v1", "additionalProbingPaths": ["/store/|arch|/|tfm|"] } }"#,
        )
        .unwrap();
        std::fs::write(
            dir.path().join("Banana.runtimeconfig.dev.json"),
            r#"{ "runtimeOptions": { "additionalProbingPaths": ["/dev/packages"] } }"#,
        )
        .unwrap();

        let arch = rid::arch_suffix().unwrap_or(std::env::consts::ARCH);
        assert_eq!(
            probing_paths(&path, true),
            vec![PathBuf::from(format!("/store/{}/v1", arch)), PathBuf::from("/dev/packages")]
        );
        assert_eq!(probing_paths(&path, false).len(), 1);
    }

    #[test]
    fn test_tfm_token_without_tfm_is_skipped() {
        assert_eq!(expand("/store/|tfm|", None), None);
        assert_eq!(expand("/store", None), Some(PathBuf::from("/store")));
    }
}
