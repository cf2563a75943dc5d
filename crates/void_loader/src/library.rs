//! Library records derived from manifest assets

use std::path::{Path, PathBuf};

/// A module artifact declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagedLibrary {
    /// Lookup name (asset file stem)
    pub name: String,
    /// Package version that shipped the asset
    pub version: String,
    /// File name inside the base directory
    pub app_local_path: PathBuf,
    /// Path below an additional probing root: `{package}/{version}/{asset}`
    pub additional_probing_path: PathBuf,
}

impl ManagedLibrary {
    /// Create a record found at `relative_path` under the base directory and
    /// every probing root
    pub fn new(name: impl Into<String>, relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        Self {
            name: name.into(),
            version: String::new(),
            app_local_path: relative_path.clone(),
            additional_probing_path: relative_path,
        }
    }

    /// Create a record for an asset shipped in a package
    ///
    /// The package id is lower-cased for the probing path, matching the
    /// layout of a shared package store.
    pub fn from_package(package_id: &str, version: &str, asset_path: &str) -> Self {
        let asset = Path::new(asset_path);
        Self {
            name: file_stem(asset),
            version: version.to_string(),
            app_local_path: asset.file_name().map(PathBuf::from).unwrap_or_default(),
            additional_probing_path: Path::new(&package_id.to_lowercase()).join(version).join(asset),
        }
    }
}

/// A native library declared by a manifest
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeLibrary {
    /// Lookup name (asset file stem, prefix included)
    pub name: String,
    /// Path inside the deployment, e.g. `runtimes/linux-x64/native/libfoo.so`
    pub app_local_path: PathBuf,
    /// Path below an additional probing root: `{package}/{version}/{asset}`
    pub additional_probing_path: PathBuf,
}

impl NativeLibrary {
    pub fn new(name: impl Into<String>, relative_path: impl Into<PathBuf>) -> Self {
        let relative_path = relative_path.into();
        Self {
            name: name.into(),
            app_local_path: relative_path.clone(),
            additional_probing_path: relative_path,
        }
    }

    /// Create a record for a native asset shipped in a package
    pub fn from_package(package_id: &str, version: &str, asset_path: &str) -> Self {
        let asset = Path::new(asset_path);
        Self {
            name: file_stem(asset),
            app_local_path: asset.to_path_buf(),
            additional_probing_path: Path::new(&package_id.to_lowercase()).join(version).join(asset),
        }
    }
}

fn file_stem(path: &Path) -> String {
    path.file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_from_package() {
        let lib = ManagedLibrary::from_package("Newtonsoft.Json", "9.0.1", "lib/netstandard1.0/Newtonsoft.Json.dll");
        assert_eq!(lib.name, "Newtonsoft.Json");
        assert_eq!(lib.app_local_path, PathBuf::from("Newtonsoft.Json.dll"));
        assert_eq!(
            lib.additional_probing_path,
            PathBuf::from("newtonsoft.json/9.0.1/lib/netstandard1.0/Newtonsoft.Json.dll")
        );
    }

    #[test]
    fn test_native_from_package() {
        let lib = NativeLibrary::from_package("SQLite", "3.13.0", "runtimes/linux-x64/native/libsqlite3.so");
        assert_eq!(lib.name, "libsqlite3");
        assert_eq!(lib.app_local_path, PathBuf::from("runtimes/linux-x64/native/libsqlite3.so"));
        assert_eq!(
            lib.additional_probing_path,
            PathBuf::from("sqlite/3.13.0/runtimes/linux-x64/native/libsqlite3.so")
        );
    }
}
