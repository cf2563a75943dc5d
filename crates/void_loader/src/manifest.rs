//! Dependency graph model
//!
//! A manifest describes a module's main artifact and its dependency closure:
//! every library with its runtime, native and resource assets, plus the RID
//! fallback graph used to pick platform-specific assets.
//!
//! ```json
//! {
//!   "mainArtifact": "Banana",
//!   "libraries": [{
//!     "name": "Mylib",
//!     "version": "1.0.0.0",
//!     "runtimeAssets": [{ "paths": ["lib/Mylib.dll"] }],
//!     "nativeAssets": [{ "runtime": "linux-x64", "paths": ["runtimes/linux-x64/native/libmy.so"] }],
//!     "resourceAssets": [{ "locale": "es", "path": "lib/es/Mylib.resources.dll" }]
//!   }],
//!   "runtimeGraph": [{ "runtime": "linux-x64", "fallbacks": ["linux", "unix", "any"] }]
//! }
//! ```

use crate::error::ManifestError;
use crate::library::{ManagedLibrary, NativeLibrary};
use crate::platform::PlatformTables;
use crate::rid::{self, ANY_RID};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Assets of a library for one runtime; `runtime: None` is the RID-agnostic group
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AssetGroup {
    #[serde(default)]
    pub runtime: Option<String>,
    #[serde(default)]
    pub paths: Vec<String>,
}

/// A localized satellite asset
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ResourceAsset {
    pub locale: String,
    pub path: String,
}

/// One library of the dependency closure
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub runtime_assets: Vec<AssetGroup>,
    #[serde(default)]
    pub native_assets: Vec<AssetGroup>,
    #[serde(default)]
    pub resource_assets: Vec<ResourceAsset>,
}

/// Ordered fallbacks for one runtime
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RuntimeFallbacks {
    pub runtime: String,
    #[serde(default)]
    pub fallbacks: Vec<String>,
}

impl RuntimeFallbacks {
    /// A graph with no fallbacks
    pub fn new(runtime: impl Into<String>) -> Self {
        Self {
            runtime: runtime.into(),
            fallbacks: Vec::new(),
        }
    }
}

/// Parsed manifest
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyGraph {
    pub main_artifact: String,
    #[serde(default)]
    pub libraries: Vec<ManifestEntry>,
    #[serde(default)]
    pub runtime_graph: Vec<RuntimeFallbacks>,
}

impl DependencyGraph {
    /// Parse a manifest from raw bytes
    pub fn parse(bytes: &[u8]) -> Result<Self, ManifestError> {
        serde_json::from_slice(bytes).map_err(ManifestError::from_json)
    }

    /// Read and parse a manifest file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ManifestError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&bytes)
    }

    /// Look up a library by name
    pub fn library(&self, name: &str) -> Option<&ManifestEntry> {
        self.libraries.iter().find(|l| l.name == name)
    }

    /// Fallback graph for `rid`, then for `fallback_rid`, else a bare `any`
    pub fn runtime_fallbacks(&self, rid: &str, fallback_rid: &str) -> RuntimeFallbacks {
        self.runtime_graph
            .iter()
            .find(|g| g.runtime == rid)
            .or_else(|| self.runtime_graph.iter().find(|g| g.runtime == fallback_rid))
            .cloned()
            .unwrap_or_else(|| RuntimeFallbacks::new(ANY_RID))
    }

    /// Fallback graph for the running platform
    pub fn current_fallbacks(&self) -> RuntimeFallbacks {
        self.runtime_fallbacks(&rid::current_rid(), &rid::fallback_rid())
    }

    /// Module artifacts selected for `fallbacks`
    pub fn managed_libraries(&self, fallbacks: &RuntimeFallbacks) -> Vec<ManagedLibrary> {
        self.libraries
            .iter()
            .flat_map(|lib| {
                rid::select_asset_group(&lib.runtime_assets, &fallbacks.runtime, &fallbacks.fallbacks)
                    .iter()
                    .map(move |asset| ManagedLibrary::from_package(&lib.name, &lib.version, asset))
            })
            .collect()
    }

    /// Native libraries selected for `fallbacks`
    ///
    /// Packages often ship symbols or static archives next to native assets;
    /// only files carrying a native extension are kept.
    pub fn native_libraries(&self, fallbacks: &RuntimeFallbacks, tables: &PlatformTables) -> Vec<NativeLibrary> {
        self.libraries
            .iter()
            .flat_map(|lib| {
                rid::select_asset_group(&lib.native_assets, &fallbacks.runtime, &fallbacks.fallbacks)
                    .iter()
                    .filter(move |asset| tables.is_native_asset(asset))
                    .map(move |asset| NativeLibrary::from_package(&lib.name, &lib.version, asset))
            })
            .collect()
    }

    /// Subpaths below probing roots that hold resource locale folders
    ///
    /// For `lib/net/es/Example.resources.dll` in `Example/1.0.0`, probing
    /// happens in `example/1.0.0/lib/net`.
    pub fn resource_probing_subpaths(&self) -> Vec<PathBuf> {
        let mut subpaths = Vec::new();
        for lib in &self.libraries {
            for resource in &lib.resource_assets {
                let grandparent = Path::new(&resource.path)
                    .parent()
                    .and_then(Path::parent)
                    .unwrap_or_else(|| Path::new(""));
                let path = Path::new(&lib.name.to_lowercase()).join(&lib.version).join(grandparent);
                if !subpaths.contains(&path) {
                    subpaths.push(path);
                }
            }
        }
        subpaths
    }
}
