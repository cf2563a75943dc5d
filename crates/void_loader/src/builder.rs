//! Fluent construction of load contexts
//!
//! A builder is the recipe for a context. It validates paths as they are
//! added, and [`LoadContextBuilder::build`] can run any number of times: a
//! hot-reload session keeps the builder and builds a fresh context from it
//! after every change.

use crate::context::{ContextParts, LoadContext};
use crate::error::{LoaderError, Result};
use crate::host::HostResolver;
use crate::hot_reload::DEFAULT_DEBOUNCE;
use crate::library::{ManagedLibrary, NativeLibrary};
use crate::manifest::{DependencyGraph, RuntimeFallbacks};
use crate::platform::PlatformTables;
use crate::probing::{require_absolute, require_relative, ProbingConfig};
use crate::symbols::SymbolPolicy;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Recipe for a [`LoadContext`]
#[derive(Clone)]
pub struct LoadContextBuilder {
    base_directory: Option<PathBuf>,
    main_library: Option<String>,
    managed: HashMap<String, ManagedLibrary>,
    native: HashMap<String, NativeLibrary>,
    probing_paths: Vec<PathBuf>,
    resource_probing_paths: Vec<PathBuf>,
    resource_subpaths: Vec<PathBuf>,
    policy: SymbolPolicy,
    host: Option<Arc<dyn HostResolver>>,
    tables: PlatformTables,
    is_unloadable: bool,
    hot_reload: bool,
    debounce: Duration,
}

impl Default for LoadContextBuilder {
    fn default() -> Self {
        Self {
            base_directory: None,
            main_library: None,
            managed: HashMap::new(),
            native: HashMap::new(),
            probing_paths: Vec::new(),
            resource_probing_paths: Vec::new(),
            resource_subpaths: Vec::new(),
            policy: SymbolPolicy::new(),
            host: None,
            tables: PlatformTables::current(),
            is_unloadable: false,
            hot_reload: false,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

impl LoadContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory holding the module; must be absolute
    pub fn set_base_directory(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        require_absolute("base_directory", &path)?;
        self.base_directory = Some(path);
        Ok(self)
    }

    /// Name of the module's entry library
    pub fn set_main_library(&mut self, name: impl Into<String>) -> &mut Self {
        self.main_library = Some(name.into());
        self
    }

    /// Declare a module artifact; its paths must be relative
    pub fn add_managed_library(&mut self, library: ManagedLibrary) -> Result<&mut Self> {
        require_relative("app_local_path", &library.app_local_path)?;
        require_relative("additional_probing_path", &library.additional_probing_path)?;
        if let Some(previous) = self.managed.insert(library.name.clone(), library) {
            log::debug!("Managed library '{}' declared twice; last declaration wins", previous.name);
        }
        Ok(self)
    }

    /// Declare a native library; its paths must be relative
    pub fn add_native_library(&mut self, library: NativeLibrary) -> Result<&mut Self> {
        require_relative("app_local_path", &library.app_local_path)?;
        require_relative("additional_probing_path", &library.additional_probing_path)?;
        if let Some(previous) = self.native.insert(library.name.clone(), library) {
            log::debug!("Native library '{}' declared twice; last declaration wins", previous.name);
        }
        Ok(self)
    }

    /// Append an absolute probing root; earlier roots win
    pub fn add_probing_path(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        require_absolute("probing_path", &path)?;
        if !self.probing_paths.contains(&path) {
            self.probing_paths.push(path);
        }
        Ok(self)
    }

    /// Append an absolute root holding locale folders
    pub fn add_resource_probing_path(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        require_absolute("resource_probing_path", &path)?;
        if !self.resource_probing_paths.contains(&path) {
            self.resource_probing_paths.push(path);
        }
        Ok(self)
    }

    /// Append a relative path searched for locale folders below every
    /// probing root
    pub fn add_resource_probing_subpath(&mut self, path: impl Into<PathBuf>) -> Result<&mut Self> {
        let path = path.into();
        require_relative("resource_probing_subpath", &path)?;
        if !self.resource_subpaths.contains(&path) {
            self.resource_subpaths.push(path);
        }
        Ok(self)
    }

    /// Consult the host for every name not marked private
    pub fn prefer_shared_by_default(&mut self, prefer: bool) -> &mut Self {
        self.policy.set_prefer_shared(prefer);
        self
    }

    /// Always resolve `name` privately
    pub fn mark_private(&mut self, name: impl Into<String>) -> &mut Self {
        self.policy.mark_private(name);
        self
    }

    /// Resolve `name` through the host first
    pub fn mark_shared(&mut self, name: impl Into<String>) -> &mut Self {
        self.policy.mark_shared(name);
        self
    }

    /// Let unload release the context's libraries
    pub fn enable_unload(&mut self, enable: bool) -> &mut Self {
        self.is_unloadable = enable;
        self
    }

    /// Rebuild the context when files under the base directory change
    ///
    /// Enabling hot reload also enables unload; the old context has to go.
    pub fn enable_hot_reload(&mut self, enable: bool, debounce: Duration) -> &mut Self {
        self.hot_reload = enable;
        self.debounce = debounce;
        self
    }

    pub fn set_host_resolver(&mut self, resolver: Arc<dyn HostResolver>) -> &mut Self {
        self.host = Some(resolver);
        self
    }

    /// Probe with another platform's naming conventions
    pub fn set_platform_tables(&mut self, tables: PlatformTables) -> &mut Self {
        self.tables = tables;
        self
    }

    /// Declare everything a dependency graph selects for the running platform
    pub fn add_dependency_graph(&mut self, graph: &DependencyGraph) -> Result<&mut Self> {
        let fallbacks = graph.current_fallbacks();
        self.add_dependency_graph_for(graph, &fallbacks)
    }

    /// Declare everything a dependency graph selects for `fallbacks`
    pub fn add_dependency_graph_for(
        &mut self,
        graph: &DependencyGraph,
        fallbacks: &RuntimeFallbacks,
    ) -> Result<&mut Self> {
        log::debug!(
            "Adding dependency graph of '{}' for runtime '{}'",
            graph.main_artifact,
            fallbacks.runtime
        );

        if self.main_library.is_none() {
            self.main_library = Some(graph.main_artifact.clone());
        }
        for library in graph.managed_libraries(fallbacks) {
            self.add_managed_library(library)?;
        }
        for library in graph.native_libraries(fallbacks, &self.tables) {
            self.add_native_library(library)?;
        }
        for subpath in graph.resource_probing_subpaths() {
            // Resources at the root of a package have no subpath to add
            if !subpath.as_os_str().is_empty() {
                self.add_resource_probing_subpath(subpath)?;
            }
        }
        Ok(self)
    }

    pub fn base_directory(&self) -> Option<&Path> {
        self.base_directory.as_deref()
    }

    pub fn is_unloadable(&self) -> bool {
        self.is_unloadable || self.hot_reload
    }

    pub fn is_hot_reload_enabled(&self) -> bool {
        self.hot_reload
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Naming conventions the built context probes with
    pub fn tables(&self) -> &PlatformTables {
        &self.tables
    }

    /// Build a context from the accumulated state
    ///
    /// Fails with `InvalidArgument` when no base directory was set.
    pub fn build(&self) -> Result<LoadContext> {
        let base_directory = self
            .base_directory
            .clone()
            .ok_or_else(|| LoaderError::invalid_argument("base_directory", "a base directory must be set"))?;

        let mut probing = ProbingConfig::new(base_directory)?;
        probing.set_tables(self.tables.clone());
        for path in &self.probing_paths {
            probing.add_probing_path(path)?;
        }
        for path in &self.resource_probing_paths {
            probing.add_resource_probing_path(path)?;
        }
        for root in &self.probing_paths {
            for subpath in &self.resource_subpaths {
                probing.add_resource_probing_path(root.join(subpath))?;
            }
        }

        Ok(LoadContext::from_parts(ContextParts {
            name: self.context_name(),
            probing,
            main_library: self.main_library.clone(),
            managed: self.managed.clone(),
            native: self.native.clone(),
            policy: self.policy.clone(),
            host: self.host.clone(),
            is_unloadable: self.is_unloadable(),
        }))
    }

    fn context_name(&self) -> String {
        if let Some(main) = &self.main_library {
            return main.clone();
        }
        self.base_directory
            .as_deref()
            .and_then(Path::file_name)
            .and_then(|n| n.to_str())
            .unwrap_or("context")
            .to_string()
    }
}

impl fmt::Debug for LoadContextBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContextBuilder")
            .field("base_directory", &self.base_directory)
            .field("main_library", &self.main_library)
            .field("managed", &self.managed.len())
            .field("native", &self.native.len())
            .field("probing_paths", &self.probing_paths)
            .field("policy", &self.policy)
            .field("has_host", &self.host.is_some())
            .field("is_unloadable", &self.is_unloadable())
            .field("hot_reload", &self.hot_reload)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn test_build_requires_base_directory() {
        let err = LoadContextBuilder::new().build().unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArgument { argument: "base_directory", .. }));
    }

    #[test]
    fn test_relative_probing_path_rejected() {
        let mut builder = LoadContextBuilder::new();
        let err = builder.add_probing_path("relative/path").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArgument { argument: "probing_path", .. }));
        assert!(builder.set_base_directory("also/relative").is_err());
    }

    #[test]
    fn test_absolute_library_path_rejected() {
        let mut builder = LoadContextBuilder::new();
        let absolute = root().join("Mylib.so");
        assert!(builder.add_managed_library(ManagedLibrary::new("Mylib", absolute)).is_err());
        assert!(builder.add_native_library(NativeLibrary::new("libmy", "")).is_err());
    }

    #[test]
    fn test_hot_reload_implies_unload() {
        let mut builder = LoadContextBuilder::new();
        builder.set_base_directory(root()).unwrap();
        assert!(!builder.build().unwrap().is_unloadable());

        builder.enable_hot_reload(true, Duration::from_millis(50));
        assert!(builder.is_unloadable());
        assert!(builder.build().unwrap().is_unloadable());
    }

    #[test]
    fn test_build_is_repeatable() {
        let mut builder = LoadContextBuilder::new();
        builder
            .set_base_directory(root())
            .unwrap()
            .set_main_library("Banana")
            .mark_private("Mylib");

        let first = builder.build().unwrap();
        let second = builder.build().unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(first.name(), second.name());
        assert_eq!(first.probing(), second.probing());
        assert_eq!(first.policy(), second.policy());
    }

    #[test]
    fn test_resource_subpaths_expand_under_probing_roots() {
        let store = root().join("store");
        let mut builder = LoadContextBuilder::new();
        builder
            .set_base_directory(root())
            .unwrap()
            .add_probing_path(&store)
            .unwrap()
            .add_resource_probing_subpath("mylib/2.0.0.0/lib/net")
            .unwrap();

        let context = builder.build().unwrap();
        assert_eq!(
            context.probing().resource_probing_paths(),
            &[store.join("mylib/2.0.0.0/lib/net")]
        );
    }
}
