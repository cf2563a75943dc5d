//! Module loader: one module, its private dependencies and its lifecycle
//!
//! ```ignore
//! use void_loader::prelude::*;
//!
//! let config = LoaderConfig::default().share("Contracts");
//! let loader = ModuleLoader::from_library_file("/plugins/banana/libbanana.so", config)?;
//! let module = loader.load_default_module()?;
//! ```

use crate::builder::LoadContextBuilder;
use crate::config::LoaderConfig;
use crate::context::{LibraryName, LoadContext, Loaded, ModuleHandle};
use crate::error::{LoaderError, Result};
use crate::hot_reload::{HotReloadSession, ReloadEvent};
use crate::manifest::DependencyGraph;
use crate::runtime_config::RUNTIME_CONFIG_SUFFIX;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File name suffix of a module's dependency manifest
pub const MANIFEST_SUFFIX: &str = ".deps.json";

enum Active {
    Fixed(Arc<LoadContext>),
    Reloading(HotReloadSession),
}

/// Loads one module into its own context
pub struct ModuleLoader {
    config: LoaderConfig,
    active: Active,
}

impl ModuleLoader {
    /// Load the module whose main library is `path`
    ///
    /// `{stem}.deps.json` and `{stem}.runtimeconfig.json` next to the library
    /// are picked up when present.
    pub fn from_library_file(path: impl AsRef<Path>, config: LoaderConfig) -> Result<Self> {
        let recipe = Self::recipe_for_library_file(path, &config)?;
        Self::from_recipe(recipe, config)
    }

    /// Load the module described by a dependency manifest
    pub fn from_manifest_file(path: impl AsRef<Path>, config: LoaderConfig) -> Result<Self> {
        let recipe = Self::recipe_for_manifest_file(path, &config)?;
        Self::from_recipe(recipe, config)
    }

    /// Recipe for the module whose main library is `path`
    ///
    /// Hosts customize it (host resolver, probing paths) and hand it to
    /// [`ModuleLoader::from_recipe`].
    pub fn recipe_for_library_file(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<LoadContextBuilder> {
        let path = path.as_ref();
        let (base, stem) = split_module_path(path, "library_path")?;

        let manifest = base.join(format!("{}{}", stem, MANIFEST_SUFFIX));
        let graph = if manifest.is_file() {
            Some(DependencyGraph::from_file(&manifest)?)
        } else {
            log::debug!("No manifest next to {}; probing by convention only", path.display());
            None
        };

        Self::recipe(base, stem, graph.as_ref(), config)
    }

    /// Recipe for the module described by the manifest at `path`
    pub fn recipe_for_manifest_file(path: impl AsRef<Path>, config: &LoaderConfig) -> Result<LoadContextBuilder> {
        let path = path.as_ref();
        let (base, _) = split_module_path(path, "manifest_path")?;
        let graph = DependencyGraph::from_file(path)?;
        let main = graph.main_artifact.clone();

        Self::recipe(base, main, Some(&graph), config)
    }

    fn recipe(
        base: PathBuf,
        main: String,
        graph: Option<&DependencyGraph>,
        config: &LoaderConfig,
    ) -> Result<LoadContextBuilder> {
        let mut builder = LoadContextBuilder::new();
        builder
            .set_base_directory(&base)?
            .set_main_library(main.as_str())
            .mark_private(main.as_str())
            .prefer_shared_by_default(config.prefer_shared)
            .enable_unload(config.is_unloadable())
            .enable_hot_reload(config.enable_hot_reload, config.debounce());

        for name in &config.shared_names {
            builder.mark_shared(name.as_str());
        }
        for name in &config.private_names {
            builder.mark_private(name.as_str());
        }
        if let Some(graph) = graph {
            builder.add_dependency_graph(graph)?;
        }

        let runtime_config = base.join(format!("{}{}", main, RUNTIME_CONFIG_SUFFIX));
        builder.add_runtime_config(&runtime_config, config.include_dev_config);

        Ok(builder)
    }

    /// Build the context from a prepared recipe
    pub fn from_recipe(recipe: LoadContextBuilder, config: LoaderConfig) -> Result<Self> {
        let active = if config.enable_hot_reload {
            let session = HotReloadSession::new(recipe)?;
            session.start()?;
            Active::Reloading(session)
        } else {
            Active::Fixed(Arc::new(recipe.build()?))
        };

        Ok(Self { config, active })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// The module's active context
    ///
    /// With hot reload this changes after every reload; keep the returned
    /// `Arc` only as long as the work that needs it.
    pub fn context(&self) -> Arc<LoadContext> {
        match &self.active {
            Active::Fixed(context) => context.clone(),
            Active::Reloading(session) => session.current(),
        }
    }

    pub fn hot_reload_session(&self) -> Option<&HotReloadSession> {
        match &self.active {
            Active::Fixed(_) => None,
            Active::Reloading(session) => Some(session),
        }
    }

    pub fn is_unloadable(&self) -> bool {
        self.context().is_unloadable()
    }

    /// Open the module's main library
    pub fn load_default_module(&self) -> Result<ModuleHandle> {
        self.context().load_main_module()
    }

    /// Load a library the module depends on
    pub fn load_library(&self, request: impl Into<LibraryName>) -> Result<Option<Loaded>> {
        self.context().load_managed(request)
    }

    /// Load a native library the module depends on
    pub fn load_native(&self, name: &str) -> Result<Option<ModuleHandle>> {
        self.context().load_native(name)
    }

    /// Rebuild the context now
    ///
    /// Fails with `HotReloadFailed` when hot reload is disabled.
    pub fn reload(&self) -> Result<Arc<LoadContext>> {
        match &self.active {
            Active::Reloading(session) => session.reload(),
            Active::Fixed(_) => Err(LoaderError::HotReloadFailed(
                "hot reload is not enabled for this module".into(),
            )),
        }
    }

    /// Run `listener` after every reload; ignored without hot reload
    pub fn on_reload<F>(&self, listener: F)
    where
        F: Fn(&ReloadEvent) + Send + Sync + 'static,
    {
        match &self.active {
            Active::Reloading(session) => session.on_reload(listener),
            Active::Fixed(context) => {
                log::debug!("Reload listener ignored for '{}': hot reload is disabled", context.name())
            }
        }
    }

    /// Stop watching and unload the active context
    pub fn unload(&self) {
        if let Active::Reloading(session) = &self.active {
            session.stop();
        }
        self.context().unload();
    }
}

impl std::fmt::Debug for ModuleLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLoader")
            .field("context", &self.context())
            .field("hot_reload", &self.hot_reload_session().is_some())
            .finish()
    }
}

/// Directory and file stem of a module file; the path must be absolute
fn split_module_path(path: &Path, argument: &'static str) -> Result<(PathBuf, String)> {
    crate::probing::require_absolute(argument, path)?;

    let base = path
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| LoaderError::invalid_argument(argument, "path has no parent directory"))?;
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| LoaderError::invalid_argument(argument, "path has no file name"))?;

    let stem = file_name
        .strip_suffix(MANIFEST_SUFFIX)
        .map(str::to_string)
        .or_else(|| Path::new(file_name).file_stem().and_then(|s| s.to_str()).map(str::to_string))
        .unwrap_or_default();
    Ok((base, stem))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_module_path() {
        let (base, stem) = split_module_path(Path::new("/plugins/banana/Banana.so"), "library_path").unwrap();
        assert_eq!(base, PathBuf::from("/plugins/banana"));
        assert_eq!(stem, "Banana");

        let (_, stem) = split_module_path(Path::new("/plugins/banana/Banana.deps.json"), "manifest_path").unwrap();
        assert_eq!(stem, "Banana");
    }

    #[test]
    fn test_relative_module_path_rejected() {
        let err = ModuleLoader::from_library_file("banana/Banana.so", LoaderConfig::default()).unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArgument { argument: "library_path", .. }));
    }

    #[test]
    fn test_reload_requires_hot_reload() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ModuleLoader::from_library_file(dir.path().join("Banana.so"), LoaderConfig::default()).unwrap();
        assert!(matches!(loader.reload(), Err(LoaderError::HotReloadFailed(_))));
        assert!(loader.hot_reload_session().is_none());
    }
}
