//! Directory of modules
//!
//! A [`ModuleManager`] owns one [`ModuleLoader`] per module found in a plugin
//! directory. Each module is either active, which means the host gets it through
//! [`ModuleManager::module`], or inactive: loaded, but waiting for the host to
//! activate it. Rescanning the directory loads new modules, reloads replaced
//! ones and unloads those whose files are gone. With hot reload enabled a
//! watcher triggers the rescan once changes settle.
//!
//! A module is a library file directly in the directory (`plugins/Banana.so`)
//! or a library named after its own folder (`plugins/Banana/Banana.so`),
//! which then holds the module's private dependencies as well.
//!
//! ```ignore
//! let manager = ModuleManagerBuilder::new("/game/plugins")
//!     .set_startup_modules(["Banana"])
//!     .enable_hot_reload(Duration::from_millis(250))
//!     .build()?;
//!
//! manager.activate("Cherry")?;
//! let banana = manager.module("Banana");
//! ```

use crate::config::LoaderConfig;
use crate::context::{LoadContext, ModuleHandle};
use crate::error::{LoaderError, Result};
use crate::hot_reload::{Debouncer, DEFAULT_DEBOUNCE};
use crate::lifecycle::WeakTrackingHandle;
use crate::loader::ModuleLoader;
use crate::platform::PlatformTables;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

#[cfg(feature = "hot-reload")]
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

type EventListener = Arc<dyn Fn(&ModuleEvent) + Send + Sync>;

/// Something that happened to a managed module
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleEvent {
    /// A module was loaded, active or waiting for activation
    Loaded { name: String, path: PathBuf, active: bool },
    /// A module was unloaded
    Unloaded { name: String, was_active: bool },
    /// A module file could not be loaded
    Failed { path: PathBuf, message: String },
}

/// How a [`ModuleManager`] treats its directory
#[derive(Debug, Clone)]
pub struct ModuleManagerConfig {
    /// Plugin directory; relative paths are taken from the working directory
    pub directory: PathBuf,
    /// Applied to every module's loader
    pub loader: LoaderConfig,
    /// Watch the directory and rescan on changes
    pub hot_reload: bool,
    /// Quiet period before a rescan
    pub debounce: Duration,
    /// Modules found after startup wait for [`ModuleManager::activate`]
    pub on_load_set_inactive: bool,
    /// Modules active at startup; `None` activates every module found
    pub startup_modules: Option<Vec<String>>,
    /// Decide which files are modules
    pub tables: PlatformTables,
}

impl ModuleManagerConfig {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            loader: LoaderConfig::default(),
            hot_reload: false,
            debounce: DEFAULT_DEBOUNCE,
            on_load_set_inactive: false,
            startup_modules: None,
            tables: PlatformTables::current(),
        }
    }

    fn is_active_at_startup(&self, name: &str) -> bool {
        match &self.startup_modules {
            Some(names) => names.iter().any(|n| n == name),
            None => true,
        }
    }
}

/// Fluent setup of a [`ModuleManager`]
#[derive(Clone)]
pub struct ModuleManagerBuilder {
    config: ModuleManagerConfig,
    listeners: Vec<EventListener>,
}

impl ModuleManagerBuilder {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            config: ModuleManagerConfig::new(directory),
            listeners: Vec::new(),
        }
    }

    pub fn set_loader_config(&mut self, config: LoaderConfig) -> &mut Self {
        self.config.loader = config;
        self
    }

    /// Watch the directory, rescanning `debounce` after the last change
    pub fn enable_hot_reload(&mut self, debounce: Duration) -> &mut Self {
        self.config.hot_reload = true;
        self.config.debounce = debounce;
        self
    }

    /// Keep modules that appear after startup inactive
    pub fn set_inactive_on_load(&mut self, inactive: bool) -> &mut Self {
        self.config.on_load_set_inactive = inactive;
        self
    }

    /// Activate only these modules at startup
    pub fn set_startup_modules<I, S>(&mut self, names: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.startup_modules = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn set_platform_tables(&mut self, tables: PlatformTables) -> &mut Self {
        self.config.tables = tables;
        self
    }

    /// Listen from the start, so startup loads are reported too
    pub fn on_event<F>(&mut self, listener: F) -> &mut Self
    where
        F: Fn(&ModuleEvent) + Send + Sync + 'static,
    {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn config(&self) -> &ModuleManagerConfig {
        &self.config
    }

    /// Load the directory's modules and start watching if enabled
    pub fn build(&self) -> Result<ModuleManager> {
        ModuleManager::with_listeners(self.config.clone(), self.listeners.clone())
    }
}

impl std::fmt::Debug for ModuleManagerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManagerBuilder")
            .field("config", &self.config)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Owns the modules of a plugin directory
pub struct ModuleManager {
    inner: Arc<ManagerInner>,
    #[cfg(feature = "hot-reload")]
    watcher: Mutex<Option<RecommendedWatcher>>,
}

struct ManagerInner {
    config: ModuleManagerConfig,
    modules: RwLock<BTreeMap<String, ManagedModule>>,
    /// Files that failed to load, skipped until they change
    failed: Mutex<HashMap<PathBuf, FileStamp>>,
    /// Serializes load, unload and rescan
    operations: Mutex<()>,
    debouncer: Debouncer,
    listeners: RwLock<Vec<EventListener>>,
    subscribers: Mutex<Vec<Sender<ModuleEvent>>>,
}

struct ManagedModule {
    path: PathBuf,
    stamp: Option<FileStamp>,
    loader: ModuleLoader,
    module: ModuleHandle,
    active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

impl FileStamp {
    fn read(path: &Path) -> Option<Self> {
        let meta = fs::metadata(path).ok()?;
        Some(Self {
            modified: meta.modified().ok(),
            len: meta.len(),
        })
    }
}

impl ModuleManager {
    pub fn new(config: ModuleManagerConfig) -> Result<Self> {
        Self::with_listeners(config, Vec::new())
    }

    fn with_listeners(mut config: ModuleManagerConfig, listeners: Vec<EventListener>) -> Result<Self> {
        if config.directory.is_relative() {
            config.directory = std::env::current_dir()?.join(&config.directory);
        }
        fs::create_dir_all(&config.directory)?;

        let hot_reload = config.hot_reload;
        let manager = Self {
            inner: Arc::new(ManagerInner {
                debouncer: Debouncer::new(config.debounce),
                config,
                modules: RwLock::new(BTreeMap::new()),
                failed: Mutex::new(HashMap::new()),
                operations: Mutex::new(()),
                listeners: RwLock::new(listeners),
                subscribers: Mutex::new(Vec::new()),
            }),
            #[cfg(feature = "hot-reload")]
            watcher: Mutex::new(None),
        };

        manager.inner.load_startup();
        if hot_reload {
            manager.start_watcher()?;
        }
        Ok(manager)
    }

    pub fn directory(&self) -> &Path {
        &self.inner.config.directory
    }

    pub fn config(&self) -> &ModuleManagerConfig {
        &self.inner.config
    }

    /// Names of the active modules, sorted
    pub fn modules(&self) -> Vec<String> {
        self.names(true)
    }

    /// Names of the modules waiting for activation, sorted
    pub fn inactive_modules(&self) -> Vec<String> {
        self.names(false)
    }

    fn names(&self, active: bool) -> Vec<String> {
        self.inner
            .modules
            .read()
            .iter()
            .filter(|(_, module)| module.active == active)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// `Some(active)` for a loaded module
    pub fn is_active(&self, name: &str) -> Option<bool> {
        self.inner.modules.read().get(name).map(|module| module.active)
    }

    /// The main library of an active module
    pub fn module(&self, name: &str) -> Option<ModuleHandle> {
        self.inner
            .modules
            .read()
            .get(name)
            .filter(|module| module.active)
            .map(|module| module.module.clone())
    }

    /// The load context of a module, active or not
    pub fn context(&self, name: &str) -> Option<Arc<LoadContext>> {
        self.inner.modules.read().get(name).map(|module| module.loader.context())
    }

    /// Move a module from inactive to active
    pub fn activate(&self, name: &str) -> Result<()> {
        self.set_active(name, true)
    }

    /// Move a module from active to inactive
    pub fn deactivate(&self, name: &str) -> Result<()> {
        self.set_active(name, false)
    }

    fn set_active(&self, name: &str, active: bool) -> Result<()> {
        let state = if active { "active" } else { "inactive" };
        let mut modules = self.inner.modules.write();
        match modules.get_mut(name) {
            Some(module) if module.active != active => {
                module.active = active;
                log::info!("Module '{}' is now {}", name, state);
                Ok(())
            }
            Some(_) => Err(LoaderError::invalid_argument(
                "module",
                format!("module '{}' is already {}", name, state),
            )),
            None => Err(LoaderError::invalid_argument("module", format!("no module named '{}'", name))),
        }
    }

    /// Load the module whose main library is `path`
    ///
    /// The module starts inactive when the manager keeps new modules
    /// inactive. Returns the module's name.
    pub fn load(&self, path: impl AsRef<Path>) -> Result<String> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| module_name(n, &self.inner.config.tables))
            .ok_or_else(|| {
                LoaderError::invalid_argument("library_path", format!("{} is not a module library", path.display()))
            })?;

        let operations = self.inner.operations.lock();
        if self.inner.modules.read().contains_key(&name) {
            return Err(LoaderError::invalid_argument(
                "library_path",
                format!("module '{}' is already loaded", name),
            ));
        }

        let mut events = Vec::new();
        let result = self
            .inner
            .load_file(&name, path, !self.inner.config.on_load_set_inactive, &mut events);
        drop(operations);

        self.inner.publish_all(events);
        result.map(|_| name)
    }

    /// Unload a module
    ///
    /// The returned handle reports reclamation once every [`ModuleHandle`]
    /// of the module has been dropped.
    pub fn unload(&self, name: &str) -> Result<WeakTrackingHandle> {
        let operations = self.inner.operations.lock();
        let mut events = Vec::new();
        let tracker = self.inner.unload_entry(name, &mut events);
        drop(operations);

        self.inner.publish_all(events);
        tracker.ok_or_else(|| LoaderError::invalid_argument("module", format!("no module named '{}'", name)))
    }

    /// Unload a module and load it again from its file, keeping its state
    pub fn reload(&self, name: &str) -> Result<()> {
        let operations = self.inner.operations.lock();
        let (path, active) = self
            .inner
            .modules
            .read()
            .get(name)
            .map(|module| (module.path.clone(), module.active))
            .ok_or_else(|| LoaderError::invalid_argument("module", format!("no module named '{}'", name)))?;

        let mut events = Vec::new();
        self.inner.unload_entry(name, &mut events);
        let result = self.inner.load_file(name, &path, active, &mut events);
        drop(operations);

        self.inner.publish_all(events);
        result
    }

    /// Bring the loaded modules in line with the directory
    pub fn rescan(&self) {
        self.inner.rescan();
    }

    /// Call `listener` for every module event
    pub fn on_event<F>(&self, listener: F)
    where
        F: Fn(&ModuleEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Receive module events on a channel
    pub fn subscribe(&self) -> Receiver<ModuleEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    #[cfg(feature = "hot-reload")]
    fn start_watcher(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handle_event(&weak, event),
            Err(e) => log::warn!("File watch error: {}", e),
        })
        .map_err(|e| LoaderError::HotReloadFailed(e.to_string()))?;

        let dir = &self.inner.config.directory;
        watcher
            .watch(dir, RecursiveMode::Recursive)
            .map_err(|e| LoaderError::HotReloadFailed(format!("Failed to watch {}: {}", dir.display(), e)))?;
        log::info!("Watching module directory: {}", dir.display());

        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    #[cfg(not(feature = "hot-reload"))]
    fn start_watcher(&self) -> Result<()> {
        log::warn!("Built without the hot-reload feature; call rescan to pick up changes");
        Ok(())
    }

    /// Stop watching and drop any pending rescan
    pub fn stop(&self) {
        #[cfg(feature = "hot-reload")]
        self.watcher.lock().take();

        self.inner.debouncer.cancel();
    }
}

impl Drop for ModuleManager {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("directory", &self.inner.config.directory)
            .field("modules", &self.modules())
            .field("inactive_modules", &self.inactive_modules())
            .finish()
    }
}

#[cfg(feature = "hot-reload")]
fn handle_event(weak: &std::sync::Weak<ManagerInner>, event: Event) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return;
    }
    let Some(inner) = weak.upgrade() else {
        return;
    };
    if event.paths.iter().any(|path| inner.is_relevant(path)) {
        ManagerInner::schedule_rescan(&inner);
    }
}

impl ManagerInner {
    /// Loaders of managed modules never watch on their own
    fn module_config(&self) -> LoaderConfig {
        let mut config = self.config.loader.clone();
        config.is_unloadable = true;
        config.enable_hot_reload = false;
        config
    }

    #[cfg(feature = "hot-reload")]
    fn is_relevant(&self, path: &Path) -> bool {
        // Folders carry no extension; removed ones can no longer be stat'ed
        path.extension().is_none()
            || self.config.tables.is_library_file(path)
            || path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("json"))
    }

    #[cfg(feature = "hot-reload")]
    fn schedule_rescan(inner: &Arc<ManagerInner>) {
        let weak = Arc::downgrade(inner);
        inner.debouncer.execute(move || {
            if let Some(inner) = weak.upgrade() {
                inner.rescan();
            }
        });
    }

    fn scan(&self) -> Vec<(String, PathBuf)> {
        match module_files(&self.config.directory, &self.config.tables) {
            Ok(found) => found,
            Err(e) => {
                log::error!("Failed to scan {}: {}", self.config.directory.display(), e);
                Vec::new()
            }
        }
    }

    fn load_startup(&self) {
        let operations = self.operations.lock();
        let mut events = Vec::new();
        for (name, path) in self.scan() {
            let active = self.config.is_active_at_startup(&name);
            let _ = self.load_file(&name, &path, active, &mut events);
        }
        drop(operations);

        log::info!(
            "Module manager for {} started with {} modules",
            self.config.directory.display(),
            self.modules.read().len()
        );
        self.publish_all(events);
    }

    fn rescan(&self) {
        let operations = self.operations.lock();
        let mut events = Vec::new();
        let found: BTreeMap<String, PathBuf> = self.scan().into_iter().collect();

        let known: Vec<(String, PathBuf, Option<FileStamp>, bool)> = self
            .modules
            .read()
            .iter()
            .map(|(name, module)| (name.clone(), module.path.clone(), module.stamp, module.active))
            .collect();

        for (name, path, stamp, active) in known {
            match found.get(&name) {
                None => {
                    self.unload_entry(&name, &mut events);
                }
                Some(now) if *now != path || FileStamp::read(now) != stamp => {
                    log::info!("Module '{}' changed on disk; reloading", name);
                    self.unload_entry(&name, &mut events);
                    let _ = self.load_file(&name, now, active, &mut events);
                }
                Some(_) => {}
            }
        }

        let active = !self.config.on_load_set_inactive;
        for (name, path) in &found {
            if self.modules.read().contains_key(name) {
                continue;
            }
            let unchanged_failure = self
                .failed
                .lock()
                .get(path)
                .is_some_and(|stamp| Some(*stamp) == FileStamp::read(path));
            if unchanged_failure {
                continue;
            }
            let _ = self.load_file(name, path, active, &mut events);
        }
        drop(operations);

        self.publish_all(events);
    }

    fn load_file(&self, name: &str, path: &Path, active: bool, events: &mut Vec<ModuleEvent>) -> Result<()> {
        let stamp = FileStamp::read(path);
        let loaded = ModuleLoader::from_library_file(path, self.module_config())
            .and_then(|loader| loader.load_default_module().map(|module| (loader, module)));

        match loaded {
            Ok((loader, module)) => {
                self.failed.lock().remove(path);
                self.modules.write().insert(
                    name.to_string(),
                    ManagedModule {
                        path: path.to_path_buf(),
                        stamp,
                        loader,
                        module,
                        active,
                    },
                );
                log::info!(
                    "Loaded module '{}' from {} ({})",
                    name,
                    path.display(),
                    if active { "active" } else { "inactive" }
                );
                events.push(ModuleEvent::Loaded {
                    name: name.to_string(),
                    path: path.to_path_buf(),
                    active,
                });
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to load module {}: {}", path.display(), e);
                if let Some(stamp) = stamp {
                    self.failed.lock().insert(path.to_path_buf(), stamp);
                }
                events.push(ModuleEvent::Failed {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn unload_entry(&self, name: &str, events: &mut Vec<ModuleEvent>) -> Option<WeakTrackingHandle> {
        let ManagedModule {
            loader, module, active, ..
        } = self.modules.write().remove(name)?;

        let tracker = loader.context().track();
        drop(module);
        loader.unload();
        log::info!("Unloaded module '{}'", name);

        events.push(ModuleEvent::Unloaded {
            name: name.to_string(),
            was_active: active,
        });
        Some(tracker)
    }

    fn publish_all(&self, events: Vec<ModuleEvent>) {
        if events.is_empty() {
            return;
        }
        let listeners: Vec<EventListener> = self.listeners.read().clone();
        for event in &events {
            for listener in &listeners {
                listener(event);
            }
            self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
        }
    }
}

/// Module files in `directory`, sorted by module name
///
/// Takes library files directly in the directory and, for each folder, the
/// library named after the folder. When a name appears twice the first in
/// path order wins.
pub fn module_files(directory: &Path, tables: &PlatformTables) -> Result<Vec<(String, PathBuf)>> {
    let mut entries: Vec<PathBuf> = fs::read_dir(directory)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    let mut found: BTreeMap<String, PathBuf> = BTreeMap::new();
    for path in entries {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };

        let candidate = if path.is_dir() {
            tables
                .managed_extensions
                .iter()
                .map(|ext| path.join(format!("{}{}", file_name, ext)))
                .find(|candidate| candidate.is_file())
                .map(|file| (file_name.to_string(), file))
        } else {
            module_name(file_name, tables).map(|name| (name, path.clone()))
        };

        if let Some((name, file)) = candidate {
            match found.entry(name) {
                Entry::Vacant(slot) => {
                    slot.insert(file);
                }
                Entry::Occupied(slot) => log::warn!(
                    "Ignoring {}: module '{}' already found at {}",
                    file.display(),
                    slot.key(),
                    slot.get().display()
                ),
            }
        }
    }

    Ok(found.into_iter().collect())
}

/// Module name of a library file name, if it carries a module extension
fn module_name(file_name: &str, tables: &PlatformTables) -> Option<String> {
    let lower = file_name.to_ascii_lowercase();
    tables.managed_extensions.iter().find_map(|ext| {
        if lower.ends_with(ext.as_str()) && file_name.len() > ext.len() {
            Some(file_name[..file_name.len() - ext.len()].to_string())
        } else {
            None
        }
    })
}
