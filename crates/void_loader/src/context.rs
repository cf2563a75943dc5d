//! Isolated load context
//!
//! A load context owns a private name → file table for one module and its
//! dependencies. Requests are resolved lazily, the first time something asks
//! for a name, in this order:
//!
//! 1. the host, for shared names (a hit short-circuits; failures are ignored)
//! 2. locale folders under the resource roots, for localized requests
//! 3. the manifest entry: base directory, then every additional probing root
//! 4. `{base}/{name}{ext}` for each module extension
//!
//! Anything else is [`Resolution::Unresolved`], which is not an error: the
//! caller may still find the library by its own means.

use crate::error::{LoaderError, Result};
use crate::host::{self, HostResolver, SharedArtifact};
use crate::library::{ManagedLibrary, NativeLibrary};
use crate::module::ModuleLibrary;
use crate::probing::ProbingConfig;
use crate::symbols::SymbolPolicy;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tempfile::TempDir;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Locale name that means "not localized"
pub const NEUTRAL_LOCALE: &str = "neutral";

/// A library request: a name plus an optional locale
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LibraryName {
    name: String,
    locale: Option<String>,
}

impl LibraryName {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            locale: None,
        }
    }

    /// Request the satellite of this name for `locale`
    ///
    /// An empty locale or `neutral` keeps the request neutral.
    pub fn with_locale(mut self, locale: impl Into<String>) -> Self {
        let locale = locale.into();
        self.locale = if locale.is_empty() || locale.eq_ignore_ascii_case(NEUTRAL_LOCALE) {
            None
        } else {
            Some(locale)
        };
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn locale(&self) -> Option<&str> {
        self.locale.as_deref()
    }

    fn cache_key(&self) -> String {
        match &self.locale {
            Some(locale) => format!("{}/{}", locale, self.name),
            None => self.name.clone(),
        }
    }
}

impl From<&str> for LibraryName {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for LibraryName {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for LibraryName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.locale {
            Some(locale) => write!(f, "{} ({})", self.name, locale),
            None => f.write_str(&self.name),
        }
    }
}

/// Outcome of a managed-library request
#[derive(Clone)]
pub enum Resolution {
    /// The host provides the name; the context defers to the host's copy
    Shared(SharedArtifact),
    /// A private file was found
    Private(PathBuf),
    /// No probing step matched
    Unresolved,
}

impl Resolution {
    pub fn is_unresolved(&self) -> bool {
        matches!(self, Resolution::Unresolved)
    }

    /// The private file, if resolution found one
    pub fn path(&self) -> Option<&Path> {
        match self {
            Resolution::Private(path) => Some(path),
            _ => None,
        }
    }

    /// The host artifact, if the name is shared
    pub fn shared(&self) -> Option<&SharedArtifact> {
        match self {
            Resolution::Shared(artifact) => Some(artifact),
            _ => None,
        }
    }
}

impl fmt::Debug for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Resolution::Shared(_) => f.write_str("Shared(..)"),
            Resolution::Private(path) => f.debug_tuple("Private").field(path).finish(),
            Resolution::Unresolved => f.write_str("Unresolved"),
        }
    }
}

/// Libraries opened by one context
///
/// This is the resource a context owns for loaded code. Every handle given
/// out keeps it alive, so it is reclaimed only after the context is unloaded
/// and the last handle is dropped.
///
/// Scopes of unloadable contexts open each library from a private copy kept
/// in a staging directory, since the OS loader hands back an already loaded
/// image for a path it has seen. The directory is removed after the
/// libraries have been closed.
pub struct ModuleScope {
    context: String,
    libraries: RwLock<HashMap<PathBuf, Arc<ModuleLibrary>>>,
    copy_on_open: bool,
    staged: AtomicUsize,
    staging: Mutex<Option<TempDir>>,
}

impl ModuleScope {
    fn new(context: String, copy_on_open: bool) -> Self {
        Self {
            context,
            libraries: RwLock::new(HashMap::new()),
            copy_on_open,
            staged: AtomicUsize::new(0),
            staging: Mutex::new(None),
        }
    }

    /// Name of the owning context
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Number of libraries opened so far
    pub fn len(&self) -> usize {
        self.libraries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.libraries.read().is_empty()
    }

    /// Whether libraries are opened from private copies
    pub fn copies_on_open(&self) -> bool {
        self.copy_on_open
    }

    /// File the OS loader should open for `path`
    fn stage(&self, path: &Path) -> Result<PathBuf> {
        if !self.copy_on_open {
            return Ok(path.to_path_buf());
        }

        let mut staging = self.staging.lock();
        let root = match staging.as_ref() {
            Some(dir) => dir.path().to_path_buf(),
            None => {
                let dir = tempfile::Builder::new()
                    .prefix("void_loader-")
                    .tempdir()
                    .map_err(|e| LoaderError::load_failed(path, format!("cannot create staging directory: {}", e)))?;
                let root = dir.path().to_path_buf();
                *staging = Some(dir);
                root
            }
        };

        // One slot per opened file keeps the original file name for the
        // loader while two sources with the same name stay apart.
        let slot = root.join(self.staged.fetch_add(1, Ordering::Relaxed).to_string());
        let file_name = path
            .file_name()
            .ok_or_else(|| LoaderError::load_failed(path, "path has no file name"))?;
        let staged = slot.join(file_name);
        std::fs::create_dir(&slot)
            .and_then(|_| std::fs::copy(path, &staged))
            .map_err(|e| LoaderError::load_failed(path, format!("cannot stage copy: {}", e)))?;

        log::trace!("Staged {} as {} for context '{}'", path.display(), staged.display(), self.context);
        Ok(staged)
    }
}

impl Drop for ModuleScope {
    fn drop(&mut self) {
        let libraries = std::mem::take(self.libraries.get_mut());
        log::debug!("Releasing {} libraries of load context '{}'", libraries.len(), self.context);
        drop(libraries);

        if let Some(dir) = self.staging.get_mut().take() {
            if let Err(e) = dir.close() {
                log::warn!("Failed to remove staging directory of load context '{}': {}", self.context, e);
            }
        }
    }
}

/// A library loaded through a context
///
/// Holds the owning scope alive; drop every handle to let an unloaded
/// context's code go.
#[derive(Clone)]
pub struct ModuleHandle {
    library: Arc<ModuleLibrary>,
    scope: Arc<ModuleScope>,
}

impl ModuleHandle {
    /// Name of the context that loaded this library
    pub fn context(&self) -> &str {
        self.scope.context()
    }

    /// Whether two handles refer to the same loaded library
    pub fn ptr_eq(&self, other: &ModuleHandle) -> bool {
        Arc::ptr_eq(&self.library, &other.library)
    }
}

impl Deref for ModuleHandle {
    type Target = ModuleLibrary;

    fn deref(&self) -> &ModuleLibrary {
        &self.library
    }
}

impl fmt::Debug for ModuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleHandle")
            .field("context", &self.scope.context)
            .field("path", &self.library.path())
            .finish()
    }
}

/// A loaded managed library
#[derive(Clone, Debug)]
pub enum Loaded {
    /// The host's copy
    Shared(SharedArtifact),
    /// A library opened privately by this context
    Private(ModuleHandle),
}

/// The isolated resolution scope of one module
pub struct LoadContext {
    id: u64,
    name: String,
    pub(crate) probing: ProbingConfig,
    main_library: Option<String>,
    managed: HashMap<String, ManagedLibrary>,
    native: HashMap<String, NativeLibrary>,
    policy: SymbolPolicy,
    host: Option<Arc<dyn HostResolver>>,
    pub(crate) is_unloadable: bool,
    pub(crate) unloaded: AtomicBool,
    managed_cache: RwLock<HashMap<String, PathBuf>>,
    native_cache: RwLock<HashMap<(String, String), PathBuf>>,
    pub(crate) scope: RwLock<Option<Arc<ModuleScope>>>,
    pub(crate) tracker: Weak<ModuleScope>,
}

/// Parts a builder hands over to create a context
pub(crate) struct ContextParts {
    pub name: String,
    pub probing: ProbingConfig,
    pub main_library: Option<String>,
    pub managed: HashMap<String, ManagedLibrary>,
    pub native: HashMap<String, NativeLibrary>,
    pub policy: SymbolPolicy,
    pub host: Option<Arc<dyn HostResolver>>,
    pub is_unloadable: bool,
}

impl LoadContext {
    pub(crate) fn from_parts(parts: ContextParts) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "Created load context '{}' #{} ({} managed, {} native, unloadable: {})",
            parts.name,
            id,
            parts.managed.len(),
            parts.native.len(),
            parts.is_unloadable
        );

        let scope = Arc::new(ModuleScope::new(parts.name.clone(), parts.is_unloadable));
        Self {
            id,
            tracker: Arc::downgrade(&scope),
            scope: RwLock::new(Some(scope)),
            name: parts.name,
            probing: parts.probing,
            main_library: parts.main_library,
            managed: parts.managed,
            native: parts.native,
            policy: parts.policy,
            host: parts.host,
            is_unloadable: parts.is_unloadable,
            unloaded: AtomicBool::new(false),
            managed_cache: RwLock::new(HashMap::new()),
            native_cache: RwLock::new(HashMap::new()),
        }
    }

    /// Unique id of this context instance
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_directory(&self) -> &Path {
        self.probing.base_directory()
    }

    pub fn probing(&self) -> &ProbingConfig {
        &self.probing
    }

    pub fn policy(&self) -> &SymbolPolicy {
        &self.policy
    }

    pub fn main_library(&self) -> Option<&str> {
        self.main_library.as_deref()
    }

    /// Whether unload releases the context's code
    pub fn is_unloadable(&self) -> bool {
        self.is_unloadable
    }

    /// False once the context has been unloaded
    pub fn is_loaded(&self) -> bool {
        !self.unloaded.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_loaded(&self) -> Result<()> {
        if self.is_loaded() {
            Ok(())
        } else {
            Err(LoaderError::UseAfterUnload {
                context: self.name.clone(),
            })
        }
    }

    // ========== Managed Resolution ==========

    /// Resolve a managed library request to the host's copy or a private file
    pub fn resolve_managed(&self, request: impl Into<LibraryName>) -> Result<Resolution> {
        self.ensure_loaded()?;
        let request = request.into();
        let name = request.name();

        if self.policy.should_try_host(name) {
            if let Some(host) = &self.host {
                if let Some(artifact) = host::try_host(host.as_ref(), name) {
                    log::debug!("'{}' resolved from host for context '{}'", name, self.name);
                    return Ok(Resolution::Shared(artifact));
                }
            }
        }

        let key = request.cache_key();
        if let Some(path) = self.managed_cache.read().get(&key) {
            return Ok(Resolution::Private(path.clone()));
        }

        let found = match request.locale() {
            Some(locale) => self.probe_resource(name, locale),
            None => self.probe_managed(name),
        };

        match found {
            Some(path) => {
                log::debug!("'{}' resolved to {} in context '{}'", request, path.display(), self.name);
                let path = self.managed_cache.write().entry(key).or_insert(path).clone();
                Ok(Resolution::Private(path))
            }
            None => {
                log::debug!("'{}' unresolved in context '{}'", request, self.name);
                Ok(Resolution::Unresolved)
            }
        }
    }

    fn probe_resource(&self, name: &str, locale: &str) -> Option<PathBuf> {
        let tables = self.probing.tables();
        self.probing.resource_roots().find_map(|root| {
            tables
                .managed_extensions
                .iter()
                .map(|ext| root.join(locale).join(format!("{}{}", name, ext)))
                .find(|candidate| candidate.is_file())
        })
    }

    fn probe_managed(&self, name: &str) -> Option<PathBuf> {
        let base = self.probing.base_directory();

        if let Some(library) = self.managed.get(name) {
            let local = base.join(&library.app_local_path);
            if local.is_file() {
                return Some(local);
            }

            for root in self.probing.additional_probing_paths() {
                let candidate = root.join(&library.additional_probing_path);
                if candidate.is_file() {
                    return Some(candidate);
                }
            }
        }

        self.probing
            .tables()
            .managed_extensions
            .iter()
            .map(|ext| base.join(format!("{}{}", name, ext)))
            .find(|candidate| candidate.is_file())
    }

    // ========== Native Resolution ==========

    /// Resolve a native library by name, with or without prefix and extension
    pub fn resolve_native(&self, name: &str) -> Result<Option<PathBuf>> {
        self.ensure_loaded()?;
        let tables = self.probing.tables();

        {
            let cache = self.native_cache.read();
            for prefix in &tables.native_prefixes {
                if let Some(path) = cache.get(&(prefix.clone(), name.to_string())) {
                    return Ok(Some(path.clone()));
                }
            }
        }

        let mut found = self.probe_native_prefixes(name);

        // Callers may name the library with its extension; retry without it
        if found.is_none() {
            if let Some((len, _)) = tables.native_extension_of(name) {
                let trimmed = &name[..name.len() - len];
                if !trimmed.is_empty() {
                    found = self.probe_native_prefixes(trimmed);
                }
            }
        }

        match found {
            Some((prefix, path)) => {
                log::debug!("Native '{}' resolved to {} in context '{}'", name, path.display(), self.name);
                let path = self
                    .native_cache
                    .write()
                    .entry((prefix, name.to_string()))
                    .or_insert(path)
                    .clone();
                Ok(Some(path))
            }
            None => {
                log::debug!("Native '{}' unresolved in context '{}'", name, self.name);
                Ok(None)
            }
        }
    }

    fn probe_native_prefixes(&self, name: &str) -> Option<(String, PathBuf)> {
        self.probing
            .tables()
            .native_prefixes
            .iter()
            .find_map(|prefix| self.probe_native(prefix, name).map(|path| (prefix.clone(), path)))
    }

    fn probe_native(&self, prefix: &str, name: &str) -> Option<PathBuf> {
        let base = self.probing.base_directory();
        let file_name = format!("{}{}", prefix, name);
        let library = self.native.get(&file_name);

        if let Some(library) = library {
            let local = base.join(&library.app_local_path);
            if local.is_file() {
                return Some(local);
            }
        }

        let by_convention = self
            .probing
            .tables()
            .native_extensions
            .iter()
            .map(|ext| base.join(format!("{}{}", file_name, ext)))
            .chain(std::iter::once(base.join(&file_name)))
            .find(|candidate| candidate.is_file());
        if by_convention.is_some() {
            return by_convention;
        }

        let library = library?;
        self.probing
            .additional_probing_paths()
            .iter()
            .map(|root| root.join(&library.additional_probing_path))
            .find(|candidate| candidate.is_file())
    }

    // ========== Loading ==========

    /// Resolve and open a managed library
    ///
    /// Returns `Ok(None)` when the request is unresolved.
    pub fn load_managed(&self, request: impl Into<LibraryName>) -> Result<Option<Loaded>> {
        match self.resolve_managed(request)? {
            Resolution::Shared(artifact) => Ok(Some(Loaded::Shared(artifact))),
            Resolution::Private(path) => Ok(Some(Loaded::Private(self.open(&path)?))),
            Resolution::Unresolved => Ok(None),
        }
    }

    /// Resolve and open a native library
    pub fn load_native(&self, name: &str) -> Result<Option<ModuleHandle>> {
        match self.resolve_native(name)? {
            Some(path) => Ok(Some(self.open(&path)?)),
            None => Ok(None),
        }
    }

    /// Open the module's main library
    pub fn load_main_module(&self) -> Result<ModuleHandle> {
        self.ensure_loaded()?;
        let main = self
            .main_library
            .as_deref()
            .ok_or_else(|| LoaderError::invalid_argument("main_library", "context has no main library"))?;

        match self.probe_managed(main) {
            Some(path) => self.open(&path),
            None => Err(LoaderError::load_failed(
                self.base_directory().join(main),
                "main library not found in base directory",
            )),
        }
    }

    /// Open `path` once per context; later calls share the handle
    fn open(&self, path: &Path) -> Result<ModuleHandle> {
        let path = normalize(path);
        let scope = self.scope.read().clone().ok_or_else(|| LoaderError::UseAfterUnload {
            context: self.name.clone(),
        })?;

        if let Some(library) = scope.libraries.read().get(&path) {
            return Ok(ModuleHandle {
                library: library.clone(),
                scope: scope.clone(),
            });
        }

        // Opened outside the lock so a library whose initializers call back
        // into this context cannot deadlock.
        let staged = scope.stage(&path)?;
        let opened = Arc::new(ModuleLibrary::open_from(&path, &staged)?);
        let library = scope.libraries.write().entry(path).or_insert(opened).clone();

        Ok(ModuleHandle { library, scope })
    }

    /// Number of libraries this context has opened; zero once unloaded
    pub fn loaded_library_count(&self) -> usize {
        self.scope.read().as_ref().map(|scope| scope.len()).unwrap_or(0)
    }

    /// Paths resolved so far, for diagnostics
    pub fn resolved_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.managed_cache.read().values().cloned().collect();
        paths.extend(self.native_cache.read().values().cloned());
        paths.sort();
        paths.dedup();
        paths
    }
}

impl fmt::Debug for LoadContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadContext")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("base_directory", &self.probing.base_directory())
            .field("is_unloadable", &self.is_unloadable)
            .field("is_loaded", &self.is_loaded())
            .finish()
    }
}

fn normalize(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::LoadContextBuilder;
    use crate::host::HostLibraries;

    #[test]
    fn test_neutral_locale() {
        assert_eq!(LibraryName::new("Mylib").with_locale("neutral").locale(), None);
        assert_eq!(LibraryName::new("Mylib").with_locale("").locale(), None);
        assert_eq!(LibraryName::new("Mylib").with_locale("es").locale(), Some("es"));
        assert_eq!(LibraryName::new("Mylib").with_locale("es").to_string(), "Mylib (es)");
    }

    #[test]
    fn test_load_shared_returns_host_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let host = Arc::new(HostLibraries::new());
        let contracts = Arc::new(7u32);
        host.register("Contracts", contracts.clone());

        let mut builder = LoadContextBuilder::new();
        builder
            .set_base_directory(dir.path())
            .unwrap()
            .mark_shared("Contracts")
            .set_host_resolver(host);
        let context = builder.build().unwrap();

        match context.load_managed("Contracts").unwrap() {
            Some(Loaded::Shared(artifact)) => assert_eq!(artifact.downcast_ref::<u32>(), Some(&7)),
            other => panic!("expected the host copy, got {:?}", other),
        }
        assert!(context.resolved_paths().is_empty());
    }

    #[test]
    fn test_open_failure_leaves_scope_empty() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("Broken.so"), b"not a library").unwrap();

        let mut builder = LoadContextBuilder::new();
        builder
            .set_base_directory(dir.path())
            .unwrap()
            .set_platform_tables(crate::platform::PlatformTables::linux());
        let context = builder.build().unwrap();

        assert!(matches!(context.load_managed("Broken"), Err(LoaderError::LoadFailed { .. })));
        assert!(context.scope.read().as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_staged_copies_are_private_and_removed_with_scope() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("Mylib.so");
        std::fs::write(&source, b"first build").unwrap();

        let scope = ModuleScope::new("banana".into(), true);
        let first = scope.stage(&source).unwrap();
        std::fs::write(&source, b"second build").unwrap();
        let second = scope.stage(&source).unwrap();

        assert_ne!(first, second);
        assert_eq!(first.file_name(), source.file_name());
        assert_eq!(std::fs::read(&first).unwrap(), b"first build");
        assert_eq!(std::fs::read(&second).unwrap(), b"second build");

        drop(scope);
        assert!(!first.exists());
        assert!(!second.exists());
    }

    #[test]
    fn test_fixed_scope_opens_in_place() {
        let scope = ModuleScope::new("banana".into(), false);
        let path = Path::new("/plugins/Mylib.so");
        assert_eq!(scope.stage(path).unwrap(), path);
        assert!(!scope.copies_on_open());
    }
}
