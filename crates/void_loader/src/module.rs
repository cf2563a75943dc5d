//! Dynamic library handles owned by a load context
//!
//! Handles loading, symbol lookup, discovery and unloading of module and
//! native libraries.

use crate::error::{LoaderError, Result};
use crate::ffi::*;
use libloading::{Library, Symbol};
use std::ffi::CStr;
use std::path::{Path, PathBuf};

/// What a module reports through its discovery entry point
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Module name
    pub name: String,
    /// Version string
    pub version: String,
    /// API version
    pub api_version: u32,
    /// Names the module exports for discovery
    pub exports: Vec<String>,
}

/// A loaded dynamic library
pub struct ModuleLibrary {
    /// The underlying library handle
    library: Library,
    /// Resolved file this library stands for
    path: PathBuf,
    /// File the OS loader actually opened; a staged copy or `path` itself
    loaded_from: PathBuf,
    /// Discovery info, if the library exports the entry point
    info: Option<ModuleInfo>,
}

impl ModuleLibrary {
    /// Open a library from a resolved path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Self::open_from(path, path)
    }

    /// Open the file at `loaded_from` on behalf of the resolved `path`
    pub fn open_from(path: impl AsRef<Path>, loaded_from: impl AsRef<Path>) -> Result<Self> {
        let (path, loaded_from) = (path.as_ref(), loaded_from.as_ref());

        // Loading runs the library's initializers; the caller chose this file
        // through the context's probing rules.
        let library =
            unsafe { Library::new(loaded_from).map_err(|e| LoaderError::load_failed(path, e.to_string()))? };

        let info = discover(&library, path)?;

        match &info {
            Some(info) => log::info!(
                "Loaded module '{}' v{} with {} exports from {}",
                info.name,
                info.version,
                info.exports.len(),
                path.display()
            ),
            None => log::info!("Loaded library {}", path.display()),
        }

        Ok(Self {
            library,
            path: path.to_path_buf(),
            loaded_from: loaded_from.to_path_buf(),
            info,
        })
    }

    /// Get the library path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File the OS loader opened
    pub fn loaded_from(&self) -> &Path {
        &self.loaded_from
    }

    /// Discovery info, when the library is a module
    pub fn info(&self) -> Option<&ModuleInfo> {
        self.info.as_ref()
    }

    /// Names exported for discovery
    pub fn exports(&self) -> &[String] {
        self.info.as_ref().map(|i| i.exports.as_slice()).unwrap_or(&[])
    }

    /// Whether the library exports `symbol`
    pub fn has_symbol(&self, symbol: &str) -> bool {
        let mut name = symbol.as_bytes().to_vec();
        name.push(0);
        unsafe { self.library.get::<*const ()>(&name).is_ok() }
    }

    /// Get a symbol from the library
    ///
    /// # Safety
    /// The caller must ensure the symbol type matches the actual definition.
    pub unsafe fn get<T>(&self, symbol: &[u8]) -> Result<Symbol<'_, T>> {
        self.library.get(symbol).map_err(|_| {
            let name = String::from_utf8_lossy(symbol.strip_suffix(&[0u8]).unwrap_or(symbol)).into_owned();
            LoaderError::symbol_not_found(self.path.display().to_string(), name)
        })
    }
}

impl std::fmt::Debug for ModuleLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleLibrary")
            .field("path", &self.path)
            .field("loaded_from", &self.loaded_from)
            .field("info", &self.info)
            .finish()
    }
}

impl Drop for ModuleLibrary {
    fn drop(&mut self) {
        log::debug!("Unloading library {}", self.path.display());
    }
}

fn discover(library: &Library, path: &Path) -> Result<Option<ModuleInfo>> {
    let get_info: Symbol<GetModuleInfoFn> = match unsafe { library.get(MODULE_INFO_SYMBOL) } {
        Ok(symbol) => symbol,
        Err(_) => return Ok(None),
    };

    let info_ptr = unsafe { get_info() };
    if info_ptr.is_null() {
        return Ok(None);
    }
    let ffi_info = unsafe { *info_ptr };

    if ffi_info.api_version != VOID_MODULE_API_VERSION {
        return Err(LoaderError::VersionMismatch {
            module_version: ffi_info.api_version,
            expected_version: VOID_MODULE_API_VERSION,
        });
    }

    let name = c_string(ffi_info.name).unwrap_or_else(|| {
        path.file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("unknown")
            .to_string()
    });
    let version = c_string(ffi_info.version).unwrap_or_else(|| "0.0.0".to_string());

    let mut exports = Vec::new();
    if ffi_info.export_count > 0 {
        let get_export: Symbol<GetModuleExportFn> = unsafe {
            library.get(MODULE_EXPORT_SYMBOL).map_err(|_| {
                LoaderError::symbol_not_found(path.display().to_string(), "void_module_export")
            })?
        };
        for i in 0..ffi_info.export_count {
            if let Some(export) = c_string(unsafe { get_export(i) }) {
                exports.push(export);
            }
        }
    }

    Ok(Some(ModuleInfo {
        name,
        version,
        api_version: ffi_info.api_version,
        exports,
    }))
}

fn c_string(ptr: *const std::ffi::c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    Some(unsafe { CStr::from_ptr(ptr) }.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let err = ModuleLibrary::open(dir.path().join("absent.so")).unwrap_err();
        assert!(matches!(err, LoaderError::LoadFailed { .. }));
    }

    #[test]
    fn test_open_non_library_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Fake.dll");
        std::fs::write(&path, b"not a library").unwrap();
        let err = ModuleLibrary::open(&path).unwrap_err();
        match err {
            LoaderError::LoadFailed { path: failed, .. } => assert_eq!(failed, path),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_c_string() {
        assert_eq!(c_string(std::ptr::null()), None);
        assert_eq!(c_string(c"demo".as_ptr()), Some("demo".to_string()));
    }
}
