//! Platform naming conventions for module and native library files

use std::path::Path;

/// Module artifact extensions, platform convention first
#[cfg(target_os = "windows")]
pub const MANAGED_LIBRARY_EXTENSIONS: &[&str] = &[".dll", ".so", ".dylib"];
#[cfg(target_os = "macos")]
pub const MANAGED_LIBRARY_EXTENSIONS: &[&str] = &[".dylib", ".dll", ".so"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const MANAGED_LIBRARY_EXTENSIONS: &[&str] = &[".so", ".dll", ".dylib"];

/// Native library extensions
#[cfg(target_os = "windows")]
pub const NATIVE_LIBRARY_EXTENSIONS: &[&str] = &[".dll"];
#[cfg(target_os = "macos")]
pub const NATIVE_LIBRARY_EXTENSIONS: &[&str] = &[".dylib"];
#[cfg(not(any(target_os = "windows", target_os = "macos")))]
pub const NATIVE_LIBRARY_EXTENSIONS: &[&str] = &[".so"];

/// Native library file name prefixes
#[cfg(target_os = "windows")]
pub const NATIVE_LIBRARY_PREFIXES: &[&str] = &[""];
#[cfg(not(target_os = "windows"))]
pub const NATIVE_LIBRARY_PREFIXES: &[&str] = &["", "lib"];

/// Extension and prefix tables used while probing
///
/// Defaults to the compile target's conventions. Hosts (and tests) can swap in
/// another table to probe a deployment laid out for a different platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformTables {
    /// Extensions tried for module artifacts, in order
    pub managed_extensions: Vec<String>,
    /// Extensions tried for native libraries, in order
    pub native_extensions: Vec<String>,
    /// Prefixes tried for native libraries, in order
    pub native_prefixes: Vec<String>,
}

impl PlatformTables {
    /// Tables for the platform this crate was compiled for
    pub fn current() -> Self {
        Self {
            managed_extensions: to_owned(MANAGED_LIBRARY_EXTENSIONS),
            native_extensions: to_owned(NATIVE_LIBRARY_EXTENSIONS),
            native_prefixes: to_owned(NATIVE_LIBRARY_PREFIXES),
        }
    }

    /// Windows conventions
    pub fn windows() -> Self {
        Self {
            managed_extensions: to_owned(&[".dll", ".so", ".dylib"]),
            native_extensions: to_owned(&[".dll"]),
            native_prefixes: to_owned(&[""]),
        }
    }

    /// Linux conventions
    pub fn linux() -> Self {
        Self {
            managed_extensions: to_owned(&[".so", ".dll", ".dylib"]),
            native_extensions: to_owned(&[".so"]),
            native_prefixes: to_owned(&["", "lib"]),
        }
    }

    /// macOS conventions
    pub fn macos() -> Self {
        Self {
            managed_extensions: to_owned(&[".dylib", ".dll", ".so"]),
            native_extensions: to_owned(&[".dylib"]),
            native_prefixes: to_owned(&["", "lib"]),
        }
    }

    /// Whether `path` carries one of the native extensions
    pub fn is_native_asset(&self, path: &str) -> bool {
        self.native_extension_of(path).is_some()
    }

    /// The native extension `name` ends with, if any
    ///
    /// Versioned shared objects (`libfoo.so.1.2`) report `.so`; the returned
    /// length covers the version suffix too.
    pub fn native_extension_of(&self, name: &str) -> Option<(usize, &str)> {
        let lower = name.to_ascii_lowercase();
        for ext in &self.native_extensions {
            if lower.ends_with(ext.as_str()) {
                return Some((ext.len(), ext.as_str()));
            }

            if ext == ".so" {
                if let Some(pos) = lower.rfind(".so.") {
                    let version = &lower[pos + 4..];
                    if !version.is_empty()
                        && version.split('.').all(|p| !p.is_empty() && p.bytes().all(|b| b.is_ascii_digit()))
                    {
                        return Some((name.len() - pos, ext.as_str()));
                    }
                }
            }
        }
        None
    }

    /// Whether a file looks like something a load context could pick up
    pub fn is_library_file(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let lower = name.to_ascii_lowercase();
        self.managed_extensions.iter().any(|e| lower.ends_with(e.as_str())) || self.is_native_asset(name)
    }
}

impl Default for PlatformTables {
    fn default() -> Self {
        Self::current()
    }
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}
