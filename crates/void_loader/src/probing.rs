//! Probing configuration: the ordered set of roots a load context searches

use crate::error::{LoaderError, Result};
use crate::platform::PlatformTables;
use std::path::{Path, PathBuf};

/// Search roots for a load context
///
/// Order matters everywhere: roots are tried in insertion order and the first
/// existing file wins.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbingConfig {
    base_directory: PathBuf,
    additional_probing_paths: Vec<PathBuf>,
    resource_probing_paths: Vec<PathBuf>,
    tables: PlatformTables,
}

impl ProbingConfig {
    /// Create a configuration rooted at an absolute base directory
    pub fn new(base_directory: impl Into<PathBuf>) -> Result<Self> {
        let base_directory = base_directory.into();
        require_absolute("base_directory", &base_directory)?;
        Ok(Self {
            base_directory,
            additional_probing_paths: Vec::new(),
            resource_probing_paths: Vec::new(),
            tables: PlatformTables::current(),
        })
    }

    /// Append an additional probing root
    pub fn add_probing_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        require_absolute("probing_path", &path)?;
        push_unique(&mut self.additional_probing_paths, path);
        Ok(())
    }

    /// Append a resource probing root
    pub fn add_resource_probing_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        let path = path.into();
        require_absolute("resource_probing_path", &path)?;
        push_unique(&mut self.resource_probing_paths, path);
        Ok(())
    }

    /// Replace the naming tables
    pub fn set_tables(&mut self, tables: PlatformTables) {
        self.tables = tables;
    }

    pub fn base_directory(&self) -> &Path {
        &self.base_directory
    }

    pub fn additional_probing_paths(&self) -> &[PathBuf] {
        &self.additional_probing_paths
    }

    pub fn resource_probing_paths(&self) -> &[PathBuf] {
        &self.resource_probing_paths
    }

    pub fn tables(&self) -> &PlatformTables {
        &self.tables
    }

    /// Roots searched for localized resources: the base directory first
    pub fn resource_roots(&self) -> impl Iterator<Item = &Path> {
        std::iter::once(self.base_directory.as_path()).chain(self.resource_probing_paths.iter().map(PathBuf::as_path))
    }
}

/// Fail with `InvalidArgument` unless `path` is absolute
pub(crate) fn require_absolute(argument: &'static str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(LoaderError::invalid_argument(argument, "value must not be empty"));
    }
    if !path.is_absolute() {
        return Err(LoaderError::invalid_argument(
            argument,
            format!("'{}' must be an absolute path", path.display()),
        ));
    }
    Ok(())
}

/// Fail with `InvalidArgument` unless `path` is relative
pub(crate) fn require_relative(argument: &'static str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        return Err(LoaderError::invalid_argument(argument, "value must not be empty"));
    }
    if path.has_root() || path.is_absolute() {
        return Err(LoaderError::invalid_argument(
            argument,
            format!("'{}' must be a relative path", path.display()),
        ));
    }
    Ok(())
}

fn push_unique(paths: &mut Vec<PathBuf>, path: PathBuf) {
    if !paths.contains(&path) {
        paths.push(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> PathBuf {
        std::env::temp_dir()
    }

    #[test]
    fn test_relative_base_is_rejected() {
        let err = ProbingConfig::new("plugins/banana").unwrap_err();
        assert!(matches!(err, LoaderError::InvalidArgument { argument: "base_directory", .. }));
    }

    #[test]
    fn test_relative_probing_path_is_rejected() {
        let mut config = ProbingConfig::new(root()).unwrap();
        assert!(matches!(
            config.add_probing_path("packages"),
            Err(LoaderError::InvalidArgument { argument: "probing_path", .. })
        ));
        assert!(config.additional_probing_paths().is_empty());
    }

    #[test]
    fn test_insertion_order_is_kept() {
        let mut config = ProbingConfig::new(root()).unwrap();
        config.add_probing_path(root().join("b")).unwrap();
        config.add_probing_path(root().join("a")).unwrap();
        config.add_probing_path(root().join("b")).unwrap();
        assert_eq!(config.additional_probing_paths(), &[root().join("b"), root().join("a")]);
    }

    #[test]
    fn test_resource_roots_start_at_base() {
        let mut config = ProbingConfig::new(root()).unwrap();
        config.add_resource_probing_path(root().join("res")).unwrap();
        let roots: Vec<_> = config.resource_roots().collect();
        assert_eq!(roots, vec![root().as_path(), root().join("res").as_path()]);
    }

    #[test]
    fn test_require_relative() {
        assert!(require_relative("asset", Path::new("lib/a.dll")).is_ok());
        assert!(require_relative("asset", &root().join("a.dll")).is_err());
        assert!(require_relative("asset", Path::new("")).is_err());
    }
}
