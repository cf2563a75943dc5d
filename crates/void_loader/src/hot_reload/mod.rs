//! Hot-reload of load contexts
//!
//! A [`HotReloadSession`] owns the builder recipe and the active context.
//! File changes under the watched directories feed a [`Debouncer`]; once a
//! burst of changes settles, exactly one rebuild runs, the new context is
//! swapped in atomically and the old one is unloaded.
//!
//! ```text
//! file events ──▶ notify_change ──▶ Debouncer ──▶ rebuild ──▶ swap ──▶ ReloadEvent
//!                  (PendingReload)    (timer)     (Rebuilding)          (Watching)
//! ```
//!
//! Callers that already hold the previous context keep it until they drop
//! it; only new calls to [`HotReloadSession::current`] see the swap.

mod debounce;
mod session;

pub use debounce::Debouncer;
pub use session::HotReloadSession;

use crate::context::LoadContext;
use crate::platform::PlatformTables;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Debounce interval used when none is configured
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Configuration for a hot-reload session
#[derive(Debug, Clone)]
pub struct HotReloadConfig {
    /// Quiet period after the last change before a reload runs
    pub debounce_duration: Duration,
    /// Directories to watch; empty means the context's base directory
    pub watch_directories: Vec<PathBuf>,
    /// React to library and manifest files only
    pub library_files_only: bool,
    /// Decide what counts as a library file
    pub tables: PlatformTables,
}

impl Default for HotReloadConfig {
    fn default() -> Self {
        Self {
            debounce_duration: DEFAULT_DEBOUNCE,
            watch_directories: Vec::new(),
            library_files_only: true,
            tables: PlatformTables::current(),
        }
    }
}

impl HotReloadConfig {
    /// Whether a change to `path` should trigger a reload
    pub fn is_relevant(&self, path: &Path) -> bool {
        if !self.library_files_only {
            return true;
        }
        let is_manifest = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("json"));
        is_manifest || self.tables.is_library_file(path)
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not watching; changes are ignored
    Idle,
    /// Waiting for changes
    Watching,
    /// A change arrived; the debounce timer is running
    PendingReload,
    /// Building the replacement context
    Rebuilding,
}

/// What caused a reload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReloadTrigger {
    /// [`HotReloadSession::reload`] was called
    Manual,
    /// The last change of a debounced burst
    FileChanged(PathBuf),
}

/// Notification sent after a new context has been installed
#[derive(Debug, Clone)]
pub struct ReloadEvent {
    /// The newly active context
    pub context: Arc<LoadContext>,
    /// Number of reloads so far, starting at 1
    pub generation: u64,
    pub trigger: ReloadTrigger,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = HotReloadConfig::default();
        assert_eq!(config.debounce_duration, Duration::from_millis(200));
        assert!(config.watch_directories.is_empty());
        assert!(config.library_files_only);
    }

    #[test]
    fn test_relevant_files() {
        let config = HotReloadConfig::default();
        assert!(config.is_relevant(Path::new("/plugins/Banana.deps.json")));
        assert!(config.is_relevant(Path::new("/plugins/libbanana.so")));
        assert!(config.is_relevant(Path::new("/plugins/Banana.dll")));
        assert!(!config.is_relevant(Path::new("/plugins/notes.txt")));

        let all = HotReloadConfig {
            library_files_only: false,
            ..Default::default()
        };
        assert!(all.is_relevant(Path::new("/plugins/notes.txt")));
    }

    #[test]
    fn test_relevance_follows_tables() {
        let tables = PlatformTables {
            managed_extensions: vec![".vmod".to_string()],
            native_extensions: vec![".dll".to_string()],
            native_prefixes: vec![String::new()],
        };
        let custom = HotReloadConfig {
            tables,
            ..Default::default()
        };
        assert!(custom.is_relevant(Path::new("/plugins/Banana.vmod")));
        assert!(custom.is_relevant(Path::new("/plugins/sqlite3.dll")));
        assert!(custom.is_relevant(Path::new("/plugins/Banana.deps.json")));
        assert!(!custom.is_relevant(Path::new("/plugins/libsqlite3.so")));

        assert!(!HotReloadConfig::default().is_relevant(Path::new("/plugins/Banana.vmod")));
    }
}
