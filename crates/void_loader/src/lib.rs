//! # void_loader - Isolated Module Loading
//!
//! Loads engine modules (dynamic libraries) together with their own private
//! dependencies, so two modules can ship different versions of the same
//! library side by side, while names the host chooses to share resolve to a
//! single host-owned copy.
//!
//! ## Overview
//!
//! Every module gets a [`LoadContext`]: a private name → file table built from
//! the module's dependency manifest and a set of probing roots. Requests are
//! resolved lazily. Contexts can be unloaded, and a [`HotReloadSession`]
//! rebuilds a module's context when its files change on disk. A
//! [`ModuleManager`] runs a whole plugin directory, one loader per module.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐
//! │{main}.deps.json │────▶│ DependencyGraph │──── RID fallback selection
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │  ProbingConfig  │────▶│ Builder (recipe)│◀─── SymbolPolicy / HostResolver
//! └─────────────────┘     └────────┬────────┘
//!                                  │ build()
//!                                  ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │HotReloadSession │────▶│   LoadContext   │──── resolve / load / unload
//! │ (watch, swap)   │     │ (private table) │
//! └─────────────────┘     └────────┬────────┘
//!                                  │
//!                                  ▼
//!                         ┌─────────────────┐
//!                         │  ModuleLibrary  │◀─── libloading
//!                         └─────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use void_loader::prelude::*;
//!
//! let host = Arc::new(HostLibraries::new());
//! host.register("Contracts", contracts.clone());
//!
//! let mut builder = LoadContextBuilder::new();
//! builder
//!     .set_base_directory("/game/plugins/banana")?
//!     .add_dependency_graph(&DependencyGraph::from_file("/game/plugins/banana/Banana.deps.json")?)?
//!     .mark_shared("Contracts")
//!     .set_host_resolver(host)
//!     .enable_unload(true);
//!
//! let context = builder.build()?;
//! let module = context.load_main_module()?;
//!
//! // later
//! let tracker = context.track();
//! drop(module);
//! context.unload();
//! tracker.verify_reclaimed(DEFAULT_RECLAIM_ATTEMPTS)?;
//! ```
//!
//! ## Module Side
//!
//! A module may export a discovery entry point (see [`ffi`]):
//!
//! ```c
//! static const VoidModuleInfo INFO = { 1, "Banana", "1.0.0", 1 };
//! const VoidModuleInfo* void_module_info(void) { return &INFO; }
//! const char* void_module_export(uint32_t i) { return i == 0 ? "banana_create" : 0; }
//! ```

mod builder;
mod config;
mod context;
mod error;
mod host;
mod library;
mod lifecycle;
mod loader;
mod manager;
mod manifest;
mod module;
mod probing;
mod symbols;

pub mod ffi;
pub mod hot_reload;
pub mod platform;
pub mod rid;
pub mod runtime_config;

pub use builder::LoadContextBuilder;
pub use config::LoaderConfig;
pub use context::{LibraryName, LoadContext, Loaded, ModuleHandle, ModuleScope, Resolution, NEUTRAL_LOCALE};
pub use error::{LoaderError, ManifestError, Result};
pub use host::{HostError, HostLibraries, HostResolver, SharedArtifact};
pub use hot_reload::{Debouncer, HotReloadConfig, HotReloadSession, ReloadEvent, ReloadTrigger, SessionState};
pub use library::{ManagedLibrary, NativeLibrary};
pub use lifecycle::{WeakTrackingHandle, DEFAULT_RECLAIM_ATTEMPTS};
pub use loader::{ModuleLoader, MANIFEST_SUFFIX};
pub use manager::{module_files, ModuleEvent, ModuleManager, ModuleManagerBuilder, ModuleManagerConfig};
pub use manifest::{AssetGroup, DependencyGraph, ManifestEntry, ResourceAsset, RuntimeFallbacks};
pub use module::{ModuleInfo, ModuleLibrary};
pub use platform::PlatformTables;
pub use probing::ProbingConfig;
pub use symbols::SymbolPolicy;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::builder::LoadContextBuilder;
    pub use crate::config::LoaderConfig;
    pub use crate::context::{LibraryName, LoadContext, Loaded, ModuleHandle, Resolution};
    pub use crate::error::{LoaderError, Result};
    pub use crate::host::{HostLibraries, HostResolver};
    pub use crate::hot_reload::{HotReloadSession, ReloadEvent};
    pub use crate::lifecycle::{WeakTrackingHandle, DEFAULT_RECLAIM_ATTEMPTS};
    pub use crate::loader::ModuleLoader;
    pub use crate::manager::{ModuleEvent, ModuleManager, ModuleManagerBuilder};
    pub use crate::manifest::DependencyGraph;
    pub use std::sync::Arc;
}
