//! Hot-reload session: watcher, debounce, rebuild and swap

use super::{Debouncer, HotReloadConfig, ReloadEvent, ReloadTrigger, SessionState};
use crate::builder::LoadContextBuilder;
use crate::context::LoadContext;
use crate::error::Result;
#[cfg(feature = "hot-reload")]
use crate::error::LoaderError;
use arc_swap::ArcSwap;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

#[cfg(feature = "hot-reload")]
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

type ReloadListener = Arc<dyn Fn(&ReloadEvent) + Send + Sync>;

/// Owns the active context of a module and replaces it when files change
///
/// The session is an explicit object owned by the host: nothing is watched
/// until [`start`](HotReloadSession::start), and [`stop`](HotReloadSession::stop)
/// (or drop) releases the watcher and any pending reload.
pub struct HotReloadSession {
    inner: Arc<SessionInner>,
    #[cfg(feature = "hot-reload")]
    watcher: Mutex<Option<RecommendedWatcher>>,
}

struct SessionInner {
    recipe: LoadContextBuilder,
    config: HotReloadConfig,
    current: ArcSwap<LoadContext>,
    generation: AtomicU64,
    state: Mutex<SessionState>,
    /// Serializes rebuilds; a manual reload and a debounced one never overlap
    rebuild: Mutex<()>,
    debouncer: Debouncer,
    listeners: RwLock<Vec<ReloadListener>>,
    subscribers: Mutex<Vec<Sender<ReloadEvent>>>,
}

impl HotReloadSession {
    /// Build the first context from `recipe`, debouncing with its interval
    pub fn new(recipe: LoadContextBuilder) -> Result<Self> {
        let config = HotReloadConfig {
            debounce_duration: recipe.debounce(),
            tables: recipe.tables().clone(),
            ..Default::default()
        };
        Self::with_config(recipe, config)
    }

    pub fn with_config(recipe: LoadContextBuilder, config: HotReloadConfig) -> Result<Self> {
        if !recipe.is_unloadable() {
            log::warn!("Hot-reload session over a context without unload support; old code stays loaded");
        }

        let initial = Arc::new(recipe.build()?);
        log::info!(
            "Hot-reload session for '{}' (debounce {:?})",
            initial.name(),
            config.debounce_duration
        );

        Ok(Self {
            inner: Arc::new(SessionInner {
                debouncer: Debouncer::new(config.debounce_duration),
                recipe,
                config,
                current: ArcSwap::new(initial),
                generation: AtomicU64::new(0),
                state: Mutex::new(SessionState::Idle),
                rebuild: Mutex::new(()),
                listeners: RwLock::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
            }),
            #[cfg(feature = "hot-reload")]
            watcher: Mutex::new(None),
        })
    }

    /// The active context
    pub fn current(&self) -> Arc<LoadContext> {
        self.inner.current.load_full()
    }

    /// Completed reloads so far
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> SessionState {
        *self.inner.state.lock()
    }

    pub fn config(&self) -> &HotReloadConfig {
        &self.inner.config
    }

    pub fn recipe(&self) -> &LoadContextBuilder {
        &self.inner.recipe
    }

    /// Call `listener` after every reload, on the thread that performed it
    pub fn on_reload<F>(&self, listener: F)
    where
        F: Fn(&ReloadEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.write().push(Arc::new(listener));
    }

    /// Receive reload events on a channel
    pub fn subscribe(&self) -> Receiver<ReloadEvent> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.inner.subscribers.lock().push(tx);
        rx
    }

    /// Start watching for changes
    pub fn start(&self) -> Result<()> {
        {
            let mut state = self.inner.state.lock();
            if *state != SessionState::Idle {
                return Ok(());
            }
            *state = SessionState::Watching;
        }

        if let Err(e) = self.start_watcher() {
            *self.inner.state.lock() = SessionState::Idle;
            return Err(e);
        }
        Ok(())
    }

    #[cfg(feature = "hot-reload")]
    fn start_watcher(&self) -> Result<()> {
        let weak = Arc::downgrade(&self.inner);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => handle_event(&weak, event),
            Err(e) => log::warn!("File watch error: {}", e),
        })
        .map_err(|e| LoaderError::HotReloadFailed(e.to_string()))?;

        for dir in self.watch_directories() {
            watcher
                .watch(&dir, RecursiveMode::Recursive)
                .map_err(|e| LoaderError::HotReloadFailed(format!("Failed to watch {}: {}", dir.display(), e)))?;
            log::info!("Watching directory: {}", dir.display());
        }

        *self.watcher.lock() = Some(watcher);
        Ok(())
    }

    #[cfg(not(feature = "hot-reload"))]
    fn start_watcher(&self) -> Result<()> {
        log::warn!("Built without the hot-reload feature; only notify_change triggers reloads");
        Ok(())
    }

    fn watch_directories(&self) -> Vec<PathBuf> {
        if self.inner.config.watch_directories.is_empty() {
            vec![self.current().base_directory().to_path_buf()]
        } else {
            self.inner.config.watch_directories.clone()
        }
    }

    /// Stop watching and drop any pending reload
    pub fn stop(&self) {
        #[cfg(feature = "hot-reload")]
        self.watcher.lock().take();

        self.inner.debouncer.cancel();
        let mut state = self.inner.state.lock();
        if *state != SessionState::Idle {
            log::info!("Stopped hot-reload session for '{}'", self.inner.recipe_name());
        }
        *state = SessionState::Idle;
    }

    /// Report a change to `path`; a burst of reports yields one reload
    ///
    /// Ignored while the session is idle. Returns whether a reload was
    /// scheduled.
    pub fn notify_change(&self, path: impl Into<PathBuf>) -> bool {
        SessionInner::schedule(&self.inner, path.into())
    }

    /// Rebuild now, bypassing the debounce timer
    pub fn reload(&self) -> Result<Arc<LoadContext>> {
        self.inner.reload(ReloadTrigger::Manual)
    }
}

impl Drop for HotReloadSession {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for HotReloadSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HotReloadSession")
            .field("current", &self.current())
            .field("generation", &self.generation())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(feature = "hot-reload")]
fn handle_event(weak: &Weak<SessionInner>, event: Event) {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
        return;
    }
    let Some(inner) = weak.upgrade() else {
        return;
    };
    for path in event.paths {
        if inner.config.is_relevant(&path) {
            log::debug!("Detected change in {}", path.display());
            SessionInner::schedule(&inner, path);
        }
    }
}

impl SessionInner {
    fn recipe_name(&self) -> String {
        self.current.load().name().to_string()
    }

    fn schedule(inner: &Arc<SessionInner>, path: PathBuf) -> bool {
        {
            let mut state = inner.state.lock();
            match *state {
                SessionState::Idle => {
                    log::debug!("Ignoring change to {} while idle", path.display());
                    return false;
                }
                SessionState::Watching => *state = SessionState::PendingReload,
                SessionState::PendingReload | SessionState::Rebuilding => {}
            }
        }

        let weak: Weak<SessionInner> = Arc::downgrade(inner);
        inner.debouncer.execute(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.reload(ReloadTrigger::FileChanged(path)) {
                    log::error!("Hot-reload failed: {}", e);
                }
            }
        });
        true
    }

    fn reload(&self, trigger: ReloadTrigger) -> Result<Arc<LoadContext>> {
        let rebuild = self.rebuild.lock();
        let resume = {
            let mut state = self.state.lock();
            let resume = if *state == SessionState::Idle {
                SessionState::Idle
            } else {
                SessionState::Watching
            };
            *state = SessionState::Rebuilding;
            resume
        };

        let built = self.recipe.build();
        *self.state.lock() = resume;
        let fresh = Arc::new(built.inspect_err(|e| {
            log::error!("Failed to rebuild '{}'; keeping the current context: {}", self.recipe_name(), e);
        })?);

        let previous = self.current.swap(fresh.clone());
        previous.unload();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        log::info!(
            "Reloaded '{}' (generation {}, trigger {:?})",
            fresh.name(),
            generation,
            trigger
        );

        // Listeners may reload again from the callback
        drop(rebuild);

        let event = ReloadEvent {
            context: fresh.clone(),
            generation,
            trigger,
        };
        self.publish(&event);
        Ok(fresh)
    }

    fn publish(&self, event: &ReloadEvent) {
        let listeners: Vec<ReloadListener> = self.listeners.read().clone();
        for listener in listeners {
            listener(event);
        }
        self.subscribers.lock().retain(|tx| tx.send(event.clone()).is_ok());
    }
}
