//! Unload and reclamation of load contexts
//!
//! Unloading is cooperative. [`LoadContext::unload`] drops the context's own
//! reference to its [`ModuleScope`]; the libraries close once every
//! [`ModuleHandle`](crate::context::ModuleHandle) given out has been dropped
//! as well. A [`WeakTrackingHandle`] observes that moment without keeping
//! anything alive.

use crate::context::{LoadContext, ModuleScope};
use crate::error::{LoaderError, Result};
use std::sync::atomic::Ordering;
use std::sync::Weak;
use std::thread;
use std::time::Duration;

/// Attempts [`WeakTrackingHandle::verify_reclaimed`] makes by default
pub const DEFAULT_RECLAIM_ATTEMPTS: u32 = 10;

/// Pause between attempts; lets background threads drop their clones
const RECLAIM_BACKOFF: Duration = Duration::from_millis(20);

/// Weak observation of a context's loaded code
#[derive(Debug, Clone)]
pub struct WeakTrackingHandle {
    context: String,
    scope: Weak<ModuleScope>,
}

impl WeakTrackingHandle {
    /// Name of the observed context
    pub fn context(&self) -> &str {
        &self.context
    }

    /// Whether the context's code is still reachable
    pub fn is_alive(&self) -> bool {
        self.scope.strong_count() > 0
    }

    /// Wait until the observed scope has been reclaimed
    ///
    /// Fails with [`LoaderError::ReclaimNotVerified`] when something still
    /// holds the scope after `attempts` checks.
    pub fn verify_reclaimed(&self, attempts: u32) -> Result<()> {
        let attempts = attempts.max(1);
        for attempt in 1..=attempts {
            if !self.is_alive() {
                log::debug!("Load context '{}' reclaimed after {} attempt(s)", self.context, attempt);
                return Ok(());
            }
            if attempt < attempts {
                thread::sleep(RECLAIM_BACKOFF);
            }
        }

        log::warn!(
            "Load context '{}' still reachable ({} strong references) after {} attempts",
            self.context,
            self.scope.strong_count(),
            attempts
        );
        Err(LoaderError::ReclaimNotVerified {
            context: self.context.clone(),
            attempts,
        })
    }
}

impl LoadContext {
    /// Create a weak observation of this context's loaded code
    ///
    /// The handle observes the scope created with the context, so it stays
    /// alive after unload for as long as any [`ModuleHandle`] is held.
    ///
    /// [`ModuleHandle`]: crate::context::ModuleHandle
    pub fn track(&self) -> WeakTrackingHandle {
        WeakTrackingHandle {
            context: self.name().to_string(),
            scope: self.tracker.clone(),
        }
    }

    /// Release this context's reference to its loaded code
    ///
    /// Further resolution fails with [`LoaderError::UseAfterUnload`]. A
    /// context built without unload support keeps its libraries open; the
    /// call still marks it unloaded. Calling twice is a no-op.
    pub fn unload(&self) {
        if self.unloaded.swap(true, Ordering::AcqRel) {
            return;
        }

        if self.is_unloadable {
            let scope = self.scope.write().take();
            log::info!(
                "Unloaded load context '{}' ({} libraries)",
                self.name(),
                scope.as_ref().map(|s| s.len()).unwrap_or(0)
            );
        } else {
            log::warn!("Load context '{}' is not unloadable; its libraries stay open", self.name());
        }
    }
}
