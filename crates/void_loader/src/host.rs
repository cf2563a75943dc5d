//! Host-side resolution used for shared names

use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error;

/// An artifact owned by the host and handed out by identity
pub type SharedArtifact = Arc<dyn Any + Send + Sync>;

/// Failure reported by a host resolver
#[derive(Debug, Clone, Error)]
#[error("host resolution failed: {0}")]
pub struct HostError(pub String);

/// Callback a load context consults before probing a shared name privately
///
/// `Ok(None)` and `Err(_)` are both treated as "not provided by the host"; the
/// context keeps probing locally.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, name: &str) -> Result<Option<SharedArtifact>, HostError>;
}

impl<F> HostResolver for F
where
    F: Fn(&str) -> Result<Option<SharedArtifact>, HostError> + Send + Sync,
{
    fn resolve(&self, name: &str) -> Result<Option<SharedArtifact>, HostError> {
        self(name)
    }
}

/// Table of artifacts the host shares with its modules
#[derive(Default)]
pub struct HostLibraries {
    artifacts: RwLock<HashMap<String, SharedArtifact>>,
}

impl HostLibraries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share `artifact` under `name`, replacing any previous entry
    pub fn register<T: Any + Send + Sync>(&self, name: impl Into<String>, artifact: Arc<T>) {
        self.register_artifact(name, artifact);
    }

    /// Share an already type-erased artifact
    pub fn register_artifact(&self, name: impl Into<String>, artifact: SharedArtifact) {
        let name = name.into();
        log::debug!("Host shares '{}'", name);
        self.artifacts.write().insert(name, artifact);
    }

    /// Stop sharing `name`
    pub fn unregister(&self, name: &str) -> Option<SharedArtifact> {
        self.artifacts.write().remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.artifacts.read().contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.artifacts.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.read().is_empty()
    }
}

impl HostResolver for HostLibraries {
    fn resolve(&self, name: &str) -> Result<Option<SharedArtifact>, HostError> {
        Ok(self.artifacts.read().get(name).cloned())
    }
}

/// Ask the host for `name`, swallowing errors and panics
pub(crate) fn try_host(resolver: &dyn HostResolver, name: &str) -> Option<SharedArtifact> {
    match panic::catch_unwind(AssertUnwindSafe(|| resolver.resolve(name))) {
        Ok(Ok(found)) => found,
        Ok(Err(e)) => {
            log::debug!("Host could not provide '{}', probing privately: {}", name, e);
            None
        }
        Err(_) => {
            log::debug!("Host resolver panicked for '{}', probing privately", name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_libraries_share_identity() {
        let host = HostLibraries::new();
        let contract = Arc::new(String::from("IFruit"));
        host.register("Contracts", contract.clone());

        let a = try_host(&host, "Contracts").unwrap();
        let b = try_host(&host, "Contracts").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.downcast_ref::<String>().unwrap(), "IFruit");
        assert!(try_host(&host, "Missing").is_none());
    }

    #[test]
    fn test_failures_are_swallowed() {
        let failing = |_: &str| -> Result<Option<SharedArtifact>, HostError> { Err(HostError("offline".into())) };
        assert!(try_host(&failing, "Contracts").is_none());

        let panicking = |_: &str| -> Result<Option<SharedArtifact>, HostError> { panic!("resolver bug") };
        assert!(try_host(&panicking, "Contracts").is_none());
    }

    #[test]
    fn test_unregister() {
        let host = HostLibraries::new();
        host.register("A", Arc::new(1u32));
        assert_eq!(host.len(), 1);
        assert!(host.unregister("A").is_some());
        assert!(host.is_empty());
    }
}
