//! Shared/private symbol policy

use std::collections::BTreeSet;

/// Decides which names are looked up in the host before probing privately
///
/// `private` always wins: a name marked private never resolves through the
/// host, even when it is also marked shared or `prefer_shared` is set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SymbolPolicy {
    shared: BTreeSet<String>,
    private: BTreeSet<String>,
    prefer_shared: bool,
}

impl SymbolPolicy {
    /// Policy that resolves everything privately
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every name through the host first unless marked private
    pub fn set_prefer_shared(&mut self, prefer_shared: bool) {
        self.prefer_shared = prefer_shared;
    }

    /// Mark a name as shared with the host
    pub fn mark_shared(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.private.contains(&name) {
            log::warn!("'{}' is marked both shared and private; private takes precedence", name);
        }
        self.shared.insert(name);
    }

    /// Mark a name as private to the module
    pub fn mark_private(&mut self, name: impl Into<String>) {
        let name = name.into();
        if self.shared.contains(&name) {
            log::warn!("'{}' is marked both shared and private; private takes precedence", name);
        }
        self.private.insert(name);
    }

    /// Whether resolution of `name` should consult the host first
    pub fn should_try_host(&self, name: &str) -> bool {
        (self.prefer_shared || self.shared.contains(name)) && !self.private.contains(name)
    }

    pub fn prefer_shared(&self) -> bool {
        self.prefer_shared
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared.contains(name) && !self.private.contains(name)
    }

    pub fn is_private(&self, name: &str) -> bool {
        self.private.contains(name)
    }

    /// Names marked shared, in sorted order
    pub fn shared_names(&self) -> impl Iterator<Item = &str> {
        self.shared.iter().map(String::as_str)
    }

    /// Names marked private, in sorted order
    pub fn private_names(&self) -> impl Iterator<Item = &str> {
        self.private.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_private_by_default() {
        let policy = SymbolPolicy::new();
        assert!(!policy.should_try_host("Contracts"));
    }

    #[test]
    fn test_shared_names_use_host() {
        let mut policy = SymbolPolicy::new();
        policy.mark_shared("Contracts");
        assert!(policy.should_try_host("Contracts"));
        assert!(!policy.should_try_host("Mylib"));
    }

    #[test]
    fn test_private_overrides_prefer_shared() {
        let mut policy = SymbolPolicy::new();
        policy.set_prefer_shared(true);
        policy.mark_private("Mylib");
        assert!(policy.should_try_host("Anything"));
        assert!(!policy.should_try_host("Mylib"));
    }

    #[test]
    fn test_private_wins_over_shared() {
        let mut policy = SymbolPolicy::new();
        policy.mark_shared("Mylib");
        policy.mark_private("Mylib");
        assert!(!policy.should_try_host("Mylib"));
        assert!(!policy.is_shared("Mylib"));
        assert!(policy.is_private("Mylib"));
    }
}
