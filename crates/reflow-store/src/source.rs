//! External source collaborators.
//!
//! A [`Source`] performs the actual network/persistence work for
//! [`remote`](crate::ChangeStore::remote) calls. Sources are addressed by
//! name through a [`SourceRegistry`] injected into the store; the core
//! assumes no return contract — a source performs its action asynchronously
//! on its own terms. An unresolvable name is silently skipped (traced at
//! debug level).

use std::cell::RefCell;
use std::rc::Rc;

use crate::entity::EntityRef;

/// The action a remote call forwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceAction {
    /// Retrieve the entity's remote state.
    Fetch,
    /// Persist the entity's local state.
    Commit,
    /// Delete the entity remotely.
    Destroy,
}

/// Which source(s) a remote call targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// A single registered source.
    Named(String),
    /// Several registered sources, addressed in order.
    Many(Vec<String>),
    /// Every registered source, in registration order.
    All,
}

impl SourceSpec {
    /// Convenience constructor for a single named source.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }
}

/// Per-call options forwarded to sources.
#[derive(Debug, Clone, Default)]
pub struct RemoteOptions {
    /// Overrides the entity's default source resolution.
    pub source: Option<SourceSpec>,
}

/// A named external collaborator.
pub trait Source {
    /// Perform `action` for `entity`. No return contract is assumed.
    fn perform(&self, action: SourceAction, entity: &EntityRef, opts: &RemoteOptions);
}

/// Name-keyed registry of sources, kept in registration order.
#[derive(Clone, Default)]
pub struct SourceRegistry {
    inner: Rc<RefCell<Vec<(String, Rc<dyn Source>)>>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source under a name, replacing any previous entry for the
    /// same name in place.
    pub fn register(&self, name: impl Into<String>, source: Rc<dyn Source>) {
        let name = name.into();
        let mut sources = self.inner.borrow_mut();
        if let Some(entry) = sources.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = source;
        } else {
            sources.push((name, source));
        }
    }

    /// Resolve a source by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Rc<dyn Source>> {
        self.inner
            .borrow()
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, s)| Rc::clone(s))
    }

    /// Every registered source, in registration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<(String, Rc<dyn Source>)> {
        self.inner.borrow().clone()
    }

    /// Number of registered sources.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    /// Whether no sources are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Counting(Rc<Cell<u32>>);

    impl Source for Counting {
        fn perform(&self, _: SourceAction, _: &EntityRef, _: &RemoteOptions) {
            self.0.set(self.0.get() + 1);
        }
    }

    #[test]
    fn register_replaces_in_place() {
        let registry = SourceRegistry::new();
        let first = Rc::new(Cell::new(0));
        let second = Rc::new(Cell::new(0));
        registry.register("api", Rc::new(Counting(Rc::clone(&first))));
        registry.register("disk", Rc::new(Counting(Rc::new(Cell::new(0)))));
        registry.register("api", Rc::new(Counting(Rc::clone(&second))));

        assert_eq!(registry.len(), 2);
        let names: Vec<_> = registry.snapshot().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, ["api", "disk"], "replacement keeps position");
        assert!(registry.get("api").is_some());
        assert!(registry.get("ghost").is_none());
    }
}
