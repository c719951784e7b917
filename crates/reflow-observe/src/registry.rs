//! Per-object observer storage and exact-path resolution.
//!
//! The registry holds `(path, handler)` entries in registration order.
//! Handlers are either owned closures or names resolved against the object's
//! handler table at delivery time (late binding: redefining a name between
//! registration and firing takes effect).
//!
//! # Invariants
//!
//! 1. Dispatch order equals registration order.
//! 2. At most one entry per `(path, name)` for named handlers; re-registering
//!    returns the existing id.
//! 3. Closure entries are identified solely by their [`ObserverId`].

use std::rc::Rc;

use ahash::AHashMap;

use crate::value::Value;

/// An observer callback: `(before, after, path)`.
pub type ObserverFn = Rc<dyn Fn(&Value, &Value, &str)>;

/// Identifies one observer registration on one object.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

pub(crate) enum HandlerRef {
    Callable(ObserverFn),
    Named(String),
}

pub(crate) struct ObserverEntry {
    pub path: String,
    pub handler: HandlerRef,
    pub id: ObserverId,
}

#[derive(Default)]
pub(crate) struct ObserverRegistry {
    entries: Vec<ObserverEntry>,
    named: AHashMap<String, ObserverFn>,
    next_id: u64,
}

impl ObserverRegistry {
    fn alloc(&mut self) -> ObserverId {
        self.next_id += 1;
        ObserverId(self.next_id)
    }

    pub fn insert_callable(&mut self, path: String, handler: ObserverFn) -> ObserverId {
        let id = self.alloc();
        self.entries.push(ObserverEntry {
            path,
            handler: HandlerRef::Callable(handler),
            id,
        });
        id
    }

    /// Insert a named entry. Returns `(id, freshly_inserted)`; a duplicate
    /// `(path, name)` pair returns the existing id.
    pub fn insert_named(&mut self, path: String, name: String) -> (ObserverId, bool) {
        let existing = self.entries.iter().find(|entry| {
            entry.path == path
                && matches!(&entry.handler, HandlerRef::Named(n) if *n == name)
        });
        if let Some(entry) = existing {
            return (entry.id, false);
        }
        let id = self.alloc();
        self.entries.push(ObserverEntry {
            path,
            handler: HandlerRef::Named(name),
            id,
        });
        (id, true)
    }

    pub fn remove(&mut self, path: &str, id: ObserverId) -> bool {
        let before = self.entries.len();
        self.entries
            .retain(|entry| !(entry.id == id && entry.path == path));
        self.entries.len() < before
    }

    /// Remove every entry, or every entry for one exact path.
    pub fn remove_all(&mut self, path: Option<&str>) {
        match path {
            Some(p) => self.entries.retain(|entry| entry.path != p),
            None => self.entries.clear(),
        }
    }

    pub fn define(&mut self, name: String, handler: ObserverFn) {
        self.named.insert(name, handler);
    }

    pub fn undefine(&mut self, name: &str) -> bool {
        self.named.remove(name).is_some()
    }

    /// Snapshot of the handlers for an exact path, in registration order.
    /// Named handlers are resolved now; names with no current definition are
    /// skipped.
    pub fn matching(&self, path: &str) -> Vec<ObserverFn> {
        self.entries
            .iter()
            .filter(|entry| entry.path == path)
            .filter_map(|entry| match &entry.handler {
                HandlerRef::Callable(f) => Some(Rc::clone(f)),
                HandlerRef::Named(name) => self.named.get(name).cloned(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
