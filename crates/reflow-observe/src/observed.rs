//! The observable property bag.
//!
//! [`Observed`] is a cheaply cloneable handle to a shared, single-threaded
//! property map. Mutations through [`set`](Observed::set) notify observers
//! registered with [`observe`](Observed::observe); dotted paths additionally
//! install an observer chain so intermediate-object replacement is tracked.
//!
//! # Invariants
//!
//! 1. `set` with a value equal to the current one is a no-op: no version of
//!    the property changes and no notification fires.
//! 2. Observers for a path fire synchronously, in registration order, with
//!    `(before, after, path)`.
//! 3. Delivery respects the object's [`NotificationGate`]: while suspended,
//!    notifications coalesce per path instead of firing.
//! 4. Dropping the last handle tears down every chain the object owns,
//!    removing their links from the objects they were installed on.
//!
//! # Failure Modes
//!
//! - `notify` on an unobserved path: silent no-op.
//! - `unobserve` with a stale id: returns `false`, nothing changes.
//! - A named observer whose name is currently undefined: skipped.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use tracing::trace;

use crate::chain::ObserverChain;
use crate::notify::NotificationGate;
use crate::registry::{ObserverFn, ObserverId, ObserverRegistry};
use crate::value::Value;

/// Options for [`Observed::observe`].
#[derive(Clone, Copy, Debug, Default)]
pub struct ObserveOptions {
    /// Suppress chain materialization for multi-segment paths. The entry is
    /// still registered and fires on exact-path `notify` calls.
    pub no_chain: bool,
}

struct ObservedInner {
    props: RefCell<AHashMap<String, Value>>,
    registry: RefCell<ObserverRegistry>,
    chains: RefCell<Vec<ObserverChain>>,
    gate: NotificationGate,
}

/// Shared handle to an observable property bag.
#[derive(Clone)]
pub struct Observed {
    inner: Rc<ObservedInner>,
}

/// Non-owning handle used by chain links to reach their targets without
/// keeping them alive.
pub(crate) struct WeakObserved {
    inner: Weak<ObservedInner>,
}

impl WeakObserved {
    pub fn upgrade(&self) -> Option<Observed> {
        self.inner.upgrade().map(|inner| Observed { inner })
    }
}

impl Default for Observed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Observed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observed")
            .field("properties", &self.inner.props.borrow().len())
            .field("observers", &self.inner.registry.borrow().len())
            .finish()
    }
}

impl Observed {
    /// Create an empty observable object.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Rc::new(ObservedInner {
                props: RefCell::new(AHashMap::new()),
                registry: RefCell::new(ObserverRegistry::default()),
                chains: RefCell::new(Vec::new()),
                gate: NotificationGate::new(),
            }),
        }
    }

    /// Whether two handles refer to the same object.
    #[must_use]
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn downgrade(&self) -> WeakObserved {
        WeakObserved {
            inner: Rc::downgrade(&self.inner),
        }
    }

    // ------------------------------------------------------------------
    // Properties
    // ------------------------------------------------------------------

    /// Current value of a single-segment property.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.props.borrow().get(key).cloned()
    }

    /// Resolve a possibly dotted path by traversing nested objects. Returns
    /// `None` when any segment is absent or a non-final segment is not an
    /// object.
    #[must_use]
    pub fn resolve(&self, path: &str) -> Option<Value> {
        let mut current = self.clone();
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let value = current.get(segment)?;
            if segments.peek().is_none() {
                return Some(value);
            }
            match value {
                Value::Object(next) => current = next,
                _ => return None,
            }
        }
        None
    }

    /// Set a single-segment property, notifying its observers. Setting a
    /// value equal to the current one is a no-op.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let after = value.into();
        let before = {
            let mut props = self.inner.props.borrow_mut();
            let before = props.get(&key).cloned().unwrap_or(Value::Null);
            if before == after {
                return;
            }
            props.insert(key.clone(), after.clone());
            before
        };
        self.notify(&key, &before, &after);
    }

    // ------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------

    /// Register an observer for an exact path. Multi-segment paths also
    /// install an observer chain unless `opts.no_chain` is set.
    pub fn observe(
        &self,
        path: &str,
        handler: impl Fn(&Value, &Value, &str) + 'static,
        opts: ObserveOptions,
    ) -> ObserverId {
        let id = self
            .inner
            .registry
            .borrow_mut()
            .insert_callable(path.to_string(), Rc::new(handler));
        self.install_chain_if_needed(path, opts);
        id
    }

    /// Register an observer by handler name. The name is resolved against
    /// this object's handler table at delivery time, so a later
    /// [`define_handler`](Self::define_handler) for the same name takes
    /// effect. Re-registering an existing `(path, name)` pair returns the
    /// existing id without installing a second chain.
    pub fn observe_named(&self, path: &str, name: &str, opts: ObserveOptions) -> ObserverId {
        let (id, fresh) = self
            .inner
            .registry
            .borrow_mut()
            .insert_named(path.to_string(), name.to_string());
        if fresh {
            self.install_chain_if_needed(path, opts);
        }
        id
    }

    /// Define (or redefine) a named handler.
    pub fn define_handler(&self, name: &str, handler: impl Fn(&Value, &Value, &str) + 'static) {
        self.inner
            .registry
            .borrow_mut()
            .define(name.to_string(), Rc::new(handler));
    }

    /// Remove a named handler definition. Entries registered under the name
    /// stay in place and resume firing if the name is defined again.
    pub fn undefine_handler(&self, name: &str) -> bool {
        self.inner.registry.borrow_mut().undefine(name)
    }

    /// Remove one observer entry and destroy every chain registered for this
    /// exact path. Returns whether an entry was removed.
    pub fn unobserve(&self, path: &str, id: ObserverId) -> bool {
        let removed = self.inner.registry.borrow_mut().remove(path, id);
        self.inner
            .chains
            .borrow_mut()
            .retain(|chain| chain.path() != path);
        removed
    }

    /// Remove every observer entry, or every entry for one exact path, along
    /// with the matching chains.
    pub fn remove_observers(&self, path: Option<&str>) {
        self.inner.registry.borrow_mut().remove_all(path);
        let mut chains = self.inner.chains.borrow_mut();
        match path {
            Some(p) => chains.retain(|chain| chain.path() != p),
            None => chains.clear(),
        }
    }

    /// Number of registered observer entries (chain links included).
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.registry.borrow().len()
    }

    fn install_chain_if_needed(&self, path: &str, opts: ObserveOptions) {
        if !opts.no_chain && path.contains('.') {
            let chain = ObserverChain::new(self, path);
            self.inner.chains.borrow_mut().push(chain);
        }
    }

    /// Registry insertion used by chain links: a single-segment entry that
    /// never materializes a chain of its own.
    pub(crate) fn install_link(
        &self,
        segment: &str,
        handler: impl Fn(&Value, &Value) + 'static,
    ) -> ObserverId {
        self.inner.registry.borrow_mut().insert_callable(
            segment.to_string(),
            Rc::new(move |before, after, _path| handler(before, after)),
        )
    }

    /// Entry removal used by chain teardown; never touches chains.
    pub(crate) fn remove_entry(&self, path: &str, id: ObserverId) {
        self.inner.registry.borrow_mut().remove(path, id);
    }

    // ------------------------------------------------------------------
    // Delivery
    // ------------------------------------------------------------------

    /// Notify observers of an exact path. Delivers synchronously while
    /// delivery is active; coalesces into the queue while suspended.
    pub fn notify(&self, path: &str, before: &Value, after: &Value) {
        if self.inner.gate.is_active() {
            self.dispatch(path, before, after);
        } else {
            trace!(path, "notification coalesced while suspended");
            self.inner.gate.coalesce(path, before, after);
        }
    }

    fn dispatch(&self, path: &str, before: &Value, after: &Value) {
        let handlers: Vec<ObserverFn> = self.inner.registry.borrow().matching(path);
        for handler in handlers {
            handler(before, after, path);
        }
    }

    /// Whether notifications are currently delivered rather than queued.
    #[must_use]
    pub fn is_delivering(&self) -> bool {
        self.inner.gate.is_active()
    }

    /// Suspend delivery. Reference-counted; pairs with [`start`](Self::start).
    pub fn stop(&self) {
        self.inner.gate.suspend();
    }

    /// Suspend delivery and discard queued notifications, including any that
    /// arrive while suspended.
    pub fn stop_discarding(&self) {
        self.inner.gate.suspend();
        self.inner.gate.set_queue_enabled(false);
    }

    /// Release one suspension. When the count returns to zero, delivery
    /// resumes and the queue flushes: one notification per queued path, in
    /// first-enqueue order.
    pub fn start(&self) {
        if self.inner.gate.resume() {
            self.flush_notifications();
        }
    }

    /// Re-enable queueing, then release one suspension as [`start`](Self::start).
    pub fn start_queueing(&self) {
        self.inner.gate.set_queue_enabled(true);
        self.start();
    }

    /// Re-enable the coalescing queue.
    pub fn enable_queue(&self) {
        self.inner.gate.set_queue_enabled(true);
    }

    /// Disable the coalescing queue, discarding pending entries.
    pub fn disable_queue(&self) {
        self.inner.gate.set_queue_enabled(false);
    }

    fn flush_notifications(&self) {
        let queued = self.inner.gate.drain();
        if queued.is_empty() {
            return;
        }
        trace!(entries = queued.len(), "flushing coalesced notifications");
        for change in queued {
            self.notify(&change.path, &change.before, &change.after);
        }
    }
}
