//! Entities, kinds, and lifecycle events.
//!
//! An [`Entity`] is anything the store can track: it has a unique id, a kind
//! tag, and a [`LifecycleHub`] the store subscribes to for destroy events.
//! [`Record`] is the bundled implementation: a capability object owning an
//! [`Observed`] attribute bag it delegates observation to.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use reflow_observe::{Observed, Value};

use crate::source::SourceSpec;

/// Global counter for unique entity ids.
static ENTITY_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for an entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId(u64);

impl EntityId {
    /// Allocate the next unique id.
    #[must_use]
    pub fn next() -> Self {
        Self(ENTITY_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw id value.
    #[inline]
    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Entity kind tag. Collections, scoped listeners, and lookups are keyed by
/// kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Kind(pub &'static str);

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Lifecycle events an entity emits about itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// The entity is being destroyed.
    Destroy,
    /// An identifying attribute changed.
    Change,
}

#[derive(Default)]
struct HubInner {
    next: u64,
    subs: Vec<(u64, Rc<dyn Fn(Lifecycle)>)>,
}

/// Per-entity lifecycle event stream.
///
/// Subscriptions are RAII guards: dropping a [`LifecycleSubscription`]
/// removes its callback. [`clear`](LifecycleHub::clear) detaches every
/// listener at once, which a self-destructing entity uses instead of waiting
/// for each subscriber to unhook itself.
#[derive(Clone, Default)]
pub struct LifecycleHub {
    inner: Rc<RefCell<HubInner>>,
}

/// RAII guard for one lifecycle subscription.
pub struct LifecycleSubscription {
    hub: Weak<RefCell<HubInner>>,
    id: u64,
}

impl Drop for LifecycleSubscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.borrow_mut().subs.retain(|(id, _)| *id != self.id);
        }
    }
}

impl LifecycleHub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to lifecycle events. The callback fires until the returned
    /// guard is dropped or the hub is cleared.
    pub fn subscribe(&self, handler: impl Fn(Lifecycle) + 'static) -> LifecycleSubscription {
        let mut inner = self.inner.borrow_mut();
        inner.next += 1;
        let id = inner.next;
        inner.subs.push((id, Rc::new(handler)));
        LifecycleSubscription {
            hub: Rc::downgrade(&self.inner),
            id,
        }
    }

    /// Deliver an event to every subscriber, in subscription order.
    pub fn emit(&self, event: Lifecycle) {
        let handlers: Vec<Rc<dyn Fn(Lifecycle)>> = self
            .inner
            .borrow()
            .subs
            .iter()
            .map(|(_, f)| Rc::clone(f))
            .collect();
        for handler in handlers {
            handler(event);
        }
    }

    /// Detach every subscriber at once.
    pub fn clear(&self) {
        self.inner.borrow_mut().subs.clear();
    }

    /// Number of active subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.borrow().subs.len()
    }
}

/// Anything the store can track.
pub trait Entity {
    /// Unique, stable id.
    fn id(&self) -> EntityId;
    /// Kind tag used for collection membership and scoped events.
    fn kind(&self) -> Kind;
    /// Whether the entity has never been persisted.
    fn is_new(&self) -> bool;
    /// A headless entity is excluded from store lifecycle-event subscription.
    fn is_headless(&self) -> bool {
        false
    }
    /// Whether the entity is destroyed (or mid-destruction).
    fn is_destroyed(&self) -> bool;
    /// Default source(s) for [`remote`](crate::ChangeStore::remote) calls.
    fn default_source(&self) -> Option<SourceSpec> {
        None
    }
    /// The entity's lifecycle event stream.
    fn lifecycle(&self) -> &LifecycleHub;
}

/// Shared entity reference as the store holds it.
pub type EntityRef = Rc<dyn Entity>;

/// Bundled entity implementation: an id, a kind, flags, a lifecycle hub, and
/// an [`Observed`] attribute bag observation is delegated to.
pub struct Record {
    id: EntityId,
    kind: Kind,
    attributes: Observed,
    lifecycle: LifecycleHub,
    is_new: Cell<bool>,
    headless: Cell<bool>,
    destroyed: Cell<bool>,
    source: RefCell<Option<SourceSpec>>,
}

impl Record {
    /// Create a fresh (never persisted) record of the given kind.
    #[must_use]
    pub fn new(kind: Kind) -> Rc<Self> {
        Rc::new(Self {
            id: EntityId::next(),
            kind,
            attributes: Observed::new(),
            lifecycle: LifecycleHub::new(),
            is_new: Cell::new(true),
            headless: Cell::new(false),
            destroyed: Cell::new(false),
            source: RefCell::new(None),
        })
    }

    /// The record's observable attribute bag.
    #[must_use]
    pub fn attributes(&self) -> &Observed {
        &self.attributes
    }

    /// Set an attribute, notifying observers. Delegates to the bag.
    pub fn set(&self, key: impl Into<String>, value: impl Into<Value>) {
        self.attributes.set(key, value);
    }

    /// Read an attribute.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.attributes.get(key)
    }

    /// Mark the record as persisted: it is no longer "new", so a later
    /// batch-mode removal stages it into `destroyed`.
    pub fn mark_persisted(&self) {
        self.is_new.set(false);
    }

    /// Exclude this record from store lifecycle subscription.
    pub fn set_headless(&self, headless: bool) {
        self.headless.set(headless);
    }

    /// Set the default source(s) used when a `remote` call passes none.
    pub fn set_default_source(&self, source: Option<SourceSpec>) {
        *self.source.borrow_mut() = source;
    }

    /// Destroy the record: emits [`Lifecycle::Destroy`], then detaches every
    /// lifecycle listener and attribute observer in one sweep. Idempotent.
    pub fn destroy(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        self.lifecycle.emit(Lifecycle::Destroy);
        self.lifecycle.clear();
        self.attributes.remove_observers(None);
    }
}

impl Entity for Record {
    fn id(&self) -> EntityId {
        self.id
    }

    fn kind(&self) -> Kind {
        self.kind
    }

    fn is_new(&self) -> bool {
        self.is_new.get()
    }

    fn is_headless(&self) -> bool {
        self.headless.get()
    }

    fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    fn default_source(&self) -> Option<SourceSpec> {
        self.source.borrow().clone()
    }

    fn lifecycle(&self) -> &LifecycleHub {
        &self.lifecycle
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("id", &self.id.raw())
            .field("kind", &self.kind)
            .field("new", &self.is_new.get())
            .field("destroyed", &self.destroyed.get())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TASK: Kind = Kind("task");

    #[test]
    fn ids_are_unique() {
        let a = Record::new(TASK);
        let b = Record::new(TASK);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn lifecycle_subscription_is_raii() {
        let hub = LifecycleHub::new();
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let sub = hub.subscribe(move |_| h.set(h.get() + 1));

        hub.emit(Lifecycle::Destroy);
        assert_eq!(hits.get(), 1);

        drop(sub);
        hub.emit(Lifecycle::Destroy);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn destroy_emits_once_then_clears() {
        let record = Record::new(TASK);
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        let _sub = record.lifecycle().subscribe(move |event| {
            assert_eq!(event, Lifecycle::Destroy);
            h.set(h.get() + 1);
        });

        record.destroy();
        record.destroy();
        assert_eq!(hits.get(), 1);
        assert!(record.is_destroyed());
        assert_eq!(record.lifecycle().subscriber_count(), 0);
    }

    #[test]
    fn record_delegates_observation_to_its_bag() {
        let record = Record::new(TASK);
        let hits = Rc::new(Cell::new(0u32));
        let h = Rc::clone(&hits);
        record.attributes().observe(
            "title",
            move |_, _, _| h.set(h.get() + 1),
            Default::default(),
        );

        record.set("title", "a");
        record.set("title", "a");
        record.set("title", "b");
        assert_eq!(hits.get(), 2);
        assert_eq!(record.get("title"), Some(Value::from("b")));
    }
}
