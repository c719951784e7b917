//! The change-tracking entity store.
//!
//! # Invariants
//!
//! 1. Admission is idempotent; removal of an absent entity is a no-op.
//! 2. `created`/`destroyed` staging happens only while batch mode is active;
//!    an entity that is admitted and removed within the same batch window
//!    without ever persisting leaves no trace in the changeset.
//! 3. The dirty flag mirrors batch-mode state after every admission/removal.
//! 4. A flush applies every queued add in submission order, then every queued
//!    remove in submission order. Cross-action interleaving at submission
//!    time is deliberately not preserved.
//! 5. Lookups (`has`, `all`, `find_local`) and `remote` force a flush before
//!    reading.
//!
//! # Failure Modes
//!
//! - `has` for an unknown kind or untracked entity: `false`.
//! - `remove` of an absent entity: no-op, no event.
//! - `remote` with no resolvable source: silently skipped (debug-traced).
//! - `off` with a stale listener id: returns `false`.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use ahash::AHashMap;
use tracing::{debug, trace};

use crate::collection::EntityCollection;
use crate::entity::{EntityRef, Kind, Lifecycle, LifecycleSubscription};
use crate::schedule::{Clock, Ticks, TripTimer};
use crate::source::{RemoteOptions, SourceAction, SourceRegistry, SourceSpec};

/// Store configuration.
#[derive(Debug, Clone, Copy)]
pub struct StoreConfig {
    /// Deferred-flush latency in clock ticks.
    pub queue_delay: Ticks,
    /// Whether changeset tracking starts enabled.
    pub batch: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            queue_delay: 30,
            batch: false,
        }
    }
}

/// Options for [`ChangeStore::add`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AddOptions {
    /// Suppress the scoped `"add"` event.
    pub silent: bool,
}

/// Options for [`ChangeStore::find_local`].
#[derive(Debug, Clone, Copy)]
pub struct FindOptions {
    /// `true`: every match (filter semantics). `false`: at most the first
    /// match (find-one semantics).
    pub all: bool,
}

impl Default for FindOptions {
    fn default() -> Self {
        Self { all: true }
    }
}

impl FindOptions {
    /// Filter semantics.
    #[must_use]
    pub fn all() -> Self {
        Self { all: true }
    }

    /// Find-one semantics.
    #[must_use]
    pub fn first() -> Self {
        Self { all: false }
    }
}

/// Snapshot of the batch changeset. The vectors are fresh copies; mutating
/// them never affects later reads.
#[derive(Default)]
pub struct Changeset {
    /// Entities admitted while new during the batch window.
    pub created: Vec<EntityRef>,
    /// Entities flagged by external mutation tracking.
    pub changed: Vec<EntityRef>,
    /// Previously persisted entities removed during the batch window.
    pub destroyed: Vec<EntityRef>,
}

/// Identifies one scoped listener registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ScopedHandler = Rc<dyn Fn(&EntityRef)>;

struct ScopedListener {
    id: u64,
    kind: Kind,
    event: String,
    handler: ScopedHandler,
}

struct StoreInner {
    config: StoreConfig,
    clock: Rc<dyn Clock>,
    sources: SourceRegistry,
    batch: Cell<bool>,
    dirty: Cell<bool>,
    collections: RefCell<AHashMap<Kind, EntityCollection>>,
    created: RefCell<EntityCollection>,
    changed: RefCell<EntityCollection>,
    destroyed: RefCell<EntityCollection>,
    listeners: RefCell<Vec<ScopedListener>>,
    next_listener: Cell<u64>,
    pending_adds: RefCell<Vec<(EntityRef, AddOptions)>>,
    pending_removes: RefCell<Vec<EntityRef>>,
    timer: TripTimer,
    flushing: Cell<bool>,
    lifecycle_subs: RefCell<AHashMap<u64, LifecycleSubscription>>,
}

/// Central registry of domain entities with deferred, coalesced admission and
/// removal, batch-scoped changeset bookkeeping, and a `(kind, event)` scoped
/// event bus.
#[derive(Clone)]
pub struct ChangeStore {
    inner: Rc<StoreInner>,
}

impl ChangeStore {
    /// Build a store from explicit collaborators. There is no process-wide
    /// instance; the owner constructs the store and hands it around.
    #[must_use]
    pub fn new(config: StoreConfig, clock: Rc<dyn Clock>, sources: SourceRegistry) -> Self {
        Self {
            inner: Rc::new(StoreInner {
                batch: Cell::new(config.batch),
                config,
                clock,
                sources,
                dirty: Cell::new(false),
                collections: RefCell::new(AHashMap::new()),
                created: RefCell::new(EntityCollection::new()),
                changed: RefCell::new(EntityCollection::new()),
                destroyed: RefCell::new(EntityCollection::new()),
                listeners: RefCell::new(Vec::new()),
                next_listener: Cell::new(0),
                pending_adds: RefCell::new(Vec::new()),
                pending_removes: RefCell::new(Vec::new()),
                timer: TripTimer::new(),
                flushing: Cell::new(false),
                lifecycle_subs: RefCell::new(AHashMap::new()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Admission / removal
    // ------------------------------------------------------------------

    /// Admit an entity. When `sync` is false the operation is queued and a
    /// deferred flush is armed; otherwise it applies immediately.
    pub fn add(&self, entity: &EntityRef, opts: AddOptions, sync: bool) {
        if !sync {
            self.inner
                .pending_adds
                .borrow_mut()
                .push((entity.clone(), opts));
            if !self.inner.flushing.get() {
                self.arm_timer();
            }
            return;
        }
        self.apply_add(entity, &opts);
    }

    /// Remove an entity. When `sync` is false the operation is queued and a
    /// deferred flush is armed; otherwise it applies immediately.
    pub fn remove(&self, entity: &EntityRef, sync: bool) {
        if !sync {
            self.inner.pending_removes.borrow_mut().push(entity.clone());
            if !self.inner.flushing.get() {
                self.arm_timer();
            }
            return;
        }
        self.apply_remove(entity);
    }

    fn apply_add(&self, entity: &EntityRef, opts: &AddOptions) {
        let kind = entity.kind();
        self.inner
            .collections
            .borrow_mut()
            .entry(kind)
            .or_default()
            .add(entity);

        if !entity.is_headless() {
            self.subscribe_lifecycle(entity);
            if entity.is_new() && self.inner.batch.get() {
                self.inner.created.borrow_mut().add(entity);
            }
        }

        if !opts.silent {
            self.emit(kind, "add", entity);
        }
        self.inner.dirty.set(self.inner.batch.get());
        trace!(kind = %kind, id = entity.id().raw(), "entity admitted");
    }

    fn apply_remove(&self, entity: &EntityRef) {
        let kind = entity.kind();
        let removed = self
            .inner
            .collections
            .borrow_mut()
            .get_mut(&kind)
            .is_some_and(|collection| collection.remove(entity));

        if removed {
            if self.inner.batch.get() {
                if entity.is_new() {
                    // Admitted and removed within the batch window without
                    // ever persisting: a net-zero signal, not a destruction.
                    self.inner.created.borrow_mut().remove(entity);
                } else {
                    self.inner.destroyed.borrow_mut().add(entity);
                }
            }
            // A self-destructing entity detaches all of its listeners in one
            // sweep; dropping the guard is only load-bearing when the entity
            // lives on.
            drop(
                self.inner
                    .lifecycle_subs
                    .borrow_mut()
                    .remove(&entity.id().raw()),
            );
            self.emit(kind, "remove", entity);
            trace!(kind = %kind, id = entity.id().raw(), "entity removed");
        }
        self.inner.dirty.set(self.inner.batch.get());
    }

    fn subscribe_lifecycle(&self, entity: &EntityRef) {
        let key = entity.id().raw();
        let mut subs = self.inner.lifecycle_subs.borrow_mut();
        if subs.contains_key(&key) {
            return;
        }
        let store = Rc::downgrade(&self.inner);
        let weak_entity = Rc::downgrade(entity);
        let sub = entity.lifecycle().subscribe(move |event| {
            let (Some(inner), Some(entity)) = (store.upgrade(), weak_entity.upgrade()) else {
                return;
            };
            let store = ChangeStore { inner };
            match event {
                Lifecycle::Destroy => store.remove(&entity, false),
                Lifecycle::Change => {
                    // Key-change handling is not implemented yet; the hook
                    // exists so re-indexing can land here.
                }
            }
        });
        subs.insert(key, sub);
    }

    // ------------------------------------------------------------------
    // Deferred flush
    // ------------------------------------------------------------------

    fn arm_timer(&self) {
        let now = self.inner.clock.now();
        if self.inner.timer.arm(now, self.inner.config.queue_delay) {
            trace!(
                deadline = now + self.inner.config.queue_delay,
                "deferred flush armed"
            );
        }
    }

    /// Drive the flush timer. Flushes when the armed deadline has passed;
    /// returns whether a flush ran.
    pub fn poll(&self) -> bool {
        if self.inner.timer.due(self.inner.clock.now()) {
            self.flush_now();
            true
        } else {
            false
        }
    }

    /// The pending flush deadline, if one is armed.
    #[must_use]
    pub fn next_deadline(&self) -> Option<Ticks> {
        self.inner.timer.deadline()
    }

    /// Synchronously drain the pending queues: all adds in submission order,
    /// then all removes in submission order. Re-entrant calls (from event
    /// handlers fired mid-flush) are no-ops; operations queued during the
    /// flush re-arm the timer afterwards.
    pub fn flush_now(&self) {
        if self.inner.flushing.get() {
            return;
        }
        self.inner.flushing.set(true);
        self.inner.timer.clear();

        let adds: Vec<_> = self.inner.pending_adds.borrow_mut().drain(..).collect();
        let removes: Vec<_> = self.inner.pending_removes.borrow_mut().drain(..).collect();
        if !adds.is_empty() || !removes.is_empty() {
            debug!(
                adds = adds.len(),
                removes = removes.len(),
                "flushing deferred entity queue"
            );
        }
        for (entity, opts) in &adds {
            self.apply_add(entity, opts);
        }
        for entity in &removes {
            self.apply_remove(entity);
        }

        self.inner.flushing.set(false);
        let pending = !self.inner.pending_adds.borrow().is_empty()
            || !self.inner.pending_removes.borrow().is_empty();
        if pending {
            self.arm_timer();
        }
    }

    /// Number of queued, not-yet-applied operations.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.inner.pending_adds.borrow().len() + self.inner.pending_removes.borrow().len()
    }

    // ------------------------------------------------------------------
    // Lookup
    // ------------------------------------------------------------------

    /// Whether the entity is currently tracked under `kind`. Forces a flush.
    #[must_use]
    pub fn has(&self, kind: Kind, entity: &EntityRef) -> bool {
        self.flush_now();
        self.inner
            .collections
            .borrow()
            .get(&kind)
            .is_some_and(|collection| collection.has(entity))
    }

    /// Alias for [`has`](Self::has).
    #[must_use]
    pub fn contains(&self, kind: Kind, entity: &EntityRef) -> bool {
        self.has(kind, entity)
    }

    /// Every tracked entity of a kind, in admission order. Forces a flush.
    #[must_use]
    pub fn all(&self, kind: Kind) -> Vec<EntityRef> {
        self.flush_now();
        self.inner
            .collections
            .borrow()
            .get(&kind)
            .map(EntityCollection::snapshot)
            .unwrap_or_default()
    }

    /// Filter or find-one over a kind's collection. Forces a flush. With
    /// [`FindOptions::first`], the result holds at most one entity.
    #[must_use]
    pub fn find_local(
        &self,
        kind: Kind,
        predicate: impl Fn(&EntityRef) -> bool,
        opts: FindOptions,
    ) -> Vec<EntityRef> {
        // Snapshot before filtering so the predicate may call back into the
        // store without tripping a borrow.
        let members = self.all(kind);
        if opts.all {
            members.into_iter().filter(|e| predicate(e)).collect()
        } else {
            members
                .into_iter()
                .find(|e| predicate(e))
                .into_iter()
                .collect()
        }
    }

    // ------------------------------------------------------------------
    // Remote boundary
    // ------------------------------------------------------------------

    /// Forward an action to the entity's source(s). Resolution order: the
    /// per-call option, else the entity's default source, else nothing.
    /// Unresolvable names are skipped silently. Forces a flush first.
    pub fn remote(&self, action: SourceAction, entity: &EntityRef, opts: &RemoteOptions) {
        self.flush_now();
        let spec = opts
            .source
            .clone()
            .or_else(|| entity.default_source());
        let Some(spec) = spec else {
            debug!(id = entity.id().raw(), ?action, "no source; remote call skipped");
            return;
        };
        match spec {
            SourceSpec::Named(name) => self.perform_remote(&name, action, entity, opts),
            SourceSpec::Many(names) => {
                for name in &names {
                    self.perform_remote(name, action, entity, opts);
                }
            }
            SourceSpec::All => {
                for (_, source) in self.inner.sources.snapshot() {
                    source.perform(action, entity, opts);
                }
            }
        }
    }

    fn perform_remote(
        &self,
        name: &str,
        action: SourceAction,
        entity: &EntityRef,
        opts: &RemoteOptions,
    ) {
        match self.inner.sources.get(name) {
            Some(source) => source.perform(action, entity, opts),
            None => debug!(name, ?action, "unregistered source; remote call skipped"),
        }
    }

    // ------------------------------------------------------------------
    // Changeset
    // ------------------------------------------------------------------

    /// Fresh copies of the created/changed/destroyed collections.
    #[must_use]
    pub fn changeset(&self) -> Changeset {
        Changeset {
            created: self.inner.created.borrow().snapshot(),
            changed: self.inner.changed.borrow().snapshot(),
            destroyed: self.inner.destroyed.borrow().snapshot(),
        }
    }

    /// Stage an entity into `changed`. Called by external mutation tracking;
    /// only effective while batch mode is active.
    pub fn mark_changed(&self, entity: &EntityRef) {
        if self.inner.batch.get() {
            self.inner.changed.borrow_mut().add(entity);
            self.inner.dirty.set(true);
        }
    }

    /// Empty all three changeset collections, e.g. at a batch boundary after
    /// the changeset was consumed.
    pub fn clear_changeset(&self) {
        *self.inner.created.borrow_mut() = EntityCollection::new();
        *self.inner.changed.borrow_mut() = EntityCollection::new();
        *self.inner.destroyed.borrow_mut() = EntityCollection::new();
        self.inner.dirty.set(false);
    }

    /// Whether batch mode (changeset tracking) is active.
    #[must_use]
    pub fn is_batch(&self) -> bool {
        self.inner.batch.get()
    }

    /// Enable or disable batch mode.
    pub fn set_batch(&self, batch: bool) {
        self.inner.batch.set(batch);
    }

    /// Whether any admission/removal ran while batch mode was active.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.get()
    }

    // ------------------------------------------------------------------
    // Scoped event bus
    // ------------------------------------------------------------------

    /// Register a listener for `(kind, event)`.
    pub fn on(&self, kind: Kind, event: &str, handler: impl Fn(&EntityRef) + 'static) -> ListenerId {
        let id = self.inner.next_listener.get() + 1;
        self.inner.next_listener.set(id);
        self.inner.listeners.borrow_mut().push(ScopedListener {
            id,
            kind,
            event: event.to_string(),
            handler: Rc::new(handler),
        });
        ListenerId(id)
    }

    /// Remove a listener. Returns whether it was registered.
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.borrow_mut();
        let before = listeners.len();
        listeners.retain(|listener| listener.id != id.0);
        listeners.len() < before
    }

    /// Deliver a scoped event to every matching listener, in registration
    /// order. Returns whether any listener ran.
    pub fn emit(&self, kind: Kind, event: &str, entity: &EntityRef) -> bool {
        let handlers: Vec<ScopedHandler> = self
            .inner
            .listeners
            .borrow()
            .iter()
            .filter(|listener| listener.kind == kind && listener.event == event)
            .map(|listener| Rc::clone(&listener.handler))
            .collect();
        for handler in &handlers {
            handler(entity);
        }
        !handlers.is_empty()
    }
}
