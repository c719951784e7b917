#![forbid(unsafe_code)]

//! Change-tracking entity store for Reflow.
//!
//! The [`ChangeStore`] keeps one insertion-ordered [`EntityCollection`] per
//! entity kind, runs admissions and removals through a deferred, coalesced
//! pipeline, and — while batch mode is active — classifies them into a
//! [`Changeset`] of created/changed/destroyed entities. A scoped event bus
//! keyed by `(kind, event)` lets callers react to admissions and removals of
//! specific kinds only.
//!
//! # Architecture
//!
//! Everything is single-threaded and cooperative. The only suspension point
//! is the deferred-flush timer: a non-synchronous `add`/`remove` returns
//! immediately and the mutation runs later, when the armed deadline passes
//! (driven by [`ChangeStore::poll`] against an injected [`Clock`]) or when a
//! lookup forces a flush. The store is built explicitly with its
//! configuration, clock, and source registry — there is no process-wide
//! singleton.
//!
//! # Invariants
//!
//! 1. An entity belongs to at most one collection per kind; admission is
//!    idempotent and removal of an absent entity is a no-op.
//! 2. `created`/`destroyed` are staged only while batch mode is active.
//! 3. The dirty flag mirrors the batch-mode state after every admission or
//!    removal.
//! 4. Within one action class, submission order is preserved across a flush;
//!    across classes it is not — a flush applies every queued add before
//!    every queued remove.
//! 5. Collections are mutated exclusively by the store; external access is
//!    read-only (iteration and snapshots).

pub mod collection;
pub mod entity;
pub mod schedule;
pub mod source;
pub mod store;

pub use collection::EntityCollection;
pub use entity::{
    Entity, EntityId, EntityRef, Kind, Lifecycle, LifecycleHub, LifecycleSubscription, Record,
};
pub use schedule::{Clock, SystemClock, Ticks, TripTimer, VirtualClock};
pub use source::{RemoteOptions, Source, SourceAction, SourceRegistry, SourceSpec};
pub use store::{AddOptions, ChangeStore, Changeset, FindOptions, ListenerId, StoreConfig};
