//! End-to-end coverage of the deferred admission pipeline, batch changeset
//! bookkeeping, and the remote source boundary.

use std::cell::RefCell;
use std::rc::Rc;

use proptest::prelude::*;
use reflow_store::{
    AddOptions, ChangeStore, EntityId, EntityRef, FindOptions, Kind, Record, RemoteOptions,
    Source, SourceAction, SourceRegistry, SourceSpec, StoreConfig, VirtualClock,
};

const TASK: Kind = Kind("task");

fn batch_store() -> (ChangeStore, Rc<VirtualClock>) {
    make_store(StoreConfig {
        queue_delay: 30,
        batch: true,
    })
}

fn plain_store() -> (ChangeStore, Rc<VirtualClock>) {
    make_store(StoreConfig::default())
}

fn make_store(config: StoreConfig) -> (ChangeStore, Rc<VirtualClock>) {
    let clock = VirtualClock::shared();
    let store = ChangeStore::new(config, clock.clone(), SourceRegistry::new());
    (store, clock)
}

fn task() -> EntityRef {
    Record::new(TASK)
}

fn ids(entities: &[EntityRef]) -> Vec<EntityId> {
    entities.iter().map(|e| e.id()).collect()
}

// --------------------------------------------------------------------------
// Deferred flush scheduling
// --------------------------------------------------------------------------

#[test]
fn one_window_one_flush_in_submission_order() {
    let (store, clock) = plain_store();
    let entities: Vec<EntityRef> = (0..5).map(|_| task()).collect();

    for e in &entities {
        store.add(e, AddOptions::default(), false);
        clock.advance(5); // all submissions land inside the 30-tick window
    }
    assert_eq!(store.pending_len(), 5);
    assert_eq!(store.next_deadline(), Some(30), "first submission arms the window");

    assert!(!store.poll(), "window not elapsed yet");
    clock.set(30);
    assert!(store.poll());
    assert_eq!(store.pending_len(), 0);
    assert!(!store.poll(), "nothing left to flush");

    let members = store.all(TASK);
    assert_eq!(ids(&members), ids(&entities), "submission order preserved");
}

#[test]
fn adds_apply_before_removes_regardless_of_interleaving() {
    let (store, clock) = plain_store();
    let a = task();
    let b = task();
    store.add(&a, AddOptions::default(), true);

    // Interleaved at submission time: remove(a), add(b).
    store.remove(&a, false);
    store.add(&b, AddOptions::default(), false);

    clock.advance(30);
    store.poll();

    assert!(!store.has(TASK, &a));
    assert!(store.has(TASK, &b));
}

#[test]
fn add_then_remove_of_the_same_entity_within_one_window_nets_out() {
    let (store, clock) = plain_store();
    let e = task();
    store.add(&e, AddOptions::default(), false);
    store.remove(&e, false);

    clock.advance(30);
    store.poll();
    assert!(!store.has(TASK, &e), "adds run first, then removes");
}

#[test]
fn operations_queued_during_a_flush_rearm_the_timer() {
    let (store, clock) = plain_store();
    let first = task();
    let second = task();

    let s = store.clone();
    let chained = second.clone();
    store.on(TASK, "add", move |_| {
        // Queue another admission from inside the flush.
        if !s.has(TASK, &chained) {
            s.add(&chained, AddOptions::default(), false);
        }
    });

    store.add(&first, AddOptions::default(), false);
    clock.advance(30);
    store.poll();

    assert!(store.next_deadline().is_some(), "new window armed after flush");
    clock.advance(30);
    store.poll();
    assert_eq!(store.all(TASK).len(), 2);
}

// --------------------------------------------------------------------------
// Batch changeset
// --------------------------------------------------------------------------

#[test]
fn new_entity_added_and_removed_within_a_batch_leaves_no_trace() {
    let (store, _) = batch_store();
    let e = task();
    store.add(&e, AddOptions::default(), true);
    store.remove(&e, true);

    let cs = store.changeset();
    assert!(cs.created.is_empty());
    assert!(cs.destroyed.is_empty());
}

#[test]
fn persisted_entity_removal_stages_destroyed() {
    let (store, _) = batch_store();
    let record = Record::new(TASK);
    record.mark_persisted();
    let e: EntityRef = record;

    store.add(&e, AddOptions::default(), true);
    store.remove(&e, true);

    let cs = store.changeset();
    assert!(cs.created.is_empty(), "persisted entities are never 'created'");
    assert_eq!(ids(&cs.destroyed), vec![e.id()]);
}

#[test]
fn new_entity_admission_stages_created() {
    let (store, _) = batch_store();
    let e = task();
    store.add(&e, AddOptions::default(), true);
    assert_eq!(ids(&store.changeset().created), vec![e.id()]);
}

#[test]
fn outside_batch_mode_the_changeset_stays_empty() {
    let (store, _) = plain_store();
    let record = Record::new(TASK);
    record.mark_persisted();
    let e: EntityRef = record;

    store.add(&e, AddOptions::default(), true);
    store.remove(&e, true);

    let cs = store.changeset();
    assert!(cs.created.is_empty());
    assert!(cs.destroyed.is_empty());
    assert!(!store.is_dirty());
}

#[test]
fn changeset_snapshots_are_independent() {
    let (store, _) = batch_store();
    let e = task();
    store.add(&e, AddOptions::default(), true);

    let mut first = store.changeset();
    first.created.clear();
    assert_eq!(store.changeset().created.len(), 1);
}

// --------------------------------------------------------------------------
// Lifecycle integration
// --------------------------------------------------------------------------

#[test]
fn destroying_a_record_removes_it_after_the_next_flush() {
    let (store, clock) = plain_store();
    let record = Record::new(TASK);
    let e: EntityRef = record.clone();
    store.add(&e, AddOptions::default(), true);

    record.destroy();
    assert_eq!(store.pending_len(), 1, "destroy queues a deferred removal");

    clock.advance(30);
    store.poll();
    assert!(!store.has(TASK, &e));
}

#[test]
fn destroyed_headless_records_stay_until_removed_explicitly() {
    let (store, _) = plain_store();
    let record = Record::new(TASK);
    record.set_headless(true);
    let e: EntityRef = record.clone();
    store.add(&e, AddOptions::default(), true);

    record.destroy();
    assert!(store.has(TASK, &e), "no lifecycle subscription for headless entities");

    store.remove(&e, true);
    assert!(!store.has(TASK, &e));
}

// --------------------------------------------------------------------------
// Remote boundary
// --------------------------------------------------------------------------

#[derive(Default)]
struct RecordingSource {
    calls: RefCell<Vec<(SourceAction, EntityId)>>,
}

impl Source for RecordingSource {
    fn perform(&self, action: SourceAction, entity: &EntityRef, _opts: &RemoteOptions) {
        self.calls.borrow_mut().push((action, entity.id()));
    }
}

#[test]
fn remote_resolution_prefers_the_per_call_option() {
    let registry = SourceRegistry::new();
    let api = Rc::new(RecordingSource::default());
    let disk = Rc::new(RecordingSource::default());
    registry.register("api", api.clone());
    registry.register("disk", disk.clone());

    let clock = VirtualClock::shared();
    let store = ChangeStore::new(StoreConfig::default(), clock, registry);

    let record = Record::new(TASK);
    record.set_default_source(Some(SourceSpec::named("disk")));
    let e: EntityRef = record;

    // Per-call override wins over the entity default.
    store.remote(
        SourceAction::Commit,
        &e,
        &RemoteOptions {
            source: Some(SourceSpec::named("api")),
        },
    );
    assert_eq!(api.calls.borrow().len(), 1);
    assert!(disk.calls.borrow().is_empty());

    // No override: the entity's default source.
    store.remote(SourceAction::Fetch, &e, &RemoteOptions::default());
    assert_eq!(disk.calls.borrow().len(), 1);
    assert_eq!(disk.calls.borrow()[0], (SourceAction::Fetch, e.id()));
}

#[test]
fn remote_fans_out_to_lists_and_all() {
    let registry = SourceRegistry::new();
    let api = Rc::new(RecordingSource::default());
    let disk = Rc::new(RecordingSource::default());
    registry.register("api", api.clone());
    registry.register("disk", disk.clone());

    let clock = VirtualClock::shared();
    let store = ChangeStore::new(StoreConfig::default(), clock, registry);
    let e = task();

    store.remote(
        SourceAction::Destroy,
        &e,
        &RemoteOptions {
            source: Some(SourceSpec::Many(vec!["api".into(), "ghost".into(), "disk".into()])),
        },
    );
    assert_eq!(api.calls.borrow().len(), 1);
    assert_eq!(disk.calls.borrow().len(), 1, "unresolvable names are skipped");

    store.remote(
        SourceAction::Commit,
        &e,
        &RemoteOptions {
            source: Some(SourceSpec::All),
        },
    );
    assert_eq!(api.calls.borrow().len(), 2);
    assert_eq!(disk.calls.borrow().len(), 2);
}

#[test]
fn remote_without_any_source_is_a_no_op() {
    let (store, _) = plain_store();
    // No registry entries, no entity default, no per-call option.
    store.remote(SourceAction::Fetch, &task(), &RemoteOptions::default());
}

#[test]
fn remote_forces_a_flush_first() {
    let registry = SourceRegistry::new();
    let api = Rc::new(RecordingSource::default());
    registry.register("api", api);

    let clock = VirtualClock::shared();
    let store = ChangeStore::new(StoreConfig::default(), clock, registry);
    let e = task();
    store.add(&e, AddOptions::default(), false);
    assert_eq!(store.pending_len(), 1);

    store.remote(
        SourceAction::Commit,
        &e,
        &RemoteOptions {
            source: Some(SourceSpec::named("api")),
        },
    );
    assert_eq!(store.pending_len(), 0);
    assert!(store.has(TASK, &e));
}

// --------------------------------------------------------------------------
// Net-effect membership (property 1)
// --------------------------------------------------------------------------

proptest! {
    #[test]
    fn membership_equals_net_effect(ops in proptest::collection::vec(any::<bool>(), 1..40)) {
        let (store, _) = plain_store();
        let e = task();

        let mut present = false;
        for &is_add in &ops {
            if is_add {
                store.add(&e, AddOptions::default(), true);
            } else {
                store.remove(&e, true);
            }
            present = is_add;
        }

        prop_assert_eq!(store.has(TASK, &e), present);
        prop_assert_eq!(store.all(TASK).len(), usize::from(present));
    }

    #[test]
    fn deferred_membership_equals_net_effect(ops in proptest::collection::vec(any::<bool>(), 1..20)) {
        // Deferred pipeline: adds apply before removes within a window, so
        // the net effect of a mixed window on one entity is "absent" iff at
        // least one remove was queued, "present" iff only adds were queued.
        let (store, clock) = plain_store();
        let e = task();

        for &is_add in &ops {
            if is_add {
                store.add(&e, AddOptions::default(), false);
            } else {
                store.remove(&e, false);
            }
        }
        clock.advance(30);
        store.poll();

        let any_add = ops.iter().any(|&op| op);
        let any_remove = ops.iter().any(|&op| !op);
        prop_assert_eq!(store.has(TASK, &e), any_add && !any_remove);
    }
}

// --------------------------------------------------------------------------
// find_local
// --------------------------------------------------------------------------

#[test]
fn find_local_forces_the_flush() {
    let (store, _) = plain_store();
    let e = task();
    store.add(&e, AddOptions::default(), false);

    let found = store.find_local(TASK, |_| true, FindOptions::first());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id(), e.id());
}
