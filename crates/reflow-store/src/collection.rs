//! Insertion-ordered unique entity sets.

use ahash::AHashSet;

use crate::entity::{EntityId, EntityRef};

/// Unique, insertion-ordered set of entity references.
///
/// Membership tests are O(1) via an id set; iteration follows insertion
/// order. Mutation is reserved to the store (crate-private); external code
/// gets read access and [`snapshot`](Self::snapshot) copies only.
#[derive(Default)]
pub struct EntityCollection {
    order: Vec<EntityRef>,
    ids: AHashSet<u64>,
}

impl EntityCollection {
    /// Create an empty collection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entities in the collection.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Whether the collection is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Whether the entity is a member.
    #[must_use]
    pub fn has(&self, entity: &EntityRef) -> bool {
        self.has_id(entity.id())
    }

    /// Whether an entity with this id is a member.
    #[must_use]
    pub fn has_id(&self, id: EntityId) -> bool {
        self.ids.contains(&id.raw())
    }

    /// Iterate members in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &EntityRef> {
        self.order.iter()
    }

    /// Fresh, independent copy of the membership in insertion order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EntityRef> {
        self.order.clone()
    }

    /// Insert at the end if absent. Returns whether the entity was inserted.
    pub(crate) fn add(&mut self, entity: &EntityRef) -> bool {
        if !self.ids.insert(entity.id().raw()) {
            return false;
        }
        self.order.push(entity.clone());
        true
    }

    /// Remove by id. Returns whether the entity was present.
    pub(crate) fn remove(&mut self, entity: &EntityRef) -> bool {
        if !self.ids.remove(&entity.id().raw()) {
            return false;
        }
        let id = entity.id();
        self.order.retain(|member| member.id() != id);
        true
    }
}
