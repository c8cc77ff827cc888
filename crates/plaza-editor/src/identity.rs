//! Bidirectional map between document ids and world entities.
//!
//! The world carries no durable ids and the document carries no entity
//! handles; this map is the only place the two meet. Both directions are
//! kept one-to-one at all times.

use bevy_ecs::prelude::*;
use rustc_hash::FxHashMap;
use tracing::error;

use crate::DocId;

/// A bind that displaced an existing binding for a different partner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityViolation {
    /// Id being bound.
    pub document_id: DocId,
    /// Entity being bound.
    pub entity: Entity,
    /// Entity the id was bound to before.
    pub displaced_entity: Option<Entity>,
    /// Id the entity was bound to before.
    pub displaced_id: Option<DocId>,
}

/// One-to-one id/entity bindings.
#[derive(Resource, Debug, Default)]
pub struct EntityIdentityMap {
    by_id: FxHashMap<DocId, Entity>,
    by_entity: FxHashMap<Entity, DocId>,
    violations: u64,
}

impl EntityIdentityMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `document_id` to `entity`.
    ///
    /// Rebinding an existing pair is a no-op. If either side is already bound
    /// to something else, the old bindings are removed first, the violation
    /// is logged at error level and returned.
    pub fn bind(&mut self, document_id: DocId, entity: Entity) -> Option<IdentityViolation> {
        if self.by_id.get(&document_id) == Some(&entity) {
            return None;
        }

        let displaced_entity = self.by_id.remove(&document_id);
        if let Some(old) = displaced_entity {
            self.by_entity.remove(&old);
        }
        let displaced_id = self.by_entity.remove(&entity);
        if let Some(old) = &displaced_id {
            self.by_id.remove(old);
        }

        self.by_id.insert(document_id.clone(), entity);
        self.by_entity.insert(entity, document_id.clone());

        if displaced_entity.is_none() && displaced_id.is_none() {
            return None;
        }
        self.violations += 1;
        error!(
            %document_id,
            ?entity,
            ?displaced_entity,
            displaced_id = ?displaced_id.as_ref().map(DocId::as_str),
            "identity double-bind, previous binding overwritten"
        );
        Some(IdentityViolation {
            document_id,
            entity,
            displaced_entity,
            displaced_id,
        })
    }

    /// Remove the binding for an id. Returns the entity it was bound to.
    pub fn unbind(&mut self, document_id: &DocId) -> Option<Entity> {
        let entity = self.by_id.remove(document_id)?;
        self.by_entity.remove(&entity);
        Some(entity)
    }

    /// Remove the binding for an entity. Returns the id it was bound to.
    pub fn unbind_entity(&mut self, entity: Entity) -> Option<DocId> {
        let document_id = self.by_entity.remove(&entity)?;
        self.by_id.remove(&document_id);
        Some(document_id)
    }

    /// Entity bound to an id.
    pub fn resolve_entity(&self, document_id: &DocId) -> Option<Entity> {
        self.by_id.get(document_id).copied()
    }

    /// Id bound to an entity.
    pub fn resolve_document_id(&self, entity: Entity) -> Option<&DocId> {
        self.by_entity.get(&entity)
    }

    /// All bindings, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocId, Entity)> {
        self.by_id.iter().map(|(id, entity)| (id, *entity))
    }

    /// Number of bindings.
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if nothing is bound.
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Double-binds seen since creation.
    pub fn violations(&self) -> u64 {
        self.violations
    }
}
