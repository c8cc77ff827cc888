//! Projection of the replicated document onto the simulation world.
//!
//! [`DocumentReconciler::sync_to_world`] makes the world match the document:
//! it creates and binds entities for new document entries, destroys entities
//! whose entry is gone, and copies fields onto bound entities. It never
//! fails. A reference to an id the document has not received yet is deferred
//! to the next pass, a parent assignment that would form a cycle is rejected
//! in favour of the previous parent, and a node under a removed parent is
//! removed with it. Everything of note lands in the [`ReconcileReport`].
//!
//! The reverse direction lives in [`crate::edits`] and only runs on explicit
//! edit events, so nothing written here is ever read back as a user edit.

use std::collections::{BTreeSet, HashSet};

use bevy_ecs::prelude::*;
use plaza_ecs::{Name, Transform, despawn_entity, set_if_changed, spawn_entity};
use tracing::{debug, warn};

use crate::components::{
    Collider, EditorMesh, EditorNode, EditorScene, Locked, MeshGeometry, MeshInstance, NodeParent,
    RigidBody, SceneRoots,
};
use crate::document::{SyncedDocument, SyncedMesh, SyncedNode, SyncedScene};
use crate::identity::EntityIdentityMap;
use crate::DocId;

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Which field a reference came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    /// `SyncedNode::parent`.
    Parent,
    /// `SyncedNode::mesh`.
    Mesh,
    /// An entry of `SyncedScene::roots`.
    SceneRoot,
}

/// A reference that could not be resolved this pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    /// Entry holding the reference.
    pub from: DocId,
    /// Referenced id.
    pub to: DocId,
    /// Field the reference came from.
    pub kind: ReferenceKind,
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconcileReport {
    /// Document version the pass projected.
    pub version: u64,
    /// Entities spawned and bound.
    pub created: usize,
    /// Existing entities with at least one component written.
    pub updated: usize,
    /// Entities despawned and unbound.
    pub destroyed: usize,
    /// References to ids not received yet; retried next pass.
    pub deferred: Vec<UnresolvedReference>,
    /// References to an id of the wrong kind, e.g. a parent that is a mesh.
    pub rejected: Vec<UnresolvedReference>,
    /// Nodes whose parent assignment was refused because of a cycle.
    pub cycles_rejected: Vec<DocId>,
    /// Nodes removed because an ancestor was removed.
    pub orphans_removed: Vec<DocId>,
    /// Mesh buffers reallocated because their length changed.
    pub geometry_rewrites: usize,
    /// Parent or mesh components dropped because their target was gone.
    pub dangling_cleared: usize,
    /// Identity map double-binds during the pass.
    pub identity_violations: u64,
}

impl ReconcileReport {
    /// Whether the pass left nothing to retry.
    pub fn is_settled(&self) -> bool {
        self.deferred.is_empty()
    }
}

// ---------------------------------------------------------------------------
// DocumentReconciler
// ---------------------------------------------------------------------------

/// Document to world projection. Keeps the last report for diagnostics.
#[derive(Resource, Debug, Default)]
pub struct DocumentReconciler {
    last_report: Option<ReconcileReport>,
}

impl DocumentReconciler {
    /// Creates a reconciler that has not run yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Report of the most recent pass.
    pub fn last_report(&self) -> Option<&ReconcileReport> {
        self.last_report.as_ref()
    }

    /// Whether a pass could change anything: the document moved on since the
    /// last pass, or the last pass deferred something.
    pub fn needs_pass(&self, document: &SyncedDocument) -> bool {
        self.last_report
            .as_ref()
            .is_none_or(|r| r.version != document.version() || !r.is_settled())
    }

    /// Make the world match the document.
    pub fn sync_to_world(
        &mut self,
        document: &SyncedDocument,
        world: &mut World,
        map: &mut EntityIdentityMap,
    ) -> ReconcileReport {
        let violations_before = map.violations();
        let mut pass = Pass {
            document,
            map: &mut *map,
            report: ReconcileReport {
                version: document.version(),
                ..Default::default()
            },
            created: HashSet::new(),
            orphans: orphaned_nodes(document),
        };

        pass.destroy_stale(world);
        for mesh in document.meshes() {
            pass.sync_mesh(world, mesh);
        }
        // Spawn every node before resolving references so parents created in
        // this pass resolve in this pass.
        for node in document.nodes() {
            if !pass.orphans.contains(&node.id) {
                pass.ensure_bound(world, &node.id, || {
                    (EditorNode, node.transform(), Name(node.name.clone()))
                });
            }
        }
        for node in document.nodes() {
            if !pass.orphans.contains(&node.id) {
                pass.sync_node(world, node);
            }
        }
        for scene in document.scenes() {
            pass.sync_scene(world, scene);
        }
        pass.clear_dangling(world);

        let mut report = pass.report;
        report.identity_violations = map.violations() - violations_before;
        debug!(
            version = report.version,
            created = report.created,
            updated = report.updated,
            destroyed = report.destroyed,
            deferred = report.deferred.len(),
            cycles = report.cycles_rejected.len(),
            "document reconciled"
        );
        self.last_report = Some(report.clone());
        report
    }
}

// ---------------------------------------------------------------------------
// One pass
// ---------------------------------------------------------------------------

struct Pass<'a> {
    document: &'a SyncedDocument,
    map: &'a mut EntityIdentityMap,
    report: ReconcileReport,
    created: HashSet<DocId>,
    orphans: BTreeSet<DocId>,
}

impl Pass<'_> {
    /// Despawn entities whose entry is gone or orphaned, and forget bindings
    /// whose entity was despawned by someone else.
    fn destroy_stale(&mut self, world: &mut World) {
        let stale: Vec<(DocId, Entity)> = self
            .map
            .iter()
            .filter(|(id, entity)| {
                !self.document.contains(id)
                    || self.orphans.contains(*id)
                    || !world.entities().contains(*entity)
            })
            .map(|(id, entity)| (id.clone(), entity))
            .collect();

        for (id, entity) in stale {
            self.map.unbind(&id);
            if despawn_entity(world, entity) {
                self.report.destroyed += 1;
            }
            if self.orphans.contains(&id) {
                warn!(node = %id, "removed node whose ancestor was removed");
                self.report.orphans_removed.push(id);
            }
        }
    }

    fn ensure_bound<B: Bundle>(
        &mut self,
        world: &mut World,
        id: &DocId,
        bundle: impl FnOnce() -> B,
    ) -> Entity {
        if let Some(entity) = self.map.resolve_entity(id) {
            return entity;
        }
        let entity = spawn_entity(world, bundle());
        self.map.bind(id.clone(), entity);
        self.report.created += 1;
        self.created.insert(id.clone());
        entity
    }

    fn mark_updated(&mut self, id: &DocId, changed: bool) {
        if changed && !self.created.contains(id) {
            self.report.updated += 1;
        }
    }

    fn sync_mesh(&mut self, world: &mut World, mesh: &SyncedMesh) {
        let entity = self.ensure_bound(world, &mesh.id, || {
            (EditorMesh, Name(mesh.name.clone()), MeshGeometry::default())
        });
        let mut changed = set_if_changed(world, entity, Name(mesh.name.clone()));

        let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
            return;
        };
        if let Some(mut geometry) = entity_mut.get_mut::<MeshGeometry>() {
            let buffers = geometry.bypass_change_detection();
            let writes = [
                copy_buffer(&mut buffers.positions, &mesh.positions),
                copy_buffer(&mut buffers.normals, &mesh.normals),
                copy_buffer(&mut buffers.indices, &mesh.indices),
            ];
            if writes.iter().any(|w| *w != BufferWrite::Unchanged) {
                geometry.set_changed();
                changed = true;
            }
            self.report.geometry_rewrites += writes
                .iter()
                .filter(|w| **w == BufferWrite::Reallocated)
                .count();
        } else {
            entity_mut.insert(MeshGeometry {
                positions: mesh.positions.clone(),
                normals: mesh.normals.clone(),
                indices: mesh.indices.clone(),
            });
            self.report.geometry_rewrites += 1;
            changed = true;
        }
        self.mark_updated(&mesh.id, changed);
    }

    fn sync_node(&mut self, world: &mut World, node: &SyncedNode) {
        let Some(entity) = self.map.resolve_entity(&node.id) else {
            return;
        };
        let mut changed = set_if_changed(world, entity, node.transform());
        changed |= set_if_changed(world, entity, Name(node.name.clone()));
        changed |= sync_optional(world, entity, node.collider.map(Collider));
        changed |= sync_optional(world, entity, node.rigid_body.map(RigidBody));
        changed |= sync_optional(world, entity, node.is_locked().then_some(Locked));
        changed |= self.sync_parent(world, node, entity);
        changed |= self.sync_mesh_reference(world, node, entity);
        self.mark_updated(&node.id, changed);
    }

    fn sync_parent(&mut self, world: &mut World, node: &SyncedNode, entity: Entity) -> bool {
        let Some(parent_id) = &node.parent else {
            return sync_optional::<NodeParent>(world, entity, None);
        };
        let parent = match self.resolve(&node.id, parent_id, ReferenceKind::Parent) {
            Some(parent) if self.document.node(parent_id).is_some() => parent,
            Some(_) => {
                self.reject(&node.id, parent_id, ReferenceKind::Parent);
                return false;
            }
            None => return false,
        };
        if creates_cycle(self.document, &node.id, parent_id) {
            warn!(node = %node.id, parent = %parent_id, "rejecting parent assignment that would form a cycle");
            self.report.cycles_rejected.push(node.id.clone());
            return false;
        }
        set_if_changed(world, entity, NodeParent(parent))
    }

    fn sync_mesh_reference(&mut self, world: &mut World, node: &SyncedNode, entity: Entity) -> bool {
        let Some(mesh_id) = &node.mesh else {
            return sync_optional::<MeshInstance>(world, entity, None);
        };
        if self.document.is_retired(mesh_id) {
            return sync_optional::<MeshInstance>(world, entity, None);
        }
        match self.resolve(&node.id, mesh_id, ReferenceKind::Mesh) {
            Some(mesh) if self.document.mesh(mesh_id).is_some() => {
                set_if_changed(world, entity, MeshInstance(mesh))
            }
            Some(_) => {
                self.reject(&node.id, mesh_id, ReferenceKind::Mesh);
                false
            }
            None => false,
        }
    }

    fn sync_scene(&mut self, world: &mut World, scene: &SyncedScene) {
        let entity = self.ensure_bound(world, &scene.id, || {
            (EditorScene, Name(scene.name.clone()), SceneRoots::default())
        });
        let mut roots = Vec::with_capacity(scene.roots.len());
        for root_id in &scene.roots {
            if self.document.is_retired(root_id) {
                continue;
            }
            match self.resolve(&scene.id, root_id, ReferenceKind::SceneRoot) {
                Some(root) if self.document.node(root_id).is_some() => roots.push(root),
                Some(_) => self.reject(&scene.id, root_id, ReferenceKind::SceneRoot),
                None => {}
            }
        }
        let mut changed = set_if_changed(world, entity, Name(scene.name.clone()));
        changed |= set_if_changed(world, entity, SceneRoots(roots));
        self.mark_updated(&scene.id, changed);
    }

    /// Resolve a reference through the identity map, deferring it if the
    /// target has not been bound.
    fn resolve(&mut self, from: &DocId, to: &DocId, kind: ReferenceKind) -> Option<Entity> {
        let entity = self.map.resolve_entity(to);
        if entity.is_none() {
            debug!(%from, %to, ?kind, "deferring unresolved reference");
            self.report.deferred.push(UnresolvedReference {
                from: from.clone(),
                to: to.clone(),
                kind,
            });
        }
        entity
    }

    fn reject(&mut self, from: &DocId, to: &DocId, kind: ReferenceKind) {
        warn!(%from, %to, ?kind, "reference points at the wrong kind of entry");
        self.report.rejected.push(UnresolvedReference {
            from: from.clone(),
            to: to.clone(),
            kind,
        });
    }

    /// Drop parent and mesh components that point at despawned entities.
    fn clear_dangling(&mut self, world: &mut World) {
        let dangling_parents = dangling::<NodeParent>(world, |p| p.0);
        let dangling_meshes = dangling::<MeshInstance>(world, |m| m.0);
        for entity in &dangling_parents {
            sync_optional::<NodeParent>(world, *entity, None);
        }
        for entity in &dangling_meshes {
            sync_optional::<MeshInstance>(world, *entity, None);
        }
        self.report.dangling_cleared += dangling_parents.len() + dangling_meshes.len();
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Nodes with a removed ancestor.
fn orphaned_nodes(document: &SyncedDocument) -> BTreeSet<DocId> {
    let limit = document.nodes().count();
    let mut orphans = BTreeSet::new();
    for node in document.nodes() {
        let mut cursor = node.parent.as_ref();
        let mut steps = 0;
        while let Some(parent_id) = cursor {
            if document.is_retired(parent_id) || orphans.contains(parent_id) {
                orphans.insert(node.id.clone());
                break;
            }
            steps += 1;
            if steps > limit {
                break;
            }
            cursor = document.node(parent_id).and_then(|p| p.parent.as_ref());
        }
    }
    orphans
}

/// Whether the document's parent chain starting at `parent` leads back to
/// `child`. Walks the document rather than the world, so a reparent whose
/// counterpart has not been projected yet is judged on where the tree ends up.
fn creates_cycle(document: &SyncedDocument, child: &DocId, parent: &DocId) -> bool {
    let mut visited = HashSet::new();
    let mut cursor = Some(parent);
    while let Some(current) = cursor {
        if current == child {
            return true;
        }
        // A loop above us that does not include `child`.
        if !visited.insert(current) {
            return false;
        }
        cursor = document.node(current).and_then(|n| n.parent.as_ref());
    }
    false
}

/// Insert, overwrite or remove an optional component. Returns `true` on a write.
fn sync_optional<C: Component + PartialEq>(world: &mut World, entity: Entity, value: Option<C>) -> bool {
    match value {
        Some(value) => set_if_changed(world, entity, value),
        None => world
            .get_entity_mut(entity)
            .ok()
            .and_then(|mut e| e.take::<C>())
            .is_some(),
    }
}

fn dangling<C: Component>(world: &mut World, target: impl Fn(&C) -> Entity) -> Vec<Entity> {
    let mut query = world.query::<(Entity, &C)>();
    let world: &World = world;
    query
        .iter(world)
        .filter(|(_, component)| !world.entities().contains(target(component)))
        .map(|(entity, _)| entity)
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufferWrite {
    Unchanged,
    CopiedInPlace,
    Reallocated,
}

/// Copy `source` into `target`, reusing the allocation when lengths match.
fn copy_buffer<T: Copy + PartialEq>(target: &mut Vec<T>, source: &[T]) -> BufferWrite {
    if target.len() != source.len() {
        *target = source.to_vec();
        BufferWrite::Reallocated
    } else if target.as_slice() != source {
        target.copy_from_slice(source);
        BufferWrite::CopiedInPlace
    } else {
        BufferWrite::Unchanged
    }
}

#[cfg(test)]
#[path = "reconciler_tests.rs"]
mod tests;
