//! Collaborative scene editing: a replicated document of nodes, meshes and
//! scenes, and its projection onto the simulation world.
//!
//! Data flows one way per direction. [`DocumentReconciler`] copies the
//! document into entities in [`UpdateSet::Reconcile`]; user edits are queued
//! as [`EditEvent`]s and written back as partial patches by [`capture_edits`]
//! in [`UpdateSet::EditCapture`]. The [`EntityIdentityMap`] is the only link
//! between document ids and entities.

pub mod components;
pub mod document;
pub mod edits;
pub mod identity;
pub mod ids;
pub mod reconciler;
pub mod systems;

use std::time::Duration;

use bevy_ecs::prelude::*;
use plaza_ecs::{EngineSchedule, EngineSchedules, UpdateSet};

pub use components::{
    Collider, EditorMesh, EditorNode, EditorScene, Locked, MeshGeometry, MeshInstance, NodeParent,
    RigidBody, SceneRoots,
};
pub use document::{
    BodyType, ChangeKind, ChangeSet, ColliderDesc, DocumentError, DocumentOp, LOCKED_KEY,
    MeshPatch, NodePatch, RigidBodyDesc, ScenePatch, SubscriptionId, SyncedDocument, SyncedMesh,
    SyncedNode, SyncedScene,
};
pub use edits::{EditChange, EditEvent, EditQueue, EditReport, apply_edits, capture_edits};
pub use identity::{EntityIdentityMap, IdentityViolation};
pub use ids::DocId;
pub use reconciler::{DocumentReconciler, ReconcileReport, ReferenceKind, UnresolvedReference};
pub use systems::{ReconcileTimer, reconcile_document};

/// Settings for [`install`].
#[derive(Debug, Clone)]
pub struct EditorSettings {
    /// Minimum time between reconciliation passes.
    pub reconcile_interval: Duration,
}

impl Default for EditorSettings {
    fn default() -> Self {
        Self {
            reconcile_interval: Duration::from_millis(100),
        }
    }
}

/// Insert the editor resources and register its systems.
pub fn install(world: &mut World, schedules: &mut EngineSchedules, settings: EditorSettings) {
    world.insert_resource(SyncedDocument::new());
    world.insert_resource(EntityIdentityMap::new());
    world.insert_resource(DocumentReconciler::new());
    world.insert_resource(EditQueue::default());
    world.insert_resource(ReconcileTimer::new(settings.reconcile_interval));

    schedules.add_system(
        EngineSchedule::Update,
        capture_edits.in_set(UpdateSet::EditCapture),
    );
    schedules.add_system(
        EngineSchedule::Update,
        reconcile_document.in_set(UpdateSet::Reconcile),
    );
}
