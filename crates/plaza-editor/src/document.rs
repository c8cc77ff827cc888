//! Replicated scene document: nodes, meshes and scenes keyed by [`DocId`].
//!
//! Every mutation goes through [`SyncedDocument::apply`], which returns the
//! ids it touched and bumps the document version. Removed ids are retired and
//! can never be added again. Removing a node removes its whole subtree.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};
use plaza_ecs::Transform;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::DocId;

/// Extras key holding the node lock flag.
pub const LOCKED_KEY: &str = "locked";

// ---------------------------------------------------------------------------
// Physics descriptors
// ---------------------------------------------------------------------------

/// Collision shape attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape", rename_all = "camelCase")]
pub enum ColliderDesc {
    /// Axis-aligned box.
    Cuboid {
        /// Half-extents along each axis.
        half_extents: Vec3,
    },
    /// Sphere.
    Sphere {
        /// Radius.
        radius: f32,
    },
    /// Capsule aligned along the Y axis.
    Capsule {
        /// Half the height of the cylindrical part.
        half_height: f32,
        /// Radius of the hemispheres.
        radius: f32,
    },
    /// Triangle mesh taken from the node's mesh.
    TriMesh,
}

/// Rigid body type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BodyType {
    /// Simulated, affected by forces.
    Dynamic,
    /// Immovable.
    Static,
    /// Moved by animation or scripts.
    Kinematic,
}

/// Rigid body attached to a node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RigidBodyDesc {
    /// Body type.
    pub body_type: BodyType,
    /// Mass in kilograms.
    pub mass: f32,
}

// ---------------------------------------------------------------------------
// Document entities
// ---------------------------------------------------------------------------

/// A node in the scene tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedNode {
    /// Durable id.
    pub id: DocId,
    /// Display name.
    pub name: String,
    /// Local translation.
    pub translation: Vec3,
    /// Local rotation.
    pub rotation: Quat,
    /// Local scale.
    pub scale: Vec3,
    /// Parent node, `None` for roots.
    pub parent: Option<DocId>,
    /// Mesh drawn at this node.
    pub mesh: Option<DocId>,
    /// Collision shape.
    pub collider: Option<ColliderDesc>,
    /// Rigid body.
    pub rigid_body: Option<RigidBodyDesc>,
    /// Open-ended flags and metadata.
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,
}

impl SyncedNode {
    /// Root node with a fresh id at the identity pose.
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(DocId::generate(), name)
    }

    /// Root node with a given id at the identity pose.
    pub fn with_id(id: impl Into<DocId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            translation: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            scale: Vec3::ONE,
            parent: None,
            mesh: None,
            collider: None,
            rigid_body: None,
            extras: BTreeMap::new(),
        }
    }

    /// Builder: set the parent.
    pub fn child_of(mut self, parent: &DocId) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Builder: set the mesh.
    pub fn with_mesh(mut self, mesh: &DocId) -> Self {
        self.mesh = Some(mesh.clone());
        self
    }

    /// Builder: set the translation.
    pub fn at(mut self, translation: Vec3) -> Self {
        self.translation = translation;
        self
    }

    /// Pose as an ECS transform.
    pub fn transform(&self) -> Transform {
        Transform {
            translation: self.translation,
            rotation: self.rotation,
            scale: self.scale,
        }
    }

    /// Whether the `locked` extra is `true`.
    pub fn is_locked(&self) -> bool {
        self.extras
            .get(LOCKED_KEY)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// Mesh geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedMesh {
    /// Durable id.
    pub id: DocId,
    /// Display name.
    pub name: String,
    /// Vertex positions, three floats per vertex.
    pub positions: Vec<f32>,
    /// Vertex normals, three floats per vertex.
    pub normals: Vec<f32>,
    /// Triangle indices.
    pub indices: Vec<u32>,
}

impl SyncedMesh {
    /// Empty mesh with a given id.
    pub fn with_id(id: impl Into<DocId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            positions: Vec::new(),
            normals: Vec::new(),
            indices: Vec::new(),
        }
    }
}

/// A scene: an ordered list of root nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncedScene {
    /// Durable id.
    pub id: DocId,
    /// Display name.
    pub name: String,
    /// Root nodes shown in this scene.
    pub roots: Vec<DocId>,
}

impl SyncedScene {
    /// Scene with a given id and roots.
    pub fn with_id(id: impl Into<DocId>, name: impl Into<String>, roots: Vec<DocId>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            roots,
        }
    }
}

// ---------------------------------------------------------------------------
// Patches
// ---------------------------------------------------------------------------

/// Present-but-null becomes `Some(None)`; absence stays `None` via `default`.
fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Partial node update. Absent fields are left alone.
///
/// For the optional references `Some(None)` clears the field. Extras merge
/// key by key and a JSON `null` removes the key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodePatch {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New translation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub translation: Option<Vec3>,
    /// New rotation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Quat>,
    /// New scale.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scale: Option<Vec3>,
    /// New parent.
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub parent: Option<Option<DocId>>,
    /// New mesh.
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub mesh: Option<Option<DocId>>,
    /// New collider.
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub collider: Option<Option<ColliderDesc>>,
    /// New rigid body.
    #[serde(deserialize_with = "double_option", skip_serializing_if = "Option::is_none")]
    pub rigid_body: Option<Option<RigidBodyDesc>>,
    /// Extras to merge.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub extras: BTreeMap<String, Value>,
}

impl NodePatch {
    /// Patch setting the full pose.
    pub fn transform(transform: &Transform) -> Self {
        Self {
            translation: Some(transform.translation),
            rotation: Some(transform.rotation),
            scale: Some(transform.scale),
            ..Default::default()
        }
    }

    /// Patch setting only the parent.
    pub fn parent(parent: Option<DocId>) -> Self {
        Self {
            parent: Some(parent),
            ..Default::default()
        }
    }

    /// Whether the patch sets nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Merge into `node`. Returns `true` if anything changed.
    pub fn apply_to(&self, node: &mut SyncedNode) -> bool {
        let mut changed = false;
        changed |= assign(&mut node.name, &self.name);
        changed |= assign(&mut node.translation, &self.translation);
        changed |= assign(&mut node.rotation, &self.rotation);
        changed |= assign(&mut node.scale, &self.scale);
        changed |= assign(&mut node.parent, &self.parent);
        changed |= assign(&mut node.mesh, &self.mesh);
        changed |= assign(&mut node.collider, &self.collider);
        changed |= assign(&mut node.rigid_body, &self.rigid_body);
        for (key, value) in &self.extras {
            if value.is_null() {
                changed |= node.extras.remove(key).is_some();
            } else if node.extras.get(key) != Some(value) {
                node.extras.insert(key.clone(), value.clone());
                changed = true;
            }
        }
        changed
    }
}

/// Partial mesh update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MeshPatch {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New positions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub positions: Option<Vec<f32>>,
    /// New normals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub normals: Option<Vec<f32>>,
    /// New indices.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub indices: Option<Vec<u32>>,
}

impl MeshPatch {
    fn apply_to(&self, mesh: &mut SyncedMesh) -> bool {
        assign(&mut mesh.name, &self.name)
            | assign(&mut mesh.positions, &self.positions)
            | assign(&mut mesh.normals, &self.normals)
            | assign(&mut mesh.indices, &self.indices)
    }
}

/// Partial scene update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenePatch {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New roots.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roots: Option<Vec<DocId>>,
}

impl ScenePatch {
    fn apply_to(&self, scene: &mut SyncedScene) -> bool {
        assign(&mut scene.name, &self.name) | assign(&mut scene.roots, &self.roots)
    }
}

fn assign<T: Clone + PartialEq>(target: &mut T, value: &Option<T>) -> bool {
    match value {
        Some(value) if target != value => {
            *target = value.clone();
            true
        }
        _ => false,
    }
}

// ---------------------------------------------------------------------------
// Operations and results
// ---------------------------------------------------------------------------

/// One document mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum DocumentOp {
    /// Insert a node.
    AddNode {
        /// The node.
        node: SyncedNode,
    },
    /// Patch a node.
    EditNode {
        /// Target.
        id: DocId,
        /// Fields to change.
        patch: NodePatch,
    },
    /// Remove a node and its descendants.
    RemoveNode {
        /// Target.
        id: DocId,
    },
    /// Insert a mesh.
    AddMesh {
        /// The mesh.
        mesh: SyncedMesh,
    },
    /// Patch a mesh.
    EditMesh {
        /// Target.
        id: DocId,
        /// Fields to change.
        patch: MeshPatch,
    },
    /// Remove a mesh. Nodes using it lose their mesh reference.
    RemoveMesh {
        /// Target.
        id: DocId,
    },
    /// Insert a scene.
    AddScene {
        /// The scene.
        scene: SyncedScene,
    },
    /// Patch a scene.
    EditScene {
        /// Target.
        id: DocId,
        /// Fields to change.
        patch: ScenePatch,
    },
}

/// Ids touched by one [`SyncedDocument::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// Document version after the operation.
    pub version: u64,
    /// Ids added or modified.
    pub changed: BTreeSet<DocId>,
    /// Ids removed (and now retired).
    pub removed: BTreeSet<DocId>,
}

impl ChangeSet {
    /// Whether nothing changed.
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}

/// What happened to a subscribed id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    /// Added or modified.
    Updated,
    /// Removed.
    Removed,
}

/// Errors from [`SyncedDocument::apply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    /// An entity with this id already exists.
    #[error("id {0} is already in use")]
    DuplicateId(DocId),
    /// The id belonged to a removed entity.
    #[error("id {0} was removed and cannot be reused")]
    Retired(DocId),
    /// No node with this id.
    #[error("unknown node {0}")]
    UnknownNode(DocId),
    /// No mesh with this id.
    #[error("unknown mesh {0}")]
    UnknownMesh(DocId),
    /// No scene with this id.
    #[error("unknown scene {0}")]
    UnknownScene(DocId),
}

/// Handle returned by [`SyncedDocument::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type ChangeCallback = Box<dyn FnMut(&DocId, ChangeKind) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    target: DocId,
    callback: ChangeCallback,
}

// ---------------------------------------------------------------------------
// SyncedDocument
// ---------------------------------------------------------------------------

/// Versioned document of nodes, meshes and scenes.
#[derive(Resource, Default)]
pub struct SyncedDocument {
    nodes: BTreeMap<DocId, SyncedNode>,
    meshes: BTreeMap<DocId, SyncedMesh>,
    scenes: BTreeMap<DocId, SyncedScene>,
    retired: HashSet<DocId>,
    version: u64,
    subscribers: Vec<Subscriber>,
    next_subscription: u64,
}

impl fmt::Debug for SyncedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncedDocument")
            .field("version", &self.version)
            .field("nodes", &self.nodes.len())
            .field("meshes", &self.meshes.len())
            .field("scenes", &self.scenes.len())
            .field("retired", &self.retired.len())
            .field("subscribers", &self.subscribers.len())
            .finish()
    }
}

impl SyncedDocument {
    /// Empty document at version 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one operation.
    ///
    /// The version increases only when something changed. Subscribers of the
    /// touched ids are notified before this returns.
    pub fn apply(&mut self, op: DocumentOp) -> Result<ChangeSet, DocumentError> {
        let mut changes = ChangeSet::default();
        match op {
            DocumentOp::AddNode { node } => {
                self.check_new(&node.id)?;
                changes.changed.insert(node.id.clone());
                self.nodes.insert(node.id.clone(), node);
            }
            DocumentOp::EditNode { id, patch } => {
                self.check_not_retired(&id)?;
                let node = self
                    .nodes
                    .get_mut(&id)
                    .ok_or_else(|| DocumentError::UnknownNode(id.clone()))?;
                if patch.apply_to(node) {
                    changes.changed.insert(id);
                }
            }
            DocumentOp::RemoveNode { id } => {
                self.check_not_retired(&id)?;
                if !self.nodes.contains_key(&id) {
                    return Err(DocumentError::UnknownNode(id));
                }
                self.remove_subtree(&id, &mut changes);
            }
            DocumentOp::AddMesh { mesh } => {
                self.check_new(&mesh.id)?;
                changes.changed.insert(mesh.id.clone());
                self.meshes.insert(mesh.id.clone(), mesh);
            }
            DocumentOp::EditMesh { id, patch } => {
                self.check_not_retired(&id)?;
                let mesh = self
                    .meshes
                    .get_mut(&id)
                    .ok_or_else(|| DocumentError::UnknownMesh(id.clone()))?;
                if patch.apply_to(mesh) {
                    changes.changed.insert(id);
                }
            }
            DocumentOp::RemoveMesh { id } => {
                self.check_not_retired(&id)?;
                if self.meshes.remove(&id).is_none() {
                    return Err(DocumentError::UnknownMesh(id));
                }
                for node in self.nodes.values_mut() {
                    if node.mesh.as_ref() == Some(&id) {
                        node.mesh = None;
                        changes.changed.insert(node.id.clone());
                    }
                }
                self.retired.insert(id.clone());
                changes.removed.insert(id);
            }
            DocumentOp::AddScene { scene } => {
                self.check_new(&scene.id)?;
                changes.changed.insert(scene.id.clone());
                self.scenes.insert(scene.id.clone(), scene);
            }
            DocumentOp::EditScene { id, patch } => {
                self.check_not_retired(&id)?;
                let scene = self
                    .scenes
                    .get_mut(&id)
                    .ok_or_else(|| DocumentError::UnknownScene(id.clone()))?;
                if patch.apply_to(scene) {
                    changes.changed.insert(id);
                }
            }
        }

        if !changes.is_empty() {
            self.version += 1;
        }
        changes.version = self.version;
        self.notify(&changes);
        Ok(changes)
    }

    /// Call `callback` whenever `target` is updated or removed.
    pub fn subscribe(
        &mut self,
        target: DocId,
        callback: impl FnMut(&DocId, ChangeKind) + Send + Sync + 'static,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.subscribers.push(Subscriber {
            id,
            target,
            callback: Box::new(callback),
        });
        id
    }

    /// Drop a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, subscription: SubscriptionId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != subscription);
        self.subscribers.len() != before
    }

    /// Current version.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Look up a node.
    pub fn node(&self, id: &DocId) -> Option<&SyncedNode> {
        self.nodes.get(id)
    }

    /// Look up a mesh.
    pub fn mesh(&self, id: &DocId) -> Option<&SyncedMesh> {
        self.meshes.get(id)
    }

    /// Look up a scene.
    pub fn scene(&self, id: &DocId) -> Option<&SyncedScene> {
        self.scenes.get(id)
    }

    /// Nodes in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &SyncedNode> {
        self.nodes.values()
    }

    /// Meshes in id order.
    pub fn meshes(&self) -> impl Iterator<Item = &SyncedMesh> {
        self.meshes.values()
    }

    /// Scenes in id order.
    pub fn scenes(&self) -> impl Iterator<Item = &SyncedScene> {
        self.scenes.values()
    }

    /// Whether any live node, mesh or scene has this id.
    pub fn contains(&self, id: &DocId) -> bool {
        self.nodes.contains_key(id) || self.meshes.contains_key(id) || self.scenes.contains_key(id)
    }

    /// Whether the id was removed.
    pub fn is_retired(&self, id: &DocId) -> bool {
        self.retired.contains(id)
    }

    /// Direct children of a node, in id order.
    pub fn children_of(&self, id: &DocId) -> Vec<DocId> {
        self.nodes
            .values()
            .filter(|n| n.parent.as_ref() == Some(id))
            .map(|n| n.id.clone())
            .collect()
    }

    fn check_new(&self, id: &DocId) -> Result<(), DocumentError> {
        self.check_not_retired(id)?;
        if self.contains(id) {
            return Err(DocumentError::DuplicateId(id.clone()));
        }
        Ok(())
    }

    fn check_not_retired(&self, id: &DocId) -> Result<(), DocumentError> {
        if self.retired.contains(id) {
            return Err(DocumentError::Retired(id.clone()));
        }
        Ok(())
    }

    fn remove_subtree(&mut self, root: &DocId, changes: &mut ChangeSet) {
        let mut doomed = BTreeSet::from([root.clone()]);
        let mut frontier = vec![root.clone()];
        while let Some(parent) = frontier.pop() {
            for child in self.children_of(&parent) {
                if doomed.insert(child.clone()) {
                    frontier.push(child);
                }
            }
        }
        debug!(root = %root, count = doomed.len(), "removing node subtree");

        for id in &doomed {
            self.nodes.remove(id);
            self.retired.insert(id.clone());
        }
        for scene in self.scenes.values_mut() {
            let before = scene.roots.len();
            scene.roots.retain(|r| !doomed.contains(r));
            if scene.roots.len() != before {
                changes.changed.insert(scene.id.clone());
            }
        }
        changes.removed.extend(doomed);
    }

    fn notify(&mut self, changes: &ChangeSet) {
        for subscriber in &mut self.subscribers {
            if changes.changed.contains(&subscriber.target) {
                (subscriber.callback)(&subscriber.target, ChangeKind::Updated);
            } else if changes.removed.contains(&subscriber.target) {
                (subscriber.callback)(&subscriber.target, ChangeKind::Removed);
            }
        }
        // A removed id never comes back.
        self.subscribers
            .retain(|s| !changes.removed.contains(&s.target));
    }
}

#[cfg(test)]
#[path = "document_tests.rs"]
mod tests;
