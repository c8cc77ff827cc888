//! Components the reconciler writes onto editor entities.
//!
//! References between entities are plain [`Entity`] handles resolved through
//! the identity map; none of these carry document ids.

use bevy_ecs::prelude::*;

use crate::document::{ColliderDesc, RigidBodyDesc};

/// Marks an entity projected from a document node.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorNode;

/// Marks an entity projected from a document mesh.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorMesh;

/// Marks an entity projected from a document scene.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditorScene;

/// Parent node entity.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeParent(pub Entity);

/// Mesh entity drawn at this node.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct MeshInstance(pub Entity);

/// Geometry buffers of a mesh entity.
#[derive(Component, Debug, Clone, Default, PartialEq)]
pub struct MeshGeometry {
    /// Vertex positions, three floats per vertex.
    pub positions: Vec<f32>,
    /// Vertex normals, three floats per vertex.
    pub normals: Vec<f32>,
    /// Triangle indices.
    pub indices: Vec<u32>,
}

/// Collision shape for the physics collaborator.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct Collider(pub ColliderDesc);

/// Rigid body for the physics collaborator.
#[derive(Component, Debug, Clone, Copy, PartialEq)]
pub struct RigidBody(pub RigidBodyDesc);

/// Node is locked against gizmo edits.
#[derive(Component, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Locked;

/// Resolved root node entities of a scene, in document order.
#[derive(Component, Debug, Clone, Default, PartialEq, Eq)]
pub struct SceneRoots(pub Vec<Entity>);
