//! Core ECS components shared by the network and editor crates.
//!
//! [`Transform`] is the authoritative pose of an entity. Remote avatars also
//! carry a [`RenderTransform`], which is the smoothed pose the renderer reads;
//! the interpolator writes only that one.

use bevy_ecs::prelude::*;
use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};

/// Translation, rotation and scale of an entity.
#[derive(Component, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    /// Position in world units (meters).
    pub translation: Vec3,
    /// Orientation as a unit quaternion.
    pub rotation: Quat,
    /// Per-axis scale. Unit scale when absent from a source.
    pub scale: Vec3,
}

impl Transform {
    /// No translation, identity rotation, unit scale.
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
        scale: Vec3::ONE,
    };

    /// Creates a transform at `translation` with identity rotation.
    pub fn from_translation(translation: Vec3) -> Self {
        Self {
            translation,
            ..Self::IDENTITY
        }
    }

    /// Creates a unit-scale transform from a position and rotation.
    pub fn from_translation_rotation(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
            scale: Vec3::ONE,
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Pose presented to the renderer. Derived each tick, never authoritative.
#[derive(Component, Clone, Copy, Debug, PartialEq, Default)]
pub struct RenderTransform(pub Transform);

/// Human-readable name for an entity. Shown in the editor outliner and in
/// log messages; never used as an identifier.
#[derive(Component, Clone, Debug, PartialEq, Eq, Default)]
pub struct Name(pub String);

impl Name {
    /// Creates a new [`Name`] from anything that converts to `String`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}
