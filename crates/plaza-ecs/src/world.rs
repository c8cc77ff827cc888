//! World factory function and core resource registration.

use bevy_ecs::prelude::*;

use crate::TimeRes;

/// Registers the engine-wide resources every system may read.
///
/// Network, presence and editor resources are inserted by their own crates
/// once the composition root has built them.
pub fn register_core_resources(world: &mut World) {
    world.insert_resource(TimeRes::default());
}

/// Creates and returns an ECS world with the core resources pre-inserted.
pub fn create_world() -> World {
    let mut world = World::new();
    register_core_resources(&mut world);
    world
}
