//! Entity lifecycle utilities for code holding `&mut World` directly
//! (reconciliation, setup, tests).

use bevy_ecs::prelude::*;

/// Spawns an entity with the given component bundle and returns its Entity ID.
pub fn spawn_entity<B: Bundle>(world: &mut World, bundle: B) -> Entity {
    world.spawn(bundle).id()
}

/// Despawns an entity immediately. Safe to call with a nonexistent entity;
/// returns `false` if the entity was already despawned or never existed.
pub fn despawn_entity(world: &mut World, entity: Entity) -> bool {
    world.despawn(entity)
}

/// Writes `value` onto `entity` only when it differs from the current
/// component (or the component is missing), so unchanged data does not trip
/// `Changed<T>` filters. Returns `true` if a write happened, `false` if the
/// value was equal or the entity does not exist.
pub fn set_if_changed<C>(world: &mut World, entity: Entity, value: C) -> bool
where
    C: Component + PartialEq,
{
    let Ok(mut entity_mut) = world.get_entity_mut(entity) else {
        return false;
    };
    match entity_mut.get_mut::<C>() {
        Some(mut current) => {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        }
        None => {
            entity_mut.insert(value);
            true
        }
    }
}
