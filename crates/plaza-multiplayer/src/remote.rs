//! Remote avatar entities and the id-to-entity map that tracks them.

use std::collections::HashMap;

use bevy_ecs::prelude::*;
use plaza_ecs::{Name, RenderTransform, Transform};
use plaza_net::PlayerId;

/// Marks an entity as the avatar of a remote participant.
#[derive(Component, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemotePlayer(pub PlayerId);

/// Marks the local player's avatar, whose [`Transform`] is published.
#[derive(Component, Debug, Clone, Copy, Default)]
pub struct LocalAvatar;

/// Maps participant ids to their avatar entities.
#[derive(Resource, Debug, Default)]
pub struct RemotePlayers {
    entities: HashMap<PlayerId, Entity>,
}

impl RemotePlayers {
    /// Avatar entity for a participant, spawning one at the default pose if
    /// none exists.
    pub fn ensure(&mut self, commands: &mut Commands, player: PlayerId, name: String) -> Entity {
        *self.entities.entry(player).or_insert_with(|| {
            commands
                .spawn((
                    RemotePlayer(player),
                    Transform::IDENTITY,
                    RenderTransform::default(),
                    Name(name),
                ))
                .id()
        })
    }

    /// Despawn a participant's avatar. Returns the despawned entity.
    pub fn despawn(&mut self, commands: &mut Commands, player: PlayerId) -> Option<Entity> {
        let entity = self.entities.remove(&player)?;
        commands.entity(entity).despawn();
        Some(entity)
    }

    /// Despawn every avatar.
    pub fn despawn_all(&mut self, commands: &mut Commands) -> usize {
        let count = self.entities.len();
        for (_, entity) in self.entities.drain() {
            commands.entity(entity).despawn();
        }
        count
    }

    /// Avatar entity for a participant.
    pub fn get(&self, player: PlayerId) -> Option<Entity> {
        self.entities.get(&player).copied()
    }

    /// Number of avatars.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Whether there are no avatars.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}
