//! Client-side multiplayer: who is in the world, where their avatars are,
//! and how network input reaches the simulation.
//!
//! Everything here runs on the simulation thread. Network tasks only push
//! into the [`Inbox`]; [`drain_network`] empties it in
//! [`PreUpdateSet::NetworkDrain`], [`apply_connection_events`] updates
//! presence and avatars in [`PreUpdateSet::Presence`], the interpolator runs
//! in [`UpdateSet::Interpolation`], and the local location record goes out in
//! [`PostUpdateSet::Publish`].

pub mod chat;
pub mod interpolation;
pub mod network;
pub mod presence;
pub mod publisher;
pub mod remote;
pub mod snapshot;

use bevy_ecs::prelude::*;
use plaza_ecs::{EngineSchedule, EngineSchedules, PostUpdateSet, PreUpdateSet, UpdateSet};
use plaza_net::{ConnectionManager, NetworkInbox};

pub use chat::{ChatEntry, ChatLog, DEFAULT_CHAT_CAPACITY, send_chat};
pub use interpolation::{Interpolator, blend, interpolate_remote_players, shortest_arc_slerp};
pub use network::{
    Connection, DatagramStats, Inbox, SessionEvent, SessionEvents, apply_connection_events,
    drain_network,
};
pub use presence::{LocalProfile, PresenceDirectory, PresenceRecord, handle_username};
pub use publisher::{LocationPublisher, publish_local_location};
pub use remote::{LocalAvatar, RemotePlayer, RemotePlayers};
pub use snapshot::{PoseSnapshot, SnapshotBuffer};

/// Settings for [`install`].
#[derive(Debug, Clone)]
pub struct MultiplayerSettings {
    /// Location records per second, for both publishing and interpolation.
    pub publish_rate_hz: u32,
    /// Local self metadata.
    pub profile: LocalProfile,
    /// Chat lines kept.
    pub chat_capacity: usize,
}

impl Default for MultiplayerSettings {
    fn default() -> Self {
        Self {
            publish_rate_hz: 20,
            profile: LocalProfile::default(),
            chat_capacity: DEFAULT_CHAT_CAPACITY,
        }
    }
}

/// Insert the multiplayer resources and register its systems.
pub fn install(
    world: &mut World,
    schedules: &mut EngineSchedules,
    settings: MultiplayerSettings,
    connection: ConnectionManager,
    inbox: NetworkInbox,
) {
    world.insert_resource(Connection(connection));
    world.insert_resource(Inbox(inbox));
    world.insert_resource(PresenceDirectory::new(settings.profile));
    world.insert_resource(SnapshotBuffer::default());
    world.insert_resource(RemotePlayers::default());
    world.insert_resource(Interpolator::from_publish_rate(settings.publish_rate_hz));
    world.insert_resource(LocationPublisher::new(settings.publish_rate_hz));
    world.insert_resource(ChatLog::with_capacity(settings.chat_capacity));
    world.insert_resource(DatagramStats::default());
    world.insert_resource(SessionEvents::default());

    schedules.add_system(
        EngineSchedule::PreUpdate,
        drain_network.in_set(PreUpdateSet::NetworkDrain),
    );
    schedules.add_system(
        EngineSchedule::PreUpdate,
        apply_connection_events.in_set(PreUpdateSet::Presence),
    );
    schedules.add_system(
        EngineSchedule::Update,
        interpolate_remote_players.in_set(UpdateSet::Interpolation),
    );
    schedules.add_system(
        EngineSchedule::PostUpdate,
        publish_local_location.in_set(PostUpdateSet::Publish),
    );
}
