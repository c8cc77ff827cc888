//! The single point where network input enters the simulation.
//!
//! [`drain_network`] empties the inbox once per tick: location datagrams go
//! through the codec into the [`SnapshotBuffer`], everything else is fed to
//! the [`ConnectionManager`]. [`apply_connection_events`] then turns the
//! manager's lifecycle events into presence, avatar and chat updates.

use std::ops::{Deref, DerefMut};

use bevy_ecs::prelude::*;
use plaza_ecs::{Name, TimeRes};
use plaza_net::{
    ConnectionEvent, ConnectionManager, ControlMessage, DisconnectReason, NetEvent, NetEventKind,
    NetworkInbox, PlayerId, decode_location,
};
use tracing::{debug, info, trace, warn};

use crate::chat::{ChatEntry, ChatLog};
use crate::presence::PresenceDirectory;
use crate::remote::RemotePlayers;
use crate::snapshot::SnapshotBuffer;

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// The connection, owned by the world so systems can reach it.
#[derive(Resource)]
pub struct Connection(pub ConnectionManager);

impl Deref for Connection {
    type Target = ConnectionManager;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Connection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

/// Receiving end of the network queue.
#[derive(Resource)]
pub struct Inbox(pub NetworkInbox);

/// Counters for inbound location datagrams.
#[derive(Resource, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatagramStats {
    /// Records stored in the snapshot buffer.
    pub accepted: u64,
    /// Datagrams that failed to decode.
    pub malformed: u64,
    /// Datagrams from a superseded connection.
    pub stale: u64,
    /// Records echoing the local player.
    pub own: u64,
    /// Late records for players that already left.
    pub departed: u64,
}

/// Session-level notifications for the composition root.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The local player joined under this id.
    Joined(PlayerId),
    /// The connection went down.
    Lost(DisconnectReason),
}

/// Queue of [`SessionEvent`]s, drained by the caller.
#[derive(Resource, Debug, Default)]
pub struct SessionEvents {
    events: Vec<SessionEvent>,
}

impl SessionEvents {
    /// Take all queued events.
    pub fn drain(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    fn push(&mut self, event: SessionEvent) {
        self.events.push(event);
    }
}

// ---------------------------------------------------------------------------
// Systems
// ---------------------------------------------------------------------------

/// Empty the network inbox.
pub fn drain_network(
    time: Res<TimeRes>,
    inbox: Res<Inbox>,
    mut connection: ResMut<Connection>,
    mut snapshots: ResMut<SnapshotBuffer>,
    mut presence: ResMut<PresenceDirectory>,
    mut stats: ResMut<DatagramStats>,
) {
    for event in inbox.0.drain() {
        let (epoch, bytes) = match event {
            NetEvent {
                epoch,
                kind: NetEventKind::Datagram(bytes),
            } => (epoch, bytes),
            other => {
                connection.handle_event(other);
                continue;
            }
        };
        if !connection.accepts_epoch(epoch) {
            stats.stale += 1;
            continue;
        }
        let record = match decode_location(&bytes) {
            Ok(record) => record,
            Err(e) => {
                warn!(error = %e, "dropping malformed location datagram");
                stats.malformed += 1;
                continue;
            }
        };
        if Some(record.player_id) == connection.local_player() {
            stats.own += 1;
            continue;
        }
        if !snapshots.record(&record, time.now) {
            trace!(player = %record.player_id, "dropping location for departed player");
            stats.departed += 1;
            continue;
        }
        trace!(player = %record.player_id, "location record");
        presence.touch_location(record.player_id, time.now);
        stats.accepted += 1;
    }
}

/// Apply connection lifecycle events to presence, avatars and chat.
#[allow(clippy::too_many_arguments)]
pub fn apply_connection_events(
    mut commands: Commands,
    time: Res<TimeRes>,
    mut connection: ResMut<Connection>,
    mut presence: ResMut<PresenceDirectory>,
    mut snapshots: ResMut<SnapshotBuffer>,
    mut remotes: ResMut<RemotePlayers>,
    mut chat: ResMut<ChatLog>,
    mut session: ResMut<SessionEvents>,
) {
    for event in connection.drain_events() {
        match event {
            ConnectionEvent::StateChanged(state) => debug!(?state, "connection state"),
            ConnectionEvent::Joined { player_id } => {
                info!(player = %player_id, "joined world");
                if remotes.despawn(&mut commands, player_id).is_some() {
                    debug!(player = %player_id, "removed avatar now owned locally");
                }
                snapshots.remove(player_id);
                for field in presence.set_local_player(Some(player_id)) {
                    if let Err(e) = connection.send(ControlMessage::PlayerData(field)) {
                        warn!(error = %e, "could not republish presence");
                    }
                }
                session.push(SessionEvent::Joined(player_id));
            }
            ConnectionEvent::PeerJoined {
                player_id,
                initial_data,
            } => {
                if Some(player_id) == presence.local_player() {
                    continue;
                }
                presence.join(player_id, initial_data);
                snapshots.readmit(player_id);
                let name = presence.display_name(player_id);
                info!(player = %player_id, %name, "peer joined");
                let entity = remotes.ensure(&mut commands, player_id, name.clone());
                commands.entity(entity).insert(Name(name));
            }
            ConnectionEvent::PeerLeft { player_id } => {
                info!(player = %player_id, "peer left");
                presence.remove(player_id);
                snapshots.depart(player_id);
                remotes.despawn(&mut commands, player_id);
            }
            ConnectionEvent::PresenceUpdated { player_id, field } => {
                if Some(player_id) == presence.local_player() {
                    continue;
                }
                presence.upsert(player_id, field);
                let name = presence.display_name(player_id);
                let entity = remotes.ensure(&mut commands, player_id, name.clone());
                commands.entity(entity).insert(Name(name));
            }
            ConnectionEvent::Chat { player_id, text } => {
                chat.push(ChatEntry {
                    player_id,
                    sender: presence.display_name(player_id),
                    text,
                    received_at: time.now,
                });
            }
            ConnectionEvent::ProducerCreated { kind, producer_id } => {
                info!(?kind, %producer_id, "producer created");
            }
            ConnectionEvent::ProduceFailed { kind, reason } => {
                warn!(?kind, %reason, "produce failed");
            }
            ConnectionEvent::Failed { reason } | ConnectionEvent::Disconnected { reason } => {
                let despawned = remotes.despawn_all(&mut commands);
                presence.clear_remote();
                presence.set_local_player(None);
                snapshots.clear();
                debug!(despawned, %reason, "cleared session state");
                session.push(SessionEvent::Lost(reason));
            }
        }
    }
}

#[cfg(test)]
#[path = "network_tests.rs"]
mod tests;
