//! Per-player double buffer of received poses.
//!
//! Each decoded [`LocationRecord`] shifts `current` into `previous` and
//! stamps the arrival instant. Records are never queued: whatever arrived
//! last by wall clock is authoritative, so reordered or duplicate datagrams
//! simply overwrite. Once a player leaves, records for its id are refused
//! until the id joins again, so a late datagram cannot resurrect the old pose
//! under a reused id.

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use bevy_ecs::prelude::*;
use plaza_ecs::Transform;
use plaza_net::{LocationRecord, PlayerId};

/// The two most recent poses received for one player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseSnapshot {
    /// Pose before the latest record.
    pub previous: Transform,
    /// Latest received pose.
    pub current: Transform,
    /// Wall-clock arrival of `current`.
    pub received_at: Instant,
}

/// Snapshots keyed by player. Accepts records for players the presence
/// directory does not know yet, but not for players that left.
#[derive(Resource, Debug, Default)]
pub struct SnapshotBuffer {
    entries: HashMap<PlayerId, PoseSnapshot>,
    departed: HashSet<PlayerId>,
}

impl SnapshotBuffer {
    /// Store a record that arrived at `now`.
    ///
    /// The first record for a player fills both slots so interpolation starts
    /// at rest instead of sliding in from the origin. Returns `false` if the
    /// player has left and the record was dropped.
    pub fn record(&mut self, record: &LocationRecord, now: Instant) -> bool {
        if self.departed.contains(&record.player_id) {
            return false;
        }
        let pose = Transform::from_translation_rotation(record.position, record.rotation);
        self.entries
            .entry(record.player_id)
            .and_modify(|snapshot| {
                snapshot.previous = snapshot.current;
                snapshot.current = pose;
                snapshot.received_at = now;
            })
            .or_insert(PoseSnapshot {
                previous: pose,
                current: pose,
                received_at: now,
            });
        true
    }

    /// Snapshot for a player, if any record arrived.
    pub fn get(&self, player: PlayerId) -> Option<&PoseSnapshot> {
        self.entries.get(&player)
    }

    /// Drop a player's snapshot.
    pub fn remove(&mut self, player: PlayerId) -> Option<PoseSnapshot> {
        self.entries.remove(&player)
    }

    /// Drop a player's snapshot and refuse its records until [`Self::readmit`].
    pub fn depart(&mut self, player: PlayerId) {
        self.entries.remove(&player);
        self.departed.insert(player);
    }

    /// Accept records for `player` again, starting from an empty snapshot.
    pub fn readmit(&mut self, player: PlayerId) {
        if self.departed.remove(&player) {
            self.entries.remove(&player);
        }
    }

    /// Drop everything, including departures.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.departed.clear();
    }

    /// Players with at least one record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no records are held.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
