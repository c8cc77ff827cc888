//! Known participants and their out-of-band metadata.

use std::collections::HashMap;
use std::time::Instant;

use bevy_ecs::prelude::*;
use plaza_net::{PlayerId, PresenceField};
use tracing::debug;

/// Metadata known about one participant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PresenceRecord {
    /// Resolved identity handle, e.g. `@alice@example.org`.
    pub handle: Option<String>,
    /// Free-form nickname.
    pub nickname: Option<String>,
    /// Avatar model reference.
    pub avatar_uri: Option<String>,
    /// Falling rather than grounded.
    pub falling: bool,
    /// Arrival time of the most recent location record.
    pub last_location_at: Option<Instant>,
}

impl PresenceRecord {
    fn apply(&mut self, field: PresenceField) {
        match field {
            PresenceField::Handle(handle) => self.handle = non_empty(handle),
            PresenceField::Nickname(nickname) => self.nickname = non_empty(nickname),
            PresenceField::AvatarUri(uri) => self.avatar_uri = non_empty(uri),
            PresenceField::Falling(falling) => self.falling = falling,
        }
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Username part of a handle: `@alice@example.org` and `alice@example.org`
/// both give `alice`.
pub fn handle_username(handle: &str) -> Option<&str> {
    let trimmed = handle.trim().trim_start_matches('@');
    let user = trimmed.split('@').next().unwrap_or_default();
    if user.is_empty() { None } else { Some(user) }
}

/// The local participant's own metadata, republished on every join.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalProfile {
    /// Identity handle.
    pub handle: Option<String>,
    /// Nickname.
    pub nickname: Option<String>,
    /// Avatar model reference.
    pub avatar_uri: Option<String>,
}

impl LocalProfile {
    /// Fields to publish, skipping unset ones.
    pub fn fields(&self) -> Vec<PresenceField> {
        let mut fields = Vec::with_capacity(3);
        if let Some(avatar) = &self.avatar_uri {
            fields.push(PresenceField::AvatarUri(avatar.clone()));
        }
        if let Some(nickname) = &self.nickname {
            fields.push(PresenceField::Nickname(nickname.clone()));
        }
        if let Some(handle) = &self.handle {
            fields.push(PresenceField::Handle(handle.clone()));
        }
        fields
    }

    fn record(&self) -> PresenceRecord {
        let mut record = PresenceRecord::default();
        for field in self.fields() {
            record.apply(field);
        }
        record
    }
}

/// Participants keyed by [`PlayerId`], including the local player once joined.
#[derive(Resource, Debug, Default)]
pub struct PresenceDirectory {
    records: HashMap<PlayerId, PresenceRecord>,
    local_player: Option<PlayerId>,
    profile: LocalProfile,
}

impl PresenceDirectory {
    /// Create a directory with the local profile.
    pub fn new(profile: LocalProfile) -> Self {
        Self {
            profile,
            ..Default::default()
        }
    }

    /// Register a participant with its initial metadata. Replaces any
    /// existing record for the id.
    pub fn join(&mut self, player: PlayerId, initial_data: Vec<PresenceField>) {
        let mut record = PresenceRecord::default();
        for field in initial_data {
            record.apply(field);
        }
        self.records.insert(player, record);
    }

    /// Set one field, creating the record if needed. Returns `true` if the
    /// record was created.
    pub fn upsert(&mut self, player: PlayerId, field: PresenceField) -> bool {
        let created = !self.records.contains_key(&player);
        self.records.entry(player).or_default().apply(field);
        created
    }

    /// Forget a participant.
    pub fn remove(&mut self, player: PlayerId) -> Option<PresenceRecord> {
        self.records.remove(&player)
    }

    /// Record the arrival time of a location update for a known participant.
    pub fn touch_location(&mut self, player: PlayerId, at: Instant) {
        if let Some(record) = self.records.get_mut(&player) {
            record.last_location_at = Some(at);
        }
    }

    /// Human label: handle username, else nickname, else `Guest <hex id>`.
    pub fn display_name(&self, player: PlayerId) -> String {
        let record = self.records.get(&player);
        record
            .and_then(|r| r.handle.as_deref().and_then(handle_username))
            .or_else(|| record.and_then(|r| r.nickname.as_deref()))
            .map(str::to_owned)
            .unwrap_or_else(|| format!("Guest {player}"))
    }

    /// Look up a record.
    pub fn get(&self, player: PlayerId) -> Option<&PresenceRecord> {
        self.records.get(&player)
    }

    /// Whether the participant is known.
    pub fn contains(&self, player: PlayerId) -> bool {
        self.records.contains_key(&player)
    }

    /// Number of known participants.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nobody is known.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Known remote participants, excluding the local player.
    pub fn remote_players(&self) -> impl Iterator<Item = PlayerId> + '_ {
        self.records
            .keys()
            .copied()
            .filter(move |id| Some(*id) != self.local_player)
    }

    /// The local player's id, while joined.
    pub fn local_player(&self) -> Option<PlayerId> {
        self.local_player
    }

    /// The local profile.
    pub fn profile(&self) -> &LocalProfile {
        &self.profile
    }

    /// Switch the local player's id.
    ///
    /// The previous id's record is evicted. When a new id is assigned, the
    /// local profile becomes its record and the returned fields must be
    /// republished under it. Returns nothing if the id did not change.
    pub fn set_local_player(&mut self, player: Option<PlayerId>) -> Vec<PresenceField> {
        if player == self.local_player {
            return Vec::new();
        }
        if let Some(previous) = self.local_player.take() {
            debug!(%previous, "evicting previous local player");
            self.records.remove(&previous);
        }
        self.local_player = player;
        match player {
            Some(current) => {
                self.records.insert(current, self.profile.record());
                self.profile.fields()
            }
            None => Vec::new(),
        }
    }

    /// Replace the local profile. Returns the fields to publish when joined.
    pub fn set_profile(&mut self, profile: LocalProfile) -> Vec<PresenceField> {
        self.profile = profile;
        match self.local_player {
            Some(current) => {
                self.records.insert(current, self.profile.record());
                self.profile.fields()
            }
            None => Vec::new(),
        }
    }

    /// Forget everyone except the local player. Returns the removed ids.
    pub fn clear_remote(&mut self) -> Vec<PlayerId> {
        let local = self.local_player;
        let removed: Vec<PlayerId> = self
            .records
            .keys()
            .copied()
            .filter(|id| Some(*id) != local)
            .collect();
        for id in &removed {
            self.records.remove(id);
        }
        removed
    }
}
