//! Outbound location stream for the local avatar.

use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use plaza_ecs::{TimeRes, Transform};
use plaza_net::{ConnectionError, ConnectionState, DeviceError, encode_location};
use tracing::{debug, trace};

use crate::network::Connection;
use crate::remote::LocalAvatar;

/// Rate limiter for the local location record.
#[derive(Resource, Debug, Clone)]
pub struct LocationPublisher {
    interval: Duration,
    last_sent: Option<Instant>,
    sent: u64,
}

impl LocationPublisher {
    /// Publisher emitting at most `publish_rate_hz` records per second.
    pub fn new(publish_rate_hz: u32) -> Self {
        Self {
            interval: Duration::from_secs_f64(1.0 / f64::from(publish_rate_hz.max(1))),
            last_sent: None,
            sent: 0,
        }
    }

    /// Minimum time between records.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a record is due at `now`.
    pub fn is_due(&self, now: Instant) -> bool {
        self.last_sent
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval)
    }

    /// Start the next interval at `now`.
    pub fn mark_sent(&mut self, now: Instant) {
        self.last_sent = Some(now);
        self.sent += 1;
    }

    /// Records handed to the device.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

/// Send one record for the local avatar when connected and due.
pub fn publish_local_location(
    time: Res<TimeRes>,
    mut publisher: ResMut<LocationPublisher>,
    mut connection: ResMut<Connection>,
    avatars: Query<&Transform, With<LocalAvatar>>,
) {
    if connection.state() != ConnectionState::Connected {
        return;
    }
    let Some(player) = connection.local_player() else {
        return;
    };
    let Ok(transform) = avatars.get_single() else {
        return;
    };
    if !publisher.is_due(time.now) {
        return;
    }
    let record = encode_location(player, transform.translation, transform.rotation);
    match connection.send_location(&record) {
        Ok(()) => publisher.mark_sent(time.now),
        Err(ConnectionError::Device(DeviceError::WouldBlock)) => {
            trace!("location send would block");
        }
        Err(e) => debug!(error = %e, "location send failed"),
    }
}
