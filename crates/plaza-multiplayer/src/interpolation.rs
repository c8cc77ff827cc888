//! Smoothing of remote poses between the last two received snapshots.
//!
//! The interpolation rate is half the publish rate, so the rendered pose lags
//! by one full update interval and always blends between two real samples.

use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use glam::Quat;
use plaza_ecs::{RenderTransform, TimeRes, Transform};

use crate::remote::RemotePlayer;
use crate::snapshot::{PoseSnapshot, SnapshotBuffer};

/// Blend settings derived from the network publish rate.
#[derive(Resource, Debug, Clone, Copy, PartialEq)]
pub struct Interpolator {
    period: Duration,
}

impl Interpolator {
    /// Interpolator for peers publishing at `publish_rate_hz`.
    pub fn from_publish_rate(publish_rate_hz: u32) -> Self {
        let interpolation_hz = (f64::from(publish_rate_hz) / 2.0).max(0.5);
        Self {
            period: Duration::from_secs_f64(1.0 / interpolation_hz),
        }
    }

    /// Time taken to blend from `previous` to `current`.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Blend factor in `[0, 1]` for a snapshot observed at `now`.
    pub fn alpha(&self, snapshot: &PoseSnapshot, now: Instant) -> f32 {
        let elapsed = now.saturating_duration_since(snapshot.received_at);
        (elapsed.as_secs_f64() / self.period.as_secs_f64()).clamp(0.0, 1.0) as f32
    }

    /// Smoothed pose of a snapshot at `now`.
    pub fn sample(&self, snapshot: &PoseSnapshot, now: Instant) -> Transform {
        blend(&snapshot.previous, &snapshot.current, self.alpha(snapshot, now))
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::from_publish_rate(20)
    }
}

/// Linear translation and scale, shortest-arc spherical rotation.
pub fn blend(from: &Transform, to: &Transform, t: f32) -> Transform {
    Transform {
        translation: from.translation.lerp(to.translation, t),
        rotation: shortest_arc_slerp(from.rotation, to.rotation, t),
        scale: from.scale.lerp(to.scale, t),
    }
}

/// Spherical interpolation that never takes the long way round.
///
/// Inputs come off a quantized wire and are renormalised first; a degenerate
/// quaternion is treated as identity.
pub fn shortest_arc_slerp(from: Quat, to: Quat, t: f32) -> Quat {
    let from = normalized(from);
    let mut to = normalized(to);
    if from.dot(to) < 0.0 {
        to = -to;
    }
    from.slerp(to, t)
}

fn normalized(q: Quat) -> Quat {
    let length = q.length();
    if length.is_finite() && length > 1e-6 {
        q / length
    } else {
        Quat::IDENTITY
    }
}

/// Writes the smoothed pose of every remote player with a snapshot into its
/// [`RenderTransform`]. Players without a snapshot keep their spawn pose.
pub fn interpolate_remote_players(
    time: Res<TimeRes>,
    interpolator: Res<Interpolator>,
    snapshots: Res<SnapshotBuffer>,
    mut players: Query<(&RemotePlayer, &mut RenderTransform)>,
) {
    for (player, mut render) in &mut players {
        if let Some(snapshot) = snapshots.get(player.0) {
            render.0 = interpolator.sample(snapshot, time.now);
        }
    }
}
