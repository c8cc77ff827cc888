//! Time resource for the ECS world.

use std::time::Instant;

use bevy_ecs::prelude::*;

/// Per-tick timing, advanced by [`EngineSchedules::run`](crate::EngineSchedules::run).
///
/// `now` is a wall-clock instant captured at the start of the tick; network
/// arrival stamps and interpolation both compare against it so every system
/// in one tick agrees on the current time.
#[derive(Resource, Debug, Clone)]
pub struct TimeRes {
    /// Seconds covered by the current tick.
    pub delta: f32,
    /// Seconds simulated since the world was created.
    pub elapsed: f64,
    /// Number of ticks run.
    pub tick: u64,
    /// Wall-clock instant at the start of the current tick.
    pub now: Instant,
}

impl TimeRes {
    /// Start a new tick of `dt` seconds, sampling the wall clock.
    pub fn advance(&mut self, dt: f64) {
        self.advance_to(dt, Instant::now());
    }

    /// Start a new tick with an explicit wall-clock instant.
    pub fn advance_to(&mut self, dt: f64, now: Instant) {
        self.delta = dt as f32;
        self.elapsed += dt;
        self.tick += 1;
        self.now = now;
    }
}

impl Default for TimeRes {
    fn default() -> Self {
        Self {
            delta: 0.0,
            elapsed: 0.0,
            tick: 0,
            now: Instant::now(),
        }
    }
}
