//! Fixed-timestep simulation loop.
//!
//! Wall-clock frame time goes into an accumulator and the simulation steps
//! at a fixed rate, so interpolation and publish pacing see a steady tick no
//! matter how long a frame took.

use std::time::{Duration, Instant};

use tracing::warn;

/// Fixed simulation timestep: 60 Hz.
pub const FIXED_DT: f64 = 1.0 / 60.0;

/// Longest frame time accepted before clamping. A longer stall drops
/// simulated time instead of running dozens of catch-up steps.
pub const MAX_FRAME_TIME: f64 = 0.25;

/// Accumulator state for a fixed-rate simulation.
#[derive(Debug)]
pub struct FixedStepLoop {
    previous_time: Instant,
    accumulator: f64,
    total_sim_time: f64,
    step_count: u64,
}

impl FixedStepLoop {
    /// Start measuring from now.
    pub fn new() -> Self {
        Self {
            previous_time: Instant::now(),
            accumulator: 0.0,
            total_sim_time: 0.0,
            step_count: 0,
        }
    }

    /// Measure the time since the previous call and run the steps it covers.
    /// Returns the number of steps run.
    pub fn tick(&mut self, step: impl FnMut(f64)) -> u32 {
        let now = Instant::now();
        let frame_time = now.duration_since(self.previous_time).as_secs_f64();
        self.previous_time = now;
        self.advance(frame_time, step)
    }

    /// Feed `frame_time` seconds and call `step(FIXED_DT)` for every whole
    /// timestep accumulated. Returns the number of steps run.
    pub fn advance(&mut self, frame_time: f64, mut step: impl FnMut(f64)) -> u32 {
        let mut frame_time = frame_time.max(0.0);
        if frame_time > MAX_FRAME_TIME {
            warn!(
                "Frame time {:.1}ms exceeds maximum, clamping to {:.1}ms",
                frame_time * 1000.0,
                MAX_FRAME_TIME * 1000.0
            );
            frame_time = MAX_FRAME_TIME;
        }

        self.accumulator += frame_time;
        let mut steps = 0;
        while self.accumulator >= FIXED_DT {
            step(FIXED_DT);
            self.total_sim_time += FIXED_DT;
            self.accumulator -= FIXED_DT;
            self.step_count += 1;
            steps += 1;
        }
        steps
    }

    /// Time until the next step is due.
    pub fn until_next_step(&self) -> Duration {
        Duration::from_secs_f64((FIXED_DT - self.accumulator).max(0.0))
    }

    /// Steps run since creation.
    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    /// Simulated seconds since creation.
    pub fn total_sim_time(&self) -> f64 {
        self.total_sim_time
    }
}

impl Default for FixedStepLoop {
    fn default() -> Self {
        Self::new()
    }
}
