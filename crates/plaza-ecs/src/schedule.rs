//! Engine schedule labels and the ordered schedule runner.

use bevy_ecs::prelude::*;
use bevy_ecs::schedule::{IntoSystemConfigs, ScheduleLabel};

use crate::TimeRes;

/// Labels for each engine execution stage.
///
/// Stages run in the order listed, top to bottom, once per simulation tick.
#[derive(ScheduleLabel, Debug, Clone, PartialEq, Eq, Hash)]
pub enum EngineSchedule {
    /// Advance time, drain inbound network queues, apply presence changes.
    PreUpdate,
    /// Gameplay, remote-avatar interpolation, editor reconciliation.
    Update,
    /// Outbound publishing and diagnostics.
    PostUpdate,
}

/// Ordered collection of [`Schedule`]s that drives one simulation tick.
pub struct EngineSchedules {
    schedules: Vec<(EngineSchedule, Schedule)>,
}

impl EngineSchedules {
    /// Create an empty schedule per stage.
    pub fn new() -> Self {
        let stages = vec![
            EngineSchedule::PreUpdate,
            EngineSchedule::Update,
            EngineSchedule::PostUpdate,
        ];

        let schedules = stages
            .into_iter()
            .map(|label| (label, Schedule::default()))
            .collect();

        Self { schedules }
    }

    /// Register a system (or system tuple) into a specific stage.
    pub fn add_system<M>(&mut self, stage: EngineSchedule, system: impl IntoSystemConfigs<M>) {
        if let Some(schedule) = self.get_schedule_mut(&stage) {
            schedule.add_systems(system);
        }
    }

    /// Run all stages in order for one tick of `dt` seconds.
    ///
    /// Updates [`TimeRes`] first when the world has one, so every stage of
    /// the tick observes the same `now`.
    pub fn run(&mut self, world: &mut World, dt: f64) {
        if let Some(mut time) = world.get_resource_mut::<TimeRes>() {
            time.advance(dt);
        }
        for (_label, schedule) in &mut self.schedules {
            schedule.run(world);
        }
    }

    /// Returns a mutable reference to the schedule for a given stage.
    ///
    /// Useful for configuring system sets and ordering constraints.
    pub fn get_schedule_mut(&mut self, stage: &EngineSchedule) -> Option<&mut Schedule> {
        self.schedules
            .iter_mut()
            .find(|(label, _)| label == stage)
            .map(|(_, schedule)| schedule)
    }

    /// Force-initialize all schedules, validating the dependency graph.
    pub fn initialize_all(&mut self, world: &mut World) {
        for (_label, schedule) in &mut self.schedules {
            let _ = schedule.initialize(world);
        }
    }
}

impl Default for EngineSchedules {
    fn default() -> Self {
        Self::new()
    }
}
