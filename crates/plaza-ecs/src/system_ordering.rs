//! System set definitions and ordering constraints for engine stages.
//!
//! Network input is drained before presence changes are applied, presence
//! before interpolation, edits before reconciliation, and publishing after
//! everything else in the tick.

use bevy_ecs::prelude::*;
use bevy_ecs::schedule::Schedule;

use crate::{EngineSchedule, EngineSchedules};

/// Sets for systems in the PreUpdate stage.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum PreUpdateSet {
    /// Drain the network inbox into the connection manager and snapshot buffer.
    NetworkDrain,
    /// Apply connection events: presence records, remote avatar spawn/despawn.
    Presence,
}

/// Sets for systems in the Update stage.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum UpdateSet {
    /// Gameplay and local input.
    Gameplay,
    /// Blend remote avatar snapshots into render transforms.
    Interpolation,
    /// Capture discrete editor edits into the replicated document.
    EditCapture,
    /// Project the replicated document onto the world.
    Reconcile,
}

/// Sets for systems in the PostUpdate stage.
#[derive(SystemSet, Debug, Clone, PartialEq, Eq, Hash)]
pub enum PostUpdateSet {
    /// Publish the local player's location record.
    Publish,
    /// Diagnostics and reporting.
    Diagnostics,
}

/// Configure ordering constraints for the PreUpdate stage.
pub fn configure_preupdate_ordering(schedule: &mut Schedule) {
    schedule.configure_sets(PreUpdateSet::NetworkDrain.before(PreUpdateSet::Presence));
}

/// Configure ordering constraints for the Update stage.
pub fn configure_update_ordering(schedule: &mut Schedule) {
    schedule.configure_sets((
        UpdateSet::Gameplay.before(UpdateSet::Interpolation),
        UpdateSet::Interpolation.before(UpdateSet::EditCapture),
        UpdateSet::EditCapture.before(UpdateSet::Reconcile),
    ));
}

/// Configure ordering constraints for the PostUpdate stage.
pub fn configure_postupdate_ordering(schedule: &mut Schedule) {
    schedule.configure_sets(PostUpdateSet::Publish.before(PostUpdateSet::Diagnostics));
}

/// Apply every stage's ordering constraints and force graph initialization,
/// surfacing ordering cycles at startup instead of on the first tick.
pub fn validate_schedules(schedules: &mut EngineSchedules, world: &mut World) {
    if let Some(schedule) = schedules.get_schedule_mut(&EngineSchedule::PreUpdate) {
        configure_preupdate_ordering(schedule);
    }
    if let Some(schedule) = schedules.get_schedule_mut(&EngineSchedule::Update) {
        configure_update_ordering(schedule);
    }
    if let Some(schedule) = schedules.get_schedule_mut(&EngineSchedule::PostUpdate) {
        configure_postupdate_ordering(schedule);
    }
    schedules.initialize_all(world);
}
