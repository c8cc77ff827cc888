//! ECS world setup, frame schedules, shared component types, and entity
//! lifecycle helpers.
//!
//! The whole client simulation runs on one thread: network input is drained
//! in [`EngineSchedule::PreUpdate`], gameplay, interpolation and document
//! reconciliation run in [`EngineSchedule::Update`], and outbound publishing
//! happens in [`EngineSchedule::PostUpdate`].

mod components;
mod lifecycle;
mod schedule;
mod system_ordering;
mod time;
mod world;

pub use components::{Name, RenderTransform, Transform};
pub use lifecycle::{despawn_entity, set_if_changed, spawn_entity};
pub use schedule::{EngineSchedule, EngineSchedules};
pub use system_ordering::{
    PostUpdateSet, PreUpdateSet, UpdateSet, configure_postupdate_ordering,
    configure_preupdate_ordering, configure_update_ordering, validate_schedules,
};
pub use time::TimeRes;
pub use world::{create_world, register_core_resources};
