//! Scheduled reconciliation.

use std::time::{Duration, Instant};

use bevy_ecs::prelude::*;
use plaza_ecs::TimeRes;

use crate::document::SyncedDocument;
use crate::identity::EntityIdentityMap;
use crate::reconciler::DocumentReconciler;

/// Paces reconciliation passes on the simulation clock.
#[derive(Resource, Debug, Clone)]
pub struct ReconcileTimer {
    interval: Duration,
    last_run: Option<Instant>,
}

impl ReconcileTimer {
    /// Timer allowing one pass per `interval`.
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_run: None,
        }
    }

    /// Minimum time between passes.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns `true` and restarts the interval if a pass is due at `now`.
    pub fn poll(&mut self, now: Instant) -> bool {
        let due = self
            .last_run
            .is_none_or(|last| now.saturating_duration_since(last) >= self.interval);
        if due {
            self.last_run = Some(now);
        }
        due
    }
}

/// Exclusive system projecting the document onto the world.
///
/// Runs when the interval has elapsed and the document changed since the
/// last pass, or the last pass left references to retry.
pub fn reconcile_document(world: &mut World) {
    let now = world.resource::<TimeRes>().now;
    let due = world
        .resource::<DocumentReconciler>()
        .needs_pass(world.resource::<SyncedDocument>());
    if !due || !world.resource_mut::<ReconcileTimer>().poll(now) {
        return;
    }

    world.resource_scope(|world, document: Mut<SyncedDocument>| {
        world.resource_scope(|world, mut map: Mut<EntityIdentityMap>| {
            world.resource_scope(|world, mut reconciler: Mut<DocumentReconciler>| {
                reconciler.sync_to_world(&document, world, &mut map);
            });
        });
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_fires_once_per_interval() {
        let start = Instant::now();
        let mut timer = ReconcileTimer::new(Duration::from_millis(100));
        assert!(timer.poll(start));
        assert!(!timer.poll(start + Duration::from_millis(50)));
        assert!(timer.poll(start + Duration::from_millis(100)));
        assert!(!timer.poll(start + Duration::from_millis(150)));
    }
}
