//! World to document: explicit editor edits become partial node patches.
//!
//! Only discrete edit events flow this way (a gizmo drag ending, a rename,
//! a reparent in the outliner, a lock toggle). Component writes made by the
//! reconciler are never observed, so a projection cannot echo back into the
//! document.

use bevy_ecs::prelude::*;
use plaza_ecs::Transform;
use serde_json::Value;
use tracing::{debug, warn};

use crate::document::{DocumentOp, LOCKED_KEY, NodePatch, SyncedDocument};
use crate::identity::EntityIdentityMap;

/// A finished user edit on a node entity.
#[derive(Debug, Clone, PartialEq)]
pub enum EditChange {
    /// Gizmo drag ended at this pose.
    TransformCommitted(Transform),
    /// Node renamed.
    Renamed(String),
    /// Node moved under another node entity, or to the root.
    Reparented(Option<Entity>),
    /// Lock toggled.
    LockChanged(bool),
}

/// Edit on one entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EditEvent {
    /// Edited entity.
    pub entity: Entity,
    /// What changed.
    pub change: EditChange,
}

impl EditEvent {
    /// Convenience constructor.
    pub fn new(entity: Entity, change: EditChange) -> Self {
        Self { entity, change }
    }
}

/// Edits waiting to be written to the document.
#[derive(Resource, Debug, Default)]
pub struct EditQueue {
    events: Vec<EditEvent>,
}

impl EditQueue {
    /// Queue an edit.
    pub fn push(&mut self, event: EditEvent) {
        self.events.push(event);
    }

    /// Take every queued edit in arrival order.
    pub fn drain(&mut self) -> Vec<EditEvent> {
        std::mem::take(&mut self.events)
    }

    /// Number of queued edits.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// Outcome of [`apply_edits`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EditReport {
    /// Edits that changed the document.
    pub applied: usize,
    /// Edits dropped: unbound entity, locked node, or nothing to change.
    pub skipped: usize,
    /// Edits the document refused.
    pub failed: usize,
}

/// Write edits to the document as partial patches holding only the fields
/// that differ from the current node.
pub fn apply_edits(
    document: &mut SyncedDocument,
    map: &EntityIdentityMap,
    events: impl IntoIterator<Item = EditEvent>,
) -> EditReport {
    let mut report = EditReport::default();
    for event in events {
        let Some(id) = map.resolve_document_id(event.entity) else {
            debug!(entity = ?event.entity, "edit on an unbound entity");
            report.skipped += 1;
            continue;
        };
        let Some(node) = document.node(id) else {
            debug!(%id, "edit on something that is not a node");
            report.skipped += 1;
            continue;
        };

        let mut patch = NodePatch::default();
        match event.change {
            EditChange::TransformCommitted(transform) => {
                if node.is_locked() {
                    debug!(%id, "ignoring transform edit on a locked node");
                    report.skipped += 1;
                    continue;
                }
                patch.translation = (node.translation != transform.translation)
                    .then_some(transform.translation);
                patch.rotation = (node.rotation != transform.rotation).then_some(transform.rotation);
                patch.scale = (node.scale != transform.scale).then_some(transform.scale);
            }
            EditChange::Renamed(name) => {
                patch.name = (node.name != name).then_some(name);
            }
            EditChange::Reparented(parent) => {
                let parent_id = match parent {
                    Some(entity) => match map.resolve_document_id(entity) {
                        Some(parent_id) => Some(parent_id.clone()),
                        None => {
                            debug!(%id, ?entity, "reparent onto an unbound entity");
                            report.skipped += 1;
                            continue;
                        }
                    },
                    None => None,
                };
                if node.parent != parent_id {
                    patch.parent = Some(parent_id);
                }
            }
            EditChange::LockChanged(locked) => {
                if node.is_locked() != locked {
                    let value = if locked { Value::Bool(true) } else { Value::Null };
                    patch.extras.insert(LOCKED_KEY.to_string(), value);
                }
            }
        }

        if patch.is_empty() {
            report.skipped += 1;
            continue;
        }
        let id = id.clone();
        match document.apply(DocumentOp::EditNode { id: id.clone(), patch }) {
            Ok(_) => report.applied += 1,
            Err(err) => {
                warn!(%id, %err, "document refused editor edit");
                report.failed += 1;
            }
        }
    }
    report
}

/// Drain the [`EditQueue`] into the [`SyncedDocument`].
pub fn capture_edits(
    mut document: ResMut<SyncedDocument>,
    map: Res<EntityIdentityMap>,
    mut queue: ResMut<EditQueue>,
) {
    if queue.is_empty() {
        return;
    }
    let report = apply_edits(&mut document, &map, queue.drain());
    debug!(
        applied = report.applied,
        skipped = report.skipped,
        failed = report.failed,
        "captured editor edits"
    );
}
