use std::sync::{Arc, Mutex};

use serde_json::json;

use super::*;

fn id(s: &str) -> DocId {
    DocId::from(s)
}

fn add_node(doc: &mut SyncedDocument, node: SyncedNode) -> ChangeSet {
    doc.apply(DocumentOp::AddNode { node }).unwrap()
}

/// a <- b <- c, plus an unrelated root d.
fn chain() -> SyncedDocument {
    let mut doc = SyncedDocument::new();
    add_node(&mut doc, SyncedNode::with_id("a", "A"));
    add_node(&mut doc, SyncedNode::with_id("b", "B").child_of(&id("a")));
    add_node(&mut doc, SyncedNode::with_id("c", "C").child_of(&id("b")));
    add_node(&mut doc, SyncedNode::with_id("d", "D"));
    doc
}

// -- Add / edit --

#[test]
fn test_add_bumps_version_and_reports_id() {
    let mut doc = SyncedDocument::new();
    let changes = add_node(&mut doc, SyncedNode::with_id("a", "A"));
    assert_eq!(changes.version, 1);
    assert_eq!(changes.changed, BTreeSet::from([id("a")]));
    assert_eq!(doc.version(), 1);
}

#[test]
fn test_duplicate_add_is_rejected() {
    let mut doc = chain();
    let err = doc
        .apply(DocumentOp::AddMesh {
            mesh: SyncedMesh::with_id("a", "clash"),
        })
        .unwrap_err();
    assert_eq!(err, DocumentError::DuplicateId(id("a")));
}

#[test]
fn test_edit_is_a_partial_merge() {
    let mut doc = chain();
    doc.apply(DocumentOp::EditNode {
        id: id("c"),
        patch: NodePatch {
            name: Some("renamed".into()),
            ..Default::default()
        },
    })
    .unwrap();
    doc.apply(DocumentOp::EditNode {
        id: id("c"),
        patch: NodePatch {
            translation: Some(Vec3::new(1.0, 2.0, 3.0)),
            ..Default::default()
        },
    })
    .unwrap();

    let node = doc.node(&id("c")).unwrap();
    assert_eq!(node.name, "renamed");
    assert_eq!(node.translation, Vec3::new(1.0, 2.0, 3.0));
    assert_eq!(node.parent, Some(id("b")));
}

#[test]
fn test_noop_edit_keeps_version() {
    let mut doc = chain();
    let before = doc.version();
    let changes = doc
        .apply(DocumentOp::EditNode {
            id: id("a"),
            patch: NodePatch {
                name: Some("A".into()),
                ..Default::default()
            },
        })
        .unwrap();
    assert!(changes.is_empty());
    assert_eq!(doc.version(), before);
}

#[test]
fn test_extras_merge_and_null_deletes() {
    let mut doc = chain();
    let mut extras = BTreeMap::new();
    extras.insert(LOCKED_KEY.to_string(), json!(true));
    extras.insert("tag".to_string(), json!("spawn"));
    doc.apply(DocumentOp::EditNode {
        id: id("a"),
        patch: NodePatch {
            extras,
            ..Default::default()
        },
    })
    .unwrap();
    assert!(doc.node(&id("a")).unwrap().is_locked());

    let mut extras = BTreeMap::new();
    extras.insert(LOCKED_KEY.to_string(), Value::Null);
    doc.apply(DocumentOp::EditNode {
        id: id("a"),
        patch: NodePatch {
            extras,
            ..Default::default()
        },
    })
    .unwrap();

    let node = doc.node(&id("a")).unwrap();
    assert!(!node.is_locked());
    assert_eq!(node.extras.get("tag"), Some(&json!("spawn")));
}

#[test]
fn test_edit_unknown_node_fails() {
    let mut doc = SyncedDocument::new();
    let err = doc
        .apply(DocumentOp::EditNode {
            id: id("ghost"),
            patch: NodePatch::default(),
        })
        .unwrap_err();
    assert_eq!(err, DocumentError::UnknownNode(id("ghost")));
}

// -- Removal --

#[test]
fn test_remove_cascades_to_descendants_and_retires_ids() {
    let mut doc = chain();
    let changes = doc.apply(DocumentOp::RemoveNode { id: id("b") }).unwrap();

    assert_eq!(changes.removed, BTreeSet::from([id("b"), id("c")]));
    assert!(doc.node(&id("a")).is_some());
    assert!(doc.node(&id("d")).is_some());
    assert!(doc.is_retired(&id("b")));
    assert!(doc.is_retired(&id("c")));

    let err = doc
        .apply(DocumentOp::AddNode {
            node: SyncedNode::with_id("c", "again"),
        })
        .unwrap_err();
    assert_eq!(err, DocumentError::Retired(id("c")));
}

#[test]
fn test_remove_node_drops_scene_roots() {
    let mut doc = chain();
    doc.apply(DocumentOp::AddScene {
        scene: SyncedScene::with_id("s", "Main", vec![id("a"), id("d")]),
    })
    .unwrap();

    let changes = doc.apply(DocumentOp::RemoveNode { id: id("a") }).unwrap();
    assert!(changes.changed.contains(&id("s")));
    assert_eq!(doc.scene(&id("s")).unwrap().roots, vec![id("d")]);
}

#[test]
fn test_remove_mesh_clears_node_references() {
    let mut doc = SyncedDocument::new();
    doc.apply(DocumentOp::AddMesh {
        mesh: SyncedMesh::with_id("m", "cube"),
    })
    .unwrap();
    add_node(&mut doc, SyncedNode::with_id("n", "N").with_mesh(&id("m")));

    let changes = doc.apply(DocumentOp::RemoveMesh { id: id("m") }).unwrap();
    assert!(changes.removed.contains(&id("m")));
    assert!(changes.changed.contains(&id("n")));
    assert_eq!(doc.node(&id("n")).unwrap().mesh, None);
}

// -- Subscriptions --

#[test]
fn test_subscribers_see_updates_and_removal() {
    let mut doc = chain();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    doc.subscribe(id("c"), move |target, kind| {
        sink.lock().unwrap().push((target.clone(), kind));
    });

    doc.apply(DocumentOp::EditNode {
        id: id("c"),
        patch: NodePatch::transform(&Transform::from_translation(Vec3::X)),
    })
    .unwrap();
    doc.apply(DocumentOp::EditNode {
        id: id("d"),
        patch: NodePatch::transform(&Transform::from_translation(Vec3::Y)),
    })
    .unwrap();
    doc.apply(DocumentOp::RemoveNode { id: id("b") }).unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            (id("c"), ChangeKind::Updated),
            (id("c"), ChangeKind::Removed)
        ]
    );
}

#[test]
fn test_unsubscribe_stops_notifications() {
    let mut doc = chain();
    let count = Arc::new(Mutex::new(0));
    let sink = Arc::clone(&count);
    let sub = doc.subscribe(id("a"), move |_, _| *sink.lock().unwrap() += 1);

    assert!(doc.unsubscribe(sub));
    assert!(!doc.unsubscribe(sub));
    doc.apply(DocumentOp::EditNode {
        id: id("a"),
        patch: NodePatch::parent(Some(id("d"))),
    })
    .unwrap();
    assert_eq!(*count.lock().unwrap(), 0);
}

// -- Serialization --

#[test]
fn test_patch_null_parent_means_clear() {
    let clear: NodePatch = serde_json::from_value(json!({ "parent": null })).unwrap();
    assert_eq!(clear.parent, Some(None));

    let untouched: NodePatch = serde_json::from_value(json!({ "name": "x" })).unwrap();
    assert_eq!(untouched.parent, None);
    assert_eq!(untouched.name.as_deref(), Some("x"));
}

#[test]
fn test_ops_use_camel_case_tags() {
    let op = DocumentOp::RemoveNode { id: id("b") };
    let value = serde_json::to_value(&op).unwrap();
    assert_eq!(value, json!({ "op": "removeNode", "id": "b" }));

    let parsed: DocumentOp = serde_json::from_value(json!({
        "op": "editNode",
        "id": "a",
        "patch": { "mesh": null }
    }))
    .unwrap();
    assert_eq!(
        parsed,
        DocumentOp::EditNode {
            id: id("a"),
            patch: NodePatch {
                mesh: Some(None),
                ..Default::default()
            },
        }
    );
}
