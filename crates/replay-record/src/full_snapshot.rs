//! Full snapshots
//!
//! A full snapshot is the group of records a player needs to rebuild the
//! page from scratch: `Meta`, `Focus`, `FullSnapshot` and, where the
//! platform has one, `VisualViewport`. One is taken when recording starts and
//! another at every new view.

use replay_dom::Document;

use crate::lifecycle::{LifeCycle, LifeCycleEvent, LifeCycleEventType, Subscription};
use crate::observers::{viewport_dimension, visual_viewport_data};
use crate::records::{FocusData, FullSnapshotData, InitialOffset, MetaData, Record, TimeStamp};
use crate::scope::RecordScope;
use crate::serialize::{serialize_document, SerializationStatus};
use crate::shadow_roots::ShadowRootsController;

/// Records of one full snapshot, all stamped with `timestamp`
pub fn take_full_snapshot(
    doc: &Document,
    scope: &RecordScope,
    status: SerializationStatus,
    shadow_roots: &ShadowRootsController,
    timestamp: TimeStamp,
) -> Vec<Record> {
    scope.forget_dropped_nodes(doc);
    let dimension = viewport_dimension(doc);
    let window = doc.window();
    let mut records = vec![
        Record::Meta {
            timestamp,
            data: MetaData {
                href: window.href.clone(),
                width: dimension.width,
                height: dimension.height,
            },
        },
        Record::Focus {
            timestamp,
            data: FocusData {
                has_focus: window.has_focus,
            },
        },
    ];

    match serialize_document(doc, scope, status, Some(shadow_roots)) {
        Some(node) => records.push(Record::FullSnapshot {
            timestamp,
            data: FullSnapshotData {
                node,
                initial_offset: InitialOffset {
                    left: window.scroll_x.round() as i64,
                    top: window.scroll_y.round() as i64,
                },
            },
        }),
        None => tracing::warn!("document could not be serialized"),
    }

    if let Some(viewport) = window.visual_viewport {
        records.push(Record::VisualViewport {
            timestamp,
            data: visual_viewport_data(&viewport),
        });
    }
    records
}

/// Take the initial full snapshot now, then one per created view
pub fn start_full_snapshots(
    doc: &Document,
    scope: RecordScope,
    shadow_roots: ShadowRootsController,
    lifecycle: &LifeCycle,
    flush_mutations: impl Fn() + 'static,
    callback: impl Fn(Vec<Record>) + 'static,
    timestamp: TimeStamp,
) -> Subscription {
    callback(take_full_snapshot(
        doc,
        &scope,
        SerializationStatus::InitialFullSnapshot,
        &shadow_roots,
        timestamp,
    ));

    let doc = doc.clone();
    lifecycle.subscribe(LifeCycleEventType::ViewCreated, move |event| {
        let LifeCycleEvent::ViewCreated(view) = event else {
            return;
        };
        flush_mutations();
        callback(take_full_snapshot(
            &doc,
            &scope,
            SerializationStatus::SubsequentFullSnapshot,
            &shadow_roots,
            view.start_timestamp,
        ));
    })
}
