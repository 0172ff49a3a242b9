//! Scroll positions of the page and of scrollable elements
//!
//! Every recorded position is also kept in the scope's scroll-position table,
//! which later full snapshots read instead of the live layout.

use std::rc::Rc;

use replay_dom::{Document, Event, EventType};

use super::throttle::{Throttle, ThrottleOptions};
use super::{add_document_listeners, ListenerTracker, RecordCallback};
use crate::records::{IncrementalData, Record, ScrollData};
use crate::scope::{timestamp_now, RecordScope};
use crate::serialize::ScrollPosition;

pub const SCROLL_THROTTLE_MS: f64 = 100.0;

pub fn track_scroll(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let throttle = Throttle::new(
        SCROLL_THROTTLE_MS,
        ThrottleOptions::default(),
        move |doc: &Document, event: Rc<Event>| {
            if let Some(record) = scroll_record(doc, &scope, &event) {
                emit(record);
            }
        },
    );

    let listener_throttle = throttle.clone();
    let listeners = add_document_listeners(doc, &[EventType::Scroll], move |doc, event| {
        listener_throttle.call(doc, Rc::clone(event));
    });

    let doc = doc.clone();
    ListenerTracker::new(listeners).with_cleanup(move || throttle.cancel(&doc))
}

fn scroll_record(doc: &Document, scope: &RecordScope, event: &Event) -> Option<Record> {
    let target = event.target.node()?;
    let id = scope.interaction_target_id(doc, target)?;
    let (left, top) = doc.scroll(target);
    let position = ScrollPosition {
        scroll_left: left.round() as i64,
        scroll_top: top.round() as i64,
    };
    scope.scroll_positions.borrow_mut().set(target, position);
    Some(Record::incremental(
        timestamp_now(doc),
        IncrementalData::Scroll(ScrollData {
            id,
            x: position.scroll_left,
            y: position.scroll_top,
        }),
    ))
}
