//! Layout viewport resizes

use replay_dom::{Document, EventTarget, EventType, ListenerOptions};

use super::throttle::{Throttle, ThrottleOptions};
use super::viewports::viewport_dimension;
use super::{add_event_listeners, ListenerTracker, RecordCallback};
use crate::records::{IncrementalData, Record};
use crate::scope::timestamp_now;

pub const VIEWPORT_RESIZE_THROTTLE_MS: f64 = 200.0;

pub fn track_viewport_resize(doc: &Document, emit: RecordCallback) -> ListenerTracker {
    let throttle = Throttle::new(
        VIEWPORT_RESIZE_THROTTLE_MS,
        ThrottleOptions::default(),
        move |doc: &Document, ()| {
            emit(Record::incremental(
                timestamp_now(doc),
                IncrementalData::ViewportResize(viewport_dimension(doc)),
            ));
        },
    );

    let listener_throttle = throttle.clone();
    let listeners = add_event_listeners(
        doc,
        EventTarget::Window,
        &[EventType::Resize],
        ListenerOptions::capture_passive(),
        move |doc, _| listener_throttle.call(doc, ()),
    );

    let doc = doc.clone();
    ListenerTracker::new(listeners).with_cleanup(move || throttle.cancel(&doc))
}
