//! Visual viewport (pinch zoom and pan)

use replay_dom::{Document, EventTarget, EventType, ListenerOptions};

use super::throttle::{Throttle, ThrottleOptions};
use super::viewports::visual_viewport_data;
use super::{add_event_listeners, ListenerTracker, RecordCallback};
use crate::records::Record;
use crate::scope::timestamp_now;

const VISUAL_VIEWPORT_THROTTLE_MS: f64 = 200.0;

/// No-op on platforms without a visual viewport
pub fn track_visual_viewport(doc: &Document, emit: RecordCallback) -> ListenerTracker {
    if doc.window().visual_viewport.is_none() {
        return ListenerTracker::noop();
    }

    let throttle = Throttle::new(
        VISUAL_VIEWPORT_THROTTLE_MS,
        ThrottleOptions::leading_only(),
        move |doc: &Document, ()| {
            if let Some(viewport) = doc.window().visual_viewport {
                emit(Record::VisualViewport {
                    timestamp: timestamp_now(doc),
                    data: visual_viewport_data(&viewport),
                });
            }
        },
    );

    let listener_throttle = throttle.clone();
    let listeners = add_event_listeners(
        doc,
        EventTarget::VisualViewport,
        &[EventType::Resize, EventType::Scroll],
        ListenerOptions::capture_passive(),
        move |doc, _| listener_throttle.call(doc, ()),
    );

    let doc = doc.clone();
    ListenerTracker::new(listeners).with_cleanup(move || throttle.cancel(&doc))
}
