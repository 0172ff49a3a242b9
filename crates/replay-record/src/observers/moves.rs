//! Mouse and touch moves, sampled at most once per
//! [`MOUSE_MOVE_THROTTLE_MS`]

use std::rc::Rc;

use replay_dom::{Document, Event, EventType};

use super::mouse_interaction::compute_coordinates;
use super::throttle::{Throttle, ThrottleOptions};
use super::{add_document_listeners, ListenerTracker, RecordCallback};
use crate::records::{IncrementalData, MousePosition, MousemoveData, Record};
use crate::scope::{timestamp_now, RecordScope};

pub const MOUSE_MOVE_THROTTLE_MS: f64 = 50.0;

pub fn track_move(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let throttle = Throttle::new(
        MOUSE_MOVE_THROTTLE_MS,
        ThrottleOptions::leading_only(),
        move |doc: &Document, event: Rc<Event>| {
            if let Some(record) = move_record(doc, &scope, &event) {
                emit(record);
            }
        },
    );

    let listener_throttle = throttle.clone();
    let listeners = add_document_listeners(doc, &[EventType::MouseMove, EventType::TouchMove], move |doc, event| {
        listener_throttle.call(doc, Rc::clone(event));
    });

    let doc = doc.clone();
    ListenerTracker::new(listeners).with_cleanup(move || throttle.cancel(&doc))
}

fn move_record(doc: &Document, scope: &RecordScope, event: &Event) -> Option<Record> {
    let target = event.target.node()?;
    let id = scope.node_id(target)?;
    let (x, y) = compute_coordinates(doc, event)?;
    let data = MousemoveData {
        positions: vec![MousePosition {
            x,
            y,
            id,
            time_offset: 0,
        }],
    };
    let data = if event.is_touch() {
        IncrementalData::TouchMove(data)
    } else {
        IncrementalData::MouseMove(data)
    };
    Some(Record::incremental(timestamp_now(doc), data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Tracker;
    use crate::privacy::{AttributePrivacyPolicy, NodePrivacyLevel};
    use crate::records::IncrementalSource;
    use crate::serialize::{serialize_document, SerializationStatus};
    use replay_dom::TouchPoint;
    use std::cell::RefCell;

    #[test]
    fn test_moves_are_throttled_leading_only() {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let body = doc.body().unwrap();
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let tracker = track_move(&doc, scope, Rc::new(move |r: Record| sink.borrow_mut().push(r)));

        doc.dispatch_event(Event::mouse(EventType::MouseMove, body, 1.0, 1.0));
        doc.dispatch_event(Event::mouse(EventType::MouseMove, body, 2.0, 2.0));
        doc.advance_time(MOUSE_MOVE_THROTTLE_MS);
        doc.dispatch_event(Event::touch(
            EventType::TouchMove,
            body,
            vec![TouchPoint {
                client_x: 3.0,
                client_y: 4.0,
            }],
        ));

        let sources: Vec<_> = records.borrow().iter().map(|r| r.source()).collect();
        assert_eq!(
            sources,
            vec![Some(IncrementalSource::MouseMove), Some(IncrementalSource::TouchMove)]
        );

        tracker.stop();
        assert_eq!(doc.pending_timers(), 0);
    }
}
