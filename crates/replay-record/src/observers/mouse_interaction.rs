//! Mouse, touch and focus interactions
//!
//! `pointerup` stands in for `mouseup` so the record carries the same event
//! action collection later reports frustration for. Every record gets a
//! RecordId derived from its event.

use std::rc::Rc;

use replay_dom::{Document, Event, EventType};

use super::viewports::convert_mouse_event_to_layout_coordinates;
use super::{add_document_listeners, ListenerTracker, RecordCallback};
use crate::records::{IncrementalData, MouseInteraction, MouseInteractionType, Record};
use crate::scope::{timestamp_now, RecordScope};

const INTERACTION_EVENTS: &[(EventType, MouseInteractionType)] = &[
    (EventType::PointerUp, MouseInteractionType::MouseUp),
    (EventType::MouseDown, MouseInteractionType::MouseDown),
    (EventType::Click, MouseInteractionType::Click),
    (EventType::ContextMenu, MouseInteractionType::ContextMenu),
    (EventType::DblClick, MouseInteractionType::DblClick),
    (EventType::Focus, MouseInteractionType::Focus),
    (EventType::Blur, MouseInteractionType::Blur),
    (EventType::TouchStart, MouseInteractionType::TouchStart),
    (EventType::TouchEnd, MouseInteractionType::TouchEnd),
];

fn interaction_type(event_type: EventType) -> Option<MouseInteractionType> {
    INTERACTION_EVENTS
        .iter()
        .find(|(e, _)| *e == event_type)
        .map(|(_, t)| *t)
}

pub fn track_mouse_interaction(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let event_types: Vec<EventType> = INTERACTION_EVENTS.iter().map(|(e, _)| *e).collect();
    let listeners = add_document_listeners(doc, &event_types, move |doc, event| {
        if let Some(record) = interaction_record(doc, &scope, event) {
            emit(record);
        }
    });
    ListenerTracker::new(listeners)
}

fn interaction_record(doc: &Document, scope: &RecordScope, event: &Rc<Event>) -> Option<Record> {
    let target = event.target.node()?;
    let id = scope.interaction_target_id(doc, target)?;
    let interaction_type = interaction_type(event.event_type)?;

    let interaction = match interaction_type {
        MouseInteractionType::Focus | MouseInteractionType::Blur => MouseInteraction {
            interaction_type,
            id,
            x: None,
            y: None,
        },
        _ => {
            let (x, y) = compute_coordinates(doc, event)?;
            MouseInteraction {
                interaction_type,
                id,
                x: Some(x),
                y: Some(y),
            }
        }
    };

    Some(Record::IncrementalSnapshot {
        timestamp: timestamp_now(doc),
        data: IncrementalData::MouseInteraction(interaction),
        id: Some(scope.record_id(event)),
    })
}

/// Coordinates relative to the visual viewport, `None` when the event has none
pub(crate) fn compute_coordinates(doc: &Document, event: &Event) -> Option<(i64, i64)> {
    let Some((client_x, client_y)) = event.client_position() else {
        if event.is_trusted {
            tracing::debug!(event = event.event_type.as_str(), "mouse/touch event without x/y");
        }
        return None;
    };
    let (x, y) = if doc.window().visual_viewport.is_some() {
        let coords = convert_mouse_event_to_layout_coordinates(doc, client_x, client_y);
        (coords.visual_viewport_x, coords.visual_viewport_y)
    } else {
        (client_x, client_y)
    };
    if !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some((x.round() as i64, y.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Tracker;
    use crate::privacy::{AttributePrivacyPolicy, NodePrivacyLevel};
    use crate::serialize::{serialize_document, SerializationStatus};
    use std::cell::RefCell;

    fn setup() -> (Document, RecordScope, Rc<RefCell<Vec<Record>>>, ListenerTracker) {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let tracker = track_mouse_interaction(&doc, scope.clone(), Rc::new(move |r: Record| sink.borrow_mut().push(r)));
        (doc, scope, records, tracker)
    }

    fn interaction(record: &Record) -> MouseInteraction {
        match record {
            Record::IncrementalSnapshot {
                data: IncrementalData::MouseInteraction(i),
                ..
            } => *i,
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_pointerup_is_mouse_up() {
        let (doc, scope, records, _tracker) = setup();
        let a = doc.create_element("a");
        doc.append_child(doc.body().unwrap(), a).unwrap();
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);

        let event = doc.dispatch_event(Event::mouse(EventType::PointerUp, a, 1.0, 2.0));
        let records = records.borrow();
        assert_eq!(records.len(), 1);
        let data = interaction(&records[0]);
        assert_eq!(data.interaction_type, MouseInteractionType::MouseUp);
        assert_eq!((data.x, data.y), (Some(1), Some(2)));
        assert_eq!(Some(data.id), scope.node_id(a));
        match &records[0] {
            Record::IncrementalSnapshot { id, .. } => assert_eq!(*id, Some(scope.record_id(&event))),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_unserialized_or_hidden_targets_ignored() {
        let (doc, scope, records, _tracker) = setup();
        let hidden = doc.create_element("div");
        doc.set_attribute(hidden, "data-dd-privacy", "hidden").unwrap();
        doc.append_child(doc.body().unwrap(), hidden).unwrap();
        let late = doc.create_element("div");

        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);
        doc.append_child(doc.body().unwrap(), late).unwrap();

        doc.dispatch_event(Event::mouse(EventType::Click, hidden, 1.0, 1.0));
        doc.dispatch_event(Event::mouse(EventType::Click, late, 1.0, 1.0));
        assert!(records.borrow().is_empty());
    }

    #[test]
    fn test_synthetic_click_dropped() {
        let (doc, scope, records, _tracker) = setup();
        let button = doc.create_element("button");
        doc.append_child(doc.body().unwrap(), button).unwrap();
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);

        doc.dispatch_event(Event::synthetic_mouse(EventType::Click, button));
        assert!(records.borrow().is_empty());
    }

    #[test]
    fn test_stop_removes_listeners() {
        let (doc, scope, records, tracker) = setup();
        let body = doc.body().unwrap();
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);
        tracker.stop();
        doc.dispatch_event(Event::mouse(EventType::Click, body, 1.0, 1.0));
        assert!(records.borrow().is_empty());
        assert_eq!(doc.listener_count(), 0);
    }
}
