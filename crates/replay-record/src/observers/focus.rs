//! Window focus

use replay_dom::{Document, EventTarget, EventType, ListenerOptions};

use super::{add_event_listeners, ListenerTracker, RecordCallback};
use crate::records::{FocusData, Record};
use crate::scope::timestamp_now;

pub fn track_focus(doc: &Document, emit: RecordCallback) -> ListenerTracker {
    // Bubble phase: element focus events never reach the window there
    let listeners = add_event_listeners(
        doc,
        EventTarget::Window,
        &[EventType::Focus, EventType::Blur],
        ListenerOptions::default(),
        move |doc, _| {
            emit(Record::Focus {
                timestamp: timestamp_now(doc),
                data: FocusData {
                    has_focus: doc.window().has_focus,
                },
            });
        },
    );
    ListenerTracker::new(listeners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Tracker;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_window_focus_changes() {
        let doc = Document::new("https://example.com/");
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let tracker = track_focus(&doc, Rc::new(move |r: Record| sink.borrow_mut().push(r)));

        doc.blur_window();
        doc.focus_window();
        // Element focus is a mouse interaction, not a window focus change
        let input = doc.create_element("input");
        doc.append_child(doc.body().unwrap(), input).unwrap();
        doc.focus(input).unwrap();

        let focus: Vec<bool> = records
            .borrow()
            .iter()
            .map(|r| match r {
                Record::Focus { data, .. } => data.has_focus,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(focus, vec![false, true]);

        tracker.stop();
        doc.blur_window();
        assert_eq!(records.borrow().len(), 2);
    }
}
