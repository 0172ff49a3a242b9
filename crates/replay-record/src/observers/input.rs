//! Form input
//!
//! User edits arrive as `input`/`change` events, programmatic ones through the
//! instrumented `value`/`checked`/`selected` setters. Each control's last
//! recorded state is remembered so repeated notifications for the same state
//! produce a single record.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use replay_dom::{Document, EventType, NodeKey, PropertyChange};

use super::{add_document_listeners, ListenerTracker, RecordCallback};
use crate::privacy::{element_input_value, should_mask_node, NodePrivacyLevel};
use crate::records::{IncrementalData, InputData, InputState, Record};
use crate::scope::{timestamp_now, RecordScope};

struct InputObserver {
    scope: RecordScope,
    emit: RecordCallback,
    last_states: RefCell<LastStates>,
}

/// Last recorded state per control. Controls the document has dropped are
/// swept whenever the table doubles.
#[derive(Default)]
struct LastStates {
    states: HashMap<NodeKey, InputState>,
    prune_at: usize,
}

const PRUNE_THRESHOLD: usize = 64;

impl LastStates {
    /// Remember `state`; false when it is already the last one recorded
    fn update(&mut self, doc: &Document, target: NodeKey, state: &InputState) -> bool {
        if self.states.get(&target) == Some(state) {
            return false;
        }
        self.states.insert(target, state.clone());
        if self.states.len() > self.prune_at.max(PRUNE_THRESHOLD) {
            self.states.retain(|node, _| doc.exists(*node));
            self.prune_at = self.states.len() * 2;
        }
        true
    }
}

pub fn track_input(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let observer = Rc::new(InputObserver {
        scope,
        emit,
        last_states: RefCell::new(LastStates::default()),
    });

    let on_event = Rc::clone(&observer);
    let listeners = add_document_listeners(doc, &[EventType::Input, EventType::Change], move |doc, event| {
        if let Some(target) = event.target.node() {
            on_event.on_element_change(doc, target);
        }
    });

    let on_setter = Rc::clone(&observer);
    let hook = doc.on_property_set(move |doc, change| {
        let target = match change {
            // `option.selected` changes the value of its select
            PropertyChange::Selected { node, .. } => enclosing_select(doc, *node),
            _ => Some(change.node()),
        };
        if let Some(target) = target {
            on_setter.on_element_change(doc, target);
        }
    });

    ListenerTracker::new(listeners).with_hooks(vec![hook])
}

fn enclosing_select(doc: &Document, option: NodeKey) -> Option<NodeKey> {
    let mut current = doc.parent(option);
    while let Some(node) = current {
        if doc.tag_name(node).as_deref() == Some("select") {
            return Some(node);
        }
        current = doc.parent(node);
    }
    None
}

impl InputObserver {
    fn on_element_change(&self, doc: &Document, target: NodeKey) {
        if !matches!(
            doc.tag_name(target).as_deref(),
            Some("input" | "textarea" | "select")
        ) {
            return;
        }
        let level = self.scope.privacy_level(doc, target);
        if level == NodePrivacyLevel::Hidden {
            return;
        }

        let input_type = doc.input_type(target);
        let state = match input_type.as_deref() {
            Some("radio" | "checkbox") => {
                if should_mask_node(doc, target, level) {
                    return;
                }
                InputState::Checked(doc.checked(target))
            }
            _ => match element_input_value(doc, target, level) {
                Some(value) => InputState::Text(value),
                None => return,
            },
        };
        self.emit_deduplicated(doc, target, state);

        // Checking a radio unchecks the rest of its group without events
        if input_type.as_deref() == Some("radio") && doc.checked(target) {
            if let Some(name) = doc.attribute(target, "name").filter(|n| !n.is_empty()) {
                for other in doc.radio_group(&name) {
                    if other != target {
                        self.emit_deduplicated(doc, other, InputState::Checked(false));
                    }
                }
            }
        }
    }

    fn emit_deduplicated(&self, doc: &Document, target: NodeKey, state: InputState) {
        let Some(id) = self.scope.node_id(target) else {
            return;
        };
        if !self.last_states.borrow_mut().update(doc, target, &state) {
            return;
        }
        (self.emit)(Record::incremental(
            timestamp_now(doc),
            IncrementalData::Input(InputData { id, state }),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observers::Tracker;
    use crate::privacy::AttributePrivacyPolicy;
    use crate::serialize::{serialize_document, SerializationStatus};

    struct Fixture {
        doc: Document,
        scope: RecordScope,
        records: Rc<RefCell<Vec<Record>>>,
        tracker: ListenerTracker,
    }

    fn fixture(level: NodePrivacyLevel) -> Fixture {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(level));
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let tracker = track_input(&doc, scope.clone(), Rc::new(move |r: Record| sink.borrow_mut().push(r)));
        Fixture {
            doc,
            scope,
            records,
            tracker,
        }
    }

    fn append(f: &Fixture, tag: &str, attrs: &[(&str, &str)]) -> NodeKey {
        let el = f.doc.create_element(tag);
        for (name, value) in attrs {
            f.doc.set_attribute(el, name, value).unwrap();
        }
        f.doc.append_child(f.doc.body().unwrap(), el).unwrap();
        el
    }

    fn states(f: &Fixture) -> Vec<InputData> {
        f.records
            .borrow()
            .iter()
            .map(|r| match r {
                Record::IncrementalSnapshot {
                    data: IncrementalData::Input(data),
                    ..
                } => data.clone(),
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_typing_is_recorded_once_per_value() {
        let f = fixture(NodePrivacyLevel::Allow);
        let input = append(&f, "input", &[]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);

        f.doc.input_value(input, "a").unwrap();
        f.doc.dispatch_event(replay_dom::Event::at(EventType::Change, input));
        f.doc.input_value(input, "ab").unwrap();

        let states = states(&f);
        assert_eq!(states.len(), 2);
        assert_eq!(states[1].state, InputState::Text("ab".into()));
    }

    #[test]
    fn test_last_states_swept_of_dropped_controls() {
        let doc = Document::new("https://example.com/");
        let mut last = LastStates::default();
        let inputs: Vec<NodeKey> = (0..=PRUNE_THRESHOLD).map(|_| doc.create_element("input")).collect();
        let (kept, dropped) = inputs.split_last().unwrap();
        for &input in dropped {
            assert!(last.update(&doc, input, &InputState::Checked(true)));
            doc.drop_node(input).unwrap();
        }
        assert_eq!(last.states.len(), PRUNE_THRESHOLD);

        assert!(last.update(&doc, *kept, &InputState::Checked(true)));
        assert!(!last.update(&doc, *kept, &InputState::Checked(true)));
        assert_eq!(last.states.len(), 1);
    }

    #[test]
    fn test_masked_value() {
        let f = fixture(NodePrivacyLevel::MaskUserInput);
        let textarea = append(&f, "textarea", &[]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);
        f.doc.input_value(textarea, "secret").unwrap();
        assert_eq!(states(&f)[0].state, InputState::Text("***".into()));
    }

    #[test]
    fn test_radio_group_unchecks_siblings() {
        let f = fixture(NodePrivacyLevel::Allow);
        let a = append(&f, "input", &[("type", "radio"), ("name", "color")]);
        let b = append(&f, "input", &[("type", "radio"), ("name", "color")]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);

        f.doc.input_checked(a, true).unwrap();
        f.doc.input_checked(b, true).unwrap();

        let states = states(&f);
        let ids = |n| f.scope.node_id(n).unwrap();
        assert_eq!(
            states,
            vec![
                InputData { id: ids(a), state: InputState::Checked(true) },
                InputData { id: ids(b), state: InputState::Checked(false) },
                InputData { id: ids(b), state: InputState::Checked(true) },
                InputData { id: ids(a), state: InputState::Checked(false) },
            ]
        );
    }

    #[test]
    fn test_masked_checkbox_ignored() {
        let f = fixture(NodePrivacyLevel::MaskUserInput);
        let checkbox = append(&f, "input", &[("type", "checkbox")]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);
        f.doc.input_checked(checkbox, true).unwrap();
        assert!(f.records.borrow().is_empty());
    }

    #[test]
    fn test_property_setters() {
        let f = fixture(NodePrivacyLevel::Allow);
        let select = append(&f, "select", &[]);
        let first = f.doc.create_element("option");
        f.doc.set_attribute(first, "value", "1").unwrap();
        let second = f.doc.create_element("option");
        f.doc.set_attribute(second, "value", "2").unwrap();
        f.doc.append_child(select, first).unwrap();
        f.doc.append_child(select, second).unwrap();
        let input = append(&f, "input", &[]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);

        f.doc.set_value(input, "typed by script").unwrap();
        f.doc.set_selected(second, true).unwrap();

        let states = states(&f);
        assert_eq!(states[0].state, InputState::Text("typed by script".into()));
        assert_eq!(states[1].id, f.scope.node_id(select).unwrap());
        assert_eq!(states[1].state, InputState::Text("2".into()));

        f.tracker.stop();
        f.doc.set_value(input, "after stop").unwrap();
        assert_eq!(f.records.borrow().len(), 2);
    }

    #[test]
    fn test_hidden_input_ignored() {
        let f = fixture(NodePrivacyLevel::Allow);
        let input = append(&f, "input", &[("data-dd-privacy", "hidden")]);
        serialize_document(&f.doc, &f.scope, SerializationStatus::InitialFullSnapshot, None);
        f.doc.input_value(input, "x").unwrap();
        assert!(f.records.borrow().is_empty());
    }
}
