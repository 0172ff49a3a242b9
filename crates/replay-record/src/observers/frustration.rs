//! Frustration records
//!
//! Bridges click actions flagged by the action collection (rage, dead and
//! error clicks) into the record stream, pointing at the interaction records
//! of the DOM events the action was computed from.

use crate::lifecycle::{
    ActionType, LifeCycle, LifeCycleEvent, LifeCycleEventType, RawRumEventCollected, RawRumEventKind, Subscription,
};
use crate::records::{FrustrationData, Record};
use crate::scope::{RecordCallback, RecordScope};

pub fn track_frustration(lifecycle: &LifeCycle, scope: RecordScope, emit: RecordCallback) -> Subscription {
    lifecycle.subscribe(LifeCycleEventType::RawRumEventCollected, move |event| {
        if let LifeCycleEvent::RawRumEventCollected(collected) = event {
            if let Some(record) = frustration_record(&scope, collected) {
                emit(record);
            }
        }
    })
}

fn frustration_record(scope: &RecordScope, collected: &RawRumEventCollected) -> Option<Record> {
    let RawRumEventKind::Action {
        action_type: ActionType::Click,
        frustration_types,
    } = &collected.raw_rum_event.kind
    else {
        return None;
    };
    if frustration_types.is_empty() {
        return None;
    }
    let events = collected.domain_context.events.as_ref()?;

    Some(Record::Frustration {
        timestamp: collected.raw_rum_event.date,
        data: FrustrationData {
            frustration_types: frustration_types.clone(),
            record_ids: events.iter().map(|event| scope.record_id(event)).collect(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::{DomainContext, RawRumEvent};
    use crate::privacy::{AttributePrivacyPolicy, NodePrivacyLevel};
    use crate::records::FrustrationType;
    use replay_dom::{Document, Event, EventType};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn click_action(types: Vec<FrustrationType>, events: Option<Vec<Rc<Event>>>) -> LifeCycleEvent {
        LifeCycleEvent::RawRumEventCollected(RawRumEventCollected {
            raw_rum_event: RawRumEvent {
                date: 123,
                kind: RawRumEventKind::Action {
                    action_type: ActionType::Click,
                    frustration_types: types,
                },
            },
            domain_context: DomainContext { events },
        })
    }

    fn setup() -> (Document, LifeCycle, RecordScope, Rc<RefCell<Vec<Record>>>, Subscription) {
        let doc = Document::new("https://example.com/");
        let lifecycle = LifeCycle::new();
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let subscription = track_frustration(&lifecycle, scope.clone(), Rc::new(move |r: Record| sink.borrow_mut().push(r)));
        (doc, lifecycle, scope, records, subscription)
    }

    #[test]
    fn test_dead_click_references_event() {
        let (doc, lifecycle, scope, records, _subscription) = setup();
        let body = doc.body().unwrap();
        let event = doc.dispatch_event(Event::mouse(EventType::Click, body, 1.0, 2.0));

        lifecycle.notify(click_action(vec![FrustrationType::DeadClick], Some(vec![Rc::clone(&event)])));

        let records = records.borrow();
        assert_eq!(records.len(), 1);
        match &records[0] {
            Record::Frustration { timestamp, data } => {
                assert_eq!(*timestamp, 123);
                assert_eq!(data.frustration_types, vec![FrustrationType::DeadClick]);
                assert_eq!(data.record_ids, vec![scope.record_id(&event)]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_ignored_actions() {
        let (doc, lifecycle, _scope, records, subscription) = setup();
        let event = doc.dispatch_event(Event::mouse(EventType::Click, doc.body().unwrap(), 1.0, 2.0));

        lifecycle.notify(click_action(vec![], Some(vec![Rc::clone(&event)])));
        lifecycle.notify(click_action(vec![FrustrationType::RageClick], None));
        lifecycle.notify(LifeCycleEvent::RawRumEventCollected(RawRumEventCollected {
            raw_rum_event: RawRumEvent {
                date: 1,
                kind: RawRumEventKind::Action {
                    action_type: ActionType::Custom,
                    frustration_types: vec![FrustrationType::ErrorClick],
                },
            },
            domain_context: DomainContext {
                events: Some(vec![Rc::clone(&event)]),
            },
        }));
        assert!(records.borrow().is_empty());

        subscription.unsubscribe();
        lifecycle.notify(click_action(vec![FrustrationType::DeadClick], Some(vec![event])));
        assert!(records.borrow().is_empty());
    }
}
