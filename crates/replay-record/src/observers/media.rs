//! Media playback

use replay_dom::{Document, EventType};

use super::{add_document_listeners, ListenerTracker, RecordCallback};
use crate::records::{IncrementalData, MediaInteractionData, MediaInteractionType, Record};
use crate::scope::{timestamp_now, RecordScope};

pub fn track_media_interaction(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let listeners = add_document_listeners(doc, &[EventType::Play, EventType::Pause], move |doc, event| {
        let Some(target) = event.target.node() else {
            return;
        };
        let Some(id) = scope.interaction_target_id(doc, target) else {
            return;
        };
        let interaction_type = if event.event_type == EventType::Play {
            MediaInteractionType::Play
        } else {
            MediaInteractionType::Pause
        };
        emit(Record::incremental(
            timestamp_now(doc),
            IncrementalData::MediaInteraction(MediaInteractionData { id, interaction_type }),
        ));
    });
    ListenerTracker::new(listeners)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::{AttributePrivacyPolicy, NodePrivacyLevel};
    use crate::serialize::{serialize_document, SerializationStatus};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_play_and_pause() {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let video = doc.create_element("video");
        doc.append_child(doc.body().unwrap(), video).unwrap();
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, None);
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let _tracker = track_media_interaction(&doc, scope.clone(), Rc::new(move |r: Record| sink.borrow_mut().push(r)));

        doc.play(video).unwrap();
        doc.pause(video).unwrap();

        let types: Vec<MediaInteractionType> = records
            .borrow()
            .iter()
            .map(|r| match r {
                Record::IncrementalSnapshot {
                    data: IncrementalData::MediaInteraction(m),
                    ..
                } => {
                    assert_eq!(Some(m.id), scope.node_id(video));
                    m.interaction_type
                }
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(types, vec![MediaInteractionType::Play, MediaInteractionType::Pause]);
    }
}
