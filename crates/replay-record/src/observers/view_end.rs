//! View end marker

use replay_dom::Document;

use crate::lifecycle::{LifeCycle, LifeCycleEventType, Subscription};
use crate::records::Record;
use crate::scope::{timestamp_now, RecordCallback};

/// Emit a ViewEnd record when the current view ends, after the mutations
/// still pending for it
pub fn track_view_end(
    doc: &Document,
    lifecycle: &LifeCycle,
    flush_mutations: impl Fn() + 'static,
    emit: RecordCallback,
) -> Subscription {
    let doc = doc.clone();
    lifecycle.subscribe(LifeCycleEventType::ViewEnded, move |_| {
        flush_mutations();
        emit(Record::ViewEnd {
            timestamp: timestamp_now(&doc),
        });
    })
}
