//! CSSOM rule edits on `<style>` sheets
//!
//! Rules inside grouping rules (`@media`, `@supports`) are addressed by their
//! index path from the sheet.

use replay_dom::{Document, StyleSheetChange, StyleSheetChangeKind};

use super::{ListenerTracker, RecordCallback};
use crate::records::{
    IncrementalData, Record, StyleSheetAddRule, StyleSheetDeleteRule, StyleSheetIndex, StyleSheetRuleData,
};
use crate::scope::{timestamp_now, RecordScope};

pub fn track_style_sheet(doc: &Document, scope: RecordScope, emit: RecordCallback) -> ListenerTracker {
    let hook = doc.on_style_sheet_change(move |doc, change| {
        if let Some(record) = style_sheet_record(doc, &scope, change) {
            emit(record);
        }
    });
    ListenerTracker::noop().with_hooks(vec![hook])
}

fn style_sheet_record(doc: &Document, scope: &RecordScope, change: &StyleSheetChange) -> Option<Record> {
    let id = scope.node_id(change.owner)?;
    let data = match &change.kind {
        StyleSheetChangeKind::Insert { path, index, rule } => StyleSheetRuleData {
            id,
            adds: Some(vec![StyleSheetAddRule {
                rule: rule.clone(),
                index: Some(StyleSheetIndex::new(path, *index)),
            }]),
            removes: None,
        },
        StyleSheetChangeKind::Delete { path, index } => StyleSheetRuleData {
            id,
            adds: None,
            removes: Some(vec![StyleSheetDeleteRule {
                index: StyleSheetIndex::new(path, *index),
            }]),
        },
    };
    Some(Record::incremental(timestamp_now(doc), IncrementalData::StyleSheetRule(data)))
}
