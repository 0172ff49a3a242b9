//! Recording scope
//!
//! The state one recording shares between the serializer and its observers:
//! the privacy policy, both id registries and the scroll positions captured by
//! the initial snapshot. Everything runs on the page thread, so the scope is
//! plain `Rc<RefCell<_>>` cloned into each observer.

use std::cell::RefCell;
use std::rc::Rc;

use replay_dom::{Document, Event, NodeKey};

use crate::ids::{NodeId, NodeIdRegistry, RecordId, RecordIdRegistry};
use crate::privacy::{node_privacy_level, NodePrivacyLevel, PrivacyCache, PrivacyPolicy};
use crate::records::{Record, TimeStamp};
use crate::serialize::ElementsScrollPositions;

/// Sink every observer emits through
pub type RecordCallback = Rc<dyn Fn(Record)>;

#[derive(Clone)]
pub struct RecordScope {
    pub policy: Rc<dyn PrivacyPolicy>,
    pub node_ids: Rc<RefCell<NodeIdRegistry>>,
    pub record_ids: Rc<RefCell<RecordIdRegistry>>,
    pub scroll_positions: Rc<RefCell<ElementsScrollPositions>>,
}

impl RecordScope {
    pub fn new(policy: impl PrivacyPolicy + 'static) -> Self {
        Self {
            policy: Rc::new(policy),
            node_ids: Rc::new(RefCell::new(NodeIdRegistry::new())),
            record_ids: Rc::new(RefCell::new(RecordIdRegistry::new())),
            scroll_positions: Rc::new(RefCell::new(ElementsScrollPositions::default())),
        }
    }

    pub fn node_id(&self, node: NodeKey) -> Option<NodeId> {
        self.node_ids.borrow().get(node)
    }

    pub fn record_id(&self, event: &Rc<Event>) -> RecordId {
        self.record_ids.borrow_mut().get_id_for_event(event)
    }

    pub fn privacy_level(&self, doc: &Document, node: NodeKey) -> NodePrivacyLevel {
        node_privacy_level(&*self.policy, doc, node, None)
    }

    pub fn privacy_level_cached(
        &self,
        doc: &Document,
        node: NodeKey,
        cache: &mut PrivacyCache,
    ) -> NodePrivacyLevel {
        node_privacy_level(&*self.policy, doc, node, Some(cache))
    }

    /// Forget nodes the document has dropped. Returns how many node ids
    /// went.
    pub fn forget_dropped_nodes(&self, doc: &Document) -> usize {
        let forgotten = self.node_ids.borrow_mut().retain_live(doc);
        self.scroll_positions.borrow_mut().retain_live(doc);
        if forgotten > 0 {
            tracing::trace!(forgotten, "dropped nodes forgotten");
        }
        forgotten
    }

    /// Id of a node an interaction targets, when the node is recorded and
    /// visible
    pub fn interaction_target_id(&self, doc: &Document, node: NodeKey) -> Option<NodeId> {
        let id = self.node_id(node)?;
        if self.privacy_level(doc, node) == NodePrivacyLevel::Hidden {
            return None;
        }
        Some(id)
    }
}

/// Scheduler clock as an epoch-millisecond timestamp
pub fn timestamp_now(doc: &Document) -> TimeStamp {
    timestamp_of(doc.now())
}

pub fn timestamp_of(ms: f64) -> TimeStamp {
    if ms.is_finite() && ms > 0.0 {
        ms.round() as TimeStamp
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::AttributePrivacyPolicy;
    use crate::serialize::ScrollPosition;

    #[test]
    fn test_forget_dropped_nodes() {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let gone = doc.create_element("div");
        let kept = doc.create_element("div");
        let offset = ScrollPosition {
            scroll_left: 0,
            scroll_top: 40,
        };
        for node in [gone, kept] {
            scope.node_ids.borrow_mut().assign(node);
            scope.scroll_positions.borrow_mut().set(node, offset);
        }

        doc.drop_node(gone).unwrap();
        assert_eq!(scope.forget_dropped_nodes(&doc), 1);
        assert!(scope.node_id(gone).is_none());
        assert!(scope.node_id(kept).is_some());
        assert_eq!(scope.scroll_positions.borrow().len(), 1);
        assert_eq!(scope.scroll_positions.borrow().get(kept), Some(offset));
    }
}
