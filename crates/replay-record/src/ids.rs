//! Identity registries
//!
//! `NodeIdRegistry` hands out stable ids for DOM nodes, `RecordIdRegistry`
//! for DOM events. Neither extends the lifetime of what it identifies: node
//! keys are generational (a dropped node's key never resolves again) and
//! events are held through `Weak`.

use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use replay_dom::{Document, Event, NodeKey, NodeKind};
use serde::Serialize;

/// Stable identity of a serialized node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct NodeId(u32);

impl NodeId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Stable identity of a DOM event referenced by records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RecordId(u32);

impl RecordId {
    #[inline]
    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Node -> NodeId side table
#[derive(Debug, Default)]
pub struct NodeIdRegistry {
    ids: HashMap<NodeKey, NodeId>,
    next_id: u32,
}

impl NodeIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing id, or the next one (ids start at 1)
    pub fn assign(&mut self, node: NodeKey) -> NodeId {
        if let Some(id) = self.ids.get(&node) {
            return *id;
        }
        self.next_id += 1;
        let id = NodeId(self.next_id);
        self.ids.insert(node, id);
        id
    }

    pub fn get(&self, node: NodeKey) -> Option<NodeId> {
        self.ids.get(&node).copied()
    }

    pub fn contains(&self, node: NodeKey) -> bool {
        self.ids.contains_key(&node)
    }

    /// Forget a node. Its id is never handed out again.
    pub fn remove(&mut self, node: NodeKey) -> Option<NodeId> {
        self.ids.remove(&node)
    }

    /// Whether `node` and every composed ancestor up to the document have
    /// an id. Shadow roots are crossed without needing one themselves.
    pub fn are_assigned_for_node_and_ancestors(&self, doc: &Document, node: NodeKey) -> bool {
        let mut current = Some(node);
        while let Some(key) = current {
            if !self.contains(key) && doc.node_kind(key) != Some(NodeKind::ShadowRoot) {
                return false;
            }
            current = doc.composed_parent(key);
        }
        true
    }

    /// Drop entries for nodes that no longer exist. Returns how many went.
    pub fn retain_live(&mut self, doc: &Document) -> usize {
        let before = self.ids.len();
        self.ids.retain(|key, _| doc.exists(*key));
        before - self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Event -> RecordId side table
#[derive(Debug, Default)]
pub struct RecordIdRegistry {
    entries: HashMap<*const Event, (Weak<Event>, RecordId)>,
    next_id: u32,
    prune_at: usize,
}

const PRUNE_THRESHOLD: usize = 256;

impl RecordIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Id of `event`, assigned on first use (ids start at 1)
    pub fn get_id_for_event(&mut self, event: &Rc<Event>) -> RecordId {
        let ptr = Rc::as_ptr(event);
        if let Some((weak, id)) = self.entries.get(&ptr) {
            // A dead entry at the same address belonged to an earlier event
            if weak.upgrade().is_some_and(|live| Rc::ptr_eq(&live, event)) {
                return *id;
            }
        }
        self.next_id += 1;
        let id = RecordId(self.next_id);
        self.entries.insert(ptr, (Rc::downgrade(event), id));
        if self.entries.len() > self.prune_at.max(PRUNE_THRESHOLD) {
            self.prune();
            self.prune_at = self.entries.len() * 2;
        }
        id
    }

    /// Drop entries whose event is gone
    pub fn prune(&mut self) {
        self.entries.retain(|_, (weak, _)| weak.strong_count() > 0);
    }

    /// Number of tracked events, dead ones included until the next prune
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use replay_dom::{EventType, ShadowRootMode};

    #[test]
    fn test_assign_is_sequential_and_idempotent() {
        let doc = Document::new("https://example.com/");
        let mut ids = NodeIdRegistry::new();
        let divs: Vec<NodeKey> = (0..3).map(|_| doc.create_element("div")).collect();
        let assigned: Vec<u32> = divs.iter().map(|&d| ids.assign(d).get()).collect();
        assert_eq!(assigned, vec![1, 2, 3]);
        assert_eq!(ids.assign(divs[1]).get(), 2);
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_get_has_no_side_effect() {
        let doc = Document::new("https://example.com/");
        let mut ids = NodeIdRegistry::new();
        let div = doc.create_element("div");
        assert_eq!(ids.get(div), None);
        assert!(ids.is_empty());
        let id = ids.assign(div);
        assert_eq!(ids.get(div), Some(id));
    }

    #[test]
    fn test_ancestors_cross_shadow_roots() {
        let doc = Document::new("https://example.com/");
        let mut ids = NodeIdRegistry::new();
        let body = doc.body().unwrap();
        let host = doc.create_element("div");
        doc.append_child(body, host).unwrap();
        let shadow = doc.attach_shadow(host, ShadowRootMode::Open).unwrap();
        let inner = doc.create_element("span");
        doc.append_child(shadow, inner).unwrap();

        for node in [doc.root(), doc.document_element().unwrap(), body, host, inner] {
            ids.assign(node);
        }
        assert!(ids.are_assigned_for_node_and_ancestors(&doc, inner));

        ids.remove(host);
        assert!(!ids.are_assigned_for_node_and_ancestors(&doc, inner));
    }

    #[test]
    fn test_retain_live_prunes_dropped_nodes() {
        let doc = Document::new("https://example.com/");
        let mut ids = NodeIdRegistry::new();
        let div = doc.create_element("div");
        let kept = doc.create_element("p");
        ids.assign(div);
        ids.assign(kept);
        doc.drop_node(div).unwrap();
        assert_eq!(ids.retain_live(&doc), 1);
        assert!(ids.contains(kept));
        assert_eq!(ids.assign(doc.create_element("i")).get(), 3);
    }

    #[test]
    fn test_record_ids_per_event() {
        let doc = Document::new("https://example.com/");
        let body = doc.body().unwrap();
        let mut ids = RecordIdRegistry::new();
        let first = doc.dispatch_event(Event::mouse(EventType::Click, body, 1.0, 1.0));
        let second = doc.dispatch_event(Event::mouse(EventType::Click, body, 1.0, 1.0));
        assert_eq!(ids.get_id_for_event(&first).get(), 1);
        assert_eq!(ids.get_id_for_event(&second).get(), 2);
        assert_eq!(ids.get_id_for_event(&first).get(), 1);
    }

    #[test]
    fn test_record_ids_released_events() {
        let doc = Document::new("https://example.com/");
        let body = doc.body().unwrap();
        let mut ids = RecordIdRegistry::new();
        for _ in 0..1_000 {
            let event = doc.dispatch_event(Event::at(EventType::Click, body));
            ids.get_id_for_event(&event);
        }
        ids.prune();
        assert!(ids.is_empty());
    }

    fn chain(doc: &Document, depth: usize) -> Vec<NodeKey> {
        let mut nodes = vec![doc.root(), doc.document_element().unwrap()];
        for _ in 0..depth {
            let child = doc.create_element("div");
            let parent = nodes[nodes.len() - 1];
            doc.append_child(parent, child).unwrap();
            nodes.push(child);
        }
        nodes
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

        #[test]
        fn assign_twice_returns_same_id(count in 1usize..40, pick in any::<prop::sample::Index>()) {
            let doc = Document::new("https://example.com/");
            let mut ids = NodeIdRegistry::new();
            let nodes: Vec<NodeKey> = (0..count).map(|_| doc.create_element("div")).collect();
            let first: Vec<NodeId> = nodes.iter().map(|&n| ids.assign(n)).collect();
            for (i, id) in first.iter().enumerate() {
                prop_assert_eq!(id.get() as usize, i + 1);
            }
            let node = nodes[pick.index(count)];
            prop_assert_eq!(ids.assign(node), first[pick.index(count)]);
        }

        #[test]
        fn missing_ancestor_breaks_chain(depth in 1usize..12, pick in any::<prop::sample::Index>()) {
            let doc = Document::new("https://example.com/");
            let mut ids = NodeIdRegistry::new();
            let nodes = chain(&doc, depth);
            for &n in &nodes {
                ids.assign(n);
            }
            let leaf = nodes[nodes.len() - 1];
            prop_assert!(ids.are_assigned_for_node_and_ancestors(&doc, leaf));

            ids.remove(nodes[pick.index(nodes.len())]);
            prop_assert!(!ids.are_assigned_for_node_and_ancestors(&doc, leaf));
        }
    }
}
