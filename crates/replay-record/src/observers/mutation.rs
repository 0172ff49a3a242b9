//! Mutation observer
//!
//! Records delivered by the page's MutationObserver are buffered and turned
//! into one Mutation record per batch, flushed at the next animation frame (or
//! after [`MUTATION_PROCESS_MAX_DELAY_MS`] when frames are not running), or
//! synchronously when another record is about to be emitted.
//!
//! Processing only looks at the DOM as it is *now*: a node added then removed
//! within the batch produces nothing, a moved node is re-emitted with its
//! existing id, and a text or attribute that ended up unchanged is dropped.

use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use replay_dom::{
    Document, FrameId, MutationObserverHandle, MutationObserverInit, MutationRecord, MutationType,
    NodeKey, TimerId,
};

use super::Tracker;
use crate::ids::NodeId;
use crate::privacy::{element_input_value, text_content, NodePrivacyLevel, PrivacyCache};
use crate::records::{
    AddedNodeMutation, AttributeMutation, IncrementalData, MutationData, Record, RemovedNodeMutation,
    TextMutation,
};
use crate::scope::{timestamp_now, RecordCallback, RecordScope};
use crate::serialize::{serialize_attribute, NodeSerializer, SerializationStatus};
use crate::shadow_roots::ShadowRootsController;

/// Upper bound on how long mutations wait for an animation frame
pub const MUTATION_PROCESS_MAX_DELAY_MS: f64 = 1000.0;

struct MutationState {
    doc: Document,
    scope: RecordScope,
    emit: RecordCallback,
    shadow_roots: ShadowRootsController,
    observer: RefCell<Option<MutationObserverHandle>>,
    pending: RefCell<Vec<MutationRecord>>,
    scheduled: Cell<Option<(FrameId, TimerId)>>,
}

/// Mutation observer over one root (the document or a shadow root)
#[derive(Clone)]
pub struct MutationTracker {
    state: Rc<MutationState>,
}

/// Observe `target` and its subtree
pub fn track_mutation(
    doc: &Document,
    scope: RecordScope,
    emit: RecordCallback,
    shadow_roots: ShadowRootsController,
    target: NodeKey,
) -> MutationTracker {
    let state = Rc::new(MutationState {
        doc: doc.clone(),
        scope,
        emit,
        shadow_roots,
        observer: RefCell::new(None),
        pending: RefCell::new(Vec::new()),
        scheduled: Cell::new(None),
    });

    let weak = Rc::downgrade(&state);
    let observer = doc.create_mutation_observer(move |_, records| {
        if let Some(state) = weak.upgrade() {
            state.add_mutations(records);
        }
    });
    observer.observe(target, MutationObserverInit::all());
    *state.observer.borrow_mut() = Some(observer);

    MutationTracker { state }
}

impl MutationTracker {
    /// Process everything buffered or queued so far
    pub fn flush(&self) {
        self.state.flush();
    }

    pub fn pending_count(&self) -> usize {
        self.state.pending.borrow().len()
    }
}

impl Tracker for MutationTracker {
    fn stop(&self) {
        if let Some(observer) = self.state.observer.borrow_mut().take() {
            observer.disconnect();
        }
        self.state.cancel_scheduled();
        self.state.pending.borrow_mut().clear();
    }
}

impl MutationState {
    fn add_mutations(self: &Rc<Self>, records: Vec<MutationRecord>) {
        if records.is_empty() {
            return;
        }
        self.pending.borrow_mut().extend(records);
        if self.scheduled.get().is_some() {
            return;
        }

        let weak = Rc::downgrade(self);
        let frame = self.doc.request_animation_frame(move |_, _| {
            if let Some(state) = weak.upgrade() {
                state.flush();
            }
        });
        let weak = Rc::downgrade(self);
        let timer = self.doc.set_timeout(MUTATION_PROCESS_MAX_DELAY_MS, move |_| {
            if let Some(state) = weak.upgrade() {
                state.flush();
            }
        });
        self.scheduled.set(Some((frame, timer)));
    }

    fn cancel_scheduled(&self) {
        if let Some((frame, timer)) = self.scheduled.take() {
            self.doc.cancel_animation_frame(frame);
            self.doc.clear_timeout(timer);
        }
    }

    fn flush(&self) {
        self.cancel_scheduled();
        let mut records = std::mem::take(&mut *self.pending.borrow_mut());
        if let Some(observer) = self.observer.borrow().as_ref() {
            records.extend(observer.take_records());
        }
        if records.is_empty() {
            return;
        }
        if let Some(record) = process_mutations(&self.doc, &self.scope, &self.shadow_roots, records) {
            (self.emit)(record);
        }
    }
}

/// Turn a batch of mutation records into one Mutation record, `None` when
/// nothing observable changed
pub fn process_mutations(
    doc: &Document,
    scope: &RecordScope,
    shadow_roots: &ShadowRootsController,
    mutations: Vec<MutationRecord>,
) -> Option<Record> {
    let mut cache = PrivacyCache::new();
    let had_removals = mutations.iter().any(|m| !m.removed_nodes.is_empty());
    let mutations: Vec<MutationRecord> = mutations
        .into_iter()
        .filter(|m| {
            doc.is_connected(m.target)
                && scope.node_ids.borrow().are_assigned_for_node_and_ancestors(doc, m.target)
                && scope.privacy_level_cached(doc, m.target, &mut cache) != NodePrivacyLevel::Hidden
        })
        .collect();

    let mut serializer = NodeSerializer::new(doc, scope, SerializationStatus::Mutation).with_shadow_roots(shadow_roots);

    let (adds, removes) = process_child_list(doc, scope, shadow_roots, &mut serializer, &mut cache, &mutations);
    let texts = process_character_data(doc, scope, &serializer, &mut cache, &mutations);
    let attributes = process_attributes(doc, scope, &serializer, &mut cache, &mutations);
    // Removed ids are reported above, so only now may dropped nodes go
    if had_removals {
        scope.forget_dropped_nodes(doc);
    }

    let data = MutationData {
        adds,
        removes,
        texts,
        attributes,
    };
    if data.is_empty() {
        return None;
    }
    Some(Record::incremental(timestamp_now(doc), IncrementalData::Mutation(data)))
}

fn process_child_list(
    doc: &Document,
    scope: &RecordScope,
    shadow_roots: &ShadowRootsController,
    serializer: &mut NodeSerializer<'_>,
    cache: &mut PrivacyCache,
    mutations: &[MutationRecord],
) -> (Vec<AddedNodeMutation>, Vec<RemovedNodeMutation>) {
    // Net effect of the batch: a node removed then re-added is a move, a node
    // added then removed never existed as far as the player knows
    let mut added: Vec<NodeKey> = Vec::new();
    let mut added_set: HashSet<NodeKey> = HashSet::new();
    let mut removed: Vec<(NodeKey, NodeKey)> = Vec::new();

    for mutation in mutations.iter().filter(|m| m.mutation_type == MutationType::ChildList) {
        for &node in &mutation.added_nodes {
            if added_set.insert(node) {
                added.push(node);
            }
        }
        for &node in &mutation.removed_nodes {
            if added_set.remove(&node) {
                added.retain(|&n| n != node);
            } else {
                match removed.iter_mut().find(|(n, _)| *n == node) {
                    Some(entry) => entry.1 = mutation.target,
                    None => removed.push((node, mutation.target)),
                }
            }
        }
    }

    // Ancestors first so descendants are covered by their ancestor's
    // serialization; otherwise last in document order first so each node's
    // next sibling is already known to the player
    added.sort_by_cached_key(|&node| insertion_sort_key(doc, node));

    let mut adds = Vec::new();
    for node in added {
        if !doc.is_connected(node) || serializer.has_been_serialized(node) {
            continue;
        }
        let Some(parent) = doc.parent(node) else {
            continue;
        };
        let parent_level = scope.privacy_level_cached(doc, parent, cache);
        if parent_level.is_opaque() {
            continue;
        }
        let Some(serialized) = serializer.serialize_node_with_id(node, parent_level, false) else {
            continue;
        };
        let Some(parent_id) = scope.node_id(parent) else {
            continue;
        };
        adds.push(AddedNodeMutation {
            parent_id,
            next_id: next_serialized_sibling_id(doc, scope, node),
            node: serialized,
        });
    }

    let mut removes = Vec::new();
    for (node, parent) in removed {
        if let (Some(parent_id), Some(id)) = (scope.node_id(parent), scope.node_id(node)) {
            removes.push(RemovedNodeMutation { parent_id, id });
        }
        // A moved host keeps its shadow tracker
        if !doc.is_connected(node) {
            for shadow_root in shadow_roots_within(doc, node) {
                shadow_roots.remove_shadow_root(shadow_root);
            }
        }
    }

    (adds, removes)
}

/// Composed index path with each index inverted: lexicographic order on the
/// key puts ancestors before descendants and later siblings before earlier
/// ones
fn insertion_sort_key(doc: &Document, node: NodeKey) -> Vec<usize> {
    let mut path = Vec::new();
    let mut current = node;
    loop {
        if let Some(parent) = doc.parent(current) {
            let index = doc
                .children(parent)
                .iter()
                .position(|&c| c == current)
                .unwrap_or(0);
            path.push(usize::MAX - index);
            current = parent;
        } else if let Some(host) = doc.shadow_host(current) {
            path.push(0);
            current = host;
        } else {
            break;
        }
    }
    path.reverse();
    path
}

fn next_serialized_sibling_id(doc: &Document, scope: &RecordScope, node: NodeKey) -> Option<NodeId> {
    let mut sibling = doc.next_sibling(node);
    while let Some(key) = sibling {
        if let Some(id) = scope.node_id(key) {
            return Some(id);
        }
        sibling = doc.next_sibling(key);
    }
    None
}

/// Shadow roots hosted by `node` or anything below it, nested ones included
fn shadow_roots_within(doc: &Document, node: NodeKey) -> Vec<NodeKey> {
    let mut found = Vec::new();
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        let mut subtree = vec![current];
        subtree.extend(doc.descendants(current));
        for key in subtree {
            if let Some(shadow_root) = doc.shadow_root(key) {
                found.push(shadow_root);
                stack.push(shadow_root);
            }
        }
    }
    found
}

fn process_character_data(
    doc: &Document,
    scope: &RecordScope,
    serializer: &NodeSerializer<'_>,
    cache: &mut PrivacyCache,
    mutations: &[MutationRecord],
) -> Vec<TextMutation> {
    let mut seen: HashSet<NodeKey> = HashSet::new();
    let mut texts = Vec::new();

    for mutation in mutations
        .iter()
        .filter(|m| m.mutation_type == MutationType::CharacterData)
    {
        // The first record of a node holds the value from before the batch
        if !seen.insert(mutation.target) || serializer.has_been_serialized(mutation.target) {
            continue;
        }
        let value = doc.text(mutation.target);
        if value == mutation.old_value {
            continue;
        }
        let Some(parent) = doc.parent(mutation.target) else {
            continue;
        };
        let parent_level = scope.privacy_level_cached(doc, parent, cache);
        if parent_level.is_opaque() {
            continue;
        }
        let Some(id) = scope.node_id(mutation.target) else {
            continue;
        };
        texts.push(TextMutation {
            id,
            value: text_content(doc, mutation.target, false, parent_level),
        });
    }
    texts
}

fn process_attributes(
    doc: &Document,
    scope: &RecordScope,
    serializer: &NodeSerializer<'_>,
    cache: &mut PrivacyCache,
    mutations: &[MutationRecord],
) -> Vec<AttributeMutation> {
    let mut seen: HashSet<(NodeKey, String)> = HashSet::new();
    let mut by_element: HashMap<NodeKey, usize> = HashMap::new();
    let mut attributes: Vec<AttributeMutation> = Vec::new();

    for mutation in mutations.iter().filter(|m| m.mutation_type == MutationType::Attributes) {
        let Some(name) = mutation.attribute_name.as_deref() else {
            continue;
        };
        if !seen.insert((mutation.target, name.to_string()))
            || serializer.has_been_serialized(mutation.target)
        {
            continue;
        }
        let current = doc.attribute(mutation.target, name);
        if current == mutation.old_value {
            continue;
        }
        let level = scope.privacy_level_cached(doc, mutation.target, cache);
        let value = if name == "value" {
            match element_input_value(doc, mutation.target, level) {
                Some(value) => Some(value),
                None => continue,
            }
        } else {
            serialize_attribute(doc, mutation.target, level, name)
        };
        let Some(id) = scope.node_id(mutation.target) else {
            continue;
        };

        let index = *by_element.entry(mutation.target).or_insert_with(|| {
            attributes.push(AttributeMutation {
                id,
                attributes: Vec::new(),
            });
            attributes.len() - 1
        });
        attributes[index].attributes.push((name.to_string(), value));
    }
    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::AttributePrivacyPolicy;
    use crate::serialize::serialize_document;

    struct Fixture {
        doc: Document,
        scope: RecordScope,
        shadow_roots: ShadowRootsController,
        records: Rc<RefCell<Vec<Record>>>,
        tracker: MutationTracker,
    }

    fn fixture() -> Fixture {
        let doc = Document::new("https://example.com/");
        let scope = RecordScope::new(AttributePrivacyPolicy::new(NodePrivacyLevel::Allow));
        let records = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&records);
        let emit: RecordCallback = Rc::new(move |r| sink.borrow_mut().push(r));
        let shadow_roots = ShadowRootsController::new(scope.clone(), Rc::clone(&emit));
        serialize_document(&doc, &scope, SerializationStatus::InitialFullSnapshot, Some(&shadow_roots));
        let tracker = track_mutation(&doc, scope.clone(), emit, shadow_roots.clone(), doc.root());
        Fixture {
            doc,
            scope,
            shadow_roots,
            records,
            tracker,
        }
    }

    fn mutation_data(record: &Record) -> &MutationData {
        match record {
            Record::IncrementalSnapshot {
                data: IncrementalData::Mutation(data),
                ..
            } => data,
            other => panic!("expected mutation, got {other:?}"),
        }
    }

    #[test]
    fn test_added_node_flushed_on_animation_frame() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let div = f.doc.create_element("div");
        f.doc.append_child(body, div).unwrap();
        f.doc.flush_mutations();
        assert!(f.records.borrow().is_empty());

        f.doc.run_animation_frame();
        let records = f.records.borrow();
        assert_eq!(records.len(), 1);
        let data = mutation_data(&records[0]);
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].parent_id, f.scope.node_id(body).unwrap());
        assert_eq!(data.adds[0].next_id, None);
        assert_eq!(data.adds[0].node.id, f.scope.node_id(div).unwrap());
    }

    #[test]
    fn test_fallback_timer_flushes() {
        let f = fixture();
        let div = f.doc.create_element("div");
        f.doc.append_child(f.doc.body().unwrap(), div).unwrap();
        f.doc.advance_time(MUTATION_PROCESS_MAX_DELAY_MS);
        assert_eq!(f.records.borrow().len(), 1);
    }

    #[test]
    fn test_add_then_remove_is_invisible() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let div = f.doc.create_element("div");
        f.doc.append_child(body, div).unwrap();
        f.doc.remove_child(body, div).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        assert!(f.records.borrow().is_empty());
    }

    #[test]
    fn test_nested_adds_serialized_once() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let outer = f.doc.create_element("section");
        f.doc.append_child(body, outer).unwrap();
        let inner = f.doc.create_element("p");
        f.doc.append_child(outer, inner).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();

        let records = f.records.borrow();
        let data = mutation_data(&records[0]);
        assert_eq!(data.adds.len(), 1);
        assert_eq!(data.adds[0].node.node.child_nodes().len(), 1);
    }

    #[test]
    fn test_next_id_points_at_serialized_sibling() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let a = f.doc.create_element("a");
        let b = f.doc.create_element("b");
        f.doc.append_child(body, a).unwrap();
        f.doc.append_child(body, b).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();

        let records = f.records.borrow();
        let data = mutation_data(&records[0]);
        // b first, so a can point at it
        assert_eq!(data.adds[0].node.id, f.scope.node_id(b).unwrap());
        assert_eq!(data.adds[1].node.id, f.scope.node_id(a).unwrap());
        assert_eq!(data.adds[1].next_id, f.scope.node_id(b));
    }

    #[test]
    fn test_removed_node() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let div = f.doc.create_element("div");
        f.doc.append_child(body, div).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        let id = f.scope.node_id(div).unwrap();

        f.doc.remove_child(body, div).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        let records = f.records.borrow();
        let data = mutation_data(&records[1]);
        assert_eq!(
            data.removes,
            vec![RemovedNodeMutation {
                parent_id: f.scope.node_id(body).unwrap(),
                id
            }]
        );
    }

    #[test]
    fn test_dropped_node_reported_then_forgotten() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let div = f.doc.create_element("div");
        f.doc.append_child(div, f.doc.create_text("gone")).unwrap();
        f.doc.append_child(body, div).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        let id = f.scope.node_id(div).unwrap();
        let known = f.scope.node_ids.borrow().len();

        f.doc.remove_child(body, div).unwrap();
        f.doc.drop_node(div).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();

        let records = f.records.borrow();
        assert_eq!(mutation_data(&records[1]).removes[0].id, id);
        assert!(f.scope.node_id(div).is_none());
        assert_eq!(f.scope.node_ids.borrow().len(), known - 2);
    }

    #[test]
    fn test_text_and_attribute_dedup() {
        let f = fixture();
        let body = f.doc.body().unwrap();
        let p = f.doc.create_element("p");
        let text = f.doc.create_text("one");
        f.doc.append_child(p, text).unwrap();
        f.doc.append_child(body, p).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();

        f.doc.set_text(text, "two").unwrap();
        f.doc.set_text(text, "three").unwrap();
        f.doc.set_attribute(p, "class", "a").unwrap();
        f.doc.set_attribute(p, "class", "b").unwrap();
        f.doc.set_attribute(p, "title", "t").unwrap();
        f.doc.remove_attribute(p, "title").unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();

        let records = f.records.borrow();
        let data = mutation_data(&records[1]);
        assert_eq!(data.texts.len(), 1);
        assert_eq!(data.texts[0].value.as_deref(), Some("three"));
        assert_eq!(data.attributes.len(), 1);
        assert_eq!(data.attributes[0].attributes, vec![("class".to_string(), Some("b".to_string()))]);
    }

    #[test]
    fn test_unserialized_targets_ignored() {
        let f = fixture();
        let detached = f.doc.create_element("div");
        f.doc.set_attribute(detached, "class", "x").unwrap();
        let hidden = f.doc.create_element("div");
        f.doc.set_attribute(hidden, "data-dd-privacy", "hidden").unwrap();
        f.doc.append_child(f.doc.body().unwrap(), hidden).unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        f.records.borrow_mut().clear();

        f.doc.append_child(hidden, f.doc.create_element("span")).unwrap();
        f.doc.set_attribute(hidden, "class", "y").unwrap();
        f.doc.flush_mutations();
        f.tracker.flush();
        assert!(f.records.borrow().is_empty());
    }

    #[test]
    fn test_stop_disconnects() {
        let f = fixture();
        f.tracker.stop();
        f.tracker.stop();
        f.doc.append_child(f.doc.body().unwrap(), f.doc.create_element("div")).unwrap();
        f.doc.advance_time(MUTATION_PROCESS_MAX_DELAY_MS * 2.0);
        f.doc.run_animation_frame();
        assert!(f.records.borrow().is_empty());
        assert_eq!(f.shadow_roots.len(), 0);
    }
}
