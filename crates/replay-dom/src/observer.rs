//! Mutation Observer API
//!
//! Records are queued while the DOM is mutated and delivered in one batch per
//! observer at the next microtask checkpoint (`Document::flush_mutations`).

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::document::Document;
use crate::NodeKey;

/// Mutation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationType {
    Attributes,
    CharacterData,
    ChildList,
}

/// Mutation record
#[derive(Debug, Clone, PartialEq)]
pub struct MutationRecord {
    pub mutation_type: MutationType,
    pub target: NodeKey,
    pub added_nodes: Vec<NodeKey>,
    pub removed_nodes: Vec<NodeKey>,
    pub previous_sibling: Option<NodeKey>,
    pub next_sibling: Option<NodeKey>,
    pub attribute_name: Option<String>,
    pub old_value: Option<String>,
}

impl MutationRecord {
    pub(crate) fn child_list(
        target: NodeKey,
        added: Vec<NodeKey>,
        removed: Vec<NodeKey>,
        previous_sibling: Option<NodeKey>,
        next_sibling: Option<NodeKey>,
    ) -> Self {
        Self {
            mutation_type: MutationType::ChildList,
            target,
            added_nodes: added,
            removed_nodes: removed,
            previous_sibling,
            next_sibling,
            attribute_name: None,
            old_value: None,
        }
    }

    pub(crate) fn attribute(target: NodeKey, name: &str, old_value: Option<String>) -> Self {
        Self {
            mutation_type: MutationType::Attributes,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: Some(name.to_string()),
            old_value,
        }
    }

    pub(crate) fn character_data(target: NodeKey, old_value: String) -> Self {
        Self {
            mutation_type: MutationType::CharacterData,
            target,
            added_nodes: Vec::new(),
            removed_nodes: Vec::new(),
            previous_sibling: None,
            next_sibling: None,
            attribute_name: None,
            old_value: Some(old_value),
        }
    }
}

/// Mutation observer options
#[derive(Debug, Clone, Default)]
pub struct MutationObserverInit {
    pub child_list: bool,
    pub attributes: bool,
    pub character_data: bool,
    pub subtree: bool,
    pub attribute_old_value: bool,
    pub character_data_old_value: bool,
    pub attribute_filter: Option<Vec<String>>,
}

impl MutationObserverInit {
    /// Everything, with old values, over the whole subtree
    pub fn all() -> Self {
        Self {
            child_list: true,
            attributes: true,
            character_data: true,
            subtree: true,
            attribute_old_value: true,
            character_data_old_value: true,
            attribute_filter: None,
        }
    }

    fn accepts(&self, record: &MutationRecord) -> bool {
        match record.mutation_type {
            MutationType::ChildList => self.child_list,
            MutationType::CharacterData => self.character_data,
            MutationType::Attributes => {
                if !self.attributes {
                    return false;
                }
                match (&self.attribute_filter, &record.attribute_name) {
                    (Some(filter), Some(name)) => filter.contains(name),
                    _ => true,
                }
            }
        }
    }

    fn wants_old_value(&self, mutation_type: MutationType) -> bool {
        match mutation_type {
            MutationType::Attributes => self.attribute_old_value,
            MutationType::CharacterData => self.character_data_old_value,
            MutationType::ChildList => false,
        }
    }
}

pub(crate) type MutationCallback = Rc<dyn Fn(&Document, Vec<MutationRecord>)>;

struct ObserverEntry {
    id: u64,
    observations: Vec<(NodeKey, MutationObserverInit)>,
    pending: Vec<MutationRecord>,
    callback: MutationCallback,
}

/// All observers of one document
#[derive(Default)]
pub(crate) struct MutationObserverRegistry {
    observers: Vec<ObserverEntry>,
    next_id: u64,
}

impl MutationObserverRegistry {
    pub fn create(&mut self, callback: MutationCallback) -> u64 {
        self.next_id += 1;
        self.observers.push(ObserverEntry {
            id: self.next_id,
            observations: Vec::new(),
            pending: Vec::new(),
            callback,
        });
        self.next_id
    }

    pub fn observe(&mut self, id: u64, target: NodeKey, options: MutationObserverInit) {
        if let Some(entry) = self.observers.iter_mut().find(|o| o.id == id) {
            match entry.observations.iter_mut().find(|(t, _)| *t == target) {
                Some(existing) => existing.1 = options,
                None => entry.observations.push((target, options)),
            }
        }
    }

    pub fn disconnect(&mut self, id: u64) {
        if let Some(entry) = self.observers.iter_mut().find(|o| o.id == id) {
            entry.observations.clear();
            entry.pending.clear();
        }
    }

    pub fn release(&mut self, id: u64) {
        self.observers.retain(|o| o.id != id);
    }

    pub fn take_records(&mut self, id: u64) -> Vec<MutationRecord> {
        self.observers
            .iter_mut()
            .find(|o| o.id == id)
            .map(|o| std::mem::take(&mut o.pending))
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.iter().all(|o| o.observations.is_empty())
    }

    /// Queue a record for every interested observer. `inclusive_ancestors`
    /// lists the target and its ancestors up to the nearest tree root,
    /// nearest first.
    pub fn queue(&mut self, record: &MutationRecord, inclusive_ancestors: &[NodeKey]) {
        for entry in &mut self.observers {
            let interested = entry.observations.iter().find(|(observed, options)| {
                let in_scope = if options.subtree {
                    inclusive_ancestors.contains(observed)
                } else {
                    *observed == record.target
                };
                in_scope && options.accepts(record)
            });
            if let Some((_, options)) = interested {
                let mut record = record.clone();
                if !options.wants_old_value(record.mutation_type) {
                    record.old_value = None;
                }
                entry.pending.push(record);
            }
        }
    }

    /// Drain pending batches along with the callbacks that receive them
    pub fn drain(&mut self) -> Vec<(MutationCallback, Vec<MutationRecord>)> {
        self.observers
            .iter_mut()
            .filter(|o| !o.pending.is_empty())
            .map(|o| (Rc::clone(&o.callback), std::mem::take(&mut o.pending)))
            .collect()
    }
}

/// Handle on a MutationObserver created by `Document::create_mutation_observer`
#[derive(Clone)]
pub struct MutationObserverHandle {
    pub(crate) registry: Weak<RefCell<MutationObserverRegistry>>,
    pub(crate) id: u64,
}

impl MutationObserverHandle {
    /// Start (or update) observing `target`
    pub fn observe(&self, target: NodeKey, options: MutationObserverInit) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().observe(self.id, target, options);
        }
    }

    /// Stop observing everything and discard queued records
    pub fn disconnect(&self) {
        if let Some(registry) = self.registry.upgrade() {
            let mut registry = registry.borrow_mut();
            registry.disconnect(self.id);
            registry.release(self.id);
        }
    }

    /// Take queued records without waiting for delivery
    pub fn take_records(&self) -> Vec<MutationRecord> {
        self.registry
            .upgrade()
            .map(|registry| registry.borrow_mut().take_records(self.id))
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for MutationObserverHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MutationObserverHandle").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(index: u32) -> NodeKey {
        NodeKey {
            index,
            generation: 0,
        }
    }

    #[test]
    fn test_subtree_scope() {
        let mut registry = MutationObserverRegistry::default();
        let id = registry.create(Rc::new(|_: &Document, _: Vec<MutationRecord>| {}));
        registry.observe(id, key(1), MutationObserverInit::all());

        let record = MutationRecord::attribute(key(3), "class", Some("old".into()));
        registry.queue(&record, &[key(3), key(2), key(1)]);
        registry.queue(&record, &[key(9)]);

        let records = registry.take_records(id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].old_value.as_deref(), Some("old"));
    }

    #[test]
    fn test_attribute_filter_and_old_value() {
        let mut registry = MutationObserverRegistry::default();
        let id = registry.create(Rc::new(|_: &Document, _: Vec<MutationRecord>| {}));
        registry.observe(
            id,
            key(1),
            MutationObserverInit {
                attributes: true,
                attribute_filter: Some(vec!["id".into()]),
                ..Default::default()
            },
        );

        registry.queue(&MutationRecord::attribute(key(1), "class", None), &[key(1)]);
        registry.queue(&MutationRecord::attribute(key(1), "id", Some("x".into())), &[key(1)]);

        let records = registry.take_records(id);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].attribute_name.as_deref(), Some("id"));
        assert_eq!(records[0].old_value, None);
    }

    #[test]
    fn test_disconnect_clears_pending() {
        let mut registry = MutationObserverRegistry::default();
        let id = registry.create(Rc::new(|_: &Document, _: Vec<MutationRecord>| {}));
        registry.observe(id, key(1), MutationObserverInit::all());
        registry.queue(&MutationRecord::character_data(key(1), "a".into()), &[key(1)]);
        assert_eq!(registry.drain().len(), 1);
        registry.queue(&MutationRecord::character_data(key(1), "b".into()), &[key(1)]);

        registry.disconnect(id);
        assert!(registry.drain().is_empty());
        assert!(registry.is_empty());
    }
}
