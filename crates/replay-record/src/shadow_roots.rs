//! Shadow root tracking
//!
//! Mutation observers do not see through shadow boundaries, so every shadow
//! root met by the serializer gets a mutation tracker of its own. Trackers are
//! dropped when their host leaves the document or the recording stops.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use replay_dom::{Document, NodeKey};

use crate::observers::{track_mutation, MutationTracker, Tracker};
use crate::scope::{RecordCallback, RecordScope};

struct ShadowRootsInner {
    scope: RecordScope,
    emit: RecordCallback,
    trackers: RefCell<HashMap<NodeKey, MutationTracker>>,
}

/// Shared handle; clones see the same set of shadow roots
#[derive(Clone)]
pub struct ShadowRootsController {
    inner: Rc<ShadowRootsInner>,
}

impl ShadowRootsController {
    pub fn new(scope: RecordScope, emit: RecordCallback) -> Self {
        Self {
            inner: Rc::new(ShadowRootsInner {
                scope,
                emit,
                trackers: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Start observing `shadow_root`; no-op when already observed
    pub fn add_shadow_root(&self, doc: &Document, shadow_root: NodeKey) {
        if self.inner.trackers.borrow().contains_key(&shadow_root) {
            return;
        }
        let tracker = track_mutation(
            doc,
            self.inner.scope.clone(),
            Rc::clone(&self.inner.emit),
            self.clone(),
            shadow_root,
        );
        self.inner.trackers.borrow_mut().insert(shadow_root, tracker);
    }

    pub fn remove_shadow_root(&self, shadow_root: NodeKey) {
        let tracker = self.inner.trackers.borrow_mut().remove(&shadow_root);
        if let Some(tracker) = tracker {
            tracker.stop();
        }
    }

    /// Flush every shadow root's pending mutations
    pub fn flush(&self) {
        let trackers: Vec<MutationTracker> = self.inner.trackers.borrow().values().cloned().collect();
        for tracker in trackers {
            tracker.flush();
        }
    }

    /// Stop every tracker
    pub fn stop(&self) {
        let trackers: Vec<MutationTracker> = self
            .inner
            .trackers
            .borrow_mut()
            .drain()
            .map(|(_, tracker)| tracker)
            .collect();
        for tracker in trackers {
            tracker.stop();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.trackers.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.trackers.borrow().is_empty()
    }

    pub fn contains(&self, shadow_root: NodeKey) -> bool {
        self.inner.trackers.borrow().contains_key(&shadow_root)
    }
}
