//! Recorder
//!
//! Starts every observer against one document and fans their records into a
//! single callback. Pending mutations are flushed before any other record is
//! emitted, so a record never refers to a node the stream has not added yet.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use replay_dom::Document;

use crate::lifecycle::LifeCycle;
use crate::observers::{
    track_focus, track_frustration, track_input, track_media_interaction, track_mouse_interaction, track_move,
    track_mutation, track_scroll, track_style_sheet, track_view_end, track_viewport_resize, track_visual_viewport,
    MutationTracker, RecordCallback, Tracker,
};
use crate::full_snapshot::{start_full_snapshots, take_full_snapshot};
use crate::records::{Record, TimeStamp};
use crate::scope::{timestamp_now, RecordScope};
use crate::serialize::SerializationStatus;
use crate::shadow_roots::ShadowRootsController;

/// Mutation sources the emit wrapper flushes; filled once they exist
#[derive(Default)]
struct MutationSources {
    document: RefCell<Option<MutationTracker>>,
    shadow_roots: RefCell<Option<ShadowRootsController>>,
}

impl MutationSources {
    fn flush(&self) {
        let shadow_roots = self.shadow_roots.borrow().clone();
        if let Some(shadow_roots) = shadow_roots {
            shadow_roots.flush();
        }
        let document = self.document.borrow().clone();
        if let Some(document) = document {
            document.flush();
        }
    }

    fn clear(&self) {
        self.document.borrow_mut().take();
        self.shadow_roots.borrow_mut().take();
    }
}

/// A running recording of one document
pub struct Recorder {
    doc: Document,
    scope: RecordScope,
    shadow_roots: ShadowRootsController,
    sources: Rc<MutationSources>,
    trackers: Vec<Box<dyn Tracker>>,
    stopped: Cell<bool>,
}

impl std::fmt::Debug for Recorder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Recorder")
            .field("trackers", &self.trackers.len())
            .field("shadow_roots", &self.shadow_roots.len())
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

/// Start recording `doc`: take the initial full snapshot and attach every
/// observer
pub fn record(doc: &Document, lifecycle: &LifeCycle, scope: RecordScope, emit: RecordCallback) -> Recorder {
    let sources = Rc::new(MutationSources::default());

    let flush_sources = Rc::clone(&sources);
    let emit: RecordCallback = Rc::new(move |record: Record| {
        if !record.is_mutation() {
            flush_sources.flush();
        }
        emit(record);
    });

    let shadow_roots = ShadowRootsController::new(scope.clone(), Rc::clone(&emit));
    *sources.shadow_roots.borrow_mut() = Some(shadow_roots.clone());

    let snapshot_emit = Rc::clone(&emit);
    let snapshot_sources = Rc::clone(&sources);
    let full_snapshots = start_full_snapshots(
        doc,
        scope.clone(),
        shadow_roots.clone(),
        lifecycle,
        move || snapshot_sources.flush(),
        move |records| records.into_iter().for_each(|record| snapshot_emit(record)),
        timestamp_now(doc),
    );

    let mutations = track_mutation(doc, scope.clone(), Rc::clone(&emit), shadow_roots.clone(), doc.root());
    *sources.document.borrow_mut() = Some(mutations.clone());

    let view_end_sources = Rc::clone(&sources);
    let trackers: Vec<Box<dyn Tracker>> = vec![
        Box::new(full_snapshots),
        Box::new(mutations),
        Box::new(track_move(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_mouse_interaction(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_scroll(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_viewport_resize(doc, Rc::clone(&emit))),
        Box::new(track_input(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_media_interaction(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_style_sheet(doc, scope.clone(), Rc::clone(&emit))),
        Box::new(track_focus(doc, Rc::clone(&emit))),
        Box::new(track_visual_viewport(doc, Rc::clone(&emit))),
        Box::new(track_frustration(lifecycle, scope.clone(), Rc::clone(&emit))),
        Box::new(track_view_end(
            doc,
            lifecycle,
            move || view_end_sources.flush(),
            Rc::clone(&emit),
        )),
    ];
    tracing::debug!(trackers = trackers.len(), "recorder started");

    Recorder {
        doc: doc.clone(),
        scope,
        shadow_roots,
        sources,
        trackers,
        stopped: Cell::new(false),
    }
}

impl Recorder {
    /// Emit every mutation observed so far
    pub fn flush_mutations(&self) {
        self.sources.flush();
    }

    /// Records of a full snapshot of the current page, without emitting
    /// them. Used when a segment opens for a view that has none.
    pub fn take_full_snapshot(&self, timestamp: TimeStamp) -> Vec<Record> {
        take_full_snapshot(
            &self.doc,
            &self.scope,
            SerializationStatus::SubsequentFullSnapshot,
            &self.shadow_roots,
            timestamp,
        )
    }

    pub fn scope(&self) -> &RecordScope {
        &self.scope
    }

    pub fn shadow_roots(&self) -> &ShadowRootsController {
        &self.shadow_roots
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }
}

impl Tracker for Recorder {
    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        for tracker in &self.trackers {
            tracker.stop();
        }
        self.shadow_roots.stop();
        self.sources.clear();
        tracing::debug!("recorder stopped");
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}
