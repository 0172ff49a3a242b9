//! Observers
//!
//! Each observer attaches to one browser surface (event listeners, the
//! mutation observer, instrumented setters, the lifecycle bus) and turns what
//! it sees into records pushed through a [`RecordCallback`]. Starting one
//! returns a [`Tracker`]; stopping is idempotent.

mod focus;
mod frustration;
mod input;
mod media;
mod mouse_interaction;
mod moves;
mod mutation;
mod scroll;
mod style_sheet;
mod throttle;
mod view_end;
mod viewport_resize;
mod viewports;
mod visual_viewport;

use std::rc::Rc;

use replay_dom::{Document, Event, EventTarget, EventType, HookHandle, ListenerHandle, ListenerOptions};

pub use focus::track_focus;
pub use frustration::track_frustration;
pub use input::track_input;
pub use media::track_media_interaction;
pub use mouse_interaction::track_mouse_interaction;
pub use moves::{track_move, MOUSE_MOVE_THROTTLE_MS};
pub use mutation::{process_mutations, track_mutation, MutationTracker, MUTATION_PROCESS_MAX_DELAY_MS};
pub use scroll::{track_scroll, SCROLL_THROTTLE_MS};
pub use style_sheet::track_style_sheet;
pub use throttle::{Throttle, ThrottleOptions};
pub use view_end::track_view_end;
pub use viewport_resize::{track_viewport_resize, VIEWPORT_RESIZE_THROTTLE_MS};
pub use viewports::{convert_mouse_event_to_layout_coordinates, viewport_dimension, visual_viewport_data};
pub use visual_viewport::track_visual_viewport;

pub use crate::scope::RecordCallback;

use crate::lifecycle::Subscription;

/// A running observer
pub trait Tracker {
    /// Detach from everything; safe to call more than once
    fn stop(&self);
}

/// Tracker over DOM listeners and setter hooks, plus optional cleanup
#[derive(Default)]
pub struct ListenerTracker {
    listeners: Vec<ListenerHandle>,
    hooks: Vec<HookHandle>,
    cleanup: Option<Box<dyn Fn()>>,
}

impl ListenerTracker {
    pub fn new(listeners: Vec<ListenerHandle>) -> Self {
        Self {
            listeners,
            ..Self::default()
        }
    }

    /// Tracker for an observer that could not attach
    pub fn noop() -> Self {
        Self::default()
    }

    pub fn with_hooks(mut self, hooks: Vec<HookHandle>) -> Self {
        self.hooks.extend(hooks);
        self
    }

    pub fn with_cleanup(mut self, cleanup: impl Fn() + 'static) -> Self {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Tracker for ListenerTracker {
    fn stop(&self) {
        for listener in &self.listeners {
            listener.remove();
        }
        for hook in &self.hooks {
            hook.remove();
        }
        if let Some(cleanup) = &self.cleanup {
            cleanup();
        }
    }
}

impl Tracker for Subscription {
    fn stop(&self) {
        self.unsubscribe();
    }
}

/// Install one listener per event type
pub(crate) fn add_event_listeners(
    doc: &Document,
    target: EventTarget,
    event_types: &[EventType],
    options: ListenerOptions,
    handler: impl Fn(&Document, &Rc<Event>) + 'static,
) -> Vec<ListenerHandle> {
    let handler = Rc::new(handler);
    event_types
        .iter()
        .map(|&event_type| {
            let handler = Rc::clone(&handler);
            doc.add_event_listener(target, event_type, options, move |doc, event| {
                handler(doc, event)
            })
        })
        .collect()
}

/// Listeners on the document node, where the recorder catches everything
/// dispatched inside the page (shadow trees included)
pub(crate) fn add_document_listeners(
    doc: &Document,
    event_types: &[EventType],
    handler: impl Fn(&Document, &Rc<Event>) + 'static,
) -> Vec<ListenerHandle> {
    add_event_listeners(
        doc,
        EventTarget::Node(doc.root()),
        event_types,
        ListenerOptions::capture_passive(),
        handler,
    )
}
