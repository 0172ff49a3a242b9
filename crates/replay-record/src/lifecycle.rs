//! Lifecycle bus
//!
//! The slice of the RUM event pipeline the recorder talks to: collected RUM
//! events (for frustration records), view boundaries and page exit. Callbacks
//! run synchronously on `notify`, in subscription order.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use replay_dom::{Document, Event, EventTarget, EventType, ListenerOptions};

use crate::observers::{add_event_listeners, ListenerTracker};
use crate::records::{FrustrationType, TimeStamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifeCycleEventType {
    RawRumEventCollected,
    ViewCreated,
    ViewEnded,
    PageExited,
}

/// Action kinds reported by the action collection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    Click,
    Custom,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RawRumEventKind {
    Action {
        action_type: ActionType,
        frustration_types: Vec<FrustrationType>,
    },
    View,
    Error,
    Resource,
    LongTask,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RawRumEvent {
    pub date: TimeStamp,
    pub kind: RawRumEventKind,
}

/// Browser context the event was computed from
#[derive(Debug, Clone, Default)]
pub struct DomainContext {
    /// DOM events behind a user action; `None` for synthetic actions
    pub events: Option<Vec<Rc<Event>>>,
}

#[derive(Debug, Clone)]
pub struct RawRumEventCollected {
    pub raw_rum_event: RawRumEvent,
    pub domain_context: DomainContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewCreated {
    pub id: String,
    pub start_timestamp: TimeStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageExitReason {
    BeforeUnload,
    VisibilityHidden,
}

impl PageExitReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PageExitReason::BeforeUnload => "before_unload",
            PageExitReason::VisibilityHidden => "visibility_hidden",
        }
    }
}

#[derive(Debug, Clone)]
pub enum LifeCycleEvent {
    RawRumEventCollected(RawRumEventCollected),
    ViewCreated(ViewCreated),
    ViewEnded { end_timestamp: TimeStamp },
    PageExited { reason: PageExitReason },
}

impl LifeCycleEvent {
    pub fn event_type(&self) -> LifeCycleEventType {
        match self {
            LifeCycleEvent::RawRumEventCollected(_) => LifeCycleEventType::RawRumEventCollected,
            LifeCycleEvent::ViewCreated(_) => LifeCycleEventType::ViewCreated,
            LifeCycleEvent::ViewEnded { .. } => LifeCycleEventType::ViewEnded,
            LifeCycleEvent::PageExited { .. } => LifeCycleEventType::PageExited,
        }
    }
}

type LifeCycleCallback = Rc<dyn Fn(&LifeCycleEvent)>;

#[derive(Default)]
struct Subscribers {
    entries: Vec<(u64, LifeCycleEventType, LifeCycleCallback)>,
    next_id: u64,
}

/// Shared pub/sub handle
#[derive(Clone, Default)]
pub struct LifeCycle {
    subscribers: Rc<RefCell<Subscribers>>,
}

impl LifeCycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(
        &self,
        event_type: LifeCycleEventType,
        callback: impl Fn(&LifeCycleEvent) + 'static,
    ) -> Subscription {
        let mut subscribers = self.subscribers.borrow_mut();
        subscribers.next_id += 1;
        let id = subscribers.next_id;
        subscribers.entries.push((id, event_type, Rc::new(callback)));
        Subscription {
            subscribers: Rc::downgrade(&self.subscribers),
            id,
        }
    }

    pub fn notify(&self, event: LifeCycleEvent) {
        let event_type = event.event_type();
        // Callbacks may subscribe or unsubscribe while we iterate
        let callbacks: Vec<LifeCycleCallback> = self
            .subscribers
            .borrow()
            .entries
            .iter()
            .filter(|(_, t, _)| *t == event_type)
            .map(|(_, _, cb)| Rc::clone(cb))
            .collect();
        for callback in callbacks {
            callback(&event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().entries.len()
    }
}

/// Returned by [`LifeCycle::subscribe`]; `unsubscribe` is idempotent
pub struct Subscription {
    subscribers: Weak<RefCell<Subscribers>>,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        if let Some(subscribers) = self.subscribers.upgrade() {
            subscribers.borrow_mut().entries.retain(|(id, _, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Publish `PageExited` when the page is hidden or about to unload
pub fn observe_page_exit(doc: &Document, lifecycle: &LifeCycle) -> ListenerTracker {
    let on_unload = lifecycle.clone();
    let mut listeners = add_event_listeners(
        doc,
        EventTarget::Window,
        &[EventType::BeforeUnload],
        ListenerOptions::capture_passive(),
        move |_, _| {
            on_unload.notify(LifeCycleEvent::PageExited {
                reason: PageExitReason::BeforeUnload,
            })
        },
    );

    let on_hidden = lifecycle.clone();
    listeners.extend(add_event_listeners(
        doc,
        EventTarget::Node(doc.root()),
        &[EventType::VisibilityChange],
        ListenerOptions::capture_passive(),
        move |doc, _| {
            if doc.window().is_hidden() {
                on_hidden.notify(LifeCycleEvent::PageExited {
                    reason: PageExitReason::VisibilityHidden,
                });
            }
        },
    ));

    ListenerTracker::new(listeners)
}
