//! DOM Events
//!
//! Event objects, listener registration and the listener registry used by
//! `Document::dispatch_event`.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::document::Document;
use crate::NodeKey;

/// Event type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Click,
    DblClick,
    MouseDown,
    MouseUp,
    MouseMove,
    PointerDown,
    PointerUp,
    ContextMenu,
    Focus,
    Blur,
    TouchStart,
    TouchEnd,
    TouchMove,
    Input,
    Change,
    Scroll,
    Resize,
    Play,
    Pause,
    VisibilityChange,
    BeforeUnload,
    PageHide,
}

impl EventType {
    /// Check if this event type can bubble
    pub fn bubbles(&self) -> bool {
        !matches!(
            self,
            EventType::Focus
                | EventType::Blur
                | EventType::Scroll
                | EventType::Resize
                | EventType::Play
                | EventType::Pause
                | EventType::BeforeUnload
                | EventType::PageHide
        )
    }

    /// DOM name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Click => "click",
            EventType::DblClick => "dblclick",
            EventType::MouseDown => "mousedown",
            EventType::MouseUp => "mouseup",
            EventType::MouseMove => "mousemove",
            EventType::PointerDown => "pointerdown",
            EventType::PointerUp => "pointerup",
            EventType::ContextMenu => "contextmenu",
            EventType::Focus => "focus",
            EventType::Blur => "blur",
            EventType::TouchStart => "touchstart",
            EventType::TouchEnd => "touchend",
            EventType::TouchMove => "touchmove",
            EventType::Input => "input",
            EventType::Change => "change",
            EventType::Scroll => "scroll",
            EventType::Resize => "resize",
            EventType::Play => "play",
            EventType::Pause => "pause",
            EventType::VisibilityChange => "visibilitychange",
            EventType::BeforeUnload => "beforeunload",
            EventType::PageHide => "pagehide",
        }
    }
}

/// Where an event is dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventTarget {
    Window,
    VisualViewport,
    Node(NodeKey),
}

impl EventTarget {
    pub fn node(&self) -> Option<NodeKey> {
        match self {
            EventTarget::Node(key) => Some(*key),
            _ => None,
        }
    }
}

/// Mouse / pointer coordinates. Synthetic events (`element.click()`) carry none.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MouseData {
    pub client_x: Option<f64>,
    pub client_y: Option<f64>,
}

/// One touch point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TouchPoint {
    pub client_x: f64,
    pub client_y: f64,
}

/// Event payload
#[derive(Debug, Clone, PartialEq, Default)]
pub enum EventPayload {
    #[default]
    None,
    Mouse(MouseData),
    Touch(Vec<TouchPoint>),
}

/// DOM event
#[derive(Debug, Clone)]
pub struct Event {
    pub event_type: EventType,
    pub target: EventTarget,
    pub payload: EventPayload,
    pub bubbles: bool,
    /// Generated by the user agent rather than by script
    pub is_trusted: bool,
    /// Set by `dispatch_event`
    pub timestamp: f64,
}

impl Event {
    pub fn new(event_type: EventType, target: EventTarget) -> Self {
        Self {
            event_type,
            target,
            payload: EventPayload::None,
            bubbles: event_type.bubbles(),
            is_trusted: true,
            timestamp: 0.0,
        }
    }

    /// Event at a node
    pub fn at(event_type: EventType, target: NodeKey) -> Self {
        Self::new(event_type, EventTarget::Node(target))
    }

    /// Mouse / pointer event with client coordinates
    pub fn mouse(event_type: EventType, target: NodeKey, client_x: f64, client_y: f64) -> Self {
        Self {
            payload: EventPayload::Mouse(MouseData {
                client_x: Some(client_x),
                client_y: Some(client_y),
            }),
            ..Self::at(event_type, target)
        }
    }

    /// Script-generated mouse event without coordinates
    pub fn synthetic_mouse(event_type: EventType, target: NodeKey) -> Self {
        Self {
            payload: EventPayload::Mouse(MouseData::default()),
            is_trusted: false,
            ..Self::at(event_type, target)
        }
    }

    /// Touch event with its changed touches
    pub fn touch(event_type: EventType, target: NodeKey, touches: Vec<TouchPoint>) -> Self {
        Self {
            payload: EventPayload::Touch(touches),
            ..Self::at(event_type, target)
        }
    }

    pub fn is_touch(&self) -> bool {
        matches!(self.payload, EventPayload::Touch(_))
    }

    /// Client coordinates of the pointer (first changed touch for touch events)
    pub fn client_position(&self) -> Option<(f64, f64)> {
        match &self.payload {
            EventPayload::Mouse(m) => Some((m.client_x?, m.client_y?)),
            EventPayload::Touch(touches) => touches.first().map(|t| (t.client_x, t.client_y)),
            EventPayload::None => None,
        }
    }
}

/// Listener options
#[derive(Debug, Clone, Copy, Default)]
pub struct ListenerOptions {
    pub capture: bool,
    pub passive: bool,
}

impl ListenerOptions {
    /// Capturing, passive listener (what recorders install)
    pub fn capture_passive() -> Self {
        Self {
            capture: true,
            passive: true,
        }
    }
}

pub(crate) type ListenerCallback = Rc<dyn Fn(&Document, &Rc<Event>)>;

struct ListenerEntry {
    id: u64,
    target: EventTarget,
    event_type: EventType,
    options: ListenerOptions,
    callback: ListenerCallback,
}

/// Registered event listeners
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    entries: Vec<ListenerEntry>,
    next_id: u64,
}

impl ListenerRegistry {
    pub fn add(
        &mut self,
        target: EventTarget,
        event_type: EventType,
        options: ListenerOptions,
        callback: ListenerCallback,
    ) -> u64 {
        self.next_id += 1;
        let id = self.next_id;
        self.entries.push(ListenerEntry {
            id,
            target,
            event_type,
            options,
            callback,
        });
        id
    }

    pub fn remove(&mut self, id: u64) {
        self.entries.retain(|e| e.id != id);
    }

    /// Callbacks for one phase at one target, in registration order
    pub fn matching(&self, target: EventTarget, event_type: EventType, capture: bool) -> Vec<ListenerCallback> {
        self.entries
            .iter()
            .filter(|e| e.target == target && e.event_type == event_type && e.options.capture == capture)
            .map(|e| Rc::clone(&e.callback))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Handle returned by `add_event_listener`; `remove` is idempotent
#[derive(Clone)]
pub struct ListenerHandle {
    pub(crate) registry: Weak<RefCell<ListenerRegistry>>,
    pub(crate) id: u64,
}

impl ListenerHandle {
    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.id);
        }
    }
}

impl std::fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
