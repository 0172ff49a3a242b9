//! fOS Replay DOM - Observable page model
//!
//! Arena-based DOM tree with the browser surfaces a session recorder hooks
//! into: event dispatch, MutationObserver, instrumented property setters,
//! CSSOM rule edits, the window/viewport state and a cooperative scheduler.

mod document;
mod events;
mod geometry;
mod node;
mod observer;
mod scheduler;
mod stylesheet;
mod tree;
mod window;

pub use document::{Document, DoctypeData, HookHandle, PropertyChange};
pub use events::{
    Event, EventPayload, EventTarget, EventType, ListenerHandle, ListenerOptions, MouseData,
    TouchPoint,
};
pub use geometry::DOMRect;
pub use node::{Attribute, Namespace, NodeKind, ShadowRootMode};
pub use observer::{MutationObserverHandle, MutationObserverInit, MutationRecord, MutationType};
pub use scheduler::{FrameId, TimerId};
pub use stylesheet::{CssRule, CssStyleSheet, StyleSheetChange, StyleSheetChangeKind};
pub use window::{VisibilityState, VisualViewport, Window};

/// Node handle: arena slot plus the generation the slot had when the node
/// was created. A key whose generation no longer matches its slot refers to
/// a node that has been dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl NodeKey {
    /// Arena slot
    #[inline]
    pub fn index(self) -> u32 {
        self.index
    }

    /// Slot generation at creation time
    #[inline]
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// DOM operation errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DomError {
    #[error("Node {0:?} no longer exists")]
    StaleNode(NodeKey),

    #[error("Hierarchy request error: {0}")]
    HierarchyRequest(&'static str),

    #[error("Node {child:?} is not a child of {parent:?}")]
    NotFound { parent: NodeKey, child: NodeKey },

    #[error("Invalid node type: expected {0}")]
    InvalidNodeType(&'static str),

    #[error("Index {index} out of range for rule list of length {len}")]
    IndexSize { index: usize, len: usize },
}
