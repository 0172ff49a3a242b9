//! Document - High-level document API
//!
//! `Document` is a shared handle on one page: the node arena, the window, the
//! listener and observer registries and the scheduler. Cloning it is cheap and
//! every method takes `&self`; internal state is borrowed for the duration of
//! one call only, so listeners and observers can freely read (and mutate) the
//! page while they run.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::events::{Event, EventTarget, EventType, ListenerHandle, ListenerOptions, ListenerRegistry};
use crate::geometry::DOMRect;
use crate::node::{Attribute, ElementData, Namespace, Node, NodeData, NodeKind, ShadowRootMode};
use crate::observer::{MutationObserverHandle, MutationObserverRegistry, MutationRecord};
use crate::scheduler::{FrameId, Scheduler, TimerId};
use crate::stylesheet::{CssRule, CssStyleSheet, StyleSheetChange, StyleSheetChangeKind};
use crate::tree::DomTree;
use crate::window::{VisibilityState, VisualViewport, Window};
use crate::{DomError, NodeKey};

/// Doctype fields
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DoctypeData {
    pub name: String,
    pub public_id: String,
    pub system_id: String,
}

/// Programmatic form property assignment (`input.value = ...`)
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyChange {
    Value { node: NodeKey, value: String },
    Checked { node: NodeKey, checked: bool },
    Selected { node: NodeKey, selected: bool },
}

impl PropertyChange {
    pub fn node(&self) -> NodeKey {
        match self {
            PropertyChange::Value { node, .. }
            | PropertyChange::Checked { node, .. }
            | PropertyChange::Selected { node, .. } => *node,
        }
    }
}

type PropertyHook = Rc<dyn Fn(&Document, &PropertyChange)>;
type StyleSheetHook = Rc<dyn Fn(&Document, &StyleSheetChange)>;

#[derive(Default)]
struct HookRegistry {
    property: Vec<(u64, PropertyHook)>,
    style_sheet: Vec<(u64, StyleSheetHook)>,
    next_id: u64,
}

impl HookRegistry {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: u64) {
        self.property.retain(|(i, _)| *i != id);
        self.style_sheet.retain(|(i, _)| *i != id);
    }
}

/// Handle on an instrumented setter; `remove` is idempotent
#[derive(Clone)]
pub struct HookHandle {
    registry: Weak<RefCell<HookRegistry>>,
    id: u64,
}

impl HookHandle {
    pub fn remove(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.borrow_mut().remove(self.id);
        }
    }
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle").field("id", &self.id).finish()
    }
}

struct DocumentInner {
    tree: RefCell<DomTree>,
    root: NodeKey,
    window: RefCell<Window>,
    listeners: Rc<RefCell<ListenerRegistry>>,
    observers: Rc<RefCell<MutationObserverRegistry>>,
    hooks: Rc<RefCell<HookRegistry>>,
    scheduler: RefCell<Scheduler>,
    active_element: Cell<Option<NodeKey>>,
    delivering: Cell<bool>,
}

/// HTML Document
#[derive(Clone)]
pub struct Document {
    inner: Rc<DocumentInner>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("href", &self.inner.window.borrow().href)
            .field("nodes", &self.inner.tree.borrow().len())
            .finish()
    }
}

impl Document {
    /// Create a new document with `<!DOCTYPE html><html><head></head><body></body></html>`
    pub fn new(url: &str) -> Self {
        let doc = Self::empty(url);
        {
            let mut tree = doc.inner.tree.borrow_mut();
            let root = doc.inner.root;
            let doctype = tree.insert(Node {
                parent: None,
                children: Vec::new(),
                data: NodeData::Doctype {
                    name: "html".to_string(),
                    public_id: String::new(),
                    system_id: String::new(),
                },
            });
            let html = tree.insert(Node::element("html", Namespace::Html));
            let head = tree.insert(Node::element("head", Namespace::Html));
            let body = tree.insert(Node::element("body", Namespace::Html));
            link(&mut tree, root, doctype);
            link(&mut tree, root, html);
            link(&mut tree, html, head);
            link(&mut tree, html, body);
        }
        doc
    }

    /// Create an empty document (no structure)
    pub fn empty(url: &str) -> Self {
        let mut tree = DomTree::new();
        let root = tree.insert(Node::document());
        Self {
            inner: Rc::new(DocumentInner {
                tree: RefCell::new(tree),
                root,
                window: RefCell::new(Window::new(url)),
                listeners: Rc::new(RefCell::new(ListenerRegistry::default())),
                observers: Rc::new(RefCell::new(MutationObserverRegistry::default())),
                hooks: Rc::new(RefCell::new(HookRegistry::default())),
                scheduler: RefCell::new(Scheduler::new(0.0)),
                active_element: Cell::new(None),
                delivering: Cell::new(false),
            }),
        }
    }

    /// Whether both handles refer to the same page
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// The document node
    pub fn root(&self) -> NodeKey {
        self.inner.root
    }

    /// `<html>` element (also the scrolling element)
    pub fn document_element(&self) -> Option<NodeKey> {
        self.children(self.inner.root)
            .into_iter()
            .find(|&c| self.node_kind(c) == Some(NodeKind::Element))
    }

    pub fn head(&self) -> Option<NodeKey> {
        self.child_by_tag(self.document_element()?, "head")
    }

    pub fn body(&self) -> Option<NodeKey> {
        self.child_by_tag(self.document_element()?, "body")
    }

    fn child_by_tag(&self, parent: NodeKey, tag: &str) -> Option<NodeKey> {
        self.children(parent)
            .into_iter()
            .find(|&c| self.tag_name(c).as_deref() == Some(tag))
    }

    /// Number of live nodes
    pub fn node_count(&self) -> usize {
        self.inner.tree.borrow().len()
    }

    // ------------------------------------------------------------------
    // Node creation
    // ------------------------------------------------------------------

    fn insert_node(&self, node: Node) -> NodeKey {
        self.inner.tree.borrow_mut().insert(node)
    }

    /// Create an HTML element
    pub fn create_element(&self, tag_name: &str) -> NodeKey {
        self.create_element_ns(tag_name, Namespace::Html)
    }

    /// Create an element in a namespace
    pub fn create_element_ns(&self, tag_name: &str, namespace: Namespace) -> NodeKey {
        let mut node = Node::element(tag_name, namespace);
        if let Some(element) = node.as_element_mut() {
            if element.namespace == Namespace::Html && element.tag_name == "style" {
                element.sheet = Some(CssStyleSheet::new());
            }
        }
        self.insert_node(node)
    }

    pub fn create_text(&self, data: &str) -> NodeKey {
        self.insert_node(Node::new_text(data.to_string()))
    }

    pub fn create_comment(&self, data: &str) -> NodeKey {
        self.insert_node(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Comment(data.to_string()),
        })
    }

    pub fn create_cdata(&self, data: &str) -> NodeKey {
        self.insert_node(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::CData(data.to_string()),
        })
    }

    pub fn create_doctype(&self, name: &str, public_id: &str, system_id: &str) -> NodeKey {
        self.insert_node(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::Doctype {
                name: name.to_string(),
                public_id: public_id.to_string(),
                system_id: system_id.to_string(),
            },
        })
    }

    /// The recorder never serializes these, so only the character data is kept
    pub fn create_processing_instruction(&self, data: &str) -> NodeKey {
        self.insert_node(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::ProcessingInstruction {
                data: data.to_string(),
            },
        })
    }

    /// Attach a shadow root to `host`
    pub fn attach_shadow(&self, host: NodeKey, mode: ShadowRootMode) -> Result<NodeKey, DomError> {
        if self.with_element(host, |e| e.shadow_root.is_some())? {
            return Err(DomError::HierarchyRequest("element already hosts a shadow root"));
        }
        let shadow = self.insert_node(Node {
            parent: None,
            children: Vec::new(),
            data: NodeData::ShadowRoot { host, mode },
        });
        self.with_element_mut(host, |e| e.shadow_root = Some(shadow))?;
        Ok(shadow)
    }

    /// Free a detached subtree. Keys into it stop resolving.
    pub fn drop_node(&self, node: NodeKey) -> Result<(), DomError> {
        if node == self.inner.root {
            return Err(DomError::HierarchyRequest("the document cannot be dropped"));
        }
        if self.parent(node).is_some() {
            return Err(DomError::HierarchyRequest("node is still attached"));
        }
        if let Some(host) = self.shadow_host(node) {
            if self.shadow_root(host) == Some(node) {
                return Err(DomError::HierarchyRequest("shadow root is still attached"));
            }
        }
        if !self.exists(node) {
            return Err(DomError::StaleNode(node));
        }

        let mut doomed = vec![node];
        let mut i = 0;
        while i < doomed.len() {
            let current = doomed[i];
            doomed.extend(self.children(current));
            if let Some(shadow) = self.shadow_root(current) {
                doomed.push(shadow);
            }
            i += 1;
        }

        let mut tree = self.inner.tree.borrow_mut();
        for key in &doomed {
            tree.remove(*key);
        }
        tracing::debug!(nodes = doomed.len(), "dropped detached subtree");
        if let Some(active) = self.inner.active_element.get() {
            if doomed.contains(&active) {
                self.inner.active_element.set(None);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Tree mutation
    // ------------------------------------------------------------------

    pub fn append_child(&self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        self.insert_before(parent, child, None)
    }

    /// Insert `child` before `reference` (or at the end). A child that is
    /// already in the tree is moved.
    pub fn insert_before(
        &self,
        parent: NodeKey,
        child: NodeKey,
        reference: Option<NodeKey>,
    ) -> Result<(), DomError> {
        {
            let tree = self.inner.tree.borrow();
            let parent_node = tree.get(parent).ok_or(DomError::StaleNode(parent))?;
            if !parent_node.is_container() {
                return Err(DomError::HierarchyRequest("parent cannot have children"));
            }
            let child_node = tree.get(child).ok_or(DomError::StaleNode(child))?;
            if matches!(child_node.kind(), NodeKind::Document | NodeKind::ShadowRoot) {
                return Err(DomError::HierarchyRequest("node cannot be inserted"));
            }
            if let Some(reference) = reference {
                if tree.get(reference).and_then(|n| n.parent) != Some(parent) {
                    return Err(DomError::NotFound {
                        parent,
                        child: reference,
                    });
                }
            }
        }
        if self.is_composed_inclusive_ancestor(child, parent) {
            return Err(DomError::HierarchyRequest("node is an ancestor of the new parent"));
        }

        let reference = if reference == Some(child) {
            self.next_sibling(child)
        } else {
            reference
        };
        if let Some(old_parent) = self.parent(child) {
            self.detach(old_parent, child);
        }

        let (previous, next) = {
            let mut tree = self.inner.tree.borrow_mut();
            let Some(parent_node) = tree.get_mut(parent) else {
                return Err(DomError::StaleNode(parent));
            };
            let len = parent_node.children.len();
            let pos = reference
                .and_then(|r| parent_node.children.iter().position(|c| *c == r))
                .unwrap_or(len);
            parent_node.children.insert(pos, child);
            let previous = pos.checked_sub(1).map(|i| parent_node.children[i]);
            let next = parent_node.children.get(pos + 1).copied();
            if let Some(child_node) = tree.get_mut(child) {
                child_node.parent = Some(parent);
            }
            (previous, next)
        };

        self.queue_mutation(MutationRecord::child_list(parent, vec![child], Vec::new(), previous, next));
        Ok(())
    }

    pub fn remove_child(&self, parent: NodeKey, child: NodeKey) -> Result<(), DomError> {
        if !self.exists(child) {
            return Err(DomError::StaleNode(child));
        }
        if self.parent(child) != Some(parent) {
            return Err(DomError::NotFound { parent, child });
        }
        self.detach(parent, child);
        Ok(())
    }

    /// `node.remove()`
    pub fn remove(&self, node: NodeKey) {
        if let Some(parent) = self.parent(node) {
            self.detach(parent, node);
        }
    }

    fn detach(&self, parent: NodeKey, child: NodeKey) {
        let removed = {
            let mut tree = self.inner.tree.borrow_mut();
            let Some(parent_node) = tree.get_mut(parent) else {
                return;
            };
            let Some(pos) = parent_node.children.iter().position(|c| *c == child) else {
                return;
            };
            parent_node.children.remove(pos);
            let previous = pos.checked_sub(1).map(|i| parent_node.children[i]);
            let next = parent_node.children.get(pos).copied();
            if let Some(child_node) = tree.get_mut(child) {
                child_node.parent = None;
            }
            (previous, next)
        };
        if let Some(active) = self.inner.active_element.get() {
            if self.is_inclusive_ancestor(child, active) {
                self.inner.active_element.set(None);
            }
        }
        self.queue_mutation(MutationRecord::child_list(parent, Vec::new(), vec![child], removed.0, removed.1));
    }

    pub fn set_attribute(&self, node: NodeKey, name: &str, value: &str) -> Result<(), DomError> {
        let old = self.with_element_mut(node, |e| {
            let name = attribute_name(e, name);
            e.set_attr(&name, value.to_string())
        })?;
        let name = self.with_element(node, |e| attribute_name(e, name))?;
        self.queue_mutation(MutationRecord::attribute(node, &name, old));
        Ok(())
    }

    pub fn remove_attribute(&self, node: NodeKey, name: &str) -> Result<(), DomError> {
        let name = self.with_element(node, |e| attribute_name(e, name))?;
        if let Some(old) = self.with_element_mut(node, |e| e.remove_attr(&name))? {
            self.queue_mutation(MutationRecord::attribute(node, &name, Some(old)));
        }
        Ok(())
    }

    /// Replace the data of a text, comment or CDATA node
    pub fn set_text(&self, node: NodeKey, data: &str) -> Result<(), DomError> {
        let old = {
            let mut tree = self.inner.tree.borrow_mut();
            let target = tree.get_mut(node).ok_or(DomError::StaleNode(node))?;
            match &mut target.data {
                NodeData::Text(t) | NodeData::Comment(t) | NodeData::CData(t) => {
                    std::mem::replace(t, data.to_string())
                }
                NodeData::ProcessingInstruction { data: d } => std::mem::replace(d, data.to_string()),
                _ => return Err(DomError::InvalidNodeType("character data")),
            }
        };
        self.queue_mutation(MutationRecord::character_data(node, old));
        Ok(())
    }

    // ------------------------------------------------------------------
    // Form state
    // ------------------------------------------------------------------

    /// `element.value = value` (instrumented setter)
    pub fn set_value(&self, node: NodeKey, value: &str) -> Result<(), DomError> {
        self.with_element_mut(node, |e| e.value = Some(value.to_string()))?;
        self.notify_property(PropertyChange::Value {
            node,
            value: value.to_string(),
        });
        Ok(())
    }

    /// `input.checked = checked` (instrumented setter)
    pub fn set_checked(&self, node: NodeKey, checked: bool) -> Result<(), DomError> {
        self.with_element_mut(node, |e| e.checked = Some(checked))?;
        self.notify_property(PropertyChange::Checked { node, checked });
        Ok(())
    }

    /// `option.selected = selected` (instrumented setter)
    pub fn set_selected(&self, node: NodeKey, selected: bool) -> Result<(), DomError> {
        self.with_element_mut(node, |e| e.selected = Some(selected))?;
        self.notify_property(PropertyChange::Selected { node, selected });
        Ok(())
    }

    /// User typing: update the value and fire `input`
    pub fn input_value(&self, node: NodeKey, value: &str) -> Result<Rc<Event>, DomError> {
        self.with_element_mut(node, |e| e.value = Some(value.to_string()))?;
        Ok(self.dispatch_event(Event::at(EventType::Input, node)))
    }

    /// User toggling a checkbox or radio: update the state and fire `input`
    /// then `change`. Checking a radio silently unchecks the rest of its group.
    pub fn input_checked(&self, node: NodeKey, checked: bool) -> Result<Rc<Event>, DomError> {
        self.with_element_mut(node, |e| e.checked = Some(checked))?;
        if checked && self.input_type(node).as_deref() == Some("radio") {
            if let Some(name) = self.attribute(node, "name") {
                for other in self.radio_group(&name) {
                    if other != node {
                        self.with_element_mut(other, |e| e.checked = Some(false))?;
                    }
                }
            }
        }
        let event = self.dispatch_event(Event::at(EventType::Input, node));
        self.dispatch_event(Event::at(EventType::Change, node));
        Ok(event)
    }

    /// Radio inputs of the document sharing `name`
    pub fn radio_group(&self, name: &str) -> Vec<NodeKey> {
        self.descendants(self.inner.root)
            .into_iter()
            .filter(|&n| {
                self.input_type(n).as_deref() == Some("radio")
                    && self.attribute(n, "name").as_deref() == Some(name)
            })
            .collect()
    }

    /// Current form value (`input.value`, `textarea.value`, `select.value`,
    /// `option.value`). `None` for elements without a value.
    pub fn value(&self, node: NodeKey) -> Option<String> {
        let (tag, dirty, attr) = self.with_element(node, |e| {
            (e.tag_name.clone(), e.value.clone(), e.get_attr("value").map(str::to_string))
        }).ok()?;
        if let Some(dirty) = dirty {
            return Some(dirty);
        }
        match tag.as_str() {
            "input" => Some(attr.unwrap_or_default()),
            "textarea" => Some(self.text_content(node)),
            "option" => Some(attr.unwrap_or_else(|| self.text_content(node))),
            "select" => {
                let options: Vec<NodeKey> = self
                    .descendants(node)
                    .into_iter()
                    .filter(|&n| self.tag_name(n).as_deref() == Some("option"))
                    .collect();
                let chosen = options
                    .iter()
                    .copied()
                    .find(|&o| self.selected(o))
                    .or_else(|| options.first().copied())?;
                self.value(chosen)
            }
            _ => None,
        }
    }

    pub fn checked(&self, node: NodeKey) -> bool {
        self.with_element(node, |e| e.checked.unwrap_or_else(|| e.get_attr("checked").is_some()))
            .unwrap_or(false)
    }

    pub fn selected(&self, node: NodeKey) -> bool {
        self.with_element(node, |e| e.selected.unwrap_or_else(|| e.get_attr("selected").is_some()))
            .unwrap_or(false)
    }

    /// Lowercased `type` of an `<input>` (`text` when absent)
    pub fn input_type(&self, node: NodeKey) -> Option<String> {
        self.with_element(node, |e| {
            (e.tag_name == "input").then(|| {
                e.get_attr("type")
                    .map(str::to_ascii_lowercase)
                    .unwrap_or_else(|| "text".to_string())
            })
        })
        .ok()
        .flatten()
    }

    // ------------------------------------------------------------------
    // Layout, scroll and media state
    // ------------------------------------------------------------------

    /// Scroll an element and fire `scroll` at it
    pub fn set_scroll(&self, node: NodeKey, left: f64, top: f64) -> Result<(), DomError> {
        self.with_element_mut(node, |e| {
            e.scroll_left = left;
            e.scroll_top = top;
        })?;
        self.dispatch_event(Event::at(EventType::Scroll, node));
        Ok(())
    }

    /// Scroll the page and fire `scroll` at the document
    pub fn scroll_window(&self, x: f64, y: f64) {
        {
            let mut window = self.inner.window.borrow_mut();
            window.scroll_x = x;
            window.scroll_y = y;
        }
        self.dispatch_event(Event::at(EventType::Scroll, self.inner.root));
    }

    /// Scroll offsets; the document reports the window scroll
    pub fn scroll(&self, node: NodeKey) -> (f64, f64) {
        if node == self.inner.root {
            let window = self.inner.window.borrow();
            return (window.scroll_x, window.scroll_y);
        }
        self.with_element(node, |e| (e.scroll_left, e.scroll_top))
            .unwrap_or((0.0, 0.0))
    }

    pub fn set_rect(&self, node: NodeKey, rect: DOMRect) -> Result<(), DomError> {
        self.with_element_mut(node, |e| e.rect = rect)
    }

    /// `getBoundingClientRect()`
    pub fn rect(&self, node: NodeKey) -> DOMRect {
        self.with_element(node, |e| e.rect).unwrap_or_default()
    }

    /// Start playback and fire `play`
    pub fn play(&self, node: NodeKey) -> Result<(), DomError> {
        self.set_paused(node, false, EventType::Play)
    }

    /// Pause playback and fire `pause`
    pub fn pause(&self, node: NodeKey) -> Result<(), DomError> {
        self.set_paused(node, true, EventType::Pause)
    }

    fn set_paused(&self, node: NodeKey, paused: bool, event_type: EventType) -> Result<(), DomError> {
        self.with_element_mut(node, |e| {
            if e.is_media() {
                e.paused = paused;
                Ok(())
            } else {
                Err(DomError::InvalidNodeType("media element"))
            }
        })??;
        self.dispatch_event(Event::at(event_type, node));
        Ok(())
    }

    /// `None` for non-media elements
    pub fn media_paused(&self, node: NodeKey) -> Option<bool> {
        self.with_element(node, |e| e.is_media().then_some(e.paused))
            .ok()
            .flatten()
    }

    // ------------------------------------------------------------------
    // CSSOM
    // ------------------------------------------------------------------

    /// `sheet.insertRule(rule, index)` on a `<style>` element (instrumented)
    pub fn insert_rule(
        &self,
        owner: NodeKey,
        path: &[usize],
        rule: CssRule,
        index: usize,
    ) -> Result<usize, DomError> {
        let text = rule.css_text();
        let index = self.with_sheet_mut(owner, |sheet| sheet.insert_rule(path, rule, index))??;
        self.notify_style_sheet(StyleSheetChange {
            owner,
            kind: StyleSheetChangeKind::Insert {
                path: path.to_vec(),
                index,
                rule: text,
            },
        });
        Ok(index)
    }

    /// `sheet.deleteRule(index)` on a `<style>` element (instrumented)
    pub fn delete_rule(&self, owner: NodeKey, path: &[usize], index: usize) -> Result<(), DomError> {
        self.with_sheet_mut(owner, |sheet| sheet.delete_rule(path, index))??;
        self.notify_style_sheet(StyleSheetChange {
            owner,
            kind: StyleSheetChangeKind::Delete {
                path: path.to_vec(),
                index,
            },
        });
        Ok(())
    }

    fn with_sheet_mut<R>(
        &self,
        owner: NodeKey,
        f: impl FnOnce(&mut CssStyleSheet) -> R,
    ) -> Result<R, DomError> {
        self.with_element_mut(owner, |e| e.sheet.as_mut().map(f))?
            .ok_or(DomError::InvalidNodeType("style element"))
    }

    /// CSSOM text of a `<style>` element's sheet
    pub fn css_text(&self, node: NodeKey) -> Option<String> {
        self.with_element(node, |e| e.sheet.as_ref().map(CssStyleSheet::css_text))
            .ok()
            .flatten()
    }

    pub fn style_sheet(&self, node: NodeKey) -> Option<CssStyleSheet> {
        self.with_element(node, |e| e.sheet.clone()).ok().flatten()
    }

    // ------------------------------------------------------------------
    // Window
    // ------------------------------------------------------------------

    /// Snapshot of the window state
    pub fn window(&self) -> Window {
        self.inner.window.borrow().clone()
    }

    pub fn href(&self) -> String {
        self.inner.window.borrow().href.clone()
    }

    pub fn set_href(&self, href: &str) {
        self.inner.window.borrow_mut().href = href.to_string();
    }

    /// Resize the layout viewport and fire `resize` at the window
    pub fn resize_viewport(&self, width: f64, height: f64) {
        {
            let mut window = self.inner.window.borrow_mut();
            window.inner_width = width;
            window.inner_height = height;
            if let Some(vv) = window.visual_viewport.as_mut() {
                vv.width = width / vv.scale;
                vv.height = height / vv.scale;
            }
        }
        self.dispatch_event(Event::new(EventType::Resize, EventTarget::Window));
    }

    /// Pinch zoom / pan: replace the visual viewport and fire `resize` and
    /// `scroll` at it
    pub fn set_visual_viewport(&self, viewport: VisualViewport) {
        self.inner.window.borrow_mut().visual_viewport = Some(viewport);
        self.dispatch_event(Event::new(EventType::Resize, EventTarget::VisualViewport));
        self.dispatch_event(Event::new(EventType::Scroll, EventTarget::VisualViewport));
    }

    /// Model a platform without the visual viewport API
    pub fn remove_visual_viewport(&self) {
        self.inner.window.borrow_mut().visual_viewport = None;
    }

    /// Window gains focus
    pub fn focus_window(&self) {
        self.inner.window.borrow_mut().has_focus = true;
        self.dispatch_event(Event::new(EventType::Focus, EventTarget::Window));
    }

    /// Window loses focus
    pub fn blur_window(&self) {
        self.inner.window.borrow_mut().has_focus = false;
        self.dispatch_event(Event::new(EventType::Blur, EventTarget::Window));
    }

    /// Focus an element, blurring the previously focused one
    pub fn focus(&self, node: NodeKey) -> Result<(), DomError> {
        self.with_element(node, |_| ())?;
        if self.inner.active_element.get() == Some(node) {
            return Ok(());
        }
        self.blur_active();
        self.inner.active_element.set(Some(node));
        self.dispatch_event(Event::at(EventType::Focus, node));
        Ok(())
    }

    /// Blur the focused element, if any
    pub fn blur_active(&self) {
        if let Some(active) = self.inner.active_element.take() {
            self.dispatch_event(Event::at(EventType::Blur, active));
        }
    }

    pub fn active_element(&self) -> Option<NodeKey> {
        self.inner.active_element.get()
    }

    /// Change page visibility and fire `visibilitychange` at the document
    pub fn set_visibility(&self, state: VisibilityState) {
        {
            let mut window = self.inner.window.borrow_mut();
            if window.visibility == state {
                return;
            }
            window.visibility = state;
        }
        self.dispatch_event(Event::at(EventType::VisibilityChange, self.inner.root));
    }

    /// Fire `beforeunload` at the window
    pub fn unload(&self) {
        self.dispatch_event(Event::new(EventType::BeforeUnload, EventTarget::Window));
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn add_event_listener(
        &self,
        target: EventTarget,
        event_type: EventType,
        options: ListenerOptions,
        callback: impl Fn(&Document, &Rc<Event>) + 'static,
    ) -> ListenerHandle {
        let id = self
            .inner
            .listeners
            .borrow_mut()
            .add(target, event_type, options, Rc::new(callback));
        ListenerHandle {
            registry: Rc::downgrade(&self.inner.listeners),
            id,
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.inner.listeners.borrow().len()
    }

    /// Dispatch an event along its composed path: capture listeners from the
    /// window down, listeners at the target, then bubble listeners back up.
    pub fn dispatch_event(&self, mut event: Event) -> Rc<Event> {
        event.timestamp = self.now();
        let event = Rc::new(event);
        let path = self.event_path(event.target);
        let Some((&target, ancestors)) = path.split_first() else {
            return event;
        };

        for &current in ancestors.iter().rev() {
            self.invoke(current, &event, true);
        }
        self.invoke(target, &event, true);
        self.invoke(target, &event, false);
        if event.bubbles {
            for &current in ancestors {
                self.invoke(current, &event, false);
            }
        }
        event
    }

    fn invoke(&self, target: EventTarget, event: &Rc<Event>, capture: bool) {
        let callbacks = self
            .inner
            .listeners
            .borrow()
            .matching(target, event.event_type, capture);
        for callback in callbacks {
            callback(self, event);
        }
    }

    /// Target first, window last. Shadow roots continue at their host.
    fn event_path(&self, target: EventTarget) -> Vec<EventTarget> {
        let EventTarget::Node(node) = target else {
            return vec![target];
        };
        let mut path = Vec::new();
        let mut current = Some(node);
        while let Some(key) = current {
            if !self.exists(key) {
                break;
            }
            path.push(EventTarget::Node(key));
            if key == self.inner.root {
                path.push(EventTarget::Window);
                break;
            }
            current = self.composed_parent(key);
        }
        path
    }

    // ------------------------------------------------------------------
    // Mutation observers and instrumented setters
    // ------------------------------------------------------------------

    /// `new MutationObserver(callback)`
    pub fn create_mutation_observer(
        &self,
        callback: impl Fn(&Document, Vec<MutationRecord>) + 'static,
    ) -> MutationObserverHandle {
        let id = self.inner.observers.borrow_mut().create(Rc::new(callback));
        MutationObserverHandle {
            registry: Rc::downgrade(&self.inner.observers),
            id,
        }
    }

    /// Whether any observer still observes a node
    pub fn has_mutation_observers(&self) -> bool {
        !self.inner.observers.borrow().is_empty()
    }

    fn queue_mutation(&self, record: MutationRecord) {
        let mut ancestors = Vec::new();
        let mut current = Some(record.target);
        while let Some(key) = current {
            ancestors.push(key);
            current = self.parent(key);
        }
        self.inner.observers.borrow_mut().queue(&record, &ancestors);
    }

    /// Microtask checkpoint: deliver queued mutation records
    pub fn flush_mutations(&self) {
        if self.inner.delivering.replace(true) {
            return;
        }
        loop {
            let batches = self.inner.observers.borrow_mut().drain();
            if batches.is_empty() {
                break;
            }
            for (callback, records) in batches {
                callback(self, records);
            }
        }
        self.inner.delivering.set(false);
    }

    /// Observe programmatic `value`/`checked`/`selected` assignments
    pub fn on_property_set(&self, callback: impl Fn(&Document, &PropertyChange) + 'static) -> HookHandle {
        let mut hooks = self.inner.hooks.borrow_mut();
        let id = hooks.next_id();
        hooks.property.push((id, Rc::new(callback)));
        HookHandle {
            registry: Rc::downgrade(&self.inner.hooks),
            id,
        }
    }

    /// Observe `insertRule`/`deleteRule` calls
    pub fn on_style_sheet_change(
        &self,
        callback: impl Fn(&Document, &StyleSheetChange) + 'static,
    ) -> HookHandle {
        let mut hooks = self.inner.hooks.borrow_mut();
        let id = hooks.next_id();
        hooks.style_sheet.push((id, Rc::new(callback)));
        HookHandle {
            registry: Rc::downgrade(&self.inner.hooks),
            id,
        }
    }

    fn notify_property(&self, change: PropertyChange) {
        let hooks: Vec<PropertyHook> = self
            .inner
            .hooks
            .borrow()
            .property
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for hook in hooks {
            hook(self, &change);
        }
    }

    fn notify_style_sheet(&self, change: StyleSheetChange) {
        let hooks: Vec<StyleSheetHook> = self
            .inner
            .hooks
            .borrow()
            .style_sheet
            .iter()
            .map(|(_, h)| Rc::clone(h))
            .collect();
        for hook in hooks {
            hook(self, &change);
        }
    }

    // ------------------------------------------------------------------
    // Scheduler
    // ------------------------------------------------------------------

    /// Current time in epoch milliseconds
    pub fn now(&self) -> f64 {
        self.inner.scheduler.borrow().now()
    }

    /// Move the clock without running timers
    pub fn set_now(&self, now: f64) {
        self.inner.scheduler.borrow_mut().set_now(now);
    }

    /// Advance the clock, running every timer that falls due in order.
    /// Mutation records are delivered before each timer and at the end.
    pub fn advance_time(&self, ms: f64) {
        let target = self.now() + ms.max(0.0);
        loop {
            self.flush_mutations();
            let next = self.inner.scheduler.borrow_mut().pop_due(target);
            let Some((due, callback)) = next else {
                break;
            };
            {
                let mut scheduler = self.inner.scheduler.borrow_mut();
                let now = scheduler.now().max(due);
                scheduler.set_now(now);
            }
            callback(self);
        }
        self.set_now(target);
        self.flush_mutations();
    }

    pub fn set_timeout(&self, delay: f64, callback: impl FnOnce(&Document) + 'static) -> TimerId {
        self.inner
            .scheduler
            .borrow_mut()
            .set_timeout(delay, Box::new(callback))
    }

    pub fn clear_timeout(&self, id: TimerId) {
        self.inner.scheduler.borrow_mut().clear_timeout(id);
    }

    pub fn pending_timers(&self) -> usize {
        self.inner.scheduler.borrow().pending_timers()
    }

    pub fn request_animation_frame(&self, callback: impl FnOnce(&Document, f64) + 'static) -> FrameId {
        self.inner
            .scheduler
            .borrow_mut()
            .request_frame(Box::new(callback))
    }

    pub fn cancel_animation_frame(&self, id: FrameId) {
        self.inner.scheduler.borrow_mut().cancel_frame(id);
    }

    /// Render step: deliver pending mutations then run frame callbacks
    pub fn run_animation_frame(&self) {
        self.flush_mutations();
        let frames = self.inner.scheduler.borrow_mut().take_frames();
        let now = self.now();
        for frame in frames {
            frame(self, now);
        }
        self.flush_mutations();
    }

    // ------------------------------------------------------------------
    // Tree readers
    // ------------------------------------------------------------------

    fn with_node<R>(&self, key: NodeKey, f: impl FnOnce(&Node) -> R) -> Option<R> {
        self.inner.tree.borrow().get(key).map(f)
    }

    fn with_element<R>(&self, key: NodeKey, f: impl FnOnce(&ElementData) -> R) -> Result<R, DomError> {
        let tree = self.inner.tree.borrow();
        let node = tree.get(key).ok_or(DomError::StaleNode(key))?;
        node.as_element()
            .map(f)
            .ok_or(DomError::InvalidNodeType("element"))
    }

    fn with_element_mut<R>(
        &self,
        key: NodeKey,
        f: impl FnOnce(&mut ElementData) -> R,
    ) -> Result<R, DomError> {
        let mut tree = self.inner.tree.borrow_mut();
        let node = tree.get_mut(key).ok_or(DomError::StaleNode(key))?;
        node.as_element_mut()
            .map(f)
            .ok_or(DomError::InvalidNodeType("element"))
    }

    /// Whether the key still refers to a live node
    pub fn exists(&self, key: NodeKey) -> bool {
        self.inner.tree.borrow().contains(key)
    }

    pub fn node_kind(&self, key: NodeKey) -> Option<NodeKind> {
        self.with_node(key, Node::kind)
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.with_node(key, |n| n.parent).flatten()
    }

    /// Host element of a shadow root
    pub fn shadow_host(&self, key: NodeKey) -> Option<NodeKey> {
        self.with_node(key, |n| match n.data {
            NodeData::ShadowRoot { host, .. } => Some(host),
            _ => None,
        })
        .flatten()
    }

    pub fn shadow_root_mode(&self, key: NodeKey) -> Option<ShadowRootMode> {
        self.with_node(key, |n| match n.data {
            NodeData::ShadowRoot { mode, .. } => Some(mode),
            _ => None,
        })
        .flatten()
    }

    /// Parent, or the host when `key` is a shadow root
    pub fn composed_parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.parent(key).or_else(|| self.shadow_host(key))
    }

    pub fn children(&self, key: NodeKey) -> Vec<NodeKey> {
        self.with_node(key, |n| n.children.clone()).unwrap_or_default()
    }

    pub fn first_child(&self, key: NodeKey) -> Option<NodeKey> {
        self.with_node(key, |n| n.children.first().copied()).flatten()
    }

    pub fn next_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let tree = self.inner.tree.borrow();
        let siblings = &tree.get(parent)?.children;
        let pos = siblings.iter().position(|c| *c == key)?;
        siblings.get(pos + 1).copied()
    }

    pub fn previous_sibling(&self, key: NodeKey) -> Option<NodeKey> {
        let parent = self.parent(key)?;
        let tree = self.inner.tree.borrow();
        let siblings = &tree.get(parent)?.children;
        let pos = siblings.iter().position(|c| *c == key)?;
        pos.checked_sub(1).map(|i| siblings[i])
    }

    pub fn shadow_root(&self, key: NodeKey) -> Option<NodeKey> {
        self.with_element(key, |e| e.shadow_root).ok().flatten()
    }

    /// Lowercase tag name for HTML, case preserved for SVG
    pub fn tag_name(&self, key: NodeKey) -> Option<String> {
        self.with_element(key, |e| e.tag_name.clone()).ok()
    }

    pub fn is_svg(&self, key: NodeKey) -> bool {
        self.with_element(key, |e| e.namespace == Namespace::Svg)
            .unwrap_or(false)
    }

    pub fn attribute(&self, key: NodeKey, name: &str) -> Option<String> {
        self.with_element(key, |e| e.get_attr(name).map(str::to_string))
            .ok()
            .flatten()
    }

    pub fn has_attribute(&self, key: NodeKey, name: &str) -> bool {
        self.with_element(key, |e| e.get_attr(name).is_some())
            .unwrap_or(false)
    }

    /// Attributes in insertion order
    pub fn attributes(&self, key: NodeKey) -> Vec<Attribute> {
        self.with_element(key, |e| e.attrs.clone()).unwrap_or_default()
    }

    /// Whitespace separated `class` tokens
    pub fn class_list(&self, key: NodeKey) -> Vec<String> {
        self.attribute(key, "class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Character data of text, comment, CDATA and processing instruction nodes
    pub fn text(&self, key: NodeKey) -> Option<String> {
        self.with_node(key, |n| n.text().map(str::to_string)).flatten()
    }

    pub fn doctype(&self, key: NodeKey) -> Option<DoctypeData> {
        self.with_node(key, |n| match &n.data {
            NodeData::Doctype {
                name,
                public_id,
                system_id,
            } => Some(DoctypeData {
                name: name.clone(),
                public_id: public_id.clone(),
                system_id: system_id.clone(),
            }),
            _ => None,
        })
        .flatten()
    }

    /// Concatenated text of descendant text and CDATA nodes
    pub fn text_content(&self, key: NodeKey) -> String {
        let tree = self.inner.tree.borrow();
        let mut out = String::new();
        let mut stack = vec![key];
        while let Some(current) = stack.pop() {
            let Some(node) = tree.get(current) else {
                continue;
            };
            match &node.data {
                NodeData::Text(t) | NodeData::CData(t) => out.push_str(t),
                _ => stack.extend(node.children.iter().rev()),
            }
        }
        out
    }

    /// Whether the node is in the document, shadow trees included
    pub fn is_connected(&self, key: NodeKey) -> bool {
        let mut current = Some(key);
        while let Some(node) = current {
            if node == self.inner.root {
                return true;
            }
            current = self.composed_parent(node);
        }
        false
    }

    /// Light-tree inclusive ancestry
    pub fn is_inclusive_ancestor(&self, ancestor: NodeKey, node: NodeKey) -> bool {
        let mut current = Some(node);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.parent(key);
        }
        false
    }

    fn is_composed_inclusive_ancestor(&self, ancestor: NodeKey, node: NodeKey) -> bool {
        let mut current = Some(node);
        while let Some(key) = current {
            if key == ancestor {
                return true;
            }
            current = self.composed_parent(key);
        }
        false
    }

    /// Light-tree descendants in tree order (shadow trees excluded)
    pub fn descendants(&self, key: NodeKey) -> Vec<NodeKey> {
        let tree = self.inner.tree.borrow();
        let mut out = Vec::new();
        let mut stack: Vec<NodeKey> = tree
            .get(key)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            out.push(current);
            if let Some(node) = tree.get(current) {
                stack.extend(node.children.iter().rev());
            }
        }
        out
    }

    /// First element whose `id` attribute matches
    pub fn get_element_by_id(&self, id: &str) -> Option<NodeKey> {
        self.descendants(self.inner.root)
            .into_iter()
            .find(|&n| self.attribute(n, "id").as_deref() == Some(id))
    }
}

fn link(tree: &mut DomTree, parent: NodeKey, child: NodeKey) {
    if let Some(node) = tree.get_mut(parent) {
        node.children.push(child);
    }
    if let Some(node) = tree.get_mut(child) {
        node.parent = Some(parent);
    }
}

fn attribute_name(element: &ElementData, name: &str) -> String {
    match element.namespace {
        Namespace::Html => name.to_ascii_lowercase(),
        Namespace::Svg => name.to_string(),
    }
}
