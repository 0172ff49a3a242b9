//! DOM serializer
//!
//! Walks a live subtree and produces [`SerializedNodeWithId`] trees, assigning
//! NodeIds in document order (a parent always gets its id before its
//! children). Privacy is applied on the way down: hidden elements become an
//! empty placeholder of the same size, ignored elements and node kinds the
//! player has no use for (comments, processing instructions) are skipped.
//!
//! A failure while looking at one node (typically a stale key) only drops that
//! node; its siblings are still serialized.

mod attributes;

use std::collections::{HashMap, HashSet};

use replay_dom::{Document, DomError, NodeKey, NodeKind};

use crate::ids::NodeId;
use crate::privacy::{reduce_privacy_level, text_content, NodePrivacyLevel, PRIVACY_ATTR_NAME};
use crate::records::{Attributes, SerializedNode, SerializedNodeWithId};
use crate::scope::RecordScope;
use crate::shadow_roots::ShadowRootsController;

pub use attributes::serialize_attribute;

/// Why a serialization pass runs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializationStatus {
    /// First snapshot of the recording: element scroll offsets are read live
    InitialFullSnapshot,
    /// Later snapshots: scroll offsets come from tracked scroll events
    SubsequentFullSnapshot,
    /// Nodes added by a mutation
    Mutation,
}

/// Element scroll offsets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScrollPosition {
    pub scroll_left: i64,
    pub scroll_top: i64,
}

impl ScrollPosition {
    pub fn is_scrolled(&self) -> bool {
        self.scroll_left != 0 || self.scroll_top != 0
    }
}

/// Last known scroll offsets per element
#[derive(Debug, Default)]
pub struct ElementsScrollPositions {
    positions: HashMap<NodeKey, ScrollPosition>,
}

impl ElementsScrollPositions {
    pub fn set(&mut self, element: NodeKey, position: ScrollPosition) {
        self.positions.insert(element, position);
    }

    pub fn get(&self, element: NodeKey) -> Option<ScrollPosition> {
        self.positions.get(&element).copied()
    }

    pub fn clear(&mut self) {
        self.positions.clear();
    }

    /// Drop offsets of elements that no longer exist
    pub fn retain_live(&mut self, doc: &Document) -> usize {
        let before = self.positions.len();
        self.positions.retain(|element, _| doc.exists(*element));
        before - self.positions.len()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// One serialization pass
pub struct NodeSerializer<'a> {
    doc: &'a Document,
    scope: &'a RecordScope,
    status: SerializationStatus,
    shadow_roots: Option<&'a ShadowRootsController>,
    serialized_node_ids: HashSet<NodeId>,
}

impl<'a> NodeSerializer<'a> {
    pub fn new(doc: &'a Document, scope: &'a RecordScope, status: SerializationStatus) -> Self {
        Self {
            doc,
            scope,
            status,
            shadow_roots: None,
            serialized_node_ids: HashSet::new(),
        }
    }

    /// Report shadow roots met during the pass
    pub fn with_shadow_roots(mut self, controller: &'a ShadowRootsController) -> Self {
        self.shadow_roots = Some(controller);
        self
    }

    pub fn status(&self) -> SerializationStatus {
        self.status
    }

    /// Ids serialized so far by this pass
    pub fn serialized_node_ids(&self) -> &HashSet<NodeId> {
        &self.serialized_node_ids
    }

    /// Whether this pass already emitted `node`
    pub fn has_been_serialized(&self, node: NodeKey) -> bool {
        self.scope
            .node_id(node)
            .is_some_and(|id| self.serialized_node_ids.contains(&id))
    }

    /// Serialize the whole document
    pub fn serialize_document(&mut self) -> Option<SerializedNodeWithId> {
        let root = self.doc.root();
        let default_level = self.scope.policy.default_level();
        self.serialize_node_with_id(root, default_level, false)
    }

    /// Serialize `node` and its subtree. `parent_level` is the effective
    /// privacy level of the node's parent.
    pub fn serialize_node_with_id(
        &mut self,
        node: NodeKey,
        parent_level: NodePrivacyLevel,
        ignore_white_space: bool,
    ) -> Option<SerializedNodeWithId> {
        match self.serialize_node(node, parent_level, ignore_white_space) {
            Ok(serialized) => serialized,
            Err(err) => {
                tracing::debug!(?node, %err, "skipping node during serialization");
                None
            }
        }
    }

    fn serialize_node(
        &mut self,
        node: NodeKey,
        parent_level: NodePrivacyLevel,
        ignore_white_space: bool,
    ) -> Result<Option<SerializedNodeWithId>, DomError> {
        let kind = self.doc.node_kind(node).ok_or(DomError::StaleNode(node))?;
        let serialized = match kind {
            NodeKind::Document => {
                let id = self.assign_id(node);
                let child_nodes = self.serialize_child_nodes(node, parent_level, false);
                SerializedNodeWithId {
                    id,
                    node: SerializedNode::Document { child_nodes },
                }
            }
            NodeKind::DocumentType => {
                let doctype = self
                    .doc
                    .doctype(node)
                    .ok_or(DomError::InvalidNodeType("document type"))?;
                SerializedNodeWithId {
                    id: self.assign_id(node),
                    node: SerializedNode::DocumentType {
                        name: doctype.name,
                        public_id: doctype.public_id,
                        system_id: doctype.system_id,
                    },
                }
            }
            NodeKind::Element => return self.serialize_element(node, parent_level, ignore_white_space),
            NodeKind::Text => {
                let Some(text) = text_content(self.doc, node, ignore_white_space, parent_level) else {
                    return Ok(None);
                };
                SerializedNodeWithId {
                    id: self.assign_id(node),
                    node: SerializedNode::Text { text_content: text },
                }
            }
            NodeKind::CData => SerializedNodeWithId {
                id: self.assign_id(node),
                node: SerializedNode::CData,
            },
            NodeKind::ShadowRoot => {
                let id = self.assign_id(node);
                let child_nodes = self.serialize_child_nodes(node, parent_level, ignore_white_space);
                SerializedNodeWithId {
                    id,
                    node: SerializedNode::DocumentFragment {
                        child_nodes,
                        is_shadow_root: true,
                    },
                }
            }
            NodeKind::Comment | NodeKind::ProcessingInstruction => return Ok(None),
        };
        Ok(Some(serialized))
    }

    fn serialize_element(
        &mut self,
        element: NodeKey,
        parent_level: NodePrivacyLevel,
        ignore_white_space: bool,
    ) -> Result<Option<SerializedNodeWithId>, DomError> {
        let tag_name = self
            .doc
            .tag_name(element)
            .ok_or(DomError::InvalidNodeType("element"))?;
        let level = reduce_privacy_level(self.scope.policy.self_level(self.doc, element), parent_level);
        if level == NodePrivacyLevel::Ignore {
            return Ok(None);
        }

        let id = self.assign_id(element);
        let is_svg = self.doc.is_svg(element);

        if level == NodePrivacyLevel::Hidden {
            let rect = self.doc.rect(element);
            let mut attributes = Attributes::new();
            attributes.insert("rr_width", format!("{}px", rect.width));
            attributes.insert("rr_height", format!("{}px", rect.height));
            attributes.insert(PRIVACY_ATTR_NAME, NodePrivacyLevel::Hidden.as_str());
            return Ok(Some(SerializedNodeWithId {
                id,
                node: SerializedNode::Element {
                    tag_name,
                    attributes,
                    child_nodes: Vec::new(),
                    is_svg,
                },
            }));
        }

        let attributes = attributes::serialize_element_attributes(
            self.doc,
            element,
            &tag_name,
            level,
            self.status,
            &mut self.scope.scroll_positions.borrow_mut(),
        );

        // Style contents are carried by `_cssText`
        let child_nodes = if tag_name == "style" {
            Vec::new()
        } else {
            let ignore_white_space = ignore_white_space || tag_name == "head";
            let mut child_nodes = self.serialize_child_nodes(element, level, ignore_white_space);
            if let Some(shadow_root) = self.doc.shadow_root(element) {
                if let Some(fragment) = self.serialize_node_with_id(shadow_root, level, ignore_white_space) {
                    child_nodes.push(fragment);
                }
                if let Some(controller) = self.shadow_roots {
                    controller.add_shadow_root(self.doc, shadow_root);
                }
            }
            child_nodes
        };

        Ok(Some(SerializedNodeWithId {
            id,
            node: SerializedNode::Element {
                tag_name,
                attributes,
                child_nodes,
                is_svg,
            },
        }))
    }

    fn serialize_child_nodes(
        &mut self,
        parent: NodeKey,
        level: NodePrivacyLevel,
        ignore_white_space: bool,
    ) -> Vec<SerializedNodeWithId> {
        self.doc
            .children(parent)
            .into_iter()
            .filter_map(|child| self.serialize_node_with_id(child, level, ignore_white_space))
            .collect()
    }

    fn assign_id(&mut self, node: NodeKey) -> NodeId {
        let id = self.scope.node_ids.borrow_mut().assign(node);
        self.serialized_node_ids.insert(id);
        id
    }
}

/// Serialize the whole document in one pass
pub fn serialize_document(
    doc: &Document,
    scope: &RecordScope,
    status: SerializationStatus,
    shadow_roots: Option<&ShadowRootsController>,
) -> Option<SerializedNodeWithId> {
    let mut serializer = NodeSerializer::new(doc, scope, status);
    if let Some(controller) = shadow_roots {
        serializer = serializer.with_shadow_roots(controller);
    }
    serializer.serialize_document()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::privacy::AttributePrivacyPolicy;
    use crate::records::{AttributeValue, NodeType};
    use replay_dom::{DOMRect, ShadowRootMode};

    fn scope(level: NodePrivacyLevel) -> RecordScope {
        RecordScope::new(AttributePrivacyPolicy::new(level))
    }

    fn snapshot(doc: &Document, scope: &RecordScope) -> SerializedNodeWithId {
        serialize_document(doc, scope, SerializationStatus::InitialFullSnapshot, None).unwrap()
    }

    #[test]
    fn test_document_structure_and_preorder_ids() {
        let doc = Document::new("https://example.com/");
        let body = doc.body().unwrap();
        let p = doc.create_element("p");
        doc.append_child(body, p).unwrap();
        doc.append_child(p, doc.create_text("hello")).unwrap();

        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        assert_eq!(root.node.node_type(), NodeType::Document);
        assert_eq!(root.id.get(), 1);

        let ids: Vec<u32> = root.ids().iter().map(|id| id.get()).collect();
        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);

        let p_id = scope.node_id(p).unwrap();
        let serialized = root.find(p_id).unwrap();
        assert_eq!(serialized.node.tag_name(), Some("p"));
        assert_eq!(serialized.node.child_nodes()[0].node.text_content(), Some("hello"));
    }

    #[test]
    fn test_masked_text_keeps_shape() {
        let doc = Document::new("https://example.com/");
        let p = doc.create_element("p");
        doc.append_child(doc.body().unwrap(), p).unwrap();
        let text = doc.create_text("Jane Doe");
        doc.append_child(p, text).unwrap();

        let scope = scope(NodePrivacyLevel::Mask);
        let root = snapshot(&doc, &scope);
        let serialized = root.find(scope.node_id(text).unwrap()).unwrap();
        assert_eq!(serialized.node.text_content(), Some("xxxx xxx"));
    }

    #[test]
    fn test_hidden_element_placeholder() {
        let doc = Document::new("https://example.com/");
        let div = doc.create_element("div");
        doc.append_child(doc.body().unwrap(), div).unwrap();
        doc.set_attribute(div, PRIVACY_ATTR_NAME, "hidden").unwrap();
        doc.set_attribute(div, "class", "secret").unwrap();
        doc.set_rect(div, DOMRect::from_xywh(0.0, 0.0, 120.0, 40.5)).unwrap();
        let child = doc.create_element("span");
        doc.append_child(div, child).unwrap();

        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        let hidden = root.find(scope.node_id(div).unwrap()).unwrap();
        let attrs = hidden.node.attributes().unwrap();
        assert_eq!(attrs.get("rr_width"), Some(&AttributeValue::from("120px")));
        assert_eq!(attrs.get("rr_height"), Some(&AttributeValue::from("40.5px")));
        assert_eq!(attrs.get(PRIVACY_ATTR_NAME), Some(&AttributeValue::from("hidden")));
        assert_eq!(attrs.get("class"), None);
        assert!(hidden.node.child_nodes().is_empty());
        assert_eq!(scope.node_id(child), None);
    }

    #[test]
    fn test_ignored_and_unknown_nodes_skipped() {
        let doc = Document::new("https://example.com/");
        let body = doc.body().unwrap();
        let script = doc.create_element("script");
        doc.append_child(body, script).unwrap();
        doc.append_child(body, doc.create_comment("note")).unwrap();
        doc.append_child(body, doc.create_processing_instruction("x")).unwrap();
        let kept = doc.create_element("main");
        doc.append_child(body, kept).unwrap();

        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        let body_node = root.find(scope.node_id(body).unwrap()).unwrap();
        assert_eq!(body_node.node.child_nodes().len(), 1);
        assert_eq!(body_node.node.child_nodes()[0].node.tag_name(), Some("main"));
        assert_eq!(scope.node_id(script), None);
    }

    #[test]
    fn test_head_whitespace_dropped() {
        let doc = Document::new("https://example.com/");
        let head = doc.head().unwrap();
        doc.append_child(head, doc.create_text("\n  ")).unwrap();
        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        let head_node = root.find(scope.node_id(head).unwrap()).unwrap();
        assert!(head_node.node.child_nodes().is_empty());
    }

    #[test]
    fn test_shadow_root_is_last_child() {
        let doc = Document::new("https://example.com/");
        let host = doc.create_element("div");
        doc.append_child(doc.body().unwrap(), host).unwrap();
        doc.append_child(host, doc.create_element("b")).unwrap();
        let shadow = doc.attach_shadow(host, ShadowRootMode::Open).unwrap();
        doc.append_child(shadow, doc.create_element("slot")).unwrap();

        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        let host_node = root.find(scope.node_id(host).unwrap()).unwrap();
        let children = host_node.node.child_nodes();
        assert_eq!(children.len(), 2);
        match &children[1].node {
            SerializedNode::DocumentFragment {
                child_nodes,
                is_shadow_root,
            } => {
                assert!(*is_shadow_root);
                assert_eq!(child_nodes[0].node.tag_name(), Some("slot"));
            }
            other => panic!("expected shadow root, got {other:?}"),
        }
    }

    #[test]
    fn test_stale_node_does_not_abort_pass() {
        let doc = Document::new("https://example.com/");
        let detached = doc.create_element("div");
        doc.drop_node(detached).unwrap();
        let scope = scope(NodePrivacyLevel::Allow);
        let mut serializer = NodeSerializer::new(&doc, &scope, SerializationStatus::Mutation);
        assert!(serializer
            .serialize_node_with_id(detached, NodePrivacyLevel::Allow, false)
            .is_none());
        assert!(serializer.serialize_document().is_some());
    }

    #[test]
    fn test_style_element_uses_css_text() {
        let doc = Document::new("https://example.com/");
        let style = doc.create_element("style");
        doc.append_child(doc.head().unwrap(), style).unwrap();
        doc.append_child(style, doc.create_text("p { color: red; }")).unwrap();

        let scope = scope(NodePrivacyLevel::Allow);
        let root = snapshot(&doc, &scope);
        let node = root.find(scope.node_id(style).unwrap()).unwrap();
        assert!(node.node.child_nodes().is_empty());
        let css = node.node.attributes().unwrap().get("_cssText").cloned();
        assert!(css.is_some());
    }
}
