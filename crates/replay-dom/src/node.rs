//! DOM Node
//!
//! Nodes own their child list; parent links are plain keys into the arena.
//! Shadow roots have no parent, only a host.

use crate::geometry::DOMRect;
use crate::stylesheet::CssStyleSheet;
use crate::NodeKey;

/// DOM Node - Core structure
#[derive(Debug)]
pub(crate) struct Node {
    /// Parent node (None for the document, shadow roots and detached nodes)
    pub parent: Option<NodeKey>,
    /// Children in tree order
    pub children: Vec<NodeKey>,
    /// Node-specific data
    pub data: NodeData,
}

impl Node {
    fn with_data(data: NodeData) -> Self {
        Self {
            parent: None,
            children: Vec::new(),
            data,
        }
    }

    pub fn document() -> Self {
        Self::with_data(NodeData::Document)
    }

    pub fn element(tag_name: &str, namespace: Namespace) -> Self {
        Self::with_data(NodeData::Element(ElementData::new(tag_name, namespace)))
    }

    pub fn new_text(content: String) -> Self {
        Self::with_data(NodeData::Text(content))
    }

    pub fn kind(&self) -> NodeKind {
        match &self.data {
            NodeData::Document => NodeKind::Document,
            NodeData::Doctype { .. } => NodeKind::DocumentType,
            NodeData::Element(_) => NodeKind::Element,
            NodeData::Text(_) => NodeKind::Text,
            NodeData::Comment(_) => NodeKind::Comment,
            NodeData::CData(_) => NodeKind::CData,
            NodeData::ProcessingInstruction { .. } => NodeKind::ProcessingInstruction,
            NodeData::ShadowRoot { .. } => NodeKind::ShadowRoot,
        }
    }

    /// Whether this node may hold children
    pub fn is_container(&self) -> bool {
        matches!(
            self.data,
            NodeData::Document | NodeData::Element(_) | NodeData::ShadowRoot { .. }
        )
    }

    #[inline]
    pub fn as_element(&self) -> Option<&ElementData> {
        match &self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    #[inline]
    pub fn as_element_mut(&mut self) -> Option<&mut ElementData> {
        match &mut self.data {
            NodeData::Element(e) => Some(e),
            _ => None,
        }
    }

    /// Character data of text-like nodes
    #[inline]
    pub fn text(&self) -> Option<&str> {
        match &self.data {
            NodeData::Text(t) | NodeData::Comment(t) | NodeData::CData(t) => Some(t),
            NodeData::ProcessingInstruction { data } => Some(data),
            _ => None,
        }
    }
}

/// Node kind without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    DocumentType,
    Element,
    Text,
    Comment,
    CData,
    ProcessingInstruction,
    ShadowRoot,
}

/// Node-specific data
#[derive(Debug)]
pub(crate) enum NodeData {
    Document,
    Doctype {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element(ElementData),
    Text(String),
    Comment(String),
    CData(String),
    ProcessingInstruction {
        data: String,
    },
    ShadowRoot {
        host: NodeKey,
        mode: ShadowRootMode,
    },
}

/// Element namespace
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Namespace {
    #[default]
    Html,
    Svg,
}

/// Shadow root mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowRootMode {
    #[default]
    Open,
    Closed,
}

/// Element attribute
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

/// Element-specific data
#[derive(Debug)]
pub(crate) struct ElementData {
    /// Lowercase local name
    pub tag_name: String,
    pub namespace: Namespace,
    /// Attributes in insertion order
    pub attrs: Vec<Attribute>,
    pub shadow_root: Option<NodeKey>,
    /// Dirty form state; `None` falls back to the content attribute
    pub value: Option<String>,
    pub checked: Option<bool>,
    pub selected: Option<bool>,
    pub scroll_left: f64,
    pub scroll_top: f64,
    pub rect: DOMRect,
    /// Media elements only
    pub paused: bool,
    /// `<style>` elements only
    pub sheet: Option<CssStyleSheet>,
}

impl ElementData {
    pub fn new(tag_name: &str, namespace: Namespace) -> Self {
        let tag_name = match namespace {
            Namespace::Html => tag_name.to_ascii_lowercase(),
            Namespace::Svg => tag_name.to_string(),
        };
        Self {
            tag_name,
            namespace,
            attrs: Vec::new(),
            shadow_root: None,
            value: None,
            checked: None,
            selected: None,
            scroll_left: 0.0,
            scroll_top: 0.0,
            rect: DOMRect::default(),
            paused: true,
            sheet: None,
        }
    }

    pub fn get_attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    /// Set an attribute, returning the previous value
    pub fn set_attr(&mut self, name: &str, value: String) -> Option<String> {
        for attr in self.attrs.iter_mut() {
            if attr.name == name {
                return Some(std::mem::replace(&mut attr.value, value));
            }
        }
        self.attrs.push(Attribute {
            name: name.to_string(),
            value,
        });
        None
    }

    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let pos = self.attrs.iter().position(|a| a.name == name)?;
        Some(self.attrs.remove(pos).value)
    }

    pub fn is_media(&self) -> bool {
        matches!(self.tag_name.as_str(), "audio" | "video")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_attr_returns_old_value() {
        let mut el = ElementData::new("DIV", Namespace::Html);
        assert_eq!(el.tag_name, "div");
        assert_eq!(el.set_attr("class", "a".into()), None);
        assert_eq!(el.set_attr("class", "b".into()), Some("a".into()));
        assert_eq!(el.get_attr("class"), Some("b"));
        assert_eq!(el.remove_attr("class"), Some("b".into()));
        assert!(el.attrs.is_empty());
    }

    #[test]
    fn test_svg_keeps_case() {
        let el = ElementData::new("linearGradient", Namespace::Svg);
        assert_eq!(el.tag_name, "linearGradient");
    }
}
