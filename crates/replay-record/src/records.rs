//! Replay record model
//!
//! Every record serializes as `{"type": n, "timestamp": ms, "data": {...}}`.
//! Discriminants are plain JSON numbers understood by the player; incremental
//! data additionally carries `"source": n`.

use serde::ser::{SerializeMap, Serializer};
use serde::Serialize;

use crate::ids::{NodeId, RecordId};

/// Epoch milliseconds
pub type TimeStamp = u64;

macro_rules! numeric_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident = $value:expr),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $($variant = $value),+
        }

        impl $name {
            #[inline]
            pub fn code(self) -> u8 {
                self as u8
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_u8(self.code())
            }
        }
    };
}

numeric_enum! {
    /// Top-level record kind
    RecordType {
        FullSnapshot = 2,
        IncrementalSnapshot = 3,
        Meta = 4,
        Focus = 6,
        ViewEnd = 7,
        VisualViewport = 8,
        FrustrationRecord = 9,
    }
}

numeric_enum! {
    /// Kind of incremental snapshot
    IncrementalSource {
        Mutation = 0,
        MouseMove = 1,
        MouseInteraction = 2,
        Scroll = 3,
        ViewportResize = 4,
        Input = 5,
        TouchMove = 6,
        MediaInteraction = 7,
        StyleSheetRule = 8,
    }
}

numeric_enum! {
    MouseInteractionType {
        MouseUp = 0,
        MouseDown = 1,
        Click = 2,
        ContextMenu = 3,
        DblClick = 4,
        Focus = 5,
        Blur = 6,
        TouchStart = 7,
        TouchEnd = 9,
    }
}

numeric_enum! {
    MediaInteractionType {
        Play = 0,
        Pause = 1,
    }
}

numeric_enum! {
    /// Serialized node kind
    NodeType {
        Document = 0,
        DocumentType = 1,
        Element = 2,
        Text = 3,
        CData = 4,
        DocumentFragment = 11,
    }
}

/// Frustration signal computed by action collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FrustrationType {
    RageClick,
    DeadClick,
    ErrorClick,
}

// ============================================================================
// Serialized nodes
// ============================================================================

/// Attribute value: the serializer emits strings, plus numbers for scroll
/// offsets and booleans for form state
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Text(String),
    Number(i64),
    Bool(bool),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        AttributeValue::Text(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        AttributeValue::Text(value.to_string())
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        AttributeValue::Number(value)
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        AttributeValue::Bool(value)
    }
}

/// Ordered attribute map
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attributes(Vec<(String, AttributeValue)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set `name`, replacing any previous value in place
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttributeValue>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.0.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&AttributeValue> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn remove(&mut self, name: &str) -> Option<AttributeValue> {
        let pos = self.0.iter().position(|(n, _)| n == name)?;
        Some(self.0.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttributeValue)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Serialize for Attributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, value) in &self.0 {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Serialized DOM node
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SerializedNode {
    Document {
        child_nodes: Vec<SerializedNodeWithId>,
    },
    DocumentType {
        name: String,
        public_id: String,
        system_id: String,
    },
    Element {
        tag_name: String,
        attributes: Attributes,
        child_nodes: Vec<SerializedNodeWithId>,
        is_svg: bool,
    },
    Text {
        text_content: String,
    },
    CData,
    DocumentFragment {
        child_nodes: Vec<SerializedNodeWithId>,
        is_shadow_root: bool,
    },
}

impl SerializedNode {
    pub fn node_type(&self) -> NodeType {
        match self {
            SerializedNode::Document { .. } => NodeType::Document,
            SerializedNode::DocumentType { .. } => NodeType::DocumentType,
            SerializedNode::Element { .. } => NodeType::Element,
            SerializedNode::Text { .. } => NodeType::Text,
            SerializedNode::CData => NodeType::CData,
            SerializedNode::DocumentFragment { .. } => NodeType::DocumentFragment,
        }
    }

    pub fn child_nodes(&self) -> &[SerializedNodeWithId] {
        match self {
            SerializedNode::Document { child_nodes }
            | SerializedNode::Element { child_nodes, .. }
            | SerializedNode::DocumentFragment { child_nodes, .. } => child_nodes,
            _ => &[],
        }
    }

    pub fn tag_name(&self) -> Option<&str> {
        match self {
            SerializedNode::Element { tag_name, .. } => Some(tag_name),
            _ => None,
        }
    }

    pub fn attributes(&self) -> Option<&Attributes> {
        match self {
            SerializedNode::Element { attributes, .. } => Some(attributes),
            _ => None,
        }
    }

    pub fn text_content(&self) -> Option<&str> {
        match self {
            SerializedNode::Text { text_content } => Some(text_content),
            SerializedNode::CData => Some(""),
            _ => None,
        }
    }
}

/// Serialized node plus its NodeId
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerializedNodeWithId {
    pub id: NodeId,
    pub node: SerializedNode,
}

impl SerializedNodeWithId {
    /// Depth-first search by id
    pub fn find(&self, id: NodeId) -> Option<&SerializedNodeWithId> {
        if self.id == id {
            return Some(self);
        }
        self.node.child_nodes().iter().find_map(|c| c.find(id))
    }

    /// Every id in this subtree, pre-order
    pub fn ids(&self) -> Vec<NodeId> {
        let mut out = vec![self.id];
        for child in self.node.child_nodes() {
            out.extend(child.ids());
        }
        out
    }
}

impl Serialize for SerializedNodeWithId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.node.node_type())?;
        match &self.node {
            SerializedNode::Document { child_nodes } => {
                map.serialize_entry("childNodes", child_nodes)?;
            }
            SerializedNode::DocumentType {
                name,
                public_id,
                system_id,
            } => {
                map.serialize_entry("name", name)?;
                map.serialize_entry("publicId", public_id)?;
                map.serialize_entry("systemId", system_id)?;
            }
            SerializedNode::Element {
                tag_name,
                attributes,
                child_nodes,
                is_svg,
            } => {
                map.serialize_entry("tagName", tag_name)?;
                map.serialize_entry("attributes", attributes)?;
                map.serialize_entry("childNodes", child_nodes)?;
                if *is_svg {
                    map.serialize_entry("isSVG", &true)?;
                }
            }
            SerializedNode::Text { text_content } => {
                map.serialize_entry("textContent", text_content)?;
            }
            SerializedNode::CData => {
                map.serialize_entry("textContent", "")?;
            }
            SerializedNode::DocumentFragment {
                child_nodes,
                is_shadow_root,
            } => {
                map.serialize_entry("childNodes", child_nodes)?;
                map.serialize_entry("isShadowRoot", is_shadow_root)?;
            }
        }
        map.serialize_entry("id", &self.id)?;
        map.end()
    }
}

// ============================================================================
// Record payloads
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InitialOffset {
    pub left: i64,
    pub top: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FullSnapshotData {
    pub node: SerializedNodeWithId,
    pub initial_offset: InitialOffset,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetaData {
    pub href: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FocusData {
    pub has_focus: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VisualViewportData {
    pub scale: f64,
    pub offset_left: f64,
    pub offset_top: f64,
    pub page_left: f64,
    pub page_top: f64,
    pub height: f64,
    pub width: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FrustrationData {
    pub frustration_types: Vec<FrustrationType>,
    pub record_ids: Vec<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AddedNodeMutation {
    pub parent_id: NodeId,
    /// Serializes as `null` when the node is the last serialized child
    pub next_id: Option<NodeId>,
    pub node: SerializedNodeWithId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemovedNodeMutation {
    pub parent_id: NodeId,
    pub id: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextMutation {
    pub id: NodeId,
    pub value: Option<String>,
}

/// Changed attributes of one element; `None` means removed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeMutation {
    pub id: NodeId,
    pub attributes: Vec<(String, Option<String>)>,
}

impl AttributeMutation {
    pub fn get(&self, name: &str) -> Option<&Option<String>> {
        self.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }
}

impl Serialize for AttributeMutation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Changed<'a>(&'a [(String, Option<String>)]);

        impl Serialize for Changed<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for (name, value) in self.0 {
                    map.serialize_entry(name, value)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("id", &self.id)?;
        map.serialize_entry("attributes", &Changed(&self.attributes))?;
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct MutationData {
    pub adds: Vec<AddedNodeMutation>,
    pub removes: Vec<RemovedNodeMutation>,
    pub texts: Vec<TextMutation>,
    pub attributes: Vec<AttributeMutation>,
}

impl MutationData {
    pub fn is_empty(&self) -> bool {
        self.adds.is_empty()
            && self.removes.is_empty()
            && self.texts.is_empty()
            && self.attributes.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MousePosition {
    pub x: i64,
    pub y: i64,
    pub id: NodeId,
    pub time_offset: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MousemoveData {
    pub positions: Vec<MousePosition>,
}

/// Pointer interaction. Focus and blur carry no coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MouseInteraction {
    #[serde(rename = "type")]
    pub interaction_type: MouseInteractionType,
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScrollData {
    pub id: NodeId,
    pub x: i64,
    pub y: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ViewportResizeData {
    pub width: i64,
    pub height: i64,
}

/// Recorded state of a form control
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputState {
    Text(String),
    Checked(bool),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputData {
    pub id: NodeId,
    pub state: InputState,
}

impl Serialize for InputData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("id", &self.id)?;
        match &self.state {
            InputState::Text(text) => map.serialize_entry("text", text)?,
            InputState::Checked(checked) => map.serialize_entry("isChecked", checked)?,
        }
        map.end()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MediaInteractionData {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub interaction_type: MediaInteractionType,
}

/// Rule position: a plain index for top-level rules, a path through
/// grouping rules otherwise
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum StyleSheetIndex {
    Index(usize),
    Path(Vec<usize>),
}

impl StyleSheetIndex {
    /// `path` addresses the grouping rule, `index` the position inside it
    pub fn new(path: &[usize], index: usize) -> Self {
        if path.is_empty() {
            StyleSheetIndex::Index(index)
        } else {
            let mut full = path.to_vec();
            full.push(index);
            StyleSheetIndex::Path(full)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheetAddRule {
    pub rule: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<StyleSheetIndex>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheetDeleteRule {
    pub index: StyleSheetIndex,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyleSheetRuleData {
    pub id: NodeId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub adds: Option<Vec<StyleSheetAddRule>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removes: Option<Vec<StyleSheetDeleteRule>>,
}

/// Incremental snapshot payload
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementalData {
    Mutation(MutationData),
    MouseMove(MousemoveData),
    TouchMove(MousemoveData),
    MouseInteraction(MouseInteraction),
    Scroll(ScrollData),
    ViewportResize(ViewportResizeData),
    Input(InputData),
    MediaInteraction(MediaInteractionData),
    StyleSheetRule(StyleSheetRuleData),
}

impl IncrementalData {
    pub fn source(&self) -> IncrementalSource {
        match self {
            IncrementalData::Mutation(_) => IncrementalSource::Mutation,
            IncrementalData::MouseMove(_) => IncrementalSource::MouseMove,
            IncrementalData::TouchMove(_) => IncrementalSource::TouchMove,
            IncrementalData::MouseInteraction(_) => IncrementalSource::MouseInteraction,
            IncrementalData::Scroll(_) => IncrementalSource::Scroll,
            IncrementalData::ViewportResize(_) => IncrementalSource::ViewportResize,
            IncrementalData::Input(_) => IncrementalSource::Input,
            IncrementalData::MediaInteraction(_) => IncrementalSource::MediaInteraction,
            IncrementalData::StyleSheetRule(_) => IncrementalSource::StyleSheetRule,
        }
    }
}

impl Serialize for IncrementalData {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct WithSource<'a, T: Serialize> {
            source: IncrementalSource,
            #[serde(flatten)]
            data: &'a T,
        }

        let source = self.source();
        match self {
            IncrementalData::Mutation(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::MouseMove(data) | IncrementalData::TouchMove(data) => {
                WithSource { source, data }.serialize(serializer)
            }
            IncrementalData::MouseInteraction(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::Scroll(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::ViewportResize(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::Input(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::MediaInteraction(data) => WithSource { source, data }.serialize(serializer),
            IncrementalData::StyleSheetRule(data) => WithSource { source, data }.serialize(serializer),
        }
    }
}

// ============================================================================
// Records
// ============================================================================

/// Replay record
#[derive(Debug, Clone, PartialEq)]
pub enum Record {
    FullSnapshot {
        timestamp: TimeStamp,
        data: FullSnapshotData,
    },
    IncrementalSnapshot {
        timestamp: TimeStamp,
        data: IncrementalData,
        /// Set on mouse interactions so frustration records can point at them
        id: Option<RecordId>,
    },
    Meta {
        timestamp: TimeStamp,
        data: MetaData,
    },
    Focus {
        timestamp: TimeStamp,
        data: FocusData,
    },
    ViewEnd {
        timestamp: TimeStamp,
    },
    VisualViewport {
        timestamp: TimeStamp,
        data: VisualViewportData,
    },
    Frustration {
        timestamp: TimeStamp,
        data: FrustrationData,
    },
}

impl Record {
    pub fn incremental(timestamp: TimeStamp, data: IncrementalData) -> Self {
        Record::IncrementalSnapshot {
            timestamp,
            data,
            id: None,
        }
    }

    pub fn record_type(&self) -> RecordType {
        match self {
            Record::FullSnapshot { .. } => RecordType::FullSnapshot,
            Record::IncrementalSnapshot { .. } => RecordType::IncrementalSnapshot,
            Record::Meta { .. } => RecordType::Meta,
            Record::Focus { .. } => RecordType::Focus,
            Record::ViewEnd { .. } => RecordType::ViewEnd,
            Record::VisualViewport { .. } => RecordType::VisualViewport,
            Record::Frustration { .. } => RecordType::FrustrationRecord,
        }
    }

    pub fn timestamp(&self) -> TimeStamp {
        match self {
            Record::FullSnapshot { timestamp, .. }
            | Record::IncrementalSnapshot { timestamp, .. }
            | Record::Meta { timestamp, .. }
            | Record::Focus { timestamp, .. }
            | Record::ViewEnd { timestamp }
            | Record::VisualViewport { timestamp, .. }
            | Record::Frustration { timestamp, .. } => *timestamp,
        }
    }

    /// Incremental source, for incremental snapshots
    pub fn source(&self) -> Option<IncrementalSource> {
        match self {
            Record::IncrementalSnapshot { data, .. } => Some(data.source()),
            _ => None,
        }
    }

    pub fn is_mutation(&self) -> bool {
        self.source() == Some(IncrementalSource::Mutation)
    }
}

impl Serialize for Record {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("type", &self.record_type())?;
        map.serialize_entry("timestamp", &self.timestamp())?;
        match self {
            Record::FullSnapshot { data, .. } => map.serialize_entry("data", data)?,
            Record::IncrementalSnapshot { data, id, .. } => {
                map.serialize_entry("data", data)?;
                if let Some(id) = id {
                    map.serialize_entry("id", id)?;
                }
            }
            Record::Meta { data, .. } => map.serialize_entry("data", data)?,
            Record::Focus { data, .. } => map.serialize_entry("data", data)?,
            Record::ViewEnd { .. } => {}
            Record::VisualViewport { data, .. } => map.serialize_entry("data", data)?,
            Record::Frustration { data, .. } => map.serialize_entry("data", data)?,
        }
        map.end()
    }
}
