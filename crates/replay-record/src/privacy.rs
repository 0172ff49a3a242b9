//! Privacy levels and masking
//!
//! A node's effective level is its own level (if it asks for one) reduced
//! against its parent's; `hidden` and `ignore` absorb everything below them.
//! Which level a node asks for is decided by a [`PrivacyPolicy`].

use std::collections::HashMap;

use replay_dom::{Document, NodeKey, NodeKind};
use serde::{Deserialize, Serialize};

pub const PRIVACY_ATTR_NAME: &str = "data-dd-privacy";
pub const PRIVACY_CLASS_PREFIX: &str = "dd-privacy-";
pub const CENSORED_STRING_MARK: &str = "***";
pub const TEXT_MASKING_CHAR: char = 'x';

/// Privacy level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodePrivacyLevel {
    Allow,
    #[default]
    Mask,
    MaskUserInput,
    Hidden,
    Ignore,
}

impl NodePrivacyLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            NodePrivacyLevel::Allow => "allow",
            NodePrivacyLevel::Mask => "mask",
            NodePrivacyLevel::MaskUserInput => "mask-user-input",
            NodePrivacyLevel::Hidden => "hidden",
            NodePrivacyLevel::Ignore => "ignore",
        }
    }

    /// Parse an attribute value (`allow`, `mask`, ...)
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(NodePrivacyLevel::Allow),
            "mask" => Some(NodePrivacyLevel::Mask),
            "mask-user-input" => Some(NodePrivacyLevel::MaskUserInput),
            "hidden" => Some(NodePrivacyLevel::Hidden),
            "ignore" => Some(NodePrivacyLevel::Ignore),
            _ => None,
        }
    }

    /// Hidden or ignored: nothing below is recorded
    pub fn is_opaque(self) -> bool {
        matches!(self, NodePrivacyLevel::Hidden | NodePrivacyLevel::Ignore)
    }
}

/// Decides which level a node asks for by itself
pub trait PrivacyPolicy {
    /// Level in effect above the document
    fn default_level(&self) -> NodePrivacyLevel;

    /// Level requested by the node itself, `None` to inherit
    fn self_level(&self, doc: &Document, node: NodeKey) -> Option<NodePrivacyLevel>;
}

/// Policy driven by `data-dd-privacy` attributes and `dd-privacy-*` classes
#[derive(Debug, Clone, Copy, Default)]
pub struct AttributePrivacyPolicy {
    pub default_level: NodePrivacyLevel,
}

impl AttributePrivacyPolicy {
    pub fn new(default_level: NodePrivacyLevel) -> Self {
        Self { default_level }
    }
}

impl PrivacyPolicy for AttributePrivacyPolicy {
    fn default_level(&self) -> NodePrivacyLevel {
        self.default_level
    }

    fn self_level(&self, doc: &Document, node: NodeKey) -> Option<NodePrivacyLevel> {
        let tag = doc.tag_name(node)?;

        // Needed to resolve relative URLs during replay
        if tag == "base" {
            return Some(NodePrivacyLevel::Allow);
        }

        if tag == "input" {
            let input_type = doc.input_type(node).unwrap_or_default();
            if matches!(input_type.as_str(), "password" | "email" | "tel" | "hidden") {
                return Some(NodePrivacyLevel::Mask);
            }
            let autocomplete = doc.attribute(node, "autocomplete").unwrap_or_default();
            if autocomplete.starts_with("cc-") {
                return Some(NodePrivacyLevel::Mask);
            }
        }

        let attr = doc.attribute(node, PRIVACY_ATTR_NAME);
        let classes = doc.class_list(node);
        for level in [
            NodePrivacyLevel::Hidden,
            NodePrivacyLevel::Mask,
            NodePrivacyLevel::MaskUserInput,
            NodePrivacyLevel::Allow,
        ] {
            let class = format!("{PRIVACY_CLASS_PREFIX}{}", level.as_str());
            if attr.as_deref() == Some(level.as_str()) || classes.contains(&class) {
                return Some(level);
            }
        }

        if should_ignore_element(doc, node, &tag) {
            return Some(NodePrivacyLevel::Ignore);
        }
        None
    }
}

/// Elements that carry no replay value: scripts, favicons, preloaded
/// scripts and descriptive `<meta>` tags
fn should_ignore_element(doc: &Document, node: NodeKey, tag: &str) -> bool {
    let attr = |name: &str| {
        doc.attribute(node, name)
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_default()
    };
    match tag {
        "script" => true,
        "link" => {
            let rel = attr("rel");
            ((rel.contains("preload") || rel.contains("prefetch")) && attr("as") == "script")
                || rel == "shortcut icon"
                || rel == "icon"
        }
        "meta" => {
            let name = attr("name");
            let rel = attr("rel");
            let property = attr("property");
            name.starts_with("msapplication-tile")
                || name == "application-name"
                || matches!(rel.as_str(), "icon" | "apple-touch-icon" | "shortcut icon")
                || matches!(name.as_str(), "keywords" | "description")
                || ["og:", "twitter:", "fb:"].iter().any(|p| property.starts_with(p))
                || ["og:", "twitter:"].iter().any(|p| name.starts_with(p))
                || name == "pinterest"
                || matches!(name.as_str(), "robots" | "googlebot" | "bingbot")
                || doc.has_attribute(node, "http-equiv")
                || matches!(
                    name.as_str(),
                    "author" | "generator" | "framework" | "publisher" | "progid"
                )
                || property.starts_with("article:")
                || property.starts_with("product:")
                || matches!(
                    name.as_str(),
                    "google-site-verification"
                        | "yandex-verification"
                        | "csrf-token"
                        | "p:domain_verify"
                        | "verify-v1"
                        | "verification"
                        | "shopify-checkout-api-token"
                )
        }
        _ => false,
    }
}

/// Combine a node's own level with its parent's
pub fn reduce_privacy_level(
    child: Option<NodePrivacyLevel>,
    parent: NodePrivacyLevel,
) -> NodePrivacyLevel {
    if parent.is_opaque() {
        return parent;
    }
    child.unwrap_or(parent)
}

/// Per-pass memo of resolved levels
pub type PrivacyCache = HashMap<NodeKey, NodePrivacyLevel>;

/// Effective level of `node`, walking composed ancestors
pub fn node_privacy_level(
    policy: &dyn PrivacyPolicy,
    doc: &Document,
    node: NodeKey,
    mut cache: Option<&mut PrivacyCache>,
) -> NodePrivacyLevel {
    let mut chain = Vec::new();
    let mut level = policy.default_level();
    let mut current = Some(node);
    while let Some(key) = current {
        if let Some(cached) = cache.as_deref().and_then(|c| c.get(&key)) {
            level = *cached;
            break;
        }
        chain.push(key);
        current = doc.composed_parent(key);
    }
    for key in chain.into_iter().rev() {
        level = reduce_privacy_level(policy.self_level(doc, key), level);
        if let Some(cache) = cache.as_deref_mut() {
            cache.insert(key, level);
        }
    }
    level
}

const FORM_PRIVATE_TAG_NAMES: &[&str] = &[
    "input", "output", "textarea", "select", "option", "datalist", "optgroup",
];

fn is_form_element(doc: &Document, node: Option<NodeKey>) -> bool {
    node.and_then(|n| doc.tag_name(n))
        .is_some_and(|tag| FORM_PRIVATE_TAG_NAMES.contains(&tag.as_str()))
}

/// Whether content of `node` is masked at `level`
pub fn should_mask_node(doc: &Document, node: NodeKey, level: NodePrivacyLevel) -> bool {
    match level {
        NodePrivacyLevel::Mask | NodePrivacyLevel::Hidden | NodePrivacyLevel::Ignore => true,
        NodePrivacyLevel::MaskUserInput => {
            if doc.node_kind(node) == Some(NodeKind::Text) {
                is_form_element(doc, doc.parent(node))
            } else {
                is_form_element(doc, Some(node))
            }
        }
        NodePrivacyLevel::Allow => false,
    }
}

/// Replace every non-whitespace character, keeping the length
pub fn censor_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { c } else { TEXT_MASKING_CHAR })
        .collect()
}

/// Recorded content of a text node. `None` drops the node.
pub fn text_content(
    doc: &Document,
    text_node: NodeKey,
    ignore_white_space: bool,
    parent_level: NodePrivacyLevel,
) -> Option<String> {
    let parent_tag = doc.parent(text_node).and_then(|p| doc.tag_name(p));
    let text = doc.text(text_node).unwrap_or_default();

    if ignore_white_space && text.trim().is_empty() {
        return None;
    }

    let parent_tag = parent_tag.as_deref();
    if parent_tag == Some("script") || parent_level == NodePrivacyLevel::Hidden {
        return Some(CENSORED_STRING_MARK.to_string());
    }
    if !should_mask_node(doc, text_node, parent_level) {
        return Some(text);
    }
    match parent_tag {
        // Scrambling these would break the option list
        Some("datalist" | "select" | "optgroup") => {
            if text.trim().is_empty() {
                None
            } else {
                Some(text)
            }
        }
        Some("option") => Some(CENSORED_STRING_MARK.to_string()),
        _ => Some(censor_text(&text)),
    }
}

/// Recorded value of a form control. `None` when it has none to record.
pub fn element_input_value(doc: &Document, element: NodeKey, level: NodePrivacyLevel) -> Option<String> {
    let tag = doc.tag_name(element)?;
    let value = doc.value(element);

    if should_mask_node(doc, element, level) {
        let input_type = doc.input_type(element);
        // Button labels stay readable
        if matches!(input_type.as_deref(), Some("button" | "submit" | "reset")) {
            return value;
        }
        if value.as_deref().is_none_or(str::is_empty) || tag == "option" {
            return None;
        }
        return Some(CENSORED_STRING_MARK.to_string());
    }

    match tag.as_str() {
        "option" | "select" | "input" | "textarea" => value,
        _ => None,
    }
}
