//! Element attribute serialization
//!
//! DOM attributes pass through the privacy rules, then the element's live
//! state (form values, media state, CSSOM text, scroll offsets) is added as
//! extra attributes the player knows how to restore.

use replay_dom::{Document, NodeKey};

use super::{ElementsScrollPositions, ScrollPosition, SerializationStatus};
use crate::privacy::{
    element_input_value, NodePrivacyLevel, CENSORED_STRING_MARK, PRIVACY_ATTR_NAME,
};
use crate::records::{AttributeValue, Attributes};

/// Attributes whose value may leak user content
const MASKED_ATTRIBUTES: &[&str] = &["title", "alt", "placeholder", "aria-label", "value"];

/// Recorded value of one DOM attribute. `None` when the attribute is absent
/// or the element is hidden.
pub fn serialize_attribute(
    doc: &Document,
    element: NodeKey,
    level: NodePrivacyLevel,
    name: &str,
) -> Option<String> {
    if level == NodePrivacyLevel::Hidden {
        return None;
    }
    let value = doc.attribute(element, name)?;
    if level == NodePrivacyLevel::Mask {
        if MASKED_ATTRIBUTES.contains(&name) {
            return Some(CENSORED_STRING_MARK.to_string());
        }
        if name != PRIVACY_ATTR_NAME && name.starts_with("data-") && !value.is_empty() {
            return Some(CENSORED_STRING_MARK.to_string());
        }
    }
    Some(value)
}

pub(crate) fn serialize_element_attributes(
    doc: &Document,
    element: NodeKey,
    tag_name: &str,
    level: NodePrivacyLevel,
    status: SerializationStatus,
    scroll_positions: &mut ElementsScrollPositions,
) -> Attributes {
    let mut attributes = Attributes::new();

    for attribute in doc.attributes(element) {
        if let Some(value) = serialize_attribute(doc, element, level, &attribute.name) {
            attributes.insert(attribute.name, value);
        }
    }

    // Form state
    if matches!(tag_name, "input" | "textarea" | "select" | "option") {
        if let Some(value) = element_input_value(doc, element, level) {
            attributes.insert("value", value);
        }
    }
    if tag_name == "option" && level == NodePrivacyLevel::Allow && doc.selected(element) {
        attributes.insert("selected", true);
    }

    if tag_name == "style" {
        let css = doc
            .css_text(element)
            .filter(|text| !text.is_empty())
            .or_else(|| Some(doc.text_content(element)).filter(|text| !text.is_empty()));
        if let Some(css) = css {
            attributes.insert("_cssText", css);
        }
    }

    let input_type = doc.input_type(element);
    if matches!(input_type.as_deref(), Some("radio" | "checkbox")) {
        if level == NodePrivacyLevel::Allow {
            attributes.insert("checked", doc.checked(element));
        } else {
            attributes.remove("checked");
        }
    }

    if let Some(paused) = doc.media_paused(element) {
        attributes.insert("rr_mediaState", if paused { "paused" } else { "played" });
    }

    let position = match status {
        SerializationStatus::InitialFullSnapshot => {
            let (left, top) = doc.scroll(element);
            let position = ScrollPosition {
                scroll_left: left.round() as i64,
                scroll_top: top.round() as i64,
            };
            if position.is_scrolled() {
                scroll_positions.set(element, position);
                Some(position)
            } else {
                None
            }
        }
        SerializationStatus::SubsequentFullSnapshot => scroll_positions.get(element),
        SerializationStatus::Mutation => None,
    };
    if let Some(position) = position {
        if position.scroll_left != 0 {
            attributes.insert("rr_scrollLeft", AttributeValue::Number(position.scroll_left));
        }
        if position.scroll_top != 0 {
            attributes.insert("rr_scrollTop", AttributeValue::Number(position.scroll_top));
        }
    }

    attributes
}
