//! Viewport geometry
//!
//! Some browsers report client coordinates relative to the visual viewport,
//! others relative to the layout viewport. When the visual viewport offset is
//! not already reflected in the page offsets the conversion is applied.

use replay_dom::{Document, VisualViewport, Window};

use crate::records::{VisualViewportData, ViewportResizeData};

const TOLERANCE: f64 = 25.0;

/// Client coordinates in both reference frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayoutCoordinates {
    pub layout_viewport_x: f64,
    pub layout_viewport_y: f64,
    pub visual_viewport_x: f64,
    pub visual_viewport_y: f64,
}

fn is_visual_viewport_factored_in(window: &Window, viewport: &VisualViewport) -> bool {
    (viewport.page_top - viewport.offset_top - window.scroll_y).abs() > TOLERANCE
        || (viewport.page_left - viewport.offset_left - window.scroll_x).abs() > TOLERANCE
}

pub fn convert_mouse_event_to_layout_coordinates(
    doc: &Document,
    client_x: f64,
    client_y: f64,
) -> LayoutCoordinates {
    let window = doc.window();
    let mut normalized = LayoutCoordinates {
        layout_viewport_x: client_x,
        layout_viewport_y: client_y,
        visual_viewport_x: client_x,
        visual_viewport_y: client_y,
    };
    let Some(viewport) = window.visual_viewport else {
        return normalized;
    };
    if is_visual_viewport_factored_in(&window, &viewport) {
        normalized.layout_viewport_x = (client_x + viewport.offset_left).round();
        normalized.layout_viewport_y = (client_y + viewport.offset_top).round();
    } else {
        normalized.visual_viewport_x = (client_x - viewport.offset_left).round();
        normalized.visual_viewport_y = (client_y - viewport.offset_top).round();
    }
    normalized
}

/// Visible area in CSS pixels
pub fn viewport_dimension(doc: &Document) -> ViewportResizeData {
    let window = doc.window();
    let (width, height) = match window.visual_viewport {
        Some(viewport) => (viewport.width * viewport.scale, viewport.height * viewport.scale),
        None => (window.inner_width, window.inner_height),
    };
    ViewportResizeData {
        width: width.round() as i64,
        height: height.round() as i64,
    }
}

pub fn visual_viewport_data(viewport: &VisualViewport) -> VisualViewportData {
    VisualViewportData {
        scale: viewport.scale,
        offset_left: viewport.offset_left,
        offset_top: viewport.offset_top,
        page_left: viewport.page_left,
        page_top: viewport.page_top,
        height: viewport.height,
        width: viewport.width,
    }
}
