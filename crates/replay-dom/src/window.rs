//! Window state
//!
//! Viewport, visual viewport, focus and page visibility.

/// Visibility state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VisibilityState {
    #[default]
    Visible,
    Hidden,
}

/// Visual viewport (pinch zoom)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VisualViewport {
    pub scale: f64,
    pub offset_left: f64,
    pub offset_top: f64,
    pub page_left: f64,
    pub page_top: f64,
    pub width: f64,
    pub height: f64,
}

impl VisualViewport {
    /// Unzoomed visual viewport matching a layout viewport
    pub fn unscaled(width: f64, height: f64) -> Self {
        Self {
            scale: 1.0,
            offset_left: 0.0,
            offset_top: 0.0,
            page_left: 0.0,
            page_top: 0.0,
            width,
            height,
        }
    }
}

/// Browsing context state
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    pub href: String,
    pub inner_width: f64,
    pub inner_height: f64,
    pub scroll_x: f64,
    pub scroll_y: f64,
    /// `None` when the platform has no visual viewport API
    pub visual_viewport: Option<VisualViewport>,
    pub has_focus: bool,
    pub visibility: VisibilityState,
}

impl Window {
    pub fn new(href: &str) -> Self {
        Self {
            href: href.to_string(),
            inner_width: 1024.0,
            inner_height: 768.0,
            scroll_x: 0.0,
            scroll_y: 0.0,
            visual_viewport: Some(VisualViewport::unscaled(1024.0, 768.0)),
            has_focus: true,
            visibility: VisibilityState::Visible,
        }
    }

    pub fn is_hidden(&self) -> bool {
        self.visibility == VisibilityState::Hidden
    }
}

impl Default for Window {
    fn default() -> Self {
        Self::new("about:blank")
    }
}
