//! Geometry APIs
//!
//! DOMRect as returned by getBoundingClientRect.

/// DOMRect - rectangle geometry
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DOMRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl DOMRect {
    /// Create with dimensions
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_xywh() {
        let rect = DOMRect::from_xywh(10.0, 20.0, 30.0, 40.0);
        assert_eq!((rect.x, rect.y), (10.0, 20.0));
        assert_eq!((rect.width, rect.height), (30.0, 40.0));
    }
}
