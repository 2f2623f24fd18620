//! Surface geometry: selection rectangles, pointer mapping and the
//! contain-fit rule used when an image is loaded.

use serde::{Deserialize, Serialize};

/// Axis-aligned pixel rectangle on the working surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle spanned by a drag from `a` to `b`, in either direction.
    ///
    /// Negative coordinates are clamped to zero; the far edge is rounded up
    /// so a drag always covers the pixels it touched.
    pub fn from_drag(a: (f32, f32), b: (f32, f32)) -> Self {
        let x0 = a.0.min(b.0).max(0.0).floor();
        let y0 = a.1.min(b.1).max(0.0).floor();
        let x1 = a.0.max(b.0).max(0.0).ceil();
        let y1 = a.1.max(b.1).max(0.0).ceil();
        Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        }
    }

    /// Intersection with a `width` x `height` surface, `None` when empty.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        if self.x >= width || self.y >= height {
            return None;
        }
        let w = self.width.min(width - self.x);
        let h = self.height.min(height - self.y);
        if w == 0 || h == 0 {
            return None;
        }
        Some(Rect::new(self.x, self.y, w, h))
    }
}

/// Where the surface is drawn on screen, in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DisplayRect {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

/// Map a pointer position to surface coordinates, accounting for the
/// surface being displayed at a different size than its pixel size.
pub fn map_pointer(client: (f32, f32), display: DisplayRect, surface: (u32, u32)) -> (f32, f32) {
    let sx = if display.width > 0.0 {
        surface.0 as f32 / display.width
    } else {
        1.0
    };
    let sy = if display.height > 0.0 {
        surface.1 as f32 / display.height
    } else {
        1.0
    };
    ((client.0 - display.left) * sx, (client.1 - display.top) * sy)
}

/// Working-surface size for an image of `original` size.
///
/// ```text
/// scale = min(1, max_dimension / max(w, h), container_w / w, container_h / h)
/// ```
///
/// The image is only ever shrunk, never enlarged or cropped.
pub fn contain_fit(original: (u32, u32), max_dimension: u32, container: Option<(u32, u32)>) -> (u32, u32) {
    let (w, h) = original;
    if w == 0 || h == 0 {
        return (w, h);
    }
    let (w, h) = (w as f64, h as f64);
    let mut scale = 1.0f64.min(max_dimension as f64 / w.max(h));
    if let Some((cw, ch)) = container
        && cw > 0
        && ch > 0
    {
        scale = scale.min(cw as f64 / w).min(ch as f64 / h);
    }
    let fit = |v: f64| ((v * scale).round() as u32).max(1);
    (fit(w), fit(h))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contain_fit_never_upscales() {
        assert_eq!(contain_fit((400, 300), 2048, Some((1000, 1000))), (400, 300));
    }

    #[test]
    fn test_contain_fit_max_dimension() {
        assert_eq!(contain_fit((4000, 2000), 1000, None), (1000, 500));
    }

    #[test]
    fn test_contain_fit_container_height_wins() {
        // width would allow 0.5, height only 0.25
        assert_eq!(contain_fit((800, 800), 2048, Some((400, 200))), (200, 200));
    }

    #[test]
    fn test_contain_fit_ignores_zero_container() {
        assert_eq!(contain_fit((800, 600), 2048, Some((0, 0))), (800, 600));
    }

    #[test]
    fn test_map_pointer_scales_css_to_canvas() {
        let display = DisplayRect {
            left: 10.0,
            top: 20.0,
            width: 200.0,
            height: 100.0,
        };
        assert_eq!(map_pointer((110.0, 70.0), display, (400, 300)), (200.0, 150.0));
    }

    #[test]
    fn test_drag_in_any_direction() {
        let r = Rect::from_drag((30.5, 40.0), (10.2, 5.0));
        assert_eq!(r, Rect::new(10, 5, 21, 35));
    }

    #[test]
    fn test_clamp_to_surface() {
        assert_eq!(Rect::new(90, 0, 50, 10).clamp_to(100, 100), Some(Rect::new(90, 0, 10, 10)));
        assert_eq!(Rect::new(100, 0, 5, 5).clamp_to(100, 100), None);
        assert_eq!(Rect::new(0, 0, 0, 5).clamp_to(100, 100), None);
    }
}
