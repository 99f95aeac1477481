//! Geometry and color types for export framing.
//!
//! The host describes the region to export as a [`Rect`] in composition
//! coordinates and the output as a [`FrameSize`] in pixels. Frames are
//! drawn under [`export_transform`], which crops the export area into the
//! output frame.

use serde::{Deserialize, Serialize};
use tiny_skia::Transform;

/// A rectangle in composition (logical) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    /// Left edge.
    pub x: f64,
    /// Top edge.
    pub y: f64,
    /// Width.
    pub width: f64,
    /// Height.
    pub height: f64,
}

impl Rect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Rectangle at the origin covering a whole frame.
    pub fn from_size(size: FrameSize) -> Self {
        Self::new(0.0, 0.0, size.width as f64, size.height as f64)
    }

    /// Right edge.
    pub fn right(&self) -> f64 {
        self.x + self.width
    }

    /// Whether both dimensions are finite and positive.
    pub fn has_area(&self) -> bool {
        self.width.is_finite() && self.height.is_finite() && self.width > 0.0 && self.height > 0.0
    }
}

/// Output frame dimensions in physical pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero.
    pub fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Bytes needed for one RGBA8 frame of this size.
    pub fn rgba_len(&self) -> usize {
        self.width as usize * self.height as usize * 4
    }
}

/// A straight-alpha RGBA8 color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba::new(255, 255, 255, 255);
    pub const BLACK: Rgba = Rgba::new(0, 0, 0, 255);
    pub const TRANSPARENT: Rgba = Rgba::new(0, 0, 0, 0);

    pub const fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// `0xRRGGBB` form accepted by ffmpeg color sources.
    pub fn to_hex(&self) -> String {
        format!("0x{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub(crate) fn to_skia(self) -> tiny_skia::Color {
        tiny_skia::Color::from_rgba8(self.r, self.g, self.b, self.a)
    }
}

impl Default for Rgba {
    fn default() -> Self {
        Self::WHITE
    }
}

/// Uniform scale from export-area units to output pixels.
///
/// Only the width ratio is used; a mismatched aspect ratio crops or
/// letterboxes vertically rather than distorting the content.
pub fn export_scale(area: &Rect, size: FrameSize) -> f64 {
    if area.width.abs() < f64::EPSILON {
        return 1.0;
    }
    size.width as f64 / area.width
}

/// Transform that maps the export area onto the output frame.
///
/// The point `(-area.x, -area.y)` after scaling becomes the translation,
/// so `(area.x, area.y)` lands on the output origin.
pub fn export_transform(area: &Rect, size: FrameSize) -> Transform {
    let scale = export_scale(area, size) as f32;
    Transform::from_scale(scale, scale).pre_translate(-area.x as f32, -area.y as f32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(transform: Transform, x: f32, y: f32) -> (f32, f32) {
        let mut points = [tiny_skia::Point::from_xy(x, y)];
        transform.map_points(&mut points);
        (points[0].x, points[0].y)
    }

    #[test]
    fn test_half_scale_maps_area_point() {
        let area = Rect::new(0.0, 0.0, 1280.0, 720.0);
        let size = FrameSize::new(640, 360);
        assert!((export_scale(&area, size) - 0.5).abs() < 1e-12);

        let (x, y) = map(export_transform(&area, size), 100.0, 100.0);
        assert!((x - 50.0).abs() < 1e-4);
        assert!((y - 50.0).abs() < 1e-4);
    }

    #[test]
    fn test_offset_area_origin_maps_to_output_origin() {
        let area = Rect::new(200.0, 100.0, 800.0, 450.0);
        let size = FrameSize::new(1600, 900);
        let (x, y) = map(export_transform(&area, size), 200.0, 100.0);
        assert!(x.abs() < 1e-4);
        assert!(y.abs() < 1e-4);

        let (x, y) = map(export_transform(&area, size), 1000.0, 550.0);
        assert!((x - 1600.0).abs() < 1e-3);
        assert!((y - 900.0).abs() < 1e-3);
    }

    #[test]
    fn test_color_hex() {
        assert_eq!(Rgba::WHITE.to_hex(), "0xFFFFFF");
        assert_eq!(Rgba::new(16, 32, 255, 128).to_hex(), "0x1020FF");
    }

    #[test]
    fn test_rect_area_needs_both_dimensions() {
        assert!(Rect::new(0.0, 0.0, 1280.0, 720.0).has_area());
        assert!(Rect::new(-5.0, -5.0, 0.5, 0.5).has_area());
        assert!(!Rect::new(0.0, 0.0, 1280.0, 0.0).has_area());
        assert!(!Rect::new(0.0, 0.0, 0.0, 720.0).has_area());
        assert!(!Rect::new(0.0, 0.0, 1280.0, -720.0).has_area());
        assert!(!Rect::new(0.0, 0.0, f64::INFINITY, 720.0).has_area());
        assert!(!Rect::new(0.0, 0.0, 1280.0, f64::NAN).has_area());
    }

    #[test]
    fn test_frame_size_validity() {
        assert!(FrameSize::new(2, 2).is_valid());
        assert!(!FrameSize::new(0, 720).is_valid());
        assert_eq!(FrameSize::new(4, 2).rgba_len(), 32);
    }

    proptest! {
        #[test]
        fn prop_area_corners_map_to_frame_corners(
            x in -500.0f64..500.0,
            y in -500.0f64..500.0,
            w in 10.0f64..2000.0,
            out_w in 16u32..1920,
        ) {
            let area = Rect::new(x, y, w, w * 9.0 / 16.0);
            let size = FrameSize::new(out_w, out_w * 9 / 16);
            let transform = export_transform(&area, size);

            let (ox, oy) = map(transform, x as f32, y as f32);
            prop_assert!(ox.abs() < 0.05);
            prop_assert!(oy.abs() < 0.05);

            let (rx, _) = map(transform, area.right() as f32, y as f32);
            prop_assert!((rx - out_w as f32).abs() < out_w as f32 * 1e-3 + 0.05);
        }
    }
}
