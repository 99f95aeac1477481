//! CPU raster surfaces.
//!
//! A [`RasterSurface`] is the drawing target handed to the host for each
//! synthesized frame. It owns a premultiplied RGBA pixmap plus the current
//! drawing transform; all drawing helpers apply that transform, so the host
//! draws in composition coordinates.

use std::path::Path;

use tiny_skia::{Paint, Pixmap, Transform};

use crate::geometry::{FrameSize, Rect, Rgba};
use crate::ModelError;

/// An owned RGBA raster with a drawing transform.
#[derive(Debug, Clone)]
pub struct RasterSurface {
    pixmap: Pixmap,
    transform: Transform,
}

impl RasterSurface {
    /// Allocate a surface of the given size, initially fully transparent.
    pub fn new(size: FrameSize) -> Result<Self, ModelError> {
        let pixmap = Pixmap::new(size.width, size.height).ok_or(ModelError::InvalidSize {
            width: size.width,
            height: size.height,
        })?;
        Ok(Self {
            pixmap,
            transform: Transform::identity(),
        })
    }

    /// Allocate a surface filled with a solid color.
    pub fn solid(size: FrameSize, color: Rgba) -> Result<Self, ModelError> {
        let mut surface = Self::new(size)?;
        surface.clear(color);
        Ok(surface)
    }

    pub fn size(&self) -> FrameSize {
        FrameSize::new(self.pixmap.width(), self.pixmap.height())
    }

    /// Fill every pixel with `color`, ignoring the transform.
    pub fn clear(&mut self, color: Rgba) {
        self.pixmap.fill(color.to_skia());
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn set_transform(&mut self, transform: Transform) {
        self.transform = transform;
    }

    /// Fill a rectangle given in drawing (pre-transform) coordinates.
    ///
    /// Degenerate rectangles are ignored.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba) {
        let Some(skia_rect) = tiny_skia::Rect::from_xywh(
            rect.x as f32,
            rect.y as f32,
            rect.width as f32,
            rect.height as f32,
        ) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(color.to_skia());
        paint.anti_alias = false;
        self.pixmap
            .fill_rect(skia_rect, &paint, self.transform, None);
    }

    /// Map a drawing-space point to pixel coordinates.
    pub fn map_point(&self, x: f64, y: f64) -> (f64, f64) {
        let mut points = [tiny_skia::Point::from_xy(x as f32, y as f32)];
        self.transform.map_points(&mut points);
        (points[0].x as f64, points[0].y as f64)
    }

    /// Straight-alpha color of the pixel at `(x, y)`, or `None` outside
    /// the surface.
    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        if x >= self.pixmap.width() || y >= self.pixmap.height() {
            return None;
        }
        let color = self.pixmap.pixel(x, y)?.demultiply();
        Some(Rgba::new(
            color.red(),
            color.green(),
            color.blue(),
            color.alpha(),
        ))
    }

    /// Borrow the underlying pixmap (premultiplied RGBA).
    pub fn pixmap(&self) -> &Pixmap {
        &self.pixmap
    }

    /// Mutable access for hosts that draw with tiny-skia directly.
    pub fn pixmap_mut(&mut self) -> &mut Pixmap {
        &mut self.pixmap
    }

    /// Write straight-alpha RGBA8 bytes into `dst`.
    ///
    /// `dst` must be exactly `width * height * 4` bytes long.
    pub fn write_rgba8(&self, dst: &mut [u8]) -> Result<(), ModelError> {
        if dst.len() != self.size().rgba_len() {
            return Err(ModelError::ValidationError {
                message: format!(
                    "rgba buffer has {} bytes, expected {}",
                    dst.len(),
                    self.size().rgba_len()
                ),
            });
        }
        for (d, p) in dst.chunks_exact_mut(4).zip(self.pixmap.pixels()) {
            let c = p.demultiply();
            d[0] = c.red();
            d[1] = c.green();
            d[2] = c.blue();
            d[3] = c.alpha();
        }
        Ok(())
    }

    /// Straight-alpha RGBA8 copy of the surface.
    pub fn to_rgba8(&self) -> Vec<u8> {
        let mut out = vec![0u8; self.size().rgba_len()];
        // Length matches by construction.
        let _ = self.write_rgba8(&mut out);
        out
    }

    /// Encode the surface as a PNG file.
    pub fn save_png(&self, path: &Path) -> Result<(), ModelError> {
        self.pixmap.save_png(path).map_err(|e| ModelError::Png {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
