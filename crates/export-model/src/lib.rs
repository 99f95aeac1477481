//! vexport Export Model
//!
//! Defines the data contracts shared between a host application and the
//! export pipeline:
//! - **Geometry:** export areas, output frame sizes, colors, and the
//!   crop-to-output transform
//! - **Media:** clips, background audio tracks, overlays, and compositions
//! - **Parts:** per-segment export configuration
//! - **Surfaces:** CPU raster surfaces the host draws frames onto
//! - **Capabilities:** the trait a host implements to describe an export
//!
//! Times are expressed in seconds (`f64`). Export areas are in composition
//! coordinates; frame sizes are in physical output pixels.

pub mod capabilities;
pub mod geometry;
pub mod media;
pub mod part;
pub mod profile;
pub mod surface;

pub use capabilities::*;
pub use geometry::*;
pub use media::*;
pub use part::*;
pub use profile::*;
pub use surface::*;

/// Errors raised by model types.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("Invalid frame size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Failed to write PNG to {path}: {message}")]
    Png {
        path: std::path::PathBuf,
        message: String,
    },

    #[error("Invalid value: {message}")]
    ValidationError { message: String },
}
