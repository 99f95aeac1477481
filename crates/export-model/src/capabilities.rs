//! Host capability trait.

use crate::geometry::{FrameSize, Rect};
use crate::media::{BackgroundAudioTrack, OverlayLayer};
use crate::part::ExportPartConfig;
use crate::surface::RasterSurface;

/// Everything the export pipeline needs from the host application.
///
/// The host keeps ownership of the data; the pipeline only reads it for the
/// duration of one export and never mutates anything it is handed.
/// Implementations are shared with the export worker thread, so hosts
/// needing mutable drawing state should use interior mutability.
pub trait ExportCapabilities: Send + Sync {
    /// Synthesis rate; one frame is drawn every `1 / frame_rate` seconds.
    fn frame_rate(&self) -> u32;

    /// Total export length, used to normalize progress.
    fn duration_secs(&self) -> f64;

    /// Region of the composition to export, in composition coordinates.
    fn export_area(&self) -> Rect;

    /// Output frame size in pixels.
    fn export_size(&self) -> FrameSize;

    /// Ordered parts; at least one is required.
    fn export_part_configs(&self) -> &[ExportPartConfig];

    /// Audio mixed across the whole export, in global time.
    fn global_background_audio_tracks(&self) -> Vec<BackgroundAudioTrack> {
        Vec::new()
    }

    /// Overlay composited over the entire output, if any.
    fn create_watermark_layer(&self) -> Option<OverlayLayer> {
        None
    }

    /// Paint the frame at `timestamp_secs` (global time).
    ///
    /// The surface arrives cleared to transparent with the export transform
    /// already applied. Must not block indefinitely.
    fn draw_frame(&self, surface: &mut RasterSurface, timestamp_secs: f64);
}
