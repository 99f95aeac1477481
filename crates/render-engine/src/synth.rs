//! Frame synthesis.
//!
//! Walks a part's time range at the host frame rate, asks the host to draw
//! each frame onto a fresh transparent surface, and wraps every frame as a
//! one-step overlay positioned relative to the part start.

use tiny_skia::Transform;
use vexport_common::clock::FrameClock;
use vexport_common::error::{ExportError, ExportResult};
use vexport_model::{
    export_transform, ExportCapabilities, ExportPartConfig, FrameSize, Overlay, OverlayLayer,
    OverlaySource, RasterSurface, Rect, Rgba,
};

use crate::cancel::CancelFlag;
use crate::progress::synthesis_percent;

/// Draws overlay frames for parts of one export.
#[derive(Debug, Clone)]
pub struct FrameSynthesizer {
    clock: FrameClock,
    size: FrameSize,
    transform: Transform,
    position: Rect,
    total_secs: f64,
}

impl FrameSynthesizer {
    /// Capture framing from the host. `total_secs` normalizes progress.
    pub fn new(capabilities: &dyn ExportCapabilities, total_secs: f64) -> Self {
        let size = capabilities.export_size();
        Self {
            clock: FrameClock::new(capabilities.frame_rate()),
            size,
            transform: export_transform(&capabilities.export_area(), size),
            position: Rect::from_size(size),
            total_secs,
        }
    }

    /// Draw every frame of `part`.
    ///
    /// `elapsed_before_secs` is the combined length of the parts already
    /// synthesized; `progress` receives overall percentages. Cancellation is
    /// checked before each frame and aborts with [`ExportError::Canceled`].
    pub fn synthesize(
        &self,
        capabilities: &dyn ExportCapabilities,
        part: &ExportPartConfig,
        elapsed_before_secs: f64,
        cancel: &CancelFlag,
        progress: &mut dyn FnMut(u8),
    ) -> ExportResult<OverlayLayer> {
        let step = self.clock.step_secs();
        let mut layer = OverlayLayer::new();

        for t in self.clock.ticks(part.start_secs, part.duration_secs) {
            cancel.check()?;
            let offset = t - part.start_secs;
            progress(synthesis_percent(
                elapsed_before_secs + offset,
                self.total_secs,
            ));

            let mut surface = RasterSurface::new(self.size)
                .map_err(|e| ExportError::surface(e.to_string()))?;
            surface.clear(Rgba::TRANSPARENT);
            surface.set_transform(self.transform);
            capabilities.draw_frame(&mut surface, t);

            layer.push(Overlay::new(
                OverlaySource::Surface(surface),
                self.position,
                offset,
                step,
            ));
        }

        tracing::debug!(
            start_secs = part.start_secs,
            duration_secs = part.duration_secs,
            frames = layer.len(),
            fps = self.clock.fps(),
            "Synthesized part frames"
        );
        Ok(layer)
    }
}

/// Length used to normalize synthesis progress: the host's total duration,
/// or the sum of part durations when the host reports none.
pub fn progress_total_secs(capabilities: &dyn ExportCapabilities) -> f64 {
    let reported = capabilities.duration_secs();
    if reported.is_finite() && reported > 0.0 {
        return reported;
    }
    capabilities
        .export_part_configs()
        .iter()
        .map(|p| p.duration_secs.max(0.0))
        .sum()
}
