//! Clips, audio tracks, overlays, and compositions.
//!
//! A [`Composition`] is the unit handed to a media engine for rendering:
//! an ordered sequence of base clips played back to back, overlay layers
//! composited on top, and background audio tracks mixed under the clips'
//! own audio.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geometry::{Rect, Rgba};
use crate::surface::RasterSurface;

/// One clip on the base video track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaClip {
    /// Solid color filler.
    Color { color: Rgba, duration_secs: f64 },

    /// A video file, optionally trimmed at the start.
    Video {
        path: PathBuf,
        duration_secs: f64,
        #[serde(default)]
        trim_start_secs: f64,
        /// Whether the file carries an audio stream to keep.
        #[serde(default)]
        has_audio: bool,
    },
}

impl MediaClip {
    /// Blank filler clip of the given length.
    pub fn color(color: Rgba, duration_secs: f64) -> Self {
        Self::Color {
            color,
            duration_secs: duration_secs.max(0.0),
        }
    }

    /// Untrimmed video clip.
    pub fn video(path: impl Into<PathBuf>, duration_secs: f64, has_audio: bool) -> Self {
        Self::Video {
            path: path.into(),
            duration_secs: duration_secs.max(0.0),
            trim_start_secs: 0.0,
            has_audio,
        }
    }

    /// Playback length of the clip.
    pub fn duration_secs(&self) -> f64 {
        match self {
            Self::Color { duration_secs, .. } | Self::Video { duration_secs, .. } => {
                *duration_secs
            }
        }
    }
}

/// An audio file mixed under the composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundAudioTrack {
    /// Path to the audio (or audio-bearing video) file.
    pub path: PathBuf,

    /// Offset at which playback starts. Negative values skip the
    /// beginning of the track instead.
    #[serde(default)]
    pub delay_secs: f64,

    /// Seconds trimmed from the start of the source.
    #[serde(default)]
    pub trim_start_secs: f64,

    /// Optional playback length after trimming.
    #[serde(default)]
    pub duration_secs: Option<f64>,

    /// Linear gain (1.0 = unchanged).
    #[serde(default = "default_volume")]
    pub volume: f64,
}

fn default_volume() -> f64 {
    1.0
}

impl BackgroundAudioTrack {
    pub fn new(path: impl Into<PathBuf>, delay_secs: f64) -> Self {
        Self {
            path: path.into(),
            delay_secs,
            trim_start_secs: 0.0,
            duration_secs: None,
            volume: default_volume(),
        }
    }

    /// Copy of this track with its delay re-expressed relative to a
    /// timeline that starts at `offset_secs`.
    pub fn rebased(&self, offset_secs: f64) -> Self {
        Self {
            delay_secs: self.delay_secs - offset_secs,
            ..self.clone()
        }
    }
}

/// Raster content of an overlay.
#[derive(Debug, Clone)]
pub enum OverlaySource {
    /// An in-memory surface, typically a synthesized frame.
    Surface(RasterSurface),
    /// An image file on disk.
    Image(PathBuf),
}

/// A raster clip composited over the base video for a time window.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub source: OverlaySource,

    /// Placement in output pixel coordinates.
    pub position: Rect,

    /// Opacity in `[0, 1]`.
    pub opacity: f64,

    /// Start offset from the beginning of the composition.
    pub delay_secs: f64,

    /// How long the overlay stays visible.
    pub duration_secs: f64,
}

impl Overlay {
    pub fn new(source: OverlaySource, position: Rect, delay_secs: f64, duration_secs: f64) -> Self {
        Self {
            source,
            position,
            opacity: 1.0,
            delay_secs,
            duration_secs,
        }
    }

    pub fn with_opacity(mut self, opacity: f64) -> Self {
        self.opacity = opacity.clamp(0.0, 1.0);
        self
    }

    /// End of the visible window.
    pub fn end_secs(&self) -> f64 {
        self.delay_secs + self.duration_secs
    }

    pub fn is_surface(&self) -> bool {
        matches!(self.source, OverlaySource::Surface(_))
    }
}

/// An ordered collection of overlays sharing one compositing layer.
#[derive(Debug, Clone, Default)]
pub struct OverlayLayer {
    pub overlays: Vec<Overlay>,
}

impl OverlayLayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, overlay: Overlay) {
        self.overlays.push(overlay);
    }

    pub fn len(&self) -> usize {
        self.overlays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    /// Number of overlays backed by in-memory surfaces.
    pub fn surface_count(&self) -> usize {
        self.overlays.iter().filter(|o| o.is_surface()).count()
    }
}

/// A renderable timeline.
#[derive(Debug, Clone, Default)]
pub struct Composition {
    pub clips: Vec<MediaClip>,
    pub overlay_layers: Vec<OverlayLayer>,
    pub audio_tracks: Vec<BackgroundAudioTrack>,
}

impl Composition {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_clip(&mut self, clip: MediaClip) {
        self.clips.push(clip);
    }

    pub fn add_overlay_layer(&mut self, layer: OverlayLayer) {
        self.overlay_layers.push(layer);
    }

    pub fn add_audio_track(&mut self, track: BackgroundAudioTrack) {
        self.audio_tracks.push(track);
    }

    /// Total length of the base clip sequence.
    pub fn duration_secs(&self) -> f64 {
        self.clips.iter().map(MediaClip::duration_secs).sum()
    }

    /// Overlay count across all layers.
    pub fn overlay_count(&self) -> usize {
        self.overlay_layers.iter().map(OverlayLayer::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_composition_duration_sums_clips() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.5));
        composition.append_clip(MediaClip::video("/tmp/a.mp4", 2.25, true));
        assert!((composition.duration_secs() - 3.75).abs() < 1e-12);
    }

    #[test]
    fn test_rebased_track_leaves_original_untouched() {
        let track = BackgroundAudioTrack::new("/tmp/music.mp3", 12.0);
        let rebased = track.rebased(10.0);
        assert!((rebased.delay_secs - 2.0).abs() < 1e-12);
        assert!((track.delay_secs - 12.0).abs() < 1e-12);

        let before_start = track.rebased(20.0);
        assert!((before_start.delay_secs + 8.0).abs() < 1e-12);
    }

    #[test]
    fn test_clip_json_shape() {
        let clip = MediaClip::color(Rgba::BLACK, 2.0);
        let json = serde_json::to_value(&clip).unwrap();
        assert_eq!(json["kind"], "color");

        let parsed: MediaClip =
            serde_json::from_str(r#"{"kind":"video","path":"/v.mp4","duration_secs":4.0}"#)
                .unwrap();
        assert_eq!(parsed, MediaClip::video("/v.mp4", 4.0, false));
    }

    #[test]
    fn test_audio_track_default_volume() {
        let track: BackgroundAudioTrack = serde_json::from_str(r#"{"path":"/a.wav"}"#).unwrap();
        assert!((track.volume - 1.0).abs() < 1e-12);
        assert_eq!(track.duration_secs, None);
    }

    #[test]
    fn test_overlay_opacity_is_clamped() {
        let overlay = Overlay::new(
            OverlaySource::Image(PathBuf::from("/logo.png")),
            Rect::new(0.0, 0.0, 10.0, 10.0),
            1.0,
            2.0,
        )
        .with_opacity(1.7);
        assert!((overlay.opacity - 1.0).abs() < 1e-12);
        assert!((overlay.end_secs() - 3.0).abs() < 1e-12);
        assert!(!overlay.is_surface());
    }
}
