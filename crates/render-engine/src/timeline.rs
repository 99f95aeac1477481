//! Per-part base timeline.
//!
//! Each part gets a composition whose base clips cover exactly the part's
//! duration: blank filler for the leading delay, the host's background
//! clips, then blank filler for whatever is left. Background audio is
//! rebased from global time to the part's own timeline.

use vexport_model::{Composition, ExportPartConfig, MediaClip, Rgba};

/// Tolerance when comparing accumulated clip lengths.
pub const TIME_EPSILON: f64 = 1e-6;

/// Base timeline of one part, before synthesized frames are layered on.
#[derive(Debug, Clone)]
pub struct SegmentTimeline {
    /// Zero-based position of the part.
    pub index: usize,

    /// Start of the part in global time.
    pub start_secs: f64,

    /// Target length of the part.
    pub duration_secs: f64,

    pub composition: Composition,
}

/// Build the base timeline for `part`. `backdrop` colors the filler clips.
pub fn build_segment(index: usize, part: &ExportPartConfig, backdrop: Rgba) -> SegmentTimeline {
    let duration = part.duration_secs.max(0.0);
    let mut composition = Composition::new();

    if part.background_video_clips.is_empty() {
        composition.append_clip(MediaClip::color(backdrop, duration));
    } else {
        let mut covered = 0.0;
        if part.delay_secs > 0.0 {
            composition.append_clip(MediaClip::color(backdrop, part.delay_secs));
            covered += part.delay_secs;
        }
        for clip in &part.background_video_clips {
            covered += clip.duration_secs();
            composition.append_clip(clip.clone());
        }
        if covered + TIME_EPSILON < duration {
            composition.append_clip(MediaClip::color(backdrop, duration - covered));
        }
    }

    for track in &part.background_audio_tracks {
        composition.add_audio_track(track.rebased(part.start_secs));
    }

    tracing::debug!(
        index,
        start_secs = part.start_secs,
        duration_secs = duration,
        clips = composition.clips.len(),
        audio_tracks = composition.audio_tracks.len(),
        "Built segment timeline"
    );

    SegmentTimeline {
        index,
        start_secs: part.start_secs,
        duration_secs: duration,
        composition,
    }
}
