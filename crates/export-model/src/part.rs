//! Per-segment export configuration.

use serde::{Deserialize, Serialize};

use crate::media::{BackgroundAudioTrack, MediaClip};

/// One logical part of an export, rendered to its own intermediate file
/// and concatenated with the others afterwards.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExportPartConfig {
    /// Offset of this part in the global timeline.
    pub start_secs: f64,

    /// Blank padding before the background clips begin.
    #[serde(default)]
    pub delay_secs: f64,

    /// Target length of the rendered part.
    pub duration_secs: f64,

    /// Audio mixed into this part only. Delays are in global time.
    #[serde(default)]
    pub background_audio_tracks: Vec<BackgroundAudioTrack>,

    /// Pre-built clips forming the base video. Empty means the part is
    /// entirely synthesized over a blank backdrop.
    #[serde(default)]
    pub background_video_clips: Vec<MediaClip>,
}

impl ExportPartConfig {
    /// A part with no background media.
    pub fn new(start_secs: f64, duration_secs: f64) -> Self {
        Self {
            start_secs,
            duration_secs: duration_secs.max(0.0),
            ..Self::default()
        }
    }

    pub fn with_delay(mut self, delay_secs: f64) -> Self {
        self.delay_secs = delay_secs;
        self
    }

    pub fn with_audio(mut self, track: BackgroundAudioTrack) -> Self {
        self.background_audio_tracks.push(track);
        self
    }

    pub fn with_clip(mut self, clip: MediaClip) -> Self {
        self.background_video_clips.push(clip);
        self
    }

    /// End of this part in the global timeline.
    pub fn end_secs(&self) -> f64 {
        self.start_secs + self.duration_secs
    }
}
