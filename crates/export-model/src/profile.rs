//! Encoding profiles.

use serde::{Deserialize, Serialize};

use crate::geometry::FrameSize;
use crate::ModelError;

/// Output container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Container {
    #[default]
    Mp4,
}

impl Container {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            Container::Mp4 => "mp4",
        }
    }
}

/// Video codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VideoCodec {
    #[default]
    H264,
    H265,
}

/// Encoder settings for one export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodingProfile {
    pub container: Container,

    pub video_codec: VideoCodec,

    /// Output frame size. Zero until bound to an export via
    /// [`EncodingProfile::with_frame_size`].
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,

    /// Output frame rate.
    pub fps: u32,

    /// Video bitrate in kbps.
    pub video_bitrate_kbps: u32,

    /// Audio bitrate in kbps.
    pub audio_bitrate_kbps: u32,

    /// Audio sample rate in Hz.
    pub audio_sample_rate: u32,
}

impl Default for EncodingProfile {
    fn default() -> Self {
        Self {
            container: Container::Mp4,
            video_codec: VideoCodec::H264,
            width: 0,
            height: 0,
            fps: 30,
            video_bitrate_kbps: 8000,
            audio_bitrate_kbps: 192,
            audio_sample_rate: 48_000,
        }
    }
}

impl EncodingProfile {
    /// Check the codec-independent settings of the base profile.
    pub fn validate(&self) -> Result<(), ModelError> {
        let invalid = |message: &str| {
            Err(ModelError::ValidationError {
                message: message.to_string(),
            })
        };
        if self.fps == 0 {
            return invalid("profile fps must be non-zero");
        }
        if self.video_bitrate_kbps == 0 || self.audio_bitrate_kbps == 0 {
            return invalid("profile bitrates must be non-zero");
        }
        if self.audio_sample_rate == 0 {
            return invalid("profile audio sample rate must be non-zero");
        }
        Ok(())
    }

    /// Copy of this profile bound to a concrete output size.
    pub fn with_frame_size(&self, size: FrameSize) -> Result<Self, ModelError> {
        if !size.is_valid() {
            return Err(ModelError::InvalidSize {
                width: size.width,
                height: size.height,
            });
        }
        Ok(Self {
            width: size.width,
            height: size.height,
            ..self.clone()
        })
    }

    pub fn frame_size(&self) -> FrameSize {
        FrameSize::new(self.width, self.height)
    }

    pub fn file_extension(&self) -> &'static str {
        self.container.extension()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = EncodingProfile::default();
        assert!(profile.validate().is_ok());
        assert_eq!(profile.fps, 30);
        assert_eq!(profile.file_extension(), "mp4");
    }

    #[test]
    fn test_zero_fps_is_invalid() {
        let profile = EncodingProfile {
            fps: 0,
            ..EncodingProfile::default()
        };
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_with_frame_size() {
        let bound = EncodingProfile::default()
            .with_frame_size(FrameSize::new(640, 360))
            .unwrap();
        assert_eq!(bound.frame_size(), FrameSize::new(640, 360));
        assert!(EncodingProfile::default()
            .with_frame_size(FrameSize::new(640, 0))
            .is_err());
    }

    #[test]
    fn test_codec_serde_names() {
        assert_eq!(serde_json::to_string(&VideoCodec::H265).unwrap(), "\"h265\"");
        assert_eq!(serde_json::to_string(&Container::Mp4).unwrap(), "\"mp4\"");
    }
}
