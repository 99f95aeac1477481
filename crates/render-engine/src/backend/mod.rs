//! Media engine seam.
//!
//! The pipeline never talks to an encoder directly. It hands a
//! [`Composition`] to a [`MediaEngine`], which renders it to a file while
//! reporting progress in `[0, 100]` and watching a [`CancelFlag`].

use std::path::PathBuf;

use vexport_common::error::ExportResult;
use vexport_model::{Composition, EncodingProfile};

use crate::cancel::CancelFlag;

pub mod ffmpeg;
pub mod recording;

pub use ffmpeg::FfmpegBackend;
pub use recording::{OverlayRecord, RecordingEngine, RenderLog, RenderRecord};

/// Where and how a composition is rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderTarget {
    /// Output file; replaced if it already exists.
    pub path: PathBuf,

    /// Profile bound to the output frame size.
    pub profile: EncodingProfile,
}

/// Completion status of a render operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum RenderStatus {
    Completed,
    Canceled,
    Error,
}

/// Failure reason reported by the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum TranscodeFailure {
    None,
    Unknown,
    InvalidProfile,
    CodecNotFound,
}

/// Result of one render, as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct RenderOutcome {
    pub status: RenderStatus,
    pub failure: TranscodeFailure,
}

impl RenderOutcome {
    pub fn completed() -> Self {
        Self {
            status: RenderStatus::Completed,
            failure: TranscodeFailure::None,
        }
    }

    pub fn canceled() -> Self {
        Self {
            status: RenderStatus::Canceled,
            failure: TranscodeFailure::None,
        }
    }

    pub fn failed(failure: TranscodeFailure) -> Self {
        Self {
            status: RenderStatus::Error,
            failure,
        }
    }

    /// Success requires normal completion and no failure reason.
    pub fn is_success(&self) -> bool {
        self.status == RenderStatus::Completed && self.failure == TranscodeFailure::None
    }
}

/// Trait for render engines (ffmpeg, in-memory recorders, ...).
pub trait MediaEngine: Send {
    /// Render `composition` to `target.path`.
    ///
    /// `progress` receives values in `[0, 100]`. Engines poll `cancel`
    /// and stop as soon as practical, returning a canceled outcome.
    /// `Err` is reserved for failures outside the encoder itself
    /// (spawning, I/O, invalid compositions).
    fn render_to_file(
        &mut self,
        composition: &Composition,
        target: &RenderTarget,
        progress: &mut dyn FnMut(f64),
        cancel: &CancelFlag,
    ) -> ExportResult<RenderOutcome>;

    /// Check if this engine is usable on the system.
    fn is_available(&self) -> bool;

    /// Engine name.
    fn name(&self) -> &str;
}
