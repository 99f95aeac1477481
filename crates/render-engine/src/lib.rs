//! vexport Render Engine
//!
//! Segmented export pipeline: host-drawn frames are layered over each
//! part's base timeline, every part is encoded to its own intermediate file,
//! and the parts are concatenated into the final output together with
//! global audio and an optional watermark.
//!
//! # Pipeline Architecture
//!
//! ```text
//! part config ──┐
//!               ├── Base timeline (filler + background clips + audio)
//! draw_frame ───┘         │
//!                         ├── Synthesized overlay frames
//!                         ▼
//!                  Encode part_<i>.mp4   (scratch directory)
//!                         │
//!        ┌────────────────┘  × N parts
//!        ▼
//!   Concatenate ── global audio ── watermark
//!        │
//!        ▼
//!   <destination>/<name>.mp4
//! ```
//!
//! [`ExportTask`] drives the pipeline on a worker thread and reports
//! [`ExportEvent`]s; the encoder sits behind the [`MediaEngine`] trait.

pub mod assemble;
pub mod backend;
pub mod cancel;
pub mod progress;
mod scratch;
pub mod segment;
pub mod synth;
pub mod task;
pub mod timeline;

pub use backend::{
    FfmpegBackend, MediaEngine, RecordingEngine, RenderLog, RenderOutcome, RenderRecord,
    RenderStatus, RenderTarget, TranscodeFailure,
};
pub use cancel::CancelFlag;
pub use progress::{ExportEvent, ExportEvents, ExportProgress, ExportStage};
pub use task::{ExportOptions, ExportTask, TaskState};
