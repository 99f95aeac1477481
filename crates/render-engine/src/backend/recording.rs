//! Encoder-free engine that records what it was asked to render.
//!
//! Each render writes a small JSON summary to the target path instead of a
//! video, so the pipeline's file handling can be exercised on machines
//! without ffmpeg.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use vexport_common::error::{ExportError, ExportResult};
use vexport_model::{BackgroundAudioTrack, Composition, MediaClip, OverlaySource, Rect};

use super::{MediaEngine, RenderOutcome, RenderTarget};
use crate::cancel::CancelFlag;

/// Summary of one overlay as seen by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverlayRecord {
    pub layer: usize,
    pub surface: bool,
    pub position: Rect,
    pub delay_secs: f64,
    pub duration_secs: f64,
}

/// Summary of one render call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRecord {
    pub output: PathBuf,
    pub width: u32,
    pub height: u32,
    pub duration_secs: f64,
    pub clips: Vec<MediaClip>,
    pub overlays: Vec<OverlayRecord>,
    pub audio_tracks: Vec<BackgroundAudioTrack>,
}

impl RenderRecord {
    fn capture(composition: &Composition, target: &RenderTarget) -> Self {
        let overlays = composition
            .overlay_layers
            .iter()
            .enumerate()
            .flat_map(|(layer, l)| {
                l.overlays.iter().map(move |o| OverlayRecord {
                    layer,
                    surface: matches!(o.source, OverlaySource::Surface(_)),
                    position: o.position,
                    delay_secs: o.delay_secs,
                    duration_secs: o.duration_secs,
                })
            })
            .collect();
        Self {
            output: target.path.clone(),
            width: target.profile.width,
            height: target.profile.height,
            duration_secs: composition.duration_secs(),
            clips: composition.clips.clone(),
            overlays,
            audio_tracks: composition.audio_tracks.clone(),
        }
    }

    /// Overlays on the given layer.
    pub fn layer(&self, layer: usize) -> impl Iterator<Item = &OverlayRecord> {
        self.overlays.iter().filter(move |o| o.layer == layer)
    }

    pub fn layer_count(&self) -> usize {
        self.overlays.iter().map(|o| o.layer + 1).max().unwrap_or(0)
    }
}

/// Shared handle to the renders an engine has recorded.
#[derive(Debug, Clone, Default)]
pub struct RenderLog {
    records: Arc<Mutex<Vec<RenderRecord>>>,
}

impl RenderLog {
    pub fn records(&self) -> Vec<RenderRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&self, record: RenderRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}

/// Scripted behavior for a single render call.
#[derive(Debug, Clone)]
enum Script {
    Outcome(RenderOutcome),
    Error(String),
    CancelMidway,
}

/// A [`MediaEngine`] that never encodes anything.
#[derive(Debug, Clone)]
pub struct RecordingEngine {
    log: RenderLog,
    progress_steps: u32,
    scripts: HashMap<usize, Script>,
    renders: usize,
    available: bool,
}

impl Default for RecordingEngine {
    fn default() -> Self {
        Self {
            log: RenderLog::default(),
            progress_steps: 4,
            scripts: HashMap::new(),
            renders: 0,
            available: true,
        }
    }
}

impl RecordingEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle that stays valid after the engine is moved into a task.
    pub fn log(&self) -> RenderLog {
        self.log.clone()
    }

    /// Number of progress reports per render (at least one).
    pub fn with_progress_steps(mut self, steps: u32) -> Self {
        self.progress_steps = steps.max(1);
        self
    }

    /// Report `outcome` for the render with the given zero-based index.
    /// A non-successful outcome still leaves a partial file behind.
    pub fn with_outcome(mut self, render: usize, outcome: RenderOutcome) -> Self {
        self.scripts.insert(render, Script::Outcome(outcome));
        self
    }

    /// Fail the given render with an error instead of an outcome.
    pub fn with_error(mut self, render: usize, message: impl Into<String>) -> Self {
        self.scripts.insert(render, Script::Error(message.into()));
        self
    }

    /// Raise the cancel flag halfway through the given render.
    pub fn cancel_during(mut self, render: usize) -> Self {
        self.scripts.insert(render, Script::CancelMidway);
        self
    }

    pub fn unavailable(mut self) -> Self {
        self.available = false;
        self
    }

    fn write_summary(record: &RenderRecord) -> ExportResult<()> {
        let json = serde_json::to_vec_pretty(record)?;
        std::fs::write(&record.output, json)?;
        Ok(())
    }
}

impl MediaEngine for RecordingEngine {
    fn render_to_file(
        &mut self,
        composition: &Composition,
        target: &RenderTarget,
        progress: &mut dyn FnMut(f64),
        cancel: &CancelFlag,
    ) -> ExportResult<RenderOutcome> {
        let index = self.renders;
        self.renders += 1;
        let script = self.scripts.get(&index).cloned();

        let record = RenderRecord::capture(composition, target);
        self.log.push(record.clone());
        tracing::debug!(
            render = index,
            output = %target.path.display(),
            clips = record.clips.len(),
            overlays = record.overlays.len(),
            "Recording render"
        );

        let steps = self.progress_steps;
        for step in 1..=steps {
            if cancel.is_canceled() {
                return Ok(RenderOutcome::canceled());
            }
            if matches!(script, Some(Script::CancelMidway)) && step > steps / 2 {
                cancel.cancel();
                return Ok(RenderOutcome::canceled());
            }
            progress(step as f64 * 100.0 / steps as f64);
        }

        match script {
            Some(Script::Error(message)) => Err(ExportError::render(message)),
            Some(Script::Outcome(outcome)) => {
                Self::write_summary(&record)?;
                Ok(outcome)
            }
            _ => {
                Self::write_summary(&record)?;
                Ok(RenderOutcome::completed())
            }
        }
    }

    fn is_available(&self) -> bool {
        self.available
    }

    fn name(&self) -> &str {
        "recording"
    }
}
