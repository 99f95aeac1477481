//! Encoding one part to its intermediate file.

use std::path::{Path, PathBuf};

use vexport_common::error::{ExportError, ExportResult};
use vexport_model::EncodingProfile;

use crate::backend::{MediaEngine, RenderTarget};
use crate::cancel::CancelFlag;
use crate::timeline::SegmentTimeline;

/// An encoded part waiting to be concatenated.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentArtifact {
    pub index: usize,
    pub path: PathBuf,
    pub duration_secs: f64,
}

/// `part_<index>.<ext>`.
pub fn segment_file_name(index: usize, profile: &EncodingProfile) -> String {
    format!("part_{index}.{}", profile.file_extension())
}

/// Render `segment` into `scratch_dir`, replacing any earlier file.
///
/// The segment (and every synthesized surface in it) is dropped as soon
/// as the engine returns. Partial output is removed on failure or
/// cancellation.
pub fn encode_segment(
    segment: SegmentTimeline,
    scratch_dir: &Path,
    engine: &mut dyn MediaEngine,
    profile: &EncodingProfile,
    cancel: &CancelFlag,
) -> ExportResult<SegmentArtifact> {
    cancel.check()?;

    let index = segment.index;
    let path = scratch_dir.join(segment_file_name(index, profile));
    let target = RenderTarget {
        path: path.clone(),
        profile: profile.clone(),
    };
    let duration_secs = segment.composition.duration_secs();

    let result = engine.render_to_file(&segment.composition, &target, &mut |_| {}, cancel);
    drop(segment);

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            remove_partial(&path);
            return Err(err);
        }
    };

    if cancel.is_canceled() {
        remove_partial(&path);
        return Err(ExportError::Canceled);
    }
    if !outcome.is_success() {
        remove_partial(&path);
        return Err(ExportError::encode(format!(
            "Part {index} failed to encode: {:?} ({:?})",
            outcome.status, outcome.failure
        )));
    }

    tracing::info!(
        index,
        path = %path.display(),
        duration_secs,
        engine = engine.name(),
        "Encoded part"
    );
    Ok(SegmentArtifact {
        index,
        path,
        duration_secs,
    })
}

pub(crate) fn remove_partial(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => tracing::debug!(path = %path.display(), "Removed partial output"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => {
            tracing::warn!(error = %err, path = %path.display(), "Failed to remove partial output")
        }
    }
}
