//! Final assembly: concatenate encoded parts, add global audio and the
//! watermark, and render to the destination.

use std::path::Path;

use vexport_common::error::{ExportError, ExportResult};
use vexport_model::{BackgroundAudioTrack, Composition, EncodingProfile, MediaClip, OverlayLayer};

use crate::backend::{MediaEngine, RenderTarget};
use crate::cancel::CancelFlag;
use crate::progress::assembly_percent;
use crate::segment::{remove_partial, SegmentArtifact};
use crate::timeline::TIME_EPSILON;

/// Composition that plays `artifacts` back to back.
///
/// Watermark overlays without a positive duration are stretched to the end
/// of the output.
pub fn build_final_composition(
    artifacts: &[SegmentArtifact],
    global_audio: Vec<BackgroundAudioTrack>,
    watermark: Option<OverlayLayer>,
) -> Composition {
    let mut composition = Composition::new();
    for artifact in artifacts {
        composition.append_clip(MediaClip::video(
            artifact.path.clone(),
            artifact.duration_secs,
            true,
        ));
    }
    for track in global_audio {
        composition.add_audio_track(track);
    }

    if let Some(mut layer) = watermark.filter(|l| !l.is_empty()) {
        let total = composition.duration_secs();
        for overlay in &mut layer.overlays {
            if overlay.duration_secs <= TIME_EPSILON {
                overlay.duration_secs = (total - overlay.delay_secs.max(0.0)).max(0.0);
            }
        }
        composition.add_overlay_layer(layer);
    }
    composition
}

/// Render the final output to `output`.
///
/// `progress` receives overall percentages in `[50, 99]`; the caller owns
/// the final 100. Returns [`ExportError::Canceled`] whenever cancellation
/// was requested, whatever the engine reported.
pub fn assemble(
    composition: &Composition,
    output: &Path,
    engine: &mut dyn MediaEngine,
    profile: &EncodingProfile,
    cancel: &CancelFlag,
    progress: &mut dyn FnMut(u8),
) -> ExportResult<()> {
    cancel.check()?;

    let target = RenderTarget {
        path: output.to_path_buf(),
        profile: profile.clone(),
    };
    tracing::info!(
        output = %output.display(),
        parts = composition.clips.len(),
        duration_secs = composition.duration_secs(),
        audio_tracks = composition.audio_tracks.len(),
        watermark = !composition.overlay_layers.is_empty(),
        engine = engine.name(),
        "Assembling final output"
    );

    let result = engine.render_to_file(
        composition,
        &target,
        &mut |p| progress(assembly_percent(p).min(99)),
        cancel,
    );

    if cancel.is_canceled() {
        remove_partial(output);
        return Err(ExportError::Canceled);
    }
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            remove_partial(output);
            return Err(err);
        }
    };
    if !outcome.is_success() {
        remove_partial(output);
        return Err(ExportError::render(format!(
            "Final render failed: {:?} ({:?})",
            outcome.status, outcome.failure
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingEngine, RenderOutcome, TranscodeFailure};
    use std::path::PathBuf;
    use vexport_model::{FrameSize, Overlay, OverlaySource, Rect};

    fn artifacts() -> Vec<SegmentArtifact> {
        (0..3)
            .map(|index| SegmentArtifact {
                index,
                path: PathBuf::from(format!("/scratch/part_{index}.mp4")),
                duration_secs: 2.0,
            })
            .collect()
    }

    fn profile() -> EncodingProfile {
        EncodingProfile::default()
            .with_frame_size(FrameSize::new(320, 180))
            .unwrap()
    }

    fn watermark(duration_secs: f64) -> OverlayLayer {
        let mut layer = OverlayLayer::new();
        layer.push(Overlay::new(
            OverlaySource::Image(PathBuf::from("/brand/logo.png")),
            Rect::new(8.0, 8.0, 32.0, 32.0),
            1.0,
            duration_secs,
        ));
        layer
    }

    #[test]
    fn test_parts_are_concatenated_in_order() {
        let composition = build_final_composition(
            &artifacts(),
            vec![BackgroundAudioTrack::new("/audio/music.mp3", 0.0)],
            None,
        );
        let paths: Vec<String> = composition
            .clips
            .iter()
            .map(|c| match c {
                MediaClip::Video { path, .. } => path.display().to_string(),
                other => panic!("unexpected clip {other:?}"),
            })
            .collect();
        assert_eq!(
            paths,
            vec![
                "/scratch/part_0.mp4",
                "/scratch/part_1.mp4",
                "/scratch/part_2.mp4"
            ]
        );
        assert_eq!(composition.audio_tracks.len(), 1);
        assert!(composition.overlay_layers.is_empty());
        assert!((composition.duration_secs() - 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_watermark_spans_remaining_output() {
        let composition = build_final_composition(&artifacts(), Vec::new(), Some(watermark(0.0)));
        assert_eq!(composition.overlay_layers.len(), 1);
        let overlay = &composition.overlay_layers[0].overlays[0];
        assert!((overlay.duration_secs - 5.0).abs() < 1e-12);

        let bounded = build_final_composition(&artifacts(), Vec::new(), Some(watermark(2.0)));
        assert!((bounded.overlay_layers[0].overlays[0].duration_secs - 2.0).abs() < 1e-12);

        let empty = build_final_composition(&artifacts(), Vec::new(), Some(OverlayLayer::new()));
        assert!(empty.overlay_layers.is_empty());
    }

    #[test]
    fn test_progress_is_capped_below_completion() {
        let dir = tempfile::tempdir().unwrap();
        let composition = build_final_composition(&artifacts(), Vec::new(), None);
        let mut engine = RecordingEngine::new().with_progress_steps(4);
        let mut seen = Vec::new();

        assemble(
            &composition,
            &dir.path().join("final.mp4"),
            &mut engine,
            &profile(),
            &CancelFlag::new(),
            &mut |p| seen.push(p),
        )
        .unwrap();
        assert_eq!(seen, vec![62, 75, 87, 99]);
        assert!(dir.path().join("final.mp4").exists());
    }

    #[test]
    fn test_failed_render_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let composition = build_final_composition(&artifacts(), Vec::new(), None);
        let mut engine =
            RecordingEngine::new().with_outcome(0, RenderOutcome::failed(TranscodeFailure::Unknown));

        let err = assemble(
            &composition,
            &dir.path().join("final.mp4"),
            &mut engine,
            &profile(),
            &CancelFlag::new(),
            &mut |_| {},
        )
        .unwrap_err();
        assert!(matches!(err, ExportError::Render { .. }));
        assert!(!dir.path().join("final.mp4").exists());
    }

    #[test]
    fn test_cancel_wins_over_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let composition = build_final_composition(&artifacts(), Vec::new(), None);
        let cancel = CancelFlag::new();
        let mut engine = RecordingEngine::new().cancel_during(0);

        let err = assemble(
            &composition,
            &dir.path().join("final.mp4"),
            &mut engine,
            &profile(),
            &cancel,
            &mut |_| {},
        )
        .unwrap_err();
        assert!(err.is_canceled());
    }
}
