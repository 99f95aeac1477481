//! FFmpeg render backend.
//!
//! A composition becomes a single `ffmpeg` invocation:
//! - base clips are normalized to the output size and joined with `concat`
//! - the first overlay layer made only of equally sized surfaces is streamed
//!   as raw RGBA frames over stdin
//! - every other overlay is written out as a PNG (or used as-is when it is
//!   already an image file) and composited with `overlay`
//! - background audio tracks are delayed or trimmed, scaled, and mixed
//!   under the clips' own audio
//!
//! Progress is read from `-progress pipe:1`; cancellation kills the child.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::Instant;

use vexport_common::error::{ExportError, ExportResult};
use vexport_model::{
    BackgroundAudioTrack, Composition, EncodingProfile, FrameSize, MediaClip, OverlayLayer,
    OverlaySource, RasterSurface, Rect, VideoCodec,
};

use super::{MediaEngine, RenderOutcome, RenderTarget, TranscodeFailure};
use crate::cancel::CancelFlag;
use crate::timeline::TIME_EPSILON;

const AUDIO_FORMAT: &str = "aformat=sample_fmts=fltp:channel_layouts=stereo";

/// Renders compositions with an external `ffmpeg` binary.
#[derive(Debug, Clone)]
pub struct FfmpegBackend {
    binary: PathBuf,
}

impl Default for FfmpegBackend {
    fn default() -> Self {
        Self {
            binary: PathBuf::from("ffmpeg"),
        }
    }
}

impl FfmpegBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific ffmpeg executable instead of the one on `PATH`.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run_ffmpeg(
        &self,
        plan: &FfmpegPlan<'_>,
        progress: &mut dyn FnMut(f64),
        cancel: &CancelFlag,
    ) -> ExportResult<RenderOutcome> {
        tracing::debug!(args = ?plan.args, "Running ffmpeg");
        let mut cmd = Command::new(&self.binary);
        cmd.args(&plan.args)
            .stdin(if plan.frames.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let started = Instant::now();
        let mut child = cmd
            .spawn()
            .map_err(|e| ExportError::render(format!("Failed to start ffmpeg: {e}")))?;

        tracing::info!(
            pid = child.id(),
            args_len = plan.args.len(),
            streamed_frames = plan.frames.as_ref().map_or(0, |f| f.slots.len()),
            expected_duration_secs = plan.expected_duration_secs,
            "ffmpeg process started"
        );

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ExportError::render("Failed to capture ffmpeg stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| ExportError::render("Failed to capture ffmpeg stderr"))?;
        let stdin = child.stdin.take();

        // ffmpeg blocks once the stderr pipe fills up.
        let stderr_task = std::thread::spawn(move || -> String {
            let mut reader = BufReader::new(stderr);
            let mut output = String::new();
            match reader.read_to_string(&mut output) {
                Ok(_) => output,
                Err(err) => format!("<failed to read ffmpeg stderr: {err}>"),
            }
        });

        let (read_result, write_result) = std::thread::scope(|scope| {
            let writer = match (stdin, plan.frames.as_ref()) {
                (Some(stdin), Some(frames)) => {
                    Some(scope.spawn(move || write_frames(stdin, frames, cancel)))
                }
                _ => None,
            };
            let read_result = read_progress(
                &mut child,
                stdout,
                plan.expected_duration_secs,
                &mut *progress,
                cancel,
            );
            if !matches!(read_result, Ok(false)) {
                // Unblock the writer before joining it.
                let _ = child.kill();
            }
            let write_result = writer.map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(io::Error::other("frame writer panicked")))
            });
            (read_result, write_result)
        });

        let status = child
            .wait()
            .map_err(|e| ExportError::render(format!("Failed to wait on ffmpeg: {e}")))?;

        let stderr_output = stderr_task
            .join()
            .unwrap_or_else(|_| "<failed to join stderr reader>".to_string());

        if read_result? {
            tracing::info!(
                elapsed_secs = started.elapsed().as_secs_f64(),
                "ffmpeg render canceled"
            );
            return Ok(RenderOutcome::canceled());
        }

        if !status.success() {
            let failure = classify_failure(&stderr_output);
            tracing::warn!(
                status = %status,
                failure = ?failure,
                stderr = stderr_output.trim(),
                "ffmpeg render failed"
            );
            return Ok(RenderOutcome::failed(failure));
        }

        if let Some(Err(err)) = write_result {
            tracing::warn!(error = %err, "Streaming frames to ffmpeg failed");
            return Ok(RenderOutcome::failed(TranscodeFailure::Unknown));
        }

        progress(100.0);
        tracing::info!(
            elapsed_secs = started.elapsed().as_secs_f64(),
            "ffmpeg render finished"
        );
        Ok(RenderOutcome::completed())
    }
}

impl MediaEngine for FfmpegBackend {
    fn render_to_file(
        &mut self,
        composition: &Composition,
        target: &RenderTarget,
        progress: &mut dyn FnMut(f64),
        cancel: &CancelFlag,
    ) -> ExportResult<RenderOutcome> {
        if cancel.is_canceled() {
            return Ok(RenderOutcome::canceled());
        }

        let started = Instant::now();
        let mut stills = StillStore::default();
        let plan = build_plan(composition, target, &mut stills)?;
        tracing::info!(
            plan_ms = started.elapsed().as_millis(),
            clips = composition.clips.len(),
            overlays = composition.overlay_count(),
            audio_tracks = composition.audio_tracks.len(),
            stills = stills.count,
            output = %target.path.display(),
            "ffmpeg plan built"
        );

        let outcome = self.run_ffmpeg(&plan, progress, cancel);
        stills.close();
        outcome
    }

    fn is_available(&self) -> bool {
        command_exists(&self.binary)
    }

    fn name(&self) -> &str {
        "ffmpeg"
    }
}

/// Arguments plus the frames to stream over stdin, if any.
struct FfmpegPlan<'a> {
    args: Vec<String>,
    frames: Option<FrameStream<'a>>,
    expected_duration_secs: f64,
}

/// Raw RGBA frames for the streamed overlay layer. Empty slots are sent
/// as fully transparent frames.
struct FrameStream<'a> {
    size: FrameSize,
    slots: Vec<Option<&'a RasterSurface>>,
}

struct StreamLayout<'a> {
    rate: u32,
    offset_secs: f64,
    position: Rect,
    opacity: f64,
    frames: FrameStream<'a>,
}

/// PNG files for overlays that are not streamed.
#[derive(Default)]
struct StillStore {
    dir: Option<tempfile::TempDir>,
    count: usize,
}

impl StillStore {
    fn store(&mut self, surface: &RasterSurface, name: &str) -> ExportResult<PathBuf> {
        if self.dir.is_none() {
            let dir = tempfile::Builder::new()
                .prefix("vexport-overlays-")
                .tempdir()
                .map_err(|e| {
                    ExportError::scratch(format!("Failed to create overlay directory: {e}"))
                })?;
            self.dir = Some(dir);
        }
        let dir = self
            .dir
            .as_ref()
            .ok_or_else(|| ExportError::scratch("Overlay directory unavailable"))?;
        let path = dir.path().join(name);
        surface
            .save_png(&path)
            .map_err(|e| ExportError::surface(e.to_string()))?;
        self.count += 1;
        Ok(path)
    }

    fn close(self) {
        if let Some(dir) = self.dir {
            let location = dir.path().to_path_buf();
            if let Err(err) = dir.close() {
                tracing::warn!(error = %err, path = %location.display(), "Failed to remove overlay directory");
            }
        }
    }
}

/// Whole frame rate whose frame lasts `frame_secs`, if there is one.
fn frame_rate_for(frame_secs: f64) -> Option<u32> {
    if !frame_secs.is_finite() || frame_secs <= TIME_EPSILON {
        return None;
    }
    let exact = 1.0 / frame_secs;
    let rate = exact.round();
    if rate < 1.0 || (exact - rate).abs() > TIME_EPSILON {
        return None;
    }
    Some(rate as u32)
}

/// The streamed layer: non-empty, surfaces only, one frame size and
/// placement, and one frame duration that maps to a whole frame rate.
fn stream_layout(layer: &OverlayLayer) -> Option<StreamLayout<'_>> {
    let first = layer.overlays.first()?;
    let OverlaySource::Surface(first_surface) = &first.source else {
        return None;
    };
    let size = first_surface.size();
    let rate = frame_rate_for(first.duration_secs)?;
    let offset_secs = layer
        .overlays
        .iter()
        .map(|o| o.delay_secs)
        .fold(f64::INFINITY, f64::min)
        .max(0.0);

    let mut slots: Vec<Option<&RasterSurface>> = Vec::with_capacity(layer.len());
    for overlay in &layer.overlays {
        let OverlaySource::Surface(surface) = &overlay.source else {
            return None;
        };
        if surface.size() != size
            || overlay.position != first.position
            || (overlay.opacity - first.opacity).abs() > f64::EPSILON
            || (overlay.duration_secs - first.duration_secs).abs() > TIME_EPSILON
        {
            return None;
        }
        let index = ((overlay.delay_secs - offset_secs).max(0.0) * rate as f64).round() as usize;
        if slots.len() <= index {
            slots.resize(index + 1, None);
        }
        slots[index] = Some(surface);
    }

    Some(StreamLayout {
        rate,
        offset_secs,
        position: first.position,
        opacity: first.opacity,
        frames: FrameStream { size, slots },
    })
}

fn build_plan<'a>(
    composition: &'a Composition,
    target: &RenderTarget,
    stills: &mut StillStore,
) -> ExportResult<FfmpegPlan<'a>> {
    if composition.clips.is_empty() {
        return Err(ExportError::render("Composition has no clips"));
    }
    let profile = &target.profile;
    let size = profile.frame_size();
    if !size.is_valid() {
        return Err(ExportError::render(format!(
            "Profile is not bound to a frame size ({}x{})",
            size.width, size.height
        )));
    }
    let duration = composition.duration_secs();
    let fps = profile.fps.max(1);
    let sample_rate = profile.audio_sample_rate;

    let mut args = vec![
        "-y".to_string(),
        "-hide_banner".to_string(),
        "-loglevel".to_string(),
        "error".to_string(),
        "-nostats".to_string(),
        "-progress".to_string(),
        "pipe:1".to_string(),
    ];
    let mut graph: Vec<String> = Vec::new();
    let mut next_input = 0usize;

    let mut concat_inputs = String::new();
    for (k, clip) in composition.clips.iter().enumerate() {
        match clip {
            MediaClip::Color {
                color,
                duration_secs,
            } => {
                graph.push(format!(
                    "color=c={}:s={}x{}:r={fps}:d={duration_secs:.6},format=yuv420p,setsar=1[v{k}]",
                    color.to_hex(),
                    size.width,
                    size.height,
                ));
                graph.push(silence(k, *duration_secs, sample_rate));
            }
            MediaClip::Video {
                path,
                duration_secs,
                trim_start_secs,
                has_audio,
            } => {
                let input = next_input;
                next_input += 1;
                args.push("-i".to_string());
                args.push(path.display().to_string());

                let trim = trim_start_secs.max(0.0);
                graph.push(format!(
                    "[{input}:v]trim=start={trim:.6}:duration={duration_secs:.6},setpts=PTS-STARTPTS,scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,setsar=1,fps={fps},format=yuv420p[v{k}]",
                    w = size.width,
                    h = size.height,
                ));
                if *has_audio {
                    graph.push(format!(
                        "[{input}:a]atrim=start={trim:.6},asetpts=PTS-STARTPTS,aresample={sample_rate},{AUDIO_FORMAT},apad,atrim=duration={duration_secs:.6}[a{k}]"
                    ));
                } else {
                    graph.push(silence(k, *duration_secs, sample_rate));
                }
            }
        }
        concat_inputs.push_str(&format!("[v{k}][a{k}]"));
    }
    graph.push(format!(
        "{concat_inputs}concat=n={}:v=1:a=1[base][basea]",
        composition.clips.len()
    ));

    let mut current = "base".to_string();
    let mut overlay_no = 0usize;
    let mut frames = None;
    for (layer_index, layer) in composition.overlay_layers.iter().enumerate() {
        if frames.is_none() {
            if let Some(layout) = stream_layout(layer) {
                let input = next_input;
                next_input += 1;
                args.extend([
                    "-f".to_string(),
                    "rawvideo".to_string(),
                    "-pix_fmt".to_string(),
                    "rgba".to_string(),
                    "-s".to_string(),
                    format!("{}x{}", layout.frames.size.width, layout.frames.size.height),
                    "-r".to_string(),
                    layout.rate.to_string(),
                    "-i".to_string(),
                    "pipe:0".to_string(),
                ]);
                let label = format!("ov{overlay_no}");
                graph.push(format!(
                    "[{input}:v]{},setpts=PTS-STARTPTS+{:.6}/TB[{label}]",
                    overlay_prep(&layout.position, layout.opacity),
                    layout.offset_secs,
                ));
                graph.push(overlay_onto(
                    &mut current,
                    &label,
                    &layout.position,
                    &mut overlay_no,
                ));
                frames = Some(layout.frames);
                continue;
            }
        }

        for (index, overlay) in layer.overlays.iter().enumerate() {
            let delay = overlay.delay_secs.max(0.0);
            let visible = if overlay.duration_secs > TIME_EPSILON {
                overlay.duration_secs
            } else {
                duration - delay
            };
            if visible <= TIME_EPSILON || delay >= duration {
                tracing::debug!(layer_index, index, delay, "Skipping overlay outside the timeline");
                continue;
            }
            let path = match &overlay.source {
                OverlaySource::Image(path) => path.clone(),
                OverlaySource::Surface(surface) => {
                    stills.store(surface, &format!("overlay_{layer_index}_{index}.png"))?
                }
            };

            let input = next_input;
            next_input += 1;
            args.extend([
                "-loop".to_string(),
                "1".to_string(),
                "-t".to_string(),
                format!("{visible:.6}"),
                "-i".to_string(),
                path.display().to_string(),
            ]);
            let label = format!("ov{overlay_no}");
            graph.push(format!(
                "[{input}:v]{},setpts=PTS-STARTPTS+{delay:.6}/TB[{label}]",
                overlay_prep(&overlay.position, overlay.opacity),
            ));
            graph.push(overlay_onto(
                &mut current,
                &label,
                &overlay.position,
                &mut overlay_no,
            ));
        }
    }
    graph.push(format!("[{current}]format=yuv420p[vout]"));

    let mut mix_inputs = vec!["[basea]".to_string()];
    for (k, track) in composition.audio_tracks.iter().enumerate() {
        let label = format!("bg{k}");
        let Some(filter) = audio_track_filter(track, next_input, &label, sample_rate) else {
            tracing::debug!(path = %track.path.display(), "Skipping audio track with nothing audible");
            continue;
        };
        next_input += 1;
        args.push("-i".to_string());
        args.push(track.path.display().to_string());
        graph.push(filter);
        mix_inputs.push(format!("[{label}]"));
    }
    if mix_inputs.len() == 1 {
        graph.push("[basea]anull[aout]".to_string());
    } else {
        graph.push(format!(
            "{}amix=inputs={}:duration=first:dropout_transition=0:normalize=0[aout]",
            mix_inputs.concat(),
            mix_inputs.len()
        ));
    }

    args.push("-filter_complex".to_string());
    args.push(graph.join(";"));
    args.push("-map".to_string());
    args.push("[vout]".to_string());
    args.push("-map".to_string());
    args.push("[aout]".to_string());
    args.push("-r".to_string());
    args.push(fps.to_string());
    args.push("-t".to_string());
    args.push(format!("{duration:.6}"));

    let mut codec_args = codec_args_for_profile(profile);
    args.append(&mut codec_args);

    args.push(target.path.display().to_string());

    Ok(FfmpegPlan {
        args,
        frames,
        expected_duration_secs: duration,
    })
}

fn silence(k: usize, duration_secs: f64, sample_rate: u32) -> String {
    format!(
        "anullsrc=r={sample_rate}:cl=stereo,atrim=duration={duration_secs:.6},{AUDIO_FORMAT}[a{k}]"
    )
}

fn overlay_prep(position: &Rect, opacity: f64) -> String {
    let mut prep = format!(
        "format=rgba,scale={}:{}",
        position.width.round().max(1.0) as u32,
        position.height.round().max(1.0) as u32,
    );
    if opacity < 1.0 {
        prep.push_str(&format!(",colorchannelmixer=aa={opacity:.4}"));
    }
    prep
}

fn overlay_onto(current: &mut String, label: &str, position: &Rect, overlay_no: &mut usize) -> String {
    let out = format!("vo{}", *overlay_no);
    let filter = format!(
        "[{current}][{label}]overlay=x={}:y={}:eof_action=pass[{out}]",
        position.x.round() as i64,
        position.y.round() as i64,
    );
    *current = out;
    *overlay_no += 1;
    filter
}

/// Positive delays shift the track right; negative delays skip its head.
fn audio_track_filter(
    track: &BackgroundAudioTrack,
    input: usize,
    label: &str,
    sample_rate: u32,
) -> Option<String> {
    let skip = (-track.delay_secs).max(0.0);
    let delay_ms = (track.delay_secs.max(0.0) * 1000.0).round() as u64;
    let start = track.trim_start_secs.max(0.0) + skip;

    let mut trim = format!("atrim=start={start:.6}");
    if let Some(duration) = track.duration_secs {
        let remaining = duration - skip;
        if remaining <= TIME_EPSILON {
            return None;
        }
        trim.push_str(&format!(":duration={remaining:.6}"));
    }

    Some(format!(
        "[{input}:a]{trim},asetpts=PTS-STARTPTS,aresample={sample_rate},{AUDIO_FORMAT},adelay={delay_ms}:all=1,volume={:.4}[{label}]",
        track.volume.max(0.0)
    ))
}

fn codec_args_for_profile(profile: &EncodingProfile) -> Vec<String> {
    let video_bitrate = format!("{}k", profile.video_bitrate_kbps);
    let audio_bitrate = format!("{}k", profile.audio_bitrate_kbps);

    let mut args = match profile.video_codec {
        VideoCodec::H264 => vec![
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
        ],
        VideoCodec::H265 => vec![
            "-c:v".to_string(),
            "libx265".to_string(),
            "-preset".to_string(),
            "medium".to_string(),
            "-tag:v".to_string(),
            "hvc1".to_string(),
        ],
    };
    args.extend([
        "-pix_fmt".to_string(),
        "yuv420p".to_string(),
        "-b:v".to_string(),
        video_bitrate,
        "-c:a".to_string(),
        "aac".to_string(),
        "-b:a".to_string(),
        audio_bitrate,
        "-ar".to_string(),
        profile.audio_sample_rate.to_string(),
        "-movflags".to_string(),
        "+faststart".to_string(),
    ]);
    args
}

fn command_exists(binary: &Path) -> bool {
    Command::new("sh")
        .arg("-c")
        .arg(r#"command -v "$1" >/dev/null 2>&1"#)
        .arg("sh")
        .arg(binary)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|status| status.success())
        .unwrap_or(false)
}

fn write_frames(
    mut stdin: ChildStdin,
    frames: &FrameStream<'_>,
    cancel: &CancelFlag,
) -> io::Result<u64> {
    let mut buffer = vec![0u8; frames.size.rgba_len()];
    let blank = vec![0u8; frames.size.rgba_len()];
    let mut written = 0u64;
    for slot in &frames.slots {
        if cancel.is_canceled() {
            break;
        }
        match slot {
            Some(surface) => {
                surface.write_rgba8(&mut buffer).map_err(io::Error::other)?;
                stdin.write_all(&buffer)?;
            }
            None => stdin.write_all(&blank)?,
        }
        written += 1;
    }
    stdin.flush()?;
    Ok(written)
}

/// Forward progress until ffmpeg closes stdout. Returns `true` when the
/// render was canceled.
fn read_progress(
    child: &mut Child,
    stdout: ChildStdout,
    expected_duration_secs: f64,
    progress: &mut dyn FnMut(f64),
    cancel: &CancelFlag,
) -> ExportResult<bool> {
    let mut reader = BufReader::new(stdout);
    let mut line = String::new();
    let mut state = ProgressState::default();
    let mut last_progress_secs = 0.0f64;
    let mut last_progress_wall = Instant::now();

    loop {
        if cancel.is_canceled() {
            if let Err(err) = child.kill() {
                tracing::debug!(error = %err, "ffmpeg already exited when canceling");
            }
            return Ok(true);
        }

        line.clear();
        let bytes = reader
            .read_line(&mut line)
            .map_err(|e| ExportError::render(format!("Failed reading ffmpeg progress: {e}")))?;
        if bytes == 0 {
            break;
        }

        let Some((key, value)) = line.trim().split_once('=') else {
            continue;
        };
        state.update(key, value);
        if key != "progress" {
            continue;
        }

        if state.out_time_secs > last_progress_secs + 0.001 {
            last_progress_secs = state.out_time_secs;
            last_progress_wall = Instant::now();
        }
        progress(state.percent(expected_duration_secs));
        if last_progress_wall.elapsed().as_secs() >= 10 {
            tracing::warn!(
                out_time_secs = state.out_time_secs,
                "No ffmpeg progress advancement for 10s"
            );
            last_progress_wall = Instant::now();
        }
    }

    Ok(cancel.is_canceled())
}

fn classify_failure(stderr: &str) -> TranscodeFailure {
    let lower = stderr.to_ascii_lowercase();
    if lower.contains("unknown encoder") || lower.contains("encoder not found") {
        TranscodeFailure::CodecNotFound
    } else if lower.contains("invalid frame size")
        || lower.contains("not divisible by 2")
        || lower.contains("error setting profile")
        || lower.contains("invalid pixel format")
    {
        TranscodeFailure::InvalidProfile
    } else {
        TranscodeFailure::Unknown
    }
}

#[derive(Debug, Default)]
struct ProgressState {
    out_time_secs: f64,
    complete: bool,
}

impl ProgressState {
    fn update(&mut self, key: &str, value: &str) {
        match key {
            // ffmpeg reports microseconds under both keys.
            "out_time_ms" | "out_time_us" => {
                if let Ok(us) = value.parse::<f64>() {
                    self.out_time_secs = us / 1_000_000.0;
                }
            }
            "progress" => {
                self.complete = value == "end";
            }
            _ => {}
        }
    }

    fn percent(&self, expected_duration_secs: f64) -> f64 {
        if self.complete {
            return 100.0;
        }
        if expected_duration_secs <= 0.0 {
            return 0.0;
        }
        (self.out_time_secs / expected_duration_secs * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vexport_model::{Overlay, Rgba};

    fn target() -> RenderTarget {
        RenderTarget {
            path: PathBuf::from("/tmp/out/part_0.mp4"),
            profile: EncodingProfile::default()
                .with_frame_size(FrameSize::new(64, 36))
                .unwrap(),
        }
    }

    fn surface_layer(frames: usize, rate: u32) -> OverlayLayer {
        let size = FrameSize::new(64, 36);
        let mut layer = OverlayLayer::new();
        for i in 0..frames {
            let surface = RasterSurface::new(size).unwrap();
            layer.push(Overlay::new(
                OverlaySource::Surface(surface),
                Rect::from_size(size),
                i as f64 / rate as f64,
                1.0 / rate as f64,
            ));
        }
        layer
    }

    fn graph(plan: &FfmpegPlan<'_>) -> String {
        let at = plan.args.iter().position(|a| a == "-filter_complex").unwrap();
        plan.args[at + 1].clone()
    }

    #[test]
    fn test_color_clips_are_concatenated() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.5));
        composition.append_clip(MediaClip::color(Rgba::BLACK, 0.5));
        let mut stills = StillStore::default();

        let plan = build_plan(&composition, &target(), &mut stills).unwrap();
        let graph = graph(&plan);

        assert!(graph.contains("color=c=0xFFFFFF:s=64x36:r=30:d=1.500000"));
        assert!(graph.contains("color=c=0x000000:s=64x36:r=30:d=0.500000"));
        assert!(graph.contains("[v0][a0][v1][a1]concat=n=2:v=1:a=1[base][basea]"));
        assert!(graph.contains("[basea]anull[aout]"));
        assert!(plan.frames.is_none());
        assert_eq!(plan.args[0], "-y");
        assert_eq!(plan.args.last().unwrap(), "/tmp/out/part_0.mp4");
        assert!((plan.expected_duration_secs - 2.0).abs() < 1e-9);
        assert_eq!(stills.count, 0);
    }

    #[test]
    fn test_video_clip_uses_its_audio_when_present() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::video("/media/intro.mp4", 3.0, true));
        composition.append_clip(MediaClip::video("/media/silent.mp4", 2.0, false));
        let plan = build_plan(&composition, &target(), &mut StillStore::default()).unwrap();
        let graph = graph(&plan);

        assert!(graph.contains("[0:v]trim=start=0.000000:duration=3.000000"));
        assert!(graph.contains("[0:a]atrim=start=0.000000"));
        assert!(graph.contains("[1:v]trim=start=0.000000:duration=2.000000"));
        assert!(!graph.contains("[1:a]"));
        assert!(graph.contains("anullsrc=r=48000:cl=stereo,atrim=duration=2.000000"));
    }

    #[test]
    fn test_surface_layer_is_streamed() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 2.0));
        composition.add_overlay_layer(surface_layer(20, 10));

        let plan = build_plan(&composition, &target(), &mut StillStore::default()).unwrap();
        let frames = plan.frames.as_ref().unwrap();
        assert_eq!(frames.slots.len(), 20);
        assert!(frames.slots.iter().all(Option::is_some));

        let joined = plan.args.join(" ");
        assert!(joined.contains("-f rawvideo -pix_fmt rgba -s 64x36 -r 10 -i pipe:0"));
        let graph = graph(&plan);
        assert!(graph.contains("[0:v]format=rgba,scale=64:36,setpts=PTS-STARTPTS+0.000000/TB[ov0]"));
        assert!(graph.contains("[base][ov0]overlay=x=0:y=0:eof_action=pass[vo0]"));
        assert!(graph.contains("[vo0]format=yuv420p[vout]"));
    }

    #[test]
    fn test_stream_gaps_become_empty_slots() {
        let size = FrameSize::new(8, 8);
        let mut layer = OverlayLayer::new();
        for delay in [0.0, 0.3] {
            layer.push(Overlay::new(
                OverlaySource::Surface(RasterSurface::new(size).unwrap()),
                Rect::from_size(size),
                delay,
                0.1,
            ));
        }
        let layout = stream_layout(&layer).unwrap();
        assert_eq!(layout.rate, 10);
        assert_eq!(layout.frames.slots.len(), 4);
        assert!(layout.frames.slots[1].is_none());
        assert!(layout.frames.slots[3].is_some());
    }

    #[test]
    fn test_mixed_layer_is_not_streamed() {
        let mut layer = surface_layer(2, 10);
        layer.push(Overlay::new(
            OverlaySource::Image(PathBuf::from("/logo.png")),
            Rect::new(0.0, 0.0, 10.0, 10.0),
            0.0,
            1.0,
        ));
        assert!(stream_layout(&layer).is_none());
        assert!(stream_layout(&OverlayLayer::new()).is_none());
    }

    #[test]
    fn test_surface_watermark_spans_whole_output() {
        use crate::assemble::build_final_composition;
        use crate::segment::SegmentArtifact;

        let artifacts: Vec<SegmentArtifact> = (0..2)
            .map(|index| SegmentArtifact {
                index,
                path: PathBuf::from(format!("/scratch/part_{index}.mp4")),
                duration_secs: 2.0,
            })
            .collect();
        let mark = FrameSize::new(16, 9);
        let mut watermark = OverlayLayer::new();
        watermark.push(
            Overlay::new(
                OverlaySource::Surface(RasterSurface::new(mark).unwrap()),
                Rect::new(40.0, 4.0, 16.0, 9.0),
                0.0,
                0.0,
            )
            .with_opacity(0.6),
        );
        let composition = build_final_composition(&artifacts, Vec::new(), Some(watermark));
        let mut stills = StillStore::default();

        let plan = build_plan(&composition, &target(), &mut stills).unwrap();
        assert!(plan.frames.is_none());
        assert_eq!(stills.count, 1);
        let joined = plan.args.join(" ");
        assert!(!joined.contains("pipe:0"));
        assert!(joined.contains("-loop 1 -t 4.000000 -i "));
        assert!(graph(&plan).contains("overlay=x=40:y=4:eof_action=pass"));
        stills.close();
    }

    #[test]
    fn test_frame_rate_must_be_whole() {
        assert_eq!(frame_rate_for(0.1), Some(10));
        assert_eq!(frame_rate_for(1.0 / 30.0), Some(30));
        assert_eq!(frame_rate_for(1.0), Some(1));
        assert_eq!(frame_rate_for(4.0), None);
        assert_eq!(frame_rate_for(0.3), None);
        assert_eq!(frame_rate_for(0.0), None);
        assert_eq!(frame_rate_for(f64::NAN), None);
    }

    #[test]
    fn test_uneven_surface_layer_is_written_as_stills() {
        let size = FrameSize::new(8, 8);
        let mut uneven = OverlayLayer::new();
        for (delay, duration) in [(0.0, 0.1), (0.1, 0.2)] {
            uneven.push(Overlay::new(
                OverlaySource::Surface(RasterSurface::new(size).unwrap()),
                Rect::from_size(size),
                delay,
                duration,
            ));
        }
        assert!(stream_layout(&uneven).is_none());

        let mut moved = surface_layer(2, 10);
        moved.overlays[1].position = Rect::new(4.0, 0.0, 64.0, 36.0);
        assert!(stream_layout(&moved).is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_binary_path_with_quote_is_found() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("it's-ffmpeg");
        std::fs::write(&binary, "#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        assert!(command_exists(&binary));
        assert!(!command_exists(&dir.path().join("it's-missing")));
    }

    #[test]
    fn test_image_overlay_spans_remainder_when_unbounded() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 4.0));
        let mut watermark = OverlayLayer::new();
        watermark.push(
            Overlay::new(
                OverlaySource::Image(PathBuf::from("/brand/logo.png")),
                Rect::new(10.4, 5.6, 32.0, 16.0),
                1.0,
                0.0,
            )
            .with_opacity(0.5),
        );
        composition.add_overlay_layer(watermark);

        let plan = build_plan(&composition, &target(), &mut StillStore::default()).unwrap();
        let joined = plan.args.join(" ");
        assert!(joined.contains("-loop 1 -t 3.000000 -i /brand/logo.png"));
        let graph = graph(&plan);
        assert!(graph.contains("format=rgba,scale=32:16,colorchannelmixer=aa=0.5000,setpts=PTS-STARTPTS+1.000000/TB[ov0]"));
        assert!(graph.contains("overlay=x=10:y=6:eof_action=pass"));
    }

    #[test]
    fn test_second_surface_layer_is_written_as_stills() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.0));
        composition.add_overlay_layer(surface_layer(10, 10));
        composition.add_overlay_layer(surface_layer(2, 10));
        let mut stills = StillStore::default();

        let plan = build_plan(&composition, &target(), &mut stills).unwrap();
        assert_eq!(stills.count, 2);
        assert_eq!(plan.frames.as_ref().unwrap().slots.len(), 10);
        let png_inputs = plan.args.iter().filter(|a| a.ends_with(".png")).count();
        assert_eq!(png_inputs, 2);
        stills.close();
    }

    #[test]
    fn test_audio_tracks_are_delayed_trimmed_and_mixed() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 10.0));
        let mut late = BackgroundAudioTrack::new("/audio/late.wav", 2.5);
        late.volume = 0.8;
        composition.add_audio_track(late);
        composition.add_audio_track(BackgroundAudioTrack::new("/audio/early.wav", -4.0));

        let plan = build_plan(&composition, &target(), &mut StillStore::default()).unwrap();
        let graph = graph(&plan);
        assert!(graph.contains("[0:a]atrim=start=0.000000,"));
        assert!(graph.contains("adelay=2500:all=1,volume=0.8000[bg0]"));
        assert!(graph.contains("[1:a]atrim=start=4.000000,"));
        assert!(graph.contains("adelay=0:all=1,volume=1.0000[bg1]"));
        assert!(graph.contains("[basea][bg0][bg1]amix=inputs=3:duration=first:dropout_transition=0:normalize=0[aout]"));
    }

    #[test]
    fn test_fully_skipped_audio_track_is_dropped() {
        let mut track = BackgroundAudioTrack::new("/audio/short.wav", -5.0);
        track.duration_secs = Some(3.0);
        assert!(audio_track_filter(&track, 0, "bg0", 48_000).is_none());

        track.duration_secs = Some(8.0);
        let filter = audio_track_filter(&track, 0, "bg0", 48_000).unwrap();
        assert!(filter.contains("atrim=start=5.000000:duration=3.000000"));
    }

    #[test]
    fn test_empty_composition_is_rejected() {
        let composition = Composition::new();
        assert!(build_plan(&composition, &target(), &mut StillStore::default()).is_err());
    }

    #[test]
    fn test_unbound_profile_is_rejected() {
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.0));
        let target = RenderTarget {
            path: PathBuf::from("/tmp/x.mp4"),
            profile: EncodingProfile::default(),
        };
        assert!(build_plan(&composition, &target, &mut StillStore::default()).is_err());
    }

    #[test]
    fn test_codec_args() {
        let mut profile = EncodingProfile::default();
        let args = codec_args_for_profile(&profile);
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"8000k".to_string()));
        assert!(args.contains(&"48000".to_string()));

        profile.video_codec = VideoCodec::H265;
        let args = codec_args_for_profile(&profile);
        assert!(args.contains(&"libx265".to_string()));
        assert!(args.contains(&"hvc1".to_string()));
    }

    #[test]
    fn test_progress_state_parsing() {
        let mut state = ProgressState::default();
        state.update("out_time_us", "1500000");
        state.update("progress", "continue");
        assert!((state.percent(3.0) - 50.0).abs() < 1e-9);

        state.update("out_time_ms", "6000000");
        assert!((state.percent(3.0) - 100.0).abs() < 1e-9);

        state.update("out_time_us", "N/A");
        assert!((state.out_time_secs - 6.0).abs() < 1e-9);
        assert_eq!(ProgressState::default().percent(0.0), 0.0);

        state.update("progress", "end");
        assert_eq!(state.percent(100.0), 100.0);
    }

    #[test]
    fn test_classify_failure() {
        assert_eq!(
            classify_failure("Unknown encoder 'libx265'"),
            TranscodeFailure::CodecNotFound
        );
        assert_eq!(
            classify_failure("[libx264] width not divisible by 2 (63x36)"),
            TranscodeFailure::InvalidProfile
        );
        assert_eq!(
            classify_failure("/media/a.mp4: No such file or directory"),
            TranscodeFailure::Unknown
        );
    }

    #[test]
    fn test_missing_binary_is_unavailable() {
        let backend = FfmpegBackend::with_binary("/nonexistent/vexport-ffmpeg");
        assert!(!backend.is_available());
        assert_eq!(backend.name(), "ffmpeg");
    }

    #[test]
    fn test_canceled_before_start_spawns_nothing() {
        let mut backend = FfmpegBackend::with_binary("/nonexistent/vexport-ffmpeg");
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.0));
        let outcome = backend
            .render_to_file(&composition, &target(), &mut |_| {}, &cancel)
            .unwrap();
        assert_eq!(outcome, RenderOutcome::canceled());
    }

    #[test]
    fn test_spawn_failure_is_an_error() {
        let mut backend = FfmpegBackend::with_binary("/nonexistent/vexport-ffmpeg");
        let mut composition = Composition::new();
        composition.append_clip(MediaClip::color(Rgba::WHITE, 1.0));
        let result =
            backend.render_to_file(&composition, &target(), &mut |_| {}, &CancelFlag::new());
        assert!(result.is_err());
    }
}
