//! Export task lifecycle.
//!
//! ```text
//! Created --start--> Running --+--> Succeeded
//!    |                  |      +--> Failed
//!    +------cancel------+------+--> Canceled
//! ```
//!
//! Validation runs synchronously inside [`ExportTask::start`]; the pipeline
//! itself runs on a dedicated worker thread. Every terminal transition
//! removes the scratch directory and emits exactly one terminal event.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use vexport_common::config::ScratchConfig;
use vexport_common::error::{ExportError, ExportResult};
use vexport_model::{EncodingProfile, ExportCapabilities, Rgba};

use crate::assemble::{assemble, build_final_composition};
use crate::backend::MediaEngine;
use crate::cancel::CancelFlag;
use crate::progress::{self, synthesis_percent, EventSink, ExportEvent, ExportEvents, ExportStage};
use crate::scratch::ScratchDir;
use crate::segment::encode_segment;
use crate::synth::{progress_total_secs, FrameSynthesizer};
use crate::timeline::build_segment;

/// Lifecycle state of an [`ExportTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Created,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskState::Succeeded | TaskState::Failed | TaskState::Canceled
        )
    }
}

/// Settings for one export.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExportOptions {
    /// Base profile; the output frame size is taken from the host.
    pub profile: EncodingProfile,

    /// Where intermediate part files live.
    pub scratch: ScratchConfig,

    /// Color of blank filler clips.
    pub backdrop: Rgba,
}

/// A single export run, from validation to the final output file.
pub struct ExportTask {
    shared: Arc<Shared>,
    launch: Mutex<Option<Launch>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Launch {
    capabilities: Arc<dyn ExportCapabilities>,
    engine: Box<dyn MediaEngine>,
}

struct Shared {
    destination: PathBuf,
    file_name: String,
    options: ExportOptions,
    state: Mutex<TaskState>,
    cancel: CancelFlag,
    events: Mutex<EventSink>,
    scratch: Mutex<ScratchDir>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ExportTask {
    /// Create a task and the channel its events arrive on. Nothing runs
    /// until [`ExportTask::start`].
    pub fn new(
        capabilities: Arc<dyn ExportCapabilities>,
        engine: Box<dyn MediaEngine>,
        destination: impl Into<PathBuf>,
        file_name: impl Into<String>,
        options: ExportOptions,
    ) -> (Self, ExportEvents) {
        let (sink, events) = progress::channel();
        let shared = Arc::new(Shared {
            destination: destination.into(),
            file_name: file_name.into(),
            scratch: Mutex::new(ScratchDir::new(&options.scratch)),
            options,
            state: Mutex::new(TaskState::Created),
            cancel: CancelFlag::new(),
            events: Mutex::new(sink),
        });

        let weak: Weak<Shared> = Arc::downgrade(&shared);
        shared.cancel.on_cancel(move || {
            if let Some(shared) = weak.upgrade() {
                shared.cancel_if_idle();
            }
        });

        let task = Self {
            shared,
            launch: Mutex::new(Some(Launch {
                capabilities,
                engine,
            })),
            worker: Mutex::new(None),
        };
        (task, events)
    }

    /// Validate inputs and launch the worker.
    ///
    /// Only the first call on a created task does anything; a task that was
    /// canceled before starting never runs.
    pub fn start(&self) {
        {
            let mut state = lock(&self.shared.state);
            let current = *state;
            if current != TaskState::Created {
                tracing::debug!(state = ?current, "Ignoring start on a task that is not fresh");
                return;
            }
            *state = TaskState::Running;
        }

        let Some(launch) = lock(&self.launch).take() else {
            self.shared.terminate(TaskState::Failed);
            return;
        };

        let profile = match validate(&self.shared, &launch) {
            Ok(profile) => profile,
            Err(err) => {
                tracing::error!(error = %err, "Export rejected");
                self.shared.terminate(TaskState::Failed);
                return;
            }
        };

        tracing::info!(
            output = %self.shared.output_path().display(),
            parts = launch.capabilities.export_part_configs().len(),
            width = profile.width,
            height = profile.height,
            engine = launch.engine.name(),
            "Starting export"
        );

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("vexport-worker".to_string())
            .spawn(move || run_worker(shared, launch, profile));
        match spawned {
            Ok(handle) => *lock(&self.worker) = Some(handle),
            Err(err) => {
                tracing::error!(error = %err, "Failed to spawn export worker");
                self.shared.terminate(TaskState::Failed);
            }
        }
    }

    /// Request cancellation. Idempotent and safe from any thread.
    pub fn cancel(&self) {
        if self.shared.cancel.cancel() {
            tracing::info!(file_name = %self.shared.file_name, "Export cancellation requested");
        }
    }

    pub fn state(&self) -> TaskState {
        *lock(&self.shared.state)
    }

    /// Last progress percentage delivered to the host.
    pub fn progress(&self) -> u8 {
        lock(&self.shared.events).last_percent()
    }

    pub fn is_canceled(&self) -> bool {
        self.shared.cancel.is_canceled()
    }

    /// Flag that cancels this task when raised, for code that cannot hold
    /// the task itself.
    pub fn cancel_handle(&self) -> CancelFlag {
        self.shared.cancel.clone()
    }

    pub fn destination(&self) -> &Path {
        &self.shared.destination
    }

    pub fn file_name(&self) -> &str {
        &self.shared.file_name
    }

    /// `<destination>/<file_name>.<ext>`.
    pub fn output_path(&self) -> PathBuf {
        self.shared.output_path()
    }

    /// Scratch directory location, once one was created.
    pub fn scratch_dir(&self) -> Option<PathBuf> {
        lock(&self.shared.scratch).location().map(Path::to_path_buf)
    }

    /// Wait for the worker thread, if one was started.
    pub fn join(&self) {
        let handle = lock(&self.worker).take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::error!("Export worker thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for ExportTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportTask")
            .field("output", &self.shared.output_path())
            .field("state", &self.state())
            .field("canceled", &self.is_canceled())
            .finish()
    }
}

impl Shared {
    fn output_path(&self) -> PathBuf {
        self.destination.join(format!(
            "{}.{}",
            self.file_name,
            self.options.profile.file_extension()
        ))
    }

    /// Move to a terminal state. Only the first call wins; it removes the
    /// scratch directory and then emits the terminal event.
    fn terminate(&self, outcome: TaskState) -> bool {
        {
            let mut state = lock(&self.state);
            if state.is_terminal() {
                return false;
            }
            *state = outcome;
        }

        lock(&self.scratch).cleanup();

        let event = match outcome {
            TaskState::Succeeded => ExportEvent::Completed,
            TaskState::Canceled => ExportEvent::Canceled,
            _ => ExportEvent::Failed,
        };
        lock(&self.events).terminal(event);
        tracing::info!(state = ?outcome, output = %self.output_path().display(), "Export finished");
        true
    }

    /// Cancellation of a task that never started terminates it on the spot.
    /// A running task is stopped by its worker instead.
    fn cancel_if_idle(&self) {
        {
            let mut state = lock(&self.state);
            if *state != TaskState::Created {
                return;
            }
            *state = TaskState::Canceled;
        }
        lock(&self.scratch).cleanup();
        lock(&self.events).terminal(ExportEvent::Canceled);
    }

    fn report(&self, percent: u8, stage: ExportStage) {
        if self.cancel.is_canceled() {
            return;
        }
        lock(&self.events).progress(percent, stage);
    }
}

fn validate(shared: &Shared, launch: &Launch) -> ExportResult<EncodingProfile> {
    let capabilities = &launch.capabilities;
    if capabilities.export_part_configs().is_empty() {
        return Err(ExportError::validation("No export parts were provided"));
    }
    if !shared.destination.is_dir() {
        return Err(ExportError::validation(format!(
            "Destination {} is not a directory",
            shared.destination.display()
        )));
    }
    if shared.file_name.trim().is_empty() {
        return Err(ExportError::validation("File name is empty"));
    }
    let size = capabilities.export_size();
    if !size.is_valid() {
        return Err(ExportError::validation(format!(
            "Export size {}x{} is not positive",
            size.width, size.height
        )));
    }
    if capabilities.frame_rate() == 0 {
        return Err(ExportError::validation("Frame rate must be positive"));
    }
    let area = capabilities.export_area();
    if !area.has_area() {
        return Err(ExportError::validation(format!(
            "Export area {}x{} is not positive",
            area.width, area.height
        )));
    }
    for (index, part) in capabilities.export_part_configs().iter().enumerate() {
        if !(part.start_secs.is_finite() && part.duration_secs.is_finite()) {
            return Err(ExportError::validation(format!(
                "Part {index} has a non-finite time range"
            )));
        }
    }
    if !launch.engine.is_available() {
        return Err(ExportError::validation(format!(
            "Media engine '{}' is not available",
            launch.engine.name()
        )));
    }

    let profile = &shared.options.profile;
    profile
        .validate()
        .map_err(|e| ExportError::validation(e.to_string()))?;
    profile
        .with_frame_size(size)
        .map_err(|e| ExportError::validation(e.to_string()))
}

fn run_worker(shared: Arc<Shared>, mut launch: Launch, profile: EncodingProfile) {
    let started = std::time::Instant::now();
    let result = catch_unwind(AssertUnwindSafe(|| {
        run_pipeline(
            &shared,
            launch.capabilities.as_ref(),
            launch.engine.as_mut(),
            &profile,
        )
    }));

    let outcome = match result {
        Ok(Ok(())) if !shared.cancel.is_canceled() => TaskState::Succeeded,
        Ok(Ok(())) => TaskState::Canceled,
        Ok(Err(err)) if err.is_canceled() || shared.cancel.is_canceled() => TaskState::Canceled,
        Ok(Err(err)) => {
            tracing::error!(error = %err, "Export failed");
            TaskState::Failed
        }
        Err(_) => {
            tracing::error!("Export pipeline panicked");
            TaskState::Failed
        }
    };
    tracing::debug!(
        elapsed_secs = started.elapsed().as_secs_f64(),
        state = ?outcome,
        "Export worker finished"
    );
    shared.terminate(outcome);
}

fn run_pipeline(
    shared: &Shared,
    capabilities: &dyn ExportCapabilities,
    engine: &mut dyn MediaEngine,
    profile: &EncodingProfile,
) -> ExportResult<()> {
    let parts = capabilities.export_part_configs();
    let total_secs = progress_total_secs(capabilities);
    let synthesizer = FrameSynthesizer::new(capabilities, total_secs);

    let mut artifacts = Vec::with_capacity(parts.len());
    let mut elapsed_secs = 0.0;
    for (index, part) in parts.iter().enumerate() {
        shared.cancel.check()?;

        let mut segment = build_segment(index, part, shared.options.backdrop);
        let frames = synthesizer.synthesize(
            capabilities,
            part,
            elapsed_secs,
            &shared.cancel,
            &mut |p| shared.report(p, ExportStage::Synthesizing),
        )?;
        segment.composition.add_overlay_layer(frames);
        elapsed_secs += part.duration_secs.max(0.0);

        let scratch_dir = lock(&shared.scratch).path()?;
        shared.report(
            synthesis_percent(elapsed_secs, total_secs),
            ExportStage::Encoding,
        );
        artifacts.push(encode_segment(
            segment,
            &scratch_dir,
            engine,
            profile,
            &shared.cancel,
        )?);
    }

    let composition = build_final_composition(
        &artifacts,
        capabilities.global_background_audio_tracks(),
        capabilities.create_watermark_layer(),
    );
    assemble(
        &composition,
        &shared.output_path(),
        engine,
        profile,
        &shared.cancel,
        &mut |p| shared.report(p, ExportStage::Assembling),
    )?;

    shared.cancel.check()?;
    shared.report(100, ExportStage::Complete);
    Ok(())
}
