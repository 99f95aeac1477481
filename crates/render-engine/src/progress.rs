//! Export progress and lifecycle events.

use tokio::sync::mpsc::{self, error::TryRecvError, UnboundedReceiver, UnboundedSender};

/// Stages of the export process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportStage {
    /// Drawing frames for a part.
    Synthesizing,
    /// Encoding a part to its intermediate file.
    Encoding,
    /// Rendering the final concatenated output.
    Assembling,
    Complete,
}

/// Export progress report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportProgress {
    /// Overall progress in `[0, 100]`.
    pub percent: u8,

    /// Current stage.
    pub stage: ExportStage,
}

/// Notifications delivered to the host, in order, on a single channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportEvent {
    Progress(ExportProgress),
    Completed,
    Failed,
    Canceled,
}

impl ExportEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExportEvent::Progress(_))
    }

    pub fn percent(&self) -> Option<u8> {
        match self {
            ExportEvent::Progress(p) => Some(p.percent),
            _ => None,
        }
    }
}

/// Share of overall progress covered by frame synthesis.
pub const SYNTHESIS_SHARE: f64 = 50.0;

/// Progress after `elapsed_secs` of synthesized content out of `total_secs`.
pub fn synthesis_percent(elapsed_secs: f64, total_secs: f64) -> u8 {
    if total_secs <= 0.0 || !elapsed_secs.is_finite() {
        return 0;
    }
    let fraction = (elapsed_secs / total_secs).clamp(0.0, 1.0);
    (fraction * SYNTHESIS_SHARE).floor() as u8
}

/// Progress while the final render reports `render_percent` in `[0, 100]`.
pub fn assembly_percent(render_percent: f64) -> u8 {
    let render = if render_percent.is_finite() {
        render_percent.clamp(0.0, 100.0)
    } else {
        0.0
    };
    (SYNTHESIS_SHARE + render * (100.0 - SYNTHESIS_SHARE) / 100.0).floor() as u8
}

/// Receiving end of a task's event channel.
#[derive(Debug)]
pub struct ExportEvents {
    rx: UnboundedReceiver<ExportEvent>,
}

impl ExportEvents {
    /// Next event, or `None` once the task is gone and the queue drained.
    pub async fn recv(&mut self) -> Option<ExportEvent> {
        self.rx.recv().await
    }

    /// Blocking variant of [`ExportEvents::recv`]. Must not be called from
    /// inside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<ExportEvent> {
        self.rx.blocking_recv()
    }

    /// Next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<ExportEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Block until a terminal event arrives (or the channel closes) and
    /// return every event seen, terminal one included.
    pub fn wait_terminal(&mut self) -> Vec<ExportEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.blocking_recv() {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    /// Async variant of [`ExportEvents::wait_terminal`].
    pub async fn collect_terminal(&mut self) -> Vec<ExportEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.recv().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }
}

/// Sending side. Keeps progress strictly increasing and stops forwarding
/// anything once a terminal event went out.
#[derive(Debug)]
pub(crate) struct EventSink {
    tx: UnboundedSender<ExportEvent>,
    last_percent: Option<u8>,
    closed: bool,
}

pub(crate) fn channel() -> (EventSink, ExportEvents) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSink {
            tx,
            last_percent: None,
            closed: false,
        },
        ExportEvents { rx },
    )
}

impl EventSink {
    /// Returns `true` if the report was forwarded.
    pub(crate) fn progress(&mut self, percent: u8, stage: ExportStage) -> bool {
        let percent = percent.min(100);
        if self.closed || self.last_percent.is_some_and(|last| percent <= last) {
            return false;
        }
        self.last_percent = Some(percent);
        // A dropped receiver only means nobody is listening.
        let _ = self
            .tx
            .send(ExportEvent::Progress(ExportProgress { percent, stage }));
        true
    }

    pub(crate) fn terminal(&mut self, event: ExportEvent) -> bool {
        if self.closed || !event.is_terminal() {
            return false;
        }
        self.closed = true;
        let _ = self.tx.send(event);
        true
    }

    pub(crate) fn last_percent(&self) -> u8 {
        self.last_percent.unwrap_or(0)
    }
}
