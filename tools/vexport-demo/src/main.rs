//! vexport demo: export a synthetic animated composition.
//!
//! Usage:
//!   vexport-demo --output <DIR> --name <FILE> [--parts N] [--part-secs S]
//!                [--fps F] [--width W] [--height H] [--watermark] [-v]

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use vexport_common::config::AppConfig;
use vexport_common::logging::init_logging;
use vexport_model::{
    ExportCapabilities, ExportPartConfig, FrameSize, Overlay, OverlayLayer, OverlaySource,
    RasterSurface, Rect, Rgba,
};
use vexport_render_engine::{ExportEvent, ExportOptions, ExportTask, FfmpegBackend, MediaEngine};

/// Logical width of the demo scene; output pixels are derived from it.
const SCENE_WIDTH: f64 = 1920.0;
const BOX_SIZE: f64 = 240.0;

#[derive(Parser)]
#[command(
    name = "vexport-demo",
    about = "Export a synthetic animated composition through ffmpeg",
    version,
    author
)]
struct Cli {
    /// Destination directory
    #[arg(short, long, default_value = ".")]
    output: PathBuf,

    /// Output file name, without extension
    #[arg(short, long, default_value = "vexport-demo")]
    name: String,

    /// Number of parts
    #[arg(long, default_value = "2")]
    parts: usize,

    /// Length of each part in seconds
    #[arg(long, default_value = "2.0")]
    part_secs: f64,

    /// Synthesis frame rate
    #[arg(long, default_value = "30")]
    fps: u32,

    /// Output width
    #[arg(long, default_value = "1280")]
    width: u32,

    /// Output height
    #[arg(long, default_value = "720")]
    height: u32,

    /// Add a translucent watermark over the whole output
    #[arg(long)]
    watermark: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// A box sweeping across the scene, changing color at every part.
struct DemoScene {
    fps: u32,
    size: FrameSize,
    parts: Vec<ExportPartConfig>,
    watermark: bool,
}

impl DemoScene {
    fn scene_height(&self) -> f64 {
        SCENE_WIDTH * self.size.height as f64 / self.size.width.max(1) as f64
    }

    fn total_secs(&self) -> f64 {
        self.parts.iter().map(|p| p.duration_secs).sum()
    }
}

impl ExportCapabilities for DemoScene {
    fn frame_rate(&self) -> u32 {
        self.fps
    }

    fn duration_secs(&self) -> f64 {
        self.total_secs()
    }

    fn export_area(&self) -> Rect {
        Rect::new(0.0, 0.0, SCENE_WIDTH, self.scene_height())
    }

    fn export_size(&self) -> FrameSize {
        self.size
    }

    fn export_part_configs(&self) -> &[ExportPartConfig] {
        &self.parts
    }

    fn create_watermark_layer(&self) -> Option<OverlayLayer> {
        if !self.watermark {
            return None;
        }
        let mark_size = FrameSize::new(self.size.width / 8, self.size.height / 8);
        let mut surface = match RasterSurface::solid(mark_size, Rgba::new(20, 20, 20, 255)) {
            Ok(surface) => surface,
            Err(err) => {
                tracing::warn!(error = %err, "Skipping watermark");
                return None;
            }
        };
        let inset = mark_size.height as f64 / 4.0;
        surface.fill_rect(
            Rect::new(
                inset,
                inset,
                mark_size.width as f64 - 2.0 * inset,
                mark_size.height as f64 - 2.0 * inset,
            ),
            Rgba::WHITE,
        );

        let margin = 16.0;
        let position = Rect::new(
            self.size.width as f64 - mark_size.width as f64 - margin,
            margin,
            mark_size.width as f64,
            mark_size.height as f64,
        );
        let mut layer = OverlayLayer::new();
        layer.push(
            Overlay::new(OverlaySource::Surface(surface), position, 0.0, 0.0).with_opacity(0.6),
        );
        Some(layer)
    }

    fn draw_frame(&self, surface: &mut RasterSurface, timestamp_secs: f64) {
        let total = self.total_secs().max(f64::EPSILON);
        let progress = (timestamp_secs / total).clamp(0.0, 1.0);
        let part = self
            .parts
            .iter()
            .position(|p| timestamp_secs < p.end_secs())
            .unwrap_or(0);
        let palette = [
            Rgba::new(230, 57, 70, 255),
            Rgba::new(29, 53, 87, 255),
            Rgba::new(42, 157, 143, 255),
            Rgba::new(233, 196, 106, 255),
        ];

        let x = progress * (SCENE_WIDTH - BOX_SIZE);
        let y = (self.scene_height() - BOX_SIZE) / 2.0;
        surface.fill_rect(
            Rect::new(x, y, BOX_SIZE, BOX_SIZE),
            palette[part % palette.len()],
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load();
    if cli.verbose {
        config.logging.level = "debug".to_string();
    }
    init_logging(&config.logging);

    let backend = FfmpegBackend::new();
    if !backend.is_available() {
        anyhow::bail!("ffmpeg was not found on PATH");
    }
    std::fs::create_dir_all(&cli.output)?;

    let parts = (0..cli.parts)
        .map(|i| ExportPartConfig::new(i as f64 * cli.part_secs, cli.part_secs))
        .collect();
    let scene = Arc::new(DemoScene {
        fps: cli.fps,
        size: FrameSize::new(cli.width, cli.height),
        parts,
        watermark: cli.watermark,
    });

    let (task, mut events) = ExportTask::new(
        scene,
        Box::new(backend),
        &cli.output,
        cli.name.as_str(),
        ExportOptions {
            scratch: config.scratch.clone(),
            ..ExportOptions::default()
        },
    );

    println!("Exporting demo composition");
    println!("  Output: {}", task.output_path().display());
    println!(
        "  Parts: {} x {:.1}s at {} fps, {}x{}",
        cli.parts, cli.part_secs, cli.fps, cli.width, cli.height
    );

    task.start();
    let terminal = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ExportEvent::Progress(p)) => {
                    print!("\r  Progress: {:>3}% ({:?})        ", p.percent, p.stage);
                    let _ = std::io::stdout().flush();
                }
                other => break other,
            },
            _ = tokio::signal::ctrl_c() => {
                println!("\n  Canceling...");
                task.cancel();
            }
        }
    };
    task.join();

    match terminal {
        Some(ExportEvent::Completed) => {
            println!("\nExport complete: {}", task.output_path().display());
            Ok(())
        }
        Some(ExportEvent::Canceled) => anyhow::bail!("export canceled"),
        _ => anyhow::bail!("export failed; rerun with -v for details"),
    }
}
