use anyhow::{Context, Result};
use clap::Parser;

use relume::field::{ContrastConfig, TargetPreset};
use relume::{
    BackendDispatcher, BackendPreference, BufferSlot, ContrastSession, Frame, FrameSink,
    FrameSource,
};

/// Recolor low-contrast text in an image to meet a WCAG contrast target.
/// Backend is selected automatically: GPU compute, multicore CPU, or the
/// single-threaded reference path.
#[derive(Parser, Debug)]
#[command(name = "relume")]
#[command(about = "Lift low-contrast text in an image to a WCAG contrast target")]
struct Args {
    /// Input image path (PNG, JPEG, anything the image crate decodes)
    input: Option<String>,

    /// Output image path
    #[arg(short, long, default_value = "relumed.png",
          help = "Where to write the adjusted image")]
    output: String,

    /// WCAG contrast target preset
    #[arg(short, long, value_enum, default_value = "aa",
          help = "Contrast target: aa (4.5:1), aa-large (3:1), aaa (7:1)")]
    target: TargetPreset,

    /// Explicit contrast ratio, overriding the preset
    #[arg(long, help = "Explicit target ratio in [1, 21], overrides --target")]
    ratio: Option<f32>,

    /// Glyph-extraction distance cutoff in pixels
    #[arg(long, default_value_t = 3.0)]
    max_distance: f32,

    /// Background sampling distance in pixels
    #[arg(long, default_value_t = 2.5)]
    sample_distance: f32,

    /// Run the distance-field sweep twice for smoother fields
    #[arg(long)]
    relax: bool,

    /// Backend selection
    #[arg(short, long, value_enum, default_value = "auto",
          help = "Backend: auto, accelerated, native, reference")]
    backend: BackendPreference,

    /// Process the image this many times (for benchmarking)
    #[arg(long, default_value_t = 1,
          help = "Repeat the frame N times through the pipeline")]
    frames: u32,

    /// Write per-call metrics as JSON to this path
    #[arg(long)]
    metrics_json: Option<String>,

    /// Print backend availability and exit
    #[arg(long)]
    probe: bool,
}

/// Feeds the same decoded image through the pipeline N times.
struct RepeatSource {
    frame: Frame,
    remaining: u32,
}

impl FrameSource for RepeatSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        Ok(Some(self.frame.clone()))
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.frame.width, self.frame.height)
    }
}

/// Keeps the last adjusted frame and a running total.
#[derive(Default)]
struct LastFrameSink {
    last: Vec<u8>,
    width: u32,
    height: u32,
    adjusted: u64,
}

impl FrameSink for LastFrameSink {
    fn consume(&mut self, slot: &BufferSlot) -> Result<()> {
        self.last.clear();
        self.last.extend_from_slice(&slot.buffers.output);
        if let Some(run) = slot.last_run {
            self.adjusted = run.adjusted_pixels;
        }
        Ok(())
    }
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.probe {
        let mut dispatcher = BackendDispatcher::new();
        dispatcher.initialize(args.backend);
        print!("{}", dispatcher.describe());
        return Ok(());
    }

    let input = args
        .input
        .as_deref()
        .context("no input image given (try --probe to just list backends)")?;

    let config = ContrastConfig {
        max_distance: args.max_distance,
        target_contrast: args.ratio.unwrap_or_else(|| args.target.ratio()),
        sample_distance: args.sample_distance,
        use_relaxation: args.relax,
    };
    config.validate()?;

    let decoded = image::open(input)
        .with_context(|| format!("failed to open '{input}'"))?
        .to_rgba8();
    let (width, height) = decoded.dimensions();
    println!("{input}: {width}x{height}, target {:.1}:1", config.target_contrast);

    let mut dispatcher = BackendDispatcher::new();
    let active = dispatcher.initialize(args.backend);
    println!("backend: {}", active.label());

    let frame = Frame {
        data: decoded.into_raw(),
        width,
        height,
    };
    // The sink records the adjusted frame; height/width travel with the sink
    // so resize-mid-stream output would still be written correctly.
    let mut sink = LastFrameSink {
        width,
        height,
        ..Default::default()
    };

    let mut session = ContrastSession::new(dispatcher, config, width, height)?;
    let report = session.run(
        Box::new(RepeatSource {
            frame,
            remaining: args.frames.max(1),
        }),
        &mut sink,
    )?;

    let out = image::RgbaImage::from_raw(sink.width, sink.height, sink.last)
        .context("adjusted frame has unexpected size")?;
    out.save(&args.output)
        .with_context(|| format!("failed to write '{}'", args.output))?;
    println!(
        "{} frame(s) processed, {} dropped, {} pixels adjusted -> {}",
        report.frames_out, report.dropped_frames, sink.adjusted, args.output
    );

    let dispatcher = session.into_dispatcher();
    println!();
    print!("{}", dispatcher.metrics().report());

    if let Some(path) = args.metrics_json {
        let json = serde_json::to_string_pretty(&dispatcher.metrics().to_json())?;
        std::fs::write(&path, json).with_context(|| format!("failed to write '{path}'"))?;
        println!("metrics written to {path}");
    }
    Ok(())
}
