//! # Relume: Low-Contrast Text Recoloring Pipeline
//!
//! A per-pixel pipeline that finds text-like shapes in a raster frame via a
//! distance field, measures their WCAG contrast against the local background,
//! and recolors the ones that fall short of a target ratio.
//!
//! ## Architecture
//!
//! The library is organized into a few key modules:
//! - `backend`: interchangeable pipeline implementations (wgpu compute,
//!   rayon multicore, single-threaded reference) behind a dispatcher with
//!   automatic fallback and metrics collection
//! - `pipeline`: the fixed-capacity buffer-slot ring that schedules capture,
//!   compute and output stages across a stream of frames
//! - `session`: orchestration of a frame source and sink over ring and
//!   dispatcher
//! - `metrics`: bounded per-call timing/throughput history
//! - `error`: the error taxonomy the dispatcher's fallback logic keys on
//!
//! The per-pixel math itself (distance transform, WCAG luminance/contrast,
//! glyph classification) lives in the `relume_field` crate, re-exported here
//! as [`field`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use relume::{lift_image, BackendPreference};
//! use relume::field::ContrastConfig;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (width, height) = (640u32, 480u32);
//! let rgba = vec![255u8; (width * height * 4) as usize];
//!
//! let output = lift_image(
//!     &rgba,
//!     width,
//!     height,
//!     &ContrastConfig::default(),
//!     BackendPreference::Auto,
//! )?;
//! println!(
//!     "adjusted {} pixels on {}",
//!     output.run.adjusted_pixels,
//!     output.run.backend.label()
//! );
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod metrics;
pub mod pipeline;
pub mod session;

/// Re-export of the per-pixel kernels crate.
pub use relume_field as field;

pub use backend::dispatcher::FieldInput;
pub use backend::{
    BackendDispatcher, BackendKind, BackendPreference, PipelineRun, TextRegion, WorkBuffers,
};
pub use error::{RelumeError, RelumeResult, Severity};
pub use metrics::{MetricsRing, PipelineMetrics, METRICS_CAPACITY};
pub use pipeline::{BufferSlot, FrameRing, SlotStatus};
pub use session::{ContrastSession, Frame, FrameSink, FrameSource, SessionReport};

/// Result of a one-shot [`lift_image`] call.
#[derive(Debug)]
pub struct LiftOutput {
    /// Adjusted RGBA frame, same shape as the input.
    pub data: Vec<u8>,
    pub run: PipelineRun,
}

/// One-shot convenience: initialize a dispatcher, run the full pipeline once
/// on a single frame, and return the adjusted copy.
///
/// Streams of frames should build a [`ContrastSession`] instead, which reuses
/// buffers and backends across calls.
pub fn lift_image(
    image: &[u8],
    width: u32,
    height: u32,
    config: &field::ContrastConfig,
    preference: BackendPreference,
) -> RelumeResult<LiftOutput> {
    let mut dispatcher = BackendDispatcher::new();
    dispatcher.initialize(preference);
    let mut bufs = WorkBuffers::for_dimensions(width, height);
    let run = dispatcher.run_full_pipeline(image, width, height, config, &mut bufs)?;
    Ok(LiftOutput {
        data: std::mem::take(&mut bufs.output),
        run,
    })
}
