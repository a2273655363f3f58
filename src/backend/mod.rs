//! # Compute Backends
//!
//! This module contains the interchangeable implementations of the contrast
//! pipeline and the dispatcher that selects among them at runtime:
//!
//! - `accelerated`: wgpu compute shaders, one submission per frame
//! - `native`: rayon multicore CPU path
//! - `reference`: single-threaded composition of the `relume_field` kernels
//! - `dispatcher`: initialization, per-call fallback, metrics recording
//!
//! Every backend implements the same [`PipelineBackend`] trait and is held by
//! the dispatcher as a variant of [`BackendInstance`], an enum rather than a
//! trait object, so dispatch stays explicit and the set of variants is closed.

pub mod accelerated;
pub mod dispatcher;
pub mod native;
pub mod reference;

pub use dispatcher::BackendDispatcher;

use relume_field::esdt::{Offset2, OffsetField};
use relume_field::glyph::GlyphPixel;
use relume_field::ContrastConfig;

use crate::error::RelumeResult;

/// The implementation strategies a pipeline call can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Hardware-accelerated parallel execution (wgpu compute).
    Accelerated,
    /// Native multicore execution (rayon).
    Native,
    /// Single-threaded reference implementation. Always available.
    Reference,
}

impl BackendKind {
    pub fn label(self) -> &'static str {
        match self {
            BackendKind::Accelerated => "accelerated-wgpu",
            BackendKind::Native => "native-rayon",
            BackendKind::Reference => "reference",
        }
    }
}

/// Which backend the caller wants, resolved against what is available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum BackendPreference {
    /// Best available: accelerated, then native, then reference.
    Auto,
    Accelerated,
    Native,
    Reference,
}

impl BackendPreference {
    /// Backend kinds to attempt, in priority order.
    pub(crate) fn priority(self) -> &'static [BackendKind] {
        match self {
            BackendPreference::Auto | BackendPreference::Accelerated => &[
                BackendKind::Accelerated,
                BackendKind::Native,
                BackendKind::Reference,
            ],
            BackendPreference::Native => &[BackendKind::Native, BackendKind::Reference],
            BackendPreference::Reference => &[BackendKind::Reference],
        }
    }
}

/// A rectangular text region for the sparse pipeline variant.
#[derive(Debug, Clone, Copy)]
pub struct TextRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Summary of one completed pipeline call. The adjusted frame itself lands in
/// the caller's [`WorkBuffers::output`].
#[derive(Debug, Clone, Copy)]
pub struct PipelineRun {
    pub backend: BackendKind,
    pub adjusted_pixels: u64,
}

/// Intermediate adjustment decision for one glyph pixel.
#[derive(Debug, Clone, Copy)]
pub struct PixelAdjust {
    /// Pixel index into the frame (y * width + x).
    pub index: usize,
    /// Replacement RGBA color.
    pub color: [u8; 4],
    /// Contrast ratio measured before adjustment.
    pub ratio: f32,
}

/// The working buffers one pipeline invocation needs, reused across frames.
///
/// A [`crate::pipeline::BufferSlot`] owns one of these per slot; backends fill
/// them instead of allocating. The accelerated backend only touches `output`
/// (its intermediates live on the GPU).
#[derive(Debug, Default)]
pub struct WorkBuffers {
    /// Text-coverage grid, one f32 per pixel.
    pub coverage: Vec<f32>,
    /// Image-space coverage gradient, one [dx, dy] per pixel.
    pub gradient: Vec<[f32; 2]>,
    /// Offset field, one [dx, dy] per pixel.
    pub field: Vec<Offset2>,
    /// Extracted glyph pixels.
    pub glyphs: Vec<GlyphPixel>,
    /// Sampled background color per glyph pixel.
    pub samples: Vec<[u8; 4]>,
    /// Contrast decisions per glyph pixel that changes color.
    pub adjustments: Vec<PixelAdjust>,
    /// Adjusted RGBA frame, same shape as the input.
    pub output: Vec<u8>,
}

impl WorkBuffers {
    pub fn for_dimensions(width: u32, height: u32) -> Self {
        let pixels = width as usize * height as usize;
        Self {
            coverage: vec![0.0; pixels],
            gradient: vec![[0.0, 0.0]; pixels],
            field: vec![[0.0, 0.0]; pixels],
            glyphs: Vec::new(),
            samples: Vec::new(),
            adjustments: Vec::new(),
            output: vec![0; pixels * 4],
        }
    }

    /// Grow the per-pixel buffers for the given frame shape, reporting
    /// allocation failure instead of aborting.
    pub fn prepare(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<(), std::collections::TryReserveError> {
        let pixels = width as usize * height as usize;
        self.coverage
            .try_reserve(pixels.saturating_sub(self.coverage.len()))?;
        self.gradient
            .try_reserve(pixels.saturating_sub(self.gradient.len()))?;
        self.field
            .try_reserve(pixels.saturating_sub(self.field.len()))?;
        self.output
            .try_reserve((pixels * 4).saturating_sub(self.output.len()))?;
        self.coverage.resize(pixels, 0.0);
        self.gradient.resize(pixels, [0.0, 0.0]);
        self.field.resize(pixels, [0.0, 0.0]);
        self.output.resize(pixels * 4, 0);
        self.glyphs.clear();
        self.samples.clear();
        self.adjustments.clear();
        Ok(())
    }
}

/// Uniform interface over the pipeline implementations.
pub(crate) trait PipelineBackend {
    fn kind(&self) -> BackendKind;

    /// Run the full pipeline on one RGBA frame. Writes the adjusted frame
    /// into `bufs.output` and returns the number of pixels changed.
    fn run_full_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<u64>;

    /// Compute just the offset field for a prepared coverage grid.
    fn compute_distance_field(
        &mut self,
        levels: &[f32],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField>;
}

/// Enum-tagged union of the backend variants the dispatcher can hold.
pub(crate) enum BackendInstance {
    Accelerated(accelerated::AcceleratedBackend),
    Native(native::NativeBackend),
    Reference(reference::ReferenceBackend),
    #[cfg(test)]
    Flaky(test_support::FlakyBackend),
}

impl BackendInstance {
    pub(crate) fn kind(&self) -> BackendKind {
        match self {
            BackendInstance::Accelerated(b) => b.kind(),
            BackendInstance::Native(b) => b.kind(),
            BackendInstance::Reference(b) => b.kind(),
            #[cfg(test)]
            BackendInstance::Flaky(b) => b.kind(),
        }
    }

    pub(crate) fn run_full_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<u64> {
        match self {
            BackendInstance::Accelerated(b) => b.run_full_pipeline(image, width, height, config, bufs),
            BackendInstance::Native(b) => b.run_full_pipeline(image, width, height, config, bufs),
            BackendInstance::Reference(b) => b.run_full_pipeline(image, width, height, config, bufs),
            #[cfg(test)]
            BackendInstance::Flaky(b) => b.run_full_pipeline(image, width, height, config, bufs),
        }
    }

    pub(crate) fn compute_distance_field(
        &mut self,
        levels: &[f32],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        match self {
            BackendInstance::Accelerated(b) => b.compute_distance_field(levels, width, height, relax),
            BackendInstance::Native(b) => b.compute_distance_field(levels, width, height, relax),
            BackendInstance::Reference(b) => b.compute_distance_field(levels, width, height, relax),
            #[cfg(test)]
            BackendInstance::Flaky(b) => b.compute_distance_field(levels, width, height, relax),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Fault-injecting backend used by dispatcher tests.

    use super::*;
    use crate::error::RelumeError;

    #[derive(Debug, Clone, Copy)]
    pub(crate) enum FailMode {
        /// Fail every call with a transient error.
        AlwaysTransient,
        /// Fail the first call fatally, then (if still asked) succeed.
        FatalOnce,
    }

    pub(crate) struct FlakyBackend {
        pub kind: BackendKind,
        pub mode: FailMode,
        pub calls: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl FlakyBackend {
        pub fn new(kind: BackendKind, mode: FailMode) -> (Self, std::rc::Rc<std::cell::Cell<usize>>) {
            let calls = std::rc::Rc::new(std::cell::Cell::new(0));
            (
                Self {
                    kind,
                    mode,
                    calls: calls.clone(),
                },
                calls,
            )
        }

        fn fail(&self) -> RelumeError {
            self.calls.set(self.calls.get() + 1);
            match self.mode {
                FailMode::AlwaysTransient => {
                    RelumeError::backend_exec(self.kind.label(), "injected transient failure")
                }
                FailMode::FatalOnce => {
                    RelumeError::backend_fatal(self.kind.label(), "injected resource exhaustion")
                }
            }
        }
    }

    impl PipelineBackend for FlakyBackend {
        fn kind(&self) -> BackendKind {
            self.kind
        }

        fn run_full_pipeline(
            &mut self,
            _image: &[u8],
            _width: u32,
            _height: u32,
            _config: &ContrastConfig,
            _bufs: &mut WorkBuffers,
        ) -> RelumeResult<u64> {
            Err(self.fail())
        }

        fn compute_distance_field(
            &mut self,
            _levels: &[f32],
            _width: u32,
            _height: u32,
            _relax: bool,
        ) -> RelumeResult<OffsetField> {
            Err(self.fail())
        }
    }
}
