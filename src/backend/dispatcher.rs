//! # Backend Dispatcher
//!
//! Owns the backend instances, selects among them, and executes pipeline
//! calls with per-call fallback:
//!
//! - `initialize` attempts backends in priority order. Individual failures
//!   are logged and skipped; the reference implementation is always appended,
//!   so initialization as a whole cannot fail.
//! - `run_full_pipeline` tries the active backend first and walks down the
//!   priority list on transient failures, for that call only. A fatal
//!   (resource-exhaustion) failure permanently retires the failing backend.
//! - Every executed call appends one entry to the bounded metrics ring.

use std::time::Instant;

use relume_field::coverage;
use relume_field::esdt::OffsetField;
use relume_field::ContrastConfig;

use crate::backend::{
    accelerated::AcceleratedBackend, native::NativeBackend, reference::ReferenceBackend,
    BackendInstance, BackendKind, BackendPreference, PipelineRun, TextRegion, WorkBuffers,
};
use crate::error::{RelumeError, RelumeResult};
use crate::metrics::{MetricsRing, PipelineMetrics};

/// Input accepted by [`BackendDispatcher::compute_distance_field`].
///
/// Raw pixels make the fully-GPU path eligible; a prepared coverage grid
/// always goes through a backend's field engine directly.
pub enum FieldInput<'a> {
    Rgba { image: &'a [u8] },
    Levels { levels: &'a [f32] },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DispatcherState {
    Uninitialized,
    Initializing,
    Ready,
}

pub struct BackendDispatcher {
    /// Initialized backends, best first. The reference backend is always the
    /// last element once initialized.
    instances: Vec<BackendInstance>,
    active: Option<BackendKind>,
    state: DispatcherState,
    metrics: MetricsRing,
}

impl BackendDispatcher {
    pub fn new() -> Self {
        Self {
            instances: Vec::new(),
            active: None,
            state: DispatcherState::Uninitialized,
            metrics: MetricsRing::new(),
        }
    }

    /// Bring up backends in the preference's priority order and pick the best
    /// one as active. Never fails: the reference implementation is always
    /// available as the terminal fallback.
    pub fn initialize(&mut self, preference: BackendPreference) -> BackendKind {
        self.state = DispatcherState::Initializing;
        self.instances.clear();

        for &kind in preference.priority() {
            match kind {
                BackendKind::Accelerated => match AcceleratedBackend::initialize() {
                    Ok(backend) => {
                        log::info!("backend available: {}", kind.label());
                        self.instances.push(BackendInstance::Accelerated(backend));
                    }
                    Err(e) => log::warn!("{e}"),
                },
                BackendKind::Native => match NativeBackend::initialize() {
                    Ok(backend) => {
                        log::info!(
                            "backend available: {} ({} threads)",
                            kind.label(),
                            backend.threads()
                        );
                        self.instances.push(BackendInstance::Native(backend));
                    }
                    Err(e) => log::warn!("{e}"),
                },
                BackendKind::Reference => {
                    self.instances
                        .push(BackendInstance::Reference(ReferenceBackend::new()));
                }
            }
        }
        // The priority list may not name the reference backend explicitly,
        // but it must always be reachable.
        if !self
            .instances
            .iter()
            .any(|i| i.kind() == BackendKind::Reference)
        {
            self.instances
                .push(BackendInstance::Reference(ReferenceBackend::new()));
        }

        let active = self.instances[0].kind();
        self.active = Some(active);
        self.state = DispatcherState::Ready;
        log::info!("active backend: {}", active.label());
        active
    }

    pub fn is_initialized(&self) -> bool {
        self.state == DispatcherState::Ready
    }

    pub fn active_backend(&self) -> Option<BackendKind> {
        self.active
    }

    pub fn available_backends(&self) -> Vec<BackendKind> {
        self.instances.iter().map(|i| i.kind()).collect()
    }

    /// One line per known backend kind, marking availability and the active
    /// one. For status output.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        for kind in [
            BackendKind::Accelerated,
            BackendKind::Native,
            BackendKind::Reference,
        ] {
            let available = self.instances.iter().any(|i| i.kind() == kind);
            let marker = if Some(kind) == self.active {
                "*"
            } else if available {
                "+"
            } else {
                "-"
            };
            out.push_str(&format!("{} {}\n", marker, kind.label()));
        }
        out
    }

    /// Explicitly select a backend. Returns false if the requested backend
    /// never initialized (or was retired); `Auto` resolves to the best one
    /// currently available.
    pub fn switch_backend(&mut self, target: BackendPreference) -> bool {
        if self.state != DispatcherState::Ready {
            return false;
        }
        let kind = match target {
            BackendPreference::Auto => Some(self.instances[0].kind()),
            BackendPreference::Accelerated => self.find(BackendKind::Accelerated),
            BackendPreference::Native => self.find(BackendKind::Native),
            BackendPreference::Reference => self.find(BackendKind::Reference),
        };
        match kind {
            Some(kind) => {
                self.active = Some(kind);
                log::info!("switched active backend to {}", kind.label());
                true
            }
            None => false,
        }
    }

    fn find(&self, kind: BackendKind) -> Option<BackendKind> {
        self.instances
            .iter()
            .map(|i| i.kind())
            .find(|&k| k == kind)
    }

    /// Release every backend handle and return to the uninitialized state.
    /// The metrics ring is process-lifetime state and survives.
    pub fn destroy(&mut self) {
        self.instances.clear();
        self.active = None;
        self.state = DispatcherState::Uninitialized;
    }

    pub fn metrics(&self) -> &MetricsRing {
        &self.metrics
    }

    fn validate_frame(image: &[u8], width: u32, height: u32) -> RelumeResult<()> {
        if width == 0 || height == 0 {
            return Err(RelumeError::input(
                "dimensions",
                format!("frame dimensions {width}x{height} are empty"),
            ));
        }
        let expected = width as usize * height as usize * 4;
        if image.len() != expected {
            return Err(RelumeError::input(
                "image",
                format!(
                    "buffer length {} does not match {width}x{height} RGBA ({expected})",
                    image.len()
                ),
            ));
        }
        Ok(())
    }

    /// Run the full pipeline on one frame, falling back across backends as
    /// needed. The adjusted frame lands in `bufs.output`.
    pub fn run_full_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<PipelineRun> {
        let call_start = Instant::now();
        if self.state != DispatcherState::Ready {
            return Err(RelumeError::state("uninitialized", "run_full_pipeline"));
        }
        // Caller errors fail fast and never trigger fallback.
        config.validate().map_err(RelumeError::from)?;
        Self::validate_frame(image, width, height)?;

        let active = self.active.expect("ready dispatcher has an active backend");
        let start_at = self
            .instances
            .iter()
            .position(|i| i.kind() == active)
            .unwrap_or(0);

        let mut last_error = None;
        let mut index = start_at;
        while index < self.instances.len() {
            let kind = self.instances[index].kind();
            let backend_start = Instant::now();
            match self.instances[index].run_full_pipeline(image, width, height, config, bufs) {
                Ok(adjusted) => {
                    let pipeline_ms = backend_start.elapsed().as_secs_f64() * 1e3;
                    let total_ms = call_start.elapsed().as_secs_f64() * 1e3;
                    self.metrics.push(PipelineMetrics::new(
                        kind.label(),
                        width,
                        height,
                        adjusted,
                        pipeline_ms,
                        (total_ms - pipeline_ms).max(0.0),
                    ));
                    return Ok(PipelineRun {
                        backend: kind,
                        adjusted_pixels: adjusted,
                    });
                }
                Err(e) if e.is_caller_error() => return Err(e),
                Err(e) => {
                    log::warn!("{e}; falling back");
                    if e.is_fatal() {
                        self.retire(kind);
                        // The list shrank in place; the same index now holds
                        // the next backend.
                    } else {
                        index += 1;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| RelumeError::state("ready", "no backend executed the pipeline")))
    }

    /// Sparse variant: process only the given text regions, leaving the rest
    /// of the frame untouched. Regions are clamped to the frame; the output
    /// frame is written to `bufs.output` like the full pipeline.
    pub fn run_region_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        regions: &[TextRegion],
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<PipelineRun> {
        if self.state != DispatcherState::Ready {
            return Err(RelumeError::state("uninitialized", "run_region_pipeline"));
        }
        config.validate().map_err(RelumeError::from)?;
        Self::validate_frame(image, width, height)?;

        let mut composed = image.to_vec();
        let mut adjusted_total = 0u64;
        let mut backend = self.active.expect("ready dispatcher has an active backend");
        let mut region_bufs = WorkBuffers::default();

        for region in regions {
            let x0 = region.x.min(width);
            let y0 = region.y.min(height);
            let rw = region.width.min(width - x0);
            let rh = region.height.min(height - y0);
            if rw == 0 || rh == 0 {
                continue;
            }
            // Copy the region out row by row, run the ordinary pipeline on
            // the crop, and blit the adjusted rows back.
            let mut crop = vec![0u8; (rw * rh * 4) as usize];
            for row in 0..rh {
                let src = (((y0 + row) * width + x0) * 4) as usize;
                let dst = (row * rw * 4) as usize;
                crop[dst..dst + (rw * 4) as usize]
                    .copy_from_slice(&image[src..src + (rw * 4) as usize]);
            }
            let run = self.run_full_pipeline(&crop, rw, rh, config, &mut region_bufs)?;
            adjusted_total += run.adjusted_pixels;
            backend = run.backend;
            for row in 0..rh {
                let dst = (((y0 + row) * width + x0) * 4) as usize;
                let src = (row * rw * 4) as usize;
                composed[dst..dst + (rw * 4) as usize]
                    .copy_from_slice(&region_bufs.output[src..src + (rw * 4) as usize]);
            }
        }

        bufs.output = composed;
        Ok(PipelineRun {
            backend,
            adjusted_pixels: adjusted_total,
        })
    }

    /// Compute just the offset field. Raw pixel input takes the accelerated
    /// path when that backend is active; otherwise the coverage grid is
    /// derived on the CPU and handed to the field engine, with the usual
    /// fallback chain.
    pub fn compute_distance_field(
        &mut self,
        input: FieldInput<'_>,
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        if self.state != DispatcherState::Ready {
            return Err(RelumeError::state("uninitialized", "compute_distance_field"));
        }
        if width == 0 || height == 0 {
            return Err(RelumeError::input(
                "dimensions",
                format!("frame dimensions {width}x{height} are empty"),
            ));
        }
        let pixels = width as usize * height as usize;

        let levels: Vec<f32> = match input {
            FieldInput::Rgba { image } => {
                Self::validate_frame(image, width, height)?;
                if self.active == Some(BackendKind::Accelerated) {
                    if let Some(BackendInstance::Accelerated(backend)) = self
                        .instances
                        .iter_mut()
                        .find(|i| i.kind() == BackendKind::Accelerated)
                    {
                        match backend.field_from_rgba(image, width, height, relax) {
                            Ok(field) => return Ok(field),
                            Err(e) => log::warn!("{e}; falling back to engine path"),
                        }
                    }
                }
                let polarity = coverage::detect_polarity(image, width as usize, height as usize);
                let mut levels = Vec::new();
                coverage::coverage_map(
                    image,
                    width as usize,
                    height as usize,
                    polarity,
                    &mut levels,
                );
                levels
            }
            FieldInput::Levels { levels } => {
                if levels.len() != pixels {
                    return Err(RelumeError::input(
                        "levels",
                        format!(
                            "coverage length {} does not match {width}x{height} ({pixels})",
                            levels.len()
                        ),
                    ));
                }
                levels.to_vec()
            }
        };

        let active = self.active.expect("ready dispatcher has an active backend");
        let start_at = self
            .instances
            .iter()
            .position(|i| i.kind() == active)
            .unwrap_or(0);
        let mut last_error = None;
        let mut index = start_at;
        while index < self.instances.len() {
            let kind = self.instances[index].kind();
            match self.instances[index].compute_distance_field(&levels, width, height, relax) {
                Ok(field) => return Ok(field),
                Err(e) if e.is_caller_error() => return Err(e),
                Err(e) => {
                    log::warn!("{e}; falling back");
                    if e.is_fatal() {
                        self.retire(kind);
                    } else {
                        index += 1;
                    }
                    last_error = Some(e);
                }
            }
        }
        Err(last_error
            .unwrap_or_else(|| RelumeError::state("ready", "no backend computed the field")))
    }

    /// Permanently drop a backend after a fatal failure.
    fn retire(&mut self, kind: BackendKind) {
        if kind == BackendKind::Reference {
            // The terminal fallback is never retired.
            return;
        }
        log::error!("retiring backend {} after fatal failure", kind.label());
        self.instances.retain(|i| i.kind() != kind);
        if self.active == Some(kind) {
            let next = self.instances[0].kind();
            self.active = Some(next);
            log::warn!("active backend now {}", next.label());
        }
    }

    #[cfg(test)]
    pub(crate) fn with_instances(instances: Vec<BackendInstance>) -> Self {
        let active = instances[0].kind();
        Self {
            instances,
            active: Some(active),
            state: DispatcherState::Ready,
            metrics: MetricsRing::new(),
        }
    }
}

impl Default for BackendDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::test_support::{FailMode, FlakyBackend};

    fn flat_frame(w: u32, h: u32) -> Vec<u8> {
        vec![200u8; (w * h * 4) as usize]
    }

    fn dispatcher_with_flaky(mode: FailMode) -> (BackendDispatcher, std::rc::Rc<std::cell::Cell<usize>>) {
        let (flaky, calls) = FlakyBackend::new(BackendKind::Accelerated, mode);
        let dispatcher = BackendDispatcher::with_instances(vec![
            BackendInstance::Flaky(flaky),
            BackendInstance::Reference(ReferenceBackend::new()),
        ]);
        (dispatcher, calls)
    }

    #[test]
    fn initialize_always_succeeds_with_reference() {
        let mut dispatcher = BackendDispatcher::new();
        let active = dispatcher.initialize(BackendPreference::Reference);
        assert_eq!(active, BackendKind::Reference);
        assert!(dispatcher.is_initialized());
        assert_eq!(
            dispatcher.available_backends(),
            vec![BackendKind::Reference]
        );
    }

    #[test]
    fn uninitialized_dispatcher_rejects_calls() {
        let mut dispatcher = BackendDispatcher::new();
        let mut bufs = WorkBuffers::default();
        let err = dispatcher
            .run_full_pipeline(&flat_frame(4, 4), 4, 4, &ContrastConfig::default(), &mut bufs)
            .unwrap_err();
        assert!(matches!(err, RelumeError::State { .. }));
    }

    #[test]
    fn caller_errors_fail_fast_without_fallback() {
        let (mut dispatcher, calls) = dispatcher_with_flaky(FailMode::AlwaysTransient);
        let mut bufs = WorkBuffers::default();
        // Short buffer: must be rejected before any backend runs.
        let err = dispatcher
            .run_full_pipeline(&[0u8; 7], 4, 4, &ContrastConfig::default(), &mut bufs)
            .unwrap_err();
        assert!(err.is_caller_error());
        assert_eq!(calls.get(), 0);
        assert!(dispatcher.metrics().is_empty());
    }

    #[test]
    fn transient_failure_falls_back_per_call() {
        let (mut dispatcher, calls) = dispatcher_with_flaky(FailMode::AlwaysTransient);
        let mut bufs = WorkBuffers::default();
        let frame = flat_frame(8, 8);

        for round in 1..=3u64 {
            let run = dispatcher
                .run_full_pipeline(&frame, 8, 8, &ContrastConfig::default(), &mut bufs)
                .unwrap();
            assert_eq!(run.backend, BackendKind::Reference);
            assert_eq!(run.adjusted_pixels, 0);
            // The preferred backend stays installed and is retried each call.
            assert_eq!(calls.get() as u64, round);
            assert!(dispatcher.is_initialized());
        }
        assert_eq!(dispatcher.active_backend(), Some(BackendKind::Accelerated));
        assert_eq!(dispatcher.metrics().len(), 3);
        assert_eq!(
            dispatcher.metrics().latest().unwrap().backend,
            BackendKind::Reference.label()
        );
    }

    #[test]
    fn fatal_failure_retires_the_backend() {
        let (mut dispatcher, calls) = dispatcher_with_flaky(FailMode::FatalOnce);
        let mut bufs = WorkBuffers::default();
        let frame = flat_frame(8, 8);

        let run = dispatcher
            .run_full_pipeline(&frame, 8, 8, &ContrastConfig::default(), &mut bufs)
            .unwrap();
        assert_eq!(run.backend, BackendKind::Reference);
        assert_eq!(calls.get(), 1);
        assert_eq!(dispatcher.active_backend(), Some(BackendKind::Reference));

        // Subsequent calls never touch the retired backend again.
        dispatcher
            .run_full_pipeline(&frame, 8, 8, &ContrastConfig::default(), &mut bufs)
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert_eq!(
            dispatcher.available_backends(),
            vec![BackendKind::Reference]
        );
    }

    #[test]
    fn switch_backend_requires_initialized_target() {
        let mut dispatcher = BackendDispatcher::new();
        dispatcher.initialize(BackendPreference::Reference);
        assert!(!dispatcher.switch_backend(BackendPreference::Accelerated));
        assert!(dispatcher.switch_backend(BackendPreference::Reference));
        assert!(dispatcher.switch_backend(BackendPreference::Auto));
        assert_eq!(dispatcher.active_backend(), Some(BackendKind::Reference));
    }

    #[test]
    fn destroy_resets_state() {
        let mut dispatcher = BackendDispatcher::new();
        dispatcher.initialize(BackendPreference::Reference);
        dispatcher.destroy();
        assert!(!dispatcher.is_initialized());
        assert!(dispatcher.available_backends().is_empty());
        // Re-initialization works.
        dispatcher.initialize(BackendPreference::Reference);
        assert!(dispatcher.is_initialized());
    }

    #[test]
    fn field_from_levels_uses_fallback_chain() {
        let (mut dispatcher, calls) = dispatcher_with_flaky(FailMode::AlwaysTransient);
        let mut levels = vec![0.0f32; 25];
        levels[12] = 1.0;
        let field = dispatcher
            .compute_distance_field(FieldInput::Levels { levels: &levels }, 5, 5, false)
            .unwrap();
        assert_eq!(calls.get(), 1);
        assert!(field.distance(2, 2) < 0.01);
    }

    #[test]
    fn region_pipeline_touches_only_regions() {
        let mut dispatcher = BackendDispatcher::new();
        dispatcher.initialize(BackendPreference::Reference);

        // Low-contrast text stroke inside the region, and an identical one
        // outside it.
        let (w, h) = (32u32, 16u32);
        let mut image = vec![255u8; (w * h * 4) as usize];
        for y in 2..14u32 {
            for &x in &[4u32, 5, 24, 25] {
                let p = ((y * w + x) * 4) as usize;
                image[p..p + 3].copy_from_slice(&[170, 170, 170]);
            }
        }
        let mut bufs = WorkBuffers::default();
        let run = dispatcher
            .run_region_pipeline(
                &image,
                w,
                h,
                &[TextRegion {
                    x: 0,
                    y: 0,
                    width: 12,
                    height: 16,
                }],
                &ContrastConfig::default(),
                &mut bufs,
            )
            .unwrap();
        assert!(run.adjusted_pixels > 0);
        // The stroke at x=24..26 is outside the region and must be untouched.
        for y in 0..h {
            for x in 20..w {
                let p = ((y * w + x) * 4) as usize;
                assert_eq!(&bufs.output[p..p + 4], &image[p..p + 4]);
            }
        }
        // The in-region stroke was recolored.
        let p = ((6 * w + 4) * 4) as usize;
        assert_ne!(&bufs.output[p..p + 3], &image[p..p + 3]);
    }
}
