//! Native multicore implementation of the contrast pipeline.
//!
//! Same semantics as the reference backend, parallelized with rayon: rows are
//! independent in every per-pixel stage, the horizontal distance sweeps are
//! independent per row, and the vertical sweeps carry their dependency along y
//! while staying parallel across x.

use rayon::prelude::*;

use relume_field::esdt::{self, Offset2, OffsetField};
use relume_field::glyph::GlyphPixel;
use relume_field::{coverage, glyph, ContrastConfig};

use crate::backend::reference::{adjust_pixel, pixel_at};
use crate::backend::{BackendKind, PipelineBackend, PixelAdjust, WorkBuffers};
use crate::error::{RelumeError, RelumeResult};

const LABEL: &str = "native-rayon";

pub struct NativeBackend {
    pool: rayon::ThreadPool,
}

impl NativeBackend {
    /// Build the worker pool. Fails if the OS refuses to spawn threads, in
    /// which case the dispatcher moves on to the reference backend.
    pub fn initialize() -> RelumeResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .thread_name(|i| format!("relume-worker-{i}"))
            .build()
            .map_err(|e| RelumeError::backend_init(LABEL, e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

/// Full field computation: per-row horizontal sweeps in parallel, then the two
/// vertical passes row by row with the inner loop parallel across x.
fn sweep_parallel(field: &mut [Offset2], width: usize, height: usize) {
    field
        .par_chunks_mut(width)
        .for_each(|row| esdt::sweep_row(row));

    for y in 1..height {
        let (head, tail) = field.split_at_mut(y * width);
        let prev = &head[(y - 1) * width..];
        tail[..width]
            .par_iter_mut()
            .zip(prev.par_iter())
            .for_each(|(cell, &above)| esdt::propagate(cell, above, 0.0, 1.0));
    }
    for y in (0..height.saturating_sub(1)).rev() {
        let (head, tail) = field.split_at_mut((y + 1) * width);
        let cur = &mut head[y * width..];
        cur.par_iter_mut()
            .zip(tail[..width].par_iter())
            .for_each(|(cell, &below)| esdt::propagate(cell, below, 0.0, -1.0));
    }
}

fn compute_field_parallel(
    levels: &[f32],
    width: usize,
    height: usize,
    relax: bool,
    out: &mut Vec<Offset2>,
) {
    esdt::init_field(levels, out);
    sweep_parallel(out, width, height);
    if relax {
        sweep_parallel(out, width, height);
    }
}

impl PipelineBackend for NativeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Native
    }

    fn run_full_pipeline(
        &mut self,
        image: &[u8],
        width: u32,
        height: u32,
        config: &ContrastConfig,
        bufs: &mut WorkBuffers,
    ) -> RelumeResult<u64> {
        let (w, h) = (width as usize, height as usize);
        // Allocation failure here is resource exhaustion: report it as fatal
        // so the dispatcher retires this backend instead of retrying it.
        bufs.prepare(width, height)
            .map_err(|e| RelumeError::backend_fatal(LABEL, format!("buffer reservation: {e}")))?;

        self.pool.install(|| {
            let polarity = coverage::detect_polarity(image, w, h);

            bufs.coverage
                .par_chunks_mut(w)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, cell) in row.iter_mut().enumerate() {
                        let p = (y * w + x) * 4;
                        *cell =
                            coverage::pixel_coverage(image[p], image[p + 1], image[p + 2], polarity);
                    }
                });

            let levels = &bufs.coverage;
            bufs.gradient
                .par_chunks_mut(w)
                .enumerate()
                .for_each(|(y, row)| {
                    for (x, cell) in row.iter_mut().enumerate() {
                        *cell = coverage::gradient_at(levels, w, h, x, y);
                    }
                });

            compute_field_parallel(&bufs.coverage, w, h, config.use_relaxation, &mut bufs.field);

            // Extraction: one vector of glyph pixels per row, flattened in
            // row order so the result matches the reference backend exactly.
            let levels = &bufs.coverage;
            let gradients = &bufs.gradient;
            let field = &bufs.field;
            let per_row: Vec<Vec<GlyphPixel>> = (0..h)
                .into_par_iter()
                .map(|y| {
                    let mut row = Vec::new();
                    for x in 0..w {
                        let i = y * w + x;
                        if let Some(px) = glyph::classify(
                            x,
                            y,
                            levels[i],
                            field[i],
                            gradients[i],
                            config.max_distance,
                        ) {
                            row.push(px);
                        }
                    }
                    row
                })
                .collect();
            bufs.glyphs.clear();
            bufs.glyphs.extend(per_row.into_iter().flatten());

            // Sampling and contrast decisions per glyph pixel.
            let decided: Vec<([u8; 4], Option<PixelAdjust>)> = bufs
                .glyphs
                .par_iter()
                .map(|px| {
                    let (sx, sy) =
                        glyph::sample_point(px.x, px.y, px.dir, config.sample_distance, w, h);
                    let background = pixel_at(image, sy * w + sx);
                    let index = px.y * w + px.x;
                    let adjust = adjust_pixel(pixel_at(image, index), background, config.target_contrast)
                        .map(|(color, ratio)| PixelAdjust {
                            index,
                            color,
                            ratio,
                        });
                    (background, adjust)
                })
                .collect();

            bufs.samples.clear();
            bufs.adjustments.clear();
            for (background, adjust) in decided {
                bufs.samples.push(background);
                if let Some(adjust) = adjust {
                    bufs.adjustments.push(adjust);
                }
            }

            bufs.output.copy_from_slice(image);
            for adjust in &bufs.adjustments {
                let p = adjust.index * 4;
                bufs.output[p..p + 4].copy_from_slice(&adjust.color);
            }
        });

        Ok(bufs.adjustments.len() as u64)
    }

    fn compute_distance_field(
        &mut self,
        levels: &[f32],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        let (w, h) = (width as usize, height as usize);
        // Same caller-error contract as the reference engine.
        if w == 0 || h == 0 {
            return Err(esdt::FieldError::EmptyDimensions {
                width: w,
                height: h,
            }
            .into());
        }
        if levels.len() != w * h {
            return Err(esdt::FieldError::LengthMismatch {
                expected: w * h,
                actual: levels.len(),
            }
            .into());
        }
        let mut data = Vec::with_capacity(levels.len());
        self.pool
            .install(|| compute_field_parallel(levels, w, h, relax, &mut data));
        Ok(OffsetField {
            width: w,
            height: h,
            data,
        })
    }
}
