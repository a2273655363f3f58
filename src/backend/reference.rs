//! Single-threaded reference implementation of the contrast pipeline.
//!
//! This is the terminal fallback: plain loops over the `relume_field` kernels,
//! no GPU, no thread pool, nothing that can fail to initialize. It is also the
//! semantic yardstick: the other backends are expected to produce the same
//! frame this one does.

use relume_field::esdt::OffsetField;
use relume_field::{contrast, coverage, esdt, glyph, ContrastConfig};

use crate::backend::{BackendKind, PipelineBackend, PixelAdjust, WorkBuffers};
use crate::error::{RelumeError, RelumeResult};

pub struct ReferenceBackend;

impl ReferenceBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for ReferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Decide the replacement color for one glyph pixel, or `None` when the pixel
/// is already compliant (or the adjustment happens to land on the same color).
pub(crate) fn adjust_pixel(
    original: [u8; 4],
    background: [u8; 4],
    target_contrast: f32,
) -> Option<([u8; 4], f32)> {
    let fg_lum = contrast::relative_luminance(original[0], original[1], original[2]);
    let bg_lum = contrast::relative_luminance(background[0], background[1], background[2]);
    let ratio = contrast::contrast_ratio(fg_lum, bg_lum);
    let adjusted = contrast::apply(
        original,
        contrast::adjustment(ratio, target_contrast, fg_lum, bg_lum),
    );
    if adjusted == original {
        None
    } else {
        Some((adjusted, ratio))
    }
}

#[inline]
pub(crate) fn pixel_at(image: &[u8], index: usize) -> [u8; 4] {
    let p = index * 4;
    [image[p], image[p + 1], image[p + 2], image[p + 3]]
}

impl PipelineBackend for ReferenceBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Reference
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
        bufs.prepare(width, height)
            .map_err(|e| RelumeError::resource("work buffers", e.to_string()))?;

        // Stage 1: grayscale coverage plus its image-space gradient.
        let polarity = coverage::detect_polarity(image, w, h);
        coverage::coverage_map(image, w, h, polarity, &mut bufs.coverage);
        coverage::gradient_map(&bufs.coverage, w, h, &mut bufs.gradient);

        // Stage 2: offset field.
        esdt::compute_distance_field_into(
            &bufs.coverage,
            w,
            h,
            config.use_relaxation,
            &mut bufs.field,
        )?;

        // Stage 3: glyph extraction.
        glyph::extract_into(
            &bufs.coverage,
            &bufs.gradient,
            &bufs.field,
            w,
            h,
            config.max_distance,
            &mut bufs.glyphs,
        );

        // Stage 4: background sampling along each glyph pixel's away-direction.
        bufs.samples.clear();
        for px in &bufs.glyphs {
            let (sx, sy) = glyph::sample_point(px.x, px.y, px.dir, config.sample_distance, w, h);
            bufs.samples.push(pixel_at(image, sy * w + sx));
        }

        // Stage 5: contrast decisions.
        bufs.adjustments.clear();
        for (px, &background) in bufs.glyphs.iter().zip(bufs.samples.iter()) {
            let index = px.y * w + px.x;
            if let Some((color, ratio)) =
                adjust_pixel(pixel_at(image, index), background, config.target_contrast)
            {
                bufs.adjustments.push(PixelAdjust {
                    index,
                    color,
                    ratio,
                });
            }
        }

        // Stage 6: compose the output frame.
        bufs.output.copy_from_slice(image);
        for adjust in &bufs.adjustments {
            let p = adjust.index * 4;
            bufs.output[p..p + 4].copy_from_slice(&adjust.color);
        }
        Ok(bufs.adjustments.len() as u64)
    }

    fn compute_distance_field(
        &mut self,
        levels: &[f32],
        width: u32,
        height: u32,
        relax: bool,
    ) -> RelumeResult<OffsetField> {
        Ok(esdt::compute_distance_field(
            levels,
            width as usize,
            height as usize,
            relax,
        )?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_frame_adjusts_nothing() {
        let (w, h) = (16u32, 16u32);
        let image = vec![128u8; (w * h * 4) as usize];
        let mut bufs = WorkBuffers::for_dimensions(w, h);
        let mut backend = ReferenceBackend::new();
        let adjusted = backend
            .run_full_pipeline(&image, w, h, &ContrastConfig::default(), &mut bufs)
            .unwrap();
        assert_eq!(adjusted, 0);
        assert!(bufs.glyphs.is_empty());
        assert_eq!(bufs.output, image);
    }

    #[test]
    fn compliant_text_passes_through() {
        // (40,40,40) on white measures ~14.7:1, well past AA, so the glyph
        // pixels are extracted but every decision is a no-op.
        let (w, h) = (12u32, 12u32);
        let mut image = vec![255u8; (w * h * 4) as usize];
        for y in 2..10u32 {
            for x in 6..8u32 {
                let p = ((y * w + x) * 4) as usize;
                image[p..p + 3].copy_from_slice(&[40, 40, 40]);
            }
        }
        let mut bufs = WorkBuffers::for_dimensions(w, h);
        let adjusted = ReferenceBackend::new()
            .run_full_pipeline(&image, w, h, &ContrastConfig::default(), &mut bufs)
            .unwrap();
        assert!(!bufs.glyphs.is_empty());
        assert_eq!(adjusted, 0);
        assert_eq!(bufs.output, image);
    }
}
