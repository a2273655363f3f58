// SPDX-License-Identifier: MIT
// Glyph-pixel classification: which cells of a frame belong to (or hug) a text
// edge, and in which direction the background lies for each of them.

use crate::esdt::{edge_weight, mag2, Offset2};

// Squared-magnitude floor below which a gradient has no usable direction.
const DIRECTION_EPSILON: f32 = 1e-8;

/// A pixel retained after distance-field thresholding, believed to lie on or
/// near a text edge.
#[derive(Debug, Clone, Copy)]
pub struct GlyphPixel {
    pub x: usize,
    pub y: usize,
    /// Text coverage of the cell, in [0, 1].
    pub coverage: f32,
    /// Edge weight `4·α·(1−α)` of the cell.
    pub weight: f32,
    /// Distance to the nearest foreground cell.
    pub dist: f32,
    /// Unit direction pointing away from the glyph, toward background.
    pub dir: [f32; 2],
}

/// Direction away from the nearest glyph for a cell, if it has one.
///
/// Off-glyph cells inherit it from their propagated offset; on-glyph cells
/// (zero offset) fall back to the negated coverage gradient. A cell with
/// neither (deep interior, flat background) has no edge nearby and is not
/// a glyph pixel.
#[inline]
pub fn away_direction(offset: Offset2, gradient: [f32; 2]) -> Option<[f32; 2]> {
    let off2 = mag2(offset);
    if off2 > 0.0 {
        let inv = off2.sqrt().recip();
        return Some([offset[0] * inv, offset[1] * inv]);
    }
    let g2 = gradient[0] * gradient[0] + gradient[1] * gradient[1];
    if g2 > DIRECTION_EPSILON {
        let inv = g2.sqrt().recip();
        // The gradient climbs into the glyph; background is the other way.
        return Some([-gradient[0] * inv, -gradient[1] * inv]);
    }
    None
}

/// Classify one cell. Returns the glyph pixel if the cell is close enough to
/// foreground, carries a non-trivial edge weight, and has a usable direction.
#[inline]
pub fn classify(
    x: usize,
    y: usize,
    coverage: f32,
    offset: Offset2,
    gradient: [f32; 2],
    max_distance: f32,
) -> Option<GlyphPixel> {
    let dist = mag2(offset).sqrt();
    if dist >= max_distance {
        return None;
    }
    let weight = edge_weight(coverage);
    if weight <= 0.0 {
        return None;
    }
    let dir = away_direction(offset, gradient)?;
    Some(GlyphPixel {
        x,
        y,
        coverage,
        weight,
        dist,
        dir,
    })
}

/// Serial extraction over a whole frame, appending into `out`.
pub fn extract_into(
    levels: &[f32],
    gradients: &[[f32; 2]],
    field: &[Offset2],
    width: usize,
    height: usize,
    max_distance: f32,
    out: &mut Vec<GlyphPixel>,
) {
    out.clear();
    for y in 0..height {
        for x in 0..width {
            let i = y * width + x;
            if let Some(px) = classify(x, y, levels[i], field[i], gradients[i], max_distance) {
                out.push(px);
            }
        }
    }
}

/// Where to sample the background color for a glyph pixel: `sample_distance`
/// pixels along its away-direction, clamped to the frame.
#[inline]
pub fn sample_point(
    x: usize,
    y: usize,
    dir: [f32; 2],
    sample_distance: f32,
    width: usize,
    height: usize,
) -> (usize, usize) {
    let sx = (x as f32 + dir[0] * sample_distance).round();
    let sy = (y as f32 + dir[1] * sample_distance).round();
    (
        (sx.max(0.0) as usize).min(width - 1),
        (sy.max(0.0) as usize).min(height - 1),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{coverage_map, gradient_map, Polarity};
    use crate::esdt;

    #[test]
    fn flat_frame_extracts_nothing() {
        let (w, h) = (8usize, 8usize);
        let levels = vec![0.5f32; w * h]; // half coverage, zero gradient
        let mut field = Vec::new();
        esdt::compute_distance_field_into(&levels, w, h, false, &mut field).unwrap();
        let mut grads = Vec::new();
        gradient_map(&levels, w, h, &mut grads);
        let mut out = Vec::new();
        extract_into(&levels, &grads, &field, w, h, 4.0, &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn stroke_pixels_point_away_from_the_stroke() {
        // 2px dark stroke at x = 3..5 on white.
        let (w, h) = (9usize, 5usize);
        let mut frame = vec![255u8; w * h * 4];
        for y in 0..h {
            for x in 3..5 {
                let p = (y * w + x) * 4;
                frame[p..p + 3].copy_from_slice(&[40, 40, 40]);
            }
        }
        let mut levels = Vec::new();
        coverage_map(&frame, w, h, Polarity::DarkOnLight, &mut levels);
        let mut field = Vec::new();
        esdt::compute_distance_field_into(&levels, w, h, false, &mut field).unwrap();
        let mut grads = Vec::new();
        gradient_map(&levels, w, h, &mut grads);

        let mut out = Vec::new();
        extract_into(&levels, &grads, &field, w, h, 3.0, &mut out);
        assert!(!out.is_empty());

        for px in &out {
            if px.x == 3 {
                assert!(px.dir[0] < 0.0, "left column should look left");
            }
            if px.x == 4 {
                assert!(px.dir[0] > 0.0, "right column should look right");
            }
            let (sx, _) = sample_point(px.x, px.y, px.dir, 2.5, w, h);
            let sp = (px.y * w + sx) * 4;
            assert_eq!(frame[sp], 255, "sample should land on background");
        }
    }

    #[test]
    fn sample_point_clamps_to_frame() {
        let (x, y) = sample_point(0, 0, [-1.0, -1.0], 5.0, 8, 8);
        assert_eq!((x, y), (0, 0));
        let (x, y) = sample_point(7, 7, [1.0, 1.0], 5.0, 8, 8);
        assert_eq!((x, y), (7, 7));
    }
}
