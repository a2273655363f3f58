// SPDX-License-Identifier: MIT
// Offset-field propagation over a coverage grid: four directional sweeps,
// one offset vector per cell pointing away from the nearest foreground cell.
// Approximate EDT; exact for isolated convex shapes, within ~10-20% elsewhere.

use std::fmt;

/// Marker for cells whose nearest foreground has not been found yet.
/// A large finite constant rather than NaN/inf so squared magnitudes stay
/// comparable without special cases.
pub const SENTINEL: f32 = 1e10;

/// Coverage at or above this value makes a cell foreground.
pub const FOREGROUND_THRESHOLD: f32 = 0.5;

/// A 2-component cell offset (Δx, Δy) in pixel units.
pub type Offset2 = [f32; 2];

#[derive(Debug)]
pub enum FieldError {
    /// `levels.len()` does not match `width * height`.
    LengthMismatch { expected: usize, actual: usize },
    /// Zero width or height.
    EmptyDimensions { width: usize, height: usize },
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::LengthMismatch { expected, actual } => write!(
                f,
                "coverage grid length {} does not match width*height = {}",
                actual, expected
            ),
            FieldError::EmptyDimensions { width, height } => {
                write!(f, "grid dimensions {}x{} are empty", width, height)
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// Per-cell offsets to the nearest foreground cell.
///
/// `data` is row-major, origin top-left, one `[dx, dy]` per cell. The offset
/// points away from the nearest foreground cell; its magnitude is the distance.
#[derive(Debug, Clone)]
pub struct OffsetField {
    pub width: usize,
    pub height: usize,
    pub data: Vec<Offset2>,
}

impl OffsetField {
    pub fn offset(&self, x: usize, y: usize) -> Offset2 {
        self.data[y * self.width + x]
    }

    /// Euclidean distance from the cell to its nearest foreground cell.
    pub fn distance(&self, x: usize, y: usize) -> f32 {
        let [dx, dy] = self.offset(x, y);
        (dx * dx + dy * dy).sqrt()
    }
}

#[inline]
pub fn mag2(o: Offset2) -> f32 {
    o[0] * o[0] + o[1] * o[1]
}

/// Adopt `neighbor + (dx, dy)` into `cell` if it is a shorter route to
/// foreground than what the cell currently holds.
#[inline]
pub fn propagate(cell: &mut Offset2, neighbor: Offset2, dx: f32, dy: f32) {
    let candidate = [neighbor[0] + dx, neighbor[1] + dy];
    if mag2(candidate) < mag2(*cell) {
        *cell = candidate;
    }
}

/// Seed the field from a coverage grid: foreground cells get a zero offset,
/// everything else starts at the sentinel.
pub fn init_field(levels: &[f32], out: &mut Vec<Offset2>) {
    out.clear();
    out.extend(levels.iter().map(|&level| {
        if level >= FOREGROUND_THRESHOLD {
            [0.0, 0.0]
        } else {
            [SENTINEL, SENTINEL]
        }
    }));
}

/// Horizontal sweep over one row: forward pass (x increasing) pulling from the
/// left neighbor, then backward pass (x decreasing) pulling from the right.
pub fn sweep_row(row: &mut [Offset2]) {
    for x in 1..row.len() {
        let left = row[x - 1];
        propagate(&mut row[x], left, 1.0, 0.0);
    }
    for x in (0..row.len().saturating_sub(1)).rev() {
        let right = row[x + 1];
        propagate(&mut row[x], right, -1.0, 0.0);
    }
}

/// One full sweep: both horizontal passes per row, then the vertical forward
/// pass (y increasing) and the vertical backward pass (y decreasing).
pub fn sweep(field: &mut [Offset2], width: usize, height: usize) {
    for row in field.chunks_mut(width) {
        sweep_row(row);
    }
    for y in 1..height {
        let (head, tail) = field.split_at_mut(y * width);
        let prev = &head[(y - 1) * width..];
        for (cell, &above) in tail[..width].iter_mut().zip(prev.iter()) {
            propagate(cell, above, 0.0, 1.0);
        }
    }
    for y in (0..height.saturating_sub(1)).rev() {
        let (head, tail) = field.split_at_mut((y + 1) * width);
        let cur = &mut head[y * width..];
        for (cell, &below) in cur.iter_mut().zip(tail[..width].iter()) {
            propagate(cell, below, 0.0, -1.0);
        }
    }
}

fn validate(levels: &[f32], width: usize, height: usize) -> Result<(), FieldError> {
    if width == 0 || height == 0 {
        return Err(FieldError::EmptyDimensions { width, height });
    }
    let expected = width * height;
    if levels.len() != expected {
        return Err(FieldError::LengthMismatch {
            expected,
            actual: levels.len(),
        });
    }
    Ok(())
}

/// Compute the offset field for a coverage grid, writing into `out`.
///
/// `relax` repeats the full sweep once more, which smooths the field on
/// concave shapes at twice the cost. Malformed input is a caller error and
/// fails fast; the grid is never truncated or zero-filled.
pub fn compute_distance_field_into(
    levels: &[f32],
    width: usize,
    height: usize,
    relax: bool,
    out: &mut Vec<Offset2>,
) -> Result<(), FieldError> {
    validate(levels, width, height)?;
    init_field(levels, out);
    sweep(out, width, height);
    if relax {
        sweep(out, width, height);
    }
    Ok(())
}

/// Allocating variant of [`compute_distance_field_into`].
pub fn compute_distance_field(
    levels: &[f32],
    width: usize,
    height: usize,
    relax: bool,
) -> Result<OffsetField, FieldError> {
    let mut data = Vec::with_capacity(levels.len());
    compute_distance_field_into(levels, width, height, relax, &mut data)?;
    Ok(OffsetField {
        width,
        height,
        data,
    })
}

/// Edge weight for sub-pixel coverage `alpha`: `4·α·(1−α)`.
///
/// Peaks at 1.0 for half-covered cells and falls to zero for fully covered or
/// fully empty ones, so true glyph edges outrank interiors and exteriors.
#[inline]
pub fn edge_weight(alpha: f32) -> f32 {
    let a = alpha.clamp(0.0, 1.0);
    4.0 * a * (1.0 - a)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_for(levels: &[f32], w: usize, h: usize) -> OffsetField {
        compute_distance_field(levels, w, h, false).unwrap()
    }

    #[test]
    fn single_center_pixel() {
        let mut levels = vec![0.0f32; 9];
        levels[4] = 1.0; // center of 3x3
        let field = field_for(&levels, 3, 3);

        assert!(field.distance(1, 1) < 0.01);
        for &(x, y) in &[(0, 0), (2, 0), (0, 2), (2, 2)] {
            let d = field.distance(x, y);
            assert!(d > 1.2 && d < 1.6, "corner ({x},{y}) distance {d}");
        }
        for &(x, y) in &[(1, 0), (0, 1), (2, 1), (1, 2)] {
            let d = field.distance(x, y);
            assert!((d - 1.0).abs() < 0.01, "edge ({x},{y}) distance {d}");
        }
    }

    #[test]
    fn horizontal_line() {
        let mut levels = vec![0.0f32; 25];
        for x in 0..5 {
            levels[2 * 5 + x] = 1.0; // row y=2
        }
        let field = field_for(&levels, 5, 5);
        for x in 0..5 {
            assert!(field.distance(x, 2) < 0.01);
            assert!((field.distance(x, 1) - 1.0).abs() < 0.01);
            assert!((field.distance(x, 3) - 1.0).abs() < 0.01);
            assert!((field.distance(x, 0) - 2.0).abs() < 0.01);
            assert!((field.distance(x, 4) - 2.0).abs() < 0.01);
        }
    }

    #[test]
    fn sentinel_cleared_when_foreground_exists() {
        let mut levels = vec![0.0f32; 64 * 64];
        levels[0] = 1.0; // lone pixel in the corner
        let field = field_for(&levels, 64, 64);
        for y in 0..64 {
            for x in 0..64 {
                assert!(field.distance(x, y) < SENTINEL);
            }
        }
        // far corner of the grid is exactly sqrt(63^2 + 63^2) away
        let expected = (2.0f32 * 63.0 * 63.0).sqrt();
        assert!((field.distance(63, 63) - expected).abs() < 0.01);
    }

    #[test]
    fn empty_grid_keeps_sentinel() {
        let levels = vec![0.0f32; 16];
        let field = field_for(&levels, 4, 4);
        assert!(field.distance(0, 0) >= SENTINEL);
    }

    #[test]
    fn relaxation_does_not_hurt_simple_shapes() {
        let mut levels = vec![0.0f32; 49];
        levels[3 * 7 + 3] = 1.0;
        let plain = compute_distance_field(&levels, 7, 7, false).unwrap();
        let relaxed = compute_distance_field(&levels, 7, 7, true).unwrap();
        for i in 0..49 {
            assert!(mag2(relaxed.data[i]) <= mag2(plain.data[i]) + 1e-3);
        }
    }

    #[test]
    fn malformed_input_fails_fast() {
        let levels = vec![0.0f32; 10];
        assert!(matches!(
            compute_distance_field(&levels, 4, 4, false),
            Err(FieldError::LengthMismatch { expected: 16, actual: 10 })
        ));
        assert!(matches!(
            compute_distance_field(&levels, 0, 10, false),
            Err(FieldError::EmptyDimensions { .. })
        ));
    }

    #[test]
    fn edge_weight_properties() {
        assert!((edge_weight(0.5) - 1.0).abs() < 1e-6);
        assert_eq!(edge_weight(0.0), 0.0);
        assert_eq!(edge_weight(1.0), 0.0);
        for i in 0..=20 {
            let a = i as f32 / 20.0;
            let w = edge_weight(a);
            assert!((0.0..=1.0).contains(&w));
            assert!((w - edge_weight(1.0 - a)).abs() < 1e-6);
        }
    }
}
