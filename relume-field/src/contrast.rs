// SPDX-License-Identifier: MIT
// WCAG luminance and contrast arithmetic, plus the recoloring rule that moves
// a foreground color toward a target contrast ratio against its background.

/// Foreground luminance at or below this is treated as black for adjustment.
const NEAR_BLACK: f32 = 1e-4;

/// Linearize one 8-bit sRGB channel.
///
/// The 0.03928 threshold and 2.4 exponent are the exact WCAG constants; the
/// 0.04045/2.2 pair seen elsewhere is a different transfer function and gives
/// measurably wrong ratios near the threshold.
#[inline]
pub fn srgb_to_linear(channel: u8) -> f32 {
    let c = channel as f32 / 255.0;
    if c <= 0.03928 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// WCAG relative luminance of an sRGB color, in [0, 1].
#[inline]
pub fn relative_luminance(r: u8, g: u8, b: u8) -> f32 {
    0.2126 * srgb_to_linear(r) + 0.7152 * srgb_to_linear(g) + 0.0722 * srgb_to_linear(b)
}

/// WCAG contrast ratio between two relative luminances, in [1, 21].
/// Symmetric in its arguments.
#[inline]
pub fn contrast_ratio(l1: f32, l2: f32) -> f32 {
    (l1.max(l2) + 0.05) / (l1.min(l2) + 0.05)
}

/// How a foreground color should change to reach a target contrast ratio.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Adjustment {
    /// Already at or above the target; leave the color alone.
    Keep,
    /// Multiply each RGB channel by this factor (then clamp to [0, 255]).
    Scale(f32),
    /// Foreground is effectively black; replace with this flat gray level.
    Gray(u8),
}

/// Decide the adjustment for a foreground color against its background.
///
/// At or above the target the result is [`Adjustment::Keep`], so compliant
/// colors pass through unchanged. Below it, the target luminance is solved
/// from the contrast-ratio equation (pushing lighter foregrounds lighter and
/// darker foregrounds darker) and expressed as a channel scale factor. A
/// near-black foreground has no luminance to scale, so it maps to the gray
/// level x solving `0.2126·x² ≈ targetLuminance` (R = G = B assumed).
pub fn adjustment(
    current_ratio: f32,
    target_ratio: f32,
    foreground_lum: f32,
    background_lum: f32,
) -> Adjustment {
    if current_ratio >= target_ratio {
        return Adjustment::Keep;
    }
    let target_lum = if foreground_lum > background_lum {
        target_ratio * (background_lum + 0.05) - 0.05
    } else {
        (background_lum + 0.05) / target_ratio - 0.05
    }
    .clamp(0.0, 1.0);

    if foreground_lum > NEAR_BLACK {
        Adjustment::Scale(target_lum / foreground_lum)
    } else {
        let x = (target_lum / 0.2126).sqrt().clamp(0.0, 1.0);
        Adjustment::Gray((x * 255.0).round() as u8)
    }
}

/// Apply an adjustment to an RGBA color. Alpha is preserved unchanged.
#[inline]
pub fn apply(color: [u8; 4], adjustment: Adjustment) -> [u8; 4] {
    match adjustment {
        Adjustment::Keep => color,
        Adjustment::Scale(scale) => {
            let scaled = |c: u8| ((c as f32 * scale).round()).clamp(0.0, 255.0) as u8;
            [scaled(color[0]), scaled(color[1]), scaled(color[2]), color[3]]
        }
        Adjustment::Gray(level) => [level, level, level, color[3]],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn luminance_bounds() {
        assert_eq!(relative_luminance(0, 0, 0), 0.0);
        assert!((relative_luminance(255, 255, 255) - 1.0).abs() < 1e-4);
        for &(r, g, b) in &[(12, 200, 7), (255, 0, 255), (1, 1, 1), (128, 128, 128)] {
            let l = relative_luminance(r, g, b);
            assert!((0.0..=1.0).contains(&l), "lum({r},{g},{b}) = {l}");
        }
    }

    #[test]
    fn linearization_threshold_is_exact() {
        // 10/255 ≈ 0.0392 sits just below the 0.03928 knee, 11/255 above it.
        let below = srgb_to_linear(10);
        assert!((below - (10.0 / 255.0) / 12.92).abs() < 1e-7);
        let above = srgb_to_linear(11);
        let c = 11.0f32 / 255.0;
        assert!((above - ((c + 0.055) / 1.055).powf(2.4)).abs() < 1e-7);
    }

    #[test]
    fn ratio_range_and_symmetry() {
        let samples = [0.0f32, 0.013, 0.2, 0.5, 0.77, 1.0];
        for &l1 in &samples {
            for &l2 in &samples {
                let r = contrast_ratio(l1, l2);
                assert!((1.0..=21.0 + 1e-4).contains(&r));
                assert!((r - contrast_ratio(l2, l1)).abs() < 1e-6);
            }
            assert!((contrast_ratio(l1, l1) - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn black_on_white_is_twenty_one() {
        let black = relative_luminance(0, 0, 0);
        let white = relative_luminance(255, 255, 255);
        assert!((contrast_ratio(black, white) - 21.0).abs() < 0.01);
    }

    #[test]
    fn compliant_colors_are_kept() {
        // 5.9:1 against a 4.5 target is already compliant.
        assert_eq!(adjustment(5.9, 4.5, 0.12, 1.0), Adjustment::Keep);
        assert_eq!(adjustment(4.5, 4.5, 0.12, 1.0), Adjustment::Keep);
        let color = [100, 150, 200, 37];
        assert_eq!(apply(color, Adjustment::Keep), color);
    }

    #[test]
    fn dark_text_gets_darker() {
        let fg = relative_luminance(120, 120, 120);
        let bg = relative_luminance(255, 255, 255);
        let ratio = contrast_ratio(fg, bg);
        match adjustment(ratio, 7.0, fg, bg) {
            Adjustment::Scale(s) => {
                assert!(s < 1.0, "darker foreground should scale down, got {s}");
                let out = apply([120, 120, 120, 255], Adjustment::Scale(s));
                let new_lum = relative_luminance(out[0], out[1], out[2]);
                assert!(contrast_ratio(new_lum, bg) >= 7.0 - 0.2);
                assert_eq!(out[3], 255);
            }
            other => panic!("expected scale, got {other:?}"),
        }
    }

    #[test]
    fn light_text_gets_lighter() {
        let fg = relative_luminance(110, 110, 110);
        let bg = relative_luminance(0, 0, 0);
        let ratio = contrast_ratio(fg, bg);
        match adjustment(ratio, 7.0, fg, bg) {
            Adjustment::Scale(s) => assert!(s > 1.0),
            other => panic!("expected scale, got {other:?}"),
        }
    }

    #[test]
    fn near_black_maps_to_gray() {
        let bg = relative_luminance(20, 20, 20); // dark background
        let ratio = contrast_ratio(0.0, bg);
        match adjustment(ratio, 4.5, 0.0, bg) {
            Adjustment::Gray(level) => {
                assert!(level > 0);
                let out = apply([0, 0, 0, 200], Adjustment::Gray(level));
                assert_eq!(out, [level, level, level, 200]);
            }
            other => panic!("expected gray, got {other:?}"),
        }
    }

    #[test]
    fn scale_clamps_channels() {
        let out = apply([200, 10, 255, 255], Adjustment::Scale(2.0));
        assert_eq!(out, [255, 20, 255, 255]);
    }
}
