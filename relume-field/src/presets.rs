// SPDX-License-Identifier: MIT
//! Pipeline configuration and contrast-target presets.
//!
//! [`ContrastConfig`] carries the per-call knobs of the adjustment pipeline and
//! validates them up front with per-field messages, so a bad value fails the
//! call instead of silently producing a garbage frame. [`TargetPreset`] names
//! the common WCAG targets for CLI use.

use std::fmt;

/// Per-call configuration for the contrast pipeline. Immutable once handed in.
#[derive(Debug, Clone, Copy)]
pub struct ContrastConfig {
    /// Glyph-extraction cutoff: cells farther than this from any foreground
    /// are not considered part of text. Pixels.
    pub max_distance: f32,
    /// Contrast ratio to reach, in [1, 21]. 4.5 is WCAG AA, 7.0 is AAA.
    pub target_contrast: f32,
    /// How far along a glyph pixel's away-direction to sample the background.
    /// Should exceed half the expected stroke width. Pixels.
    pub sample_distance: f32,
    /// Repeat the distance-field sweep for smoother fields on concave shapes.
    pub use_relaxation: bool,
}

impl Default for ContrastConfig {
    fn default() -> Self {
        Self {
            max_distance: 3.0,
            target_contrast: 4.5,
            sample_distance: 2.5,
            use_relaxation: false,
        }
    }
}

impl ContrastConfig {
    /// Validate every field, reporting the first offender.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.max_distance.is_finite() || self.max_distance <= 0.0 {
            return Err(ConfigError::new(
                "max_distance",
                self.max_distance,
                "must be a finite value greater than 0",
            ));
        }
        if !self.target_contrast.is_finite()
            || !(1.0..=21.0).contains(&self.target_contrast)
        {
            return Err(ConfigError::new(
                "target_contrast",
                self.target_contrast,
                "must lie in the WCAG ratio range [1, 21]",
            ));
        }
        if !self.sample_distance.is_finite() || self.sample_distance <= 0.0 {
            return Err(ConfigError::new(
                "sample_distance",
                self.sample_distance,
                "must be a finite value greater than 0",
            ));
        }
        Ok(())
    }
}

/// A configuration field failed validation.
#[derive(Debug)]
pub struct ConfigError {
    pub field: &'static str,
    pub value: f32,
    pub reason: &'static str,
}

impl ConfigError {
    fn new(field: &'static str, value: f32, reason: &'static str) -> Self {
        Self {
            field,
            value,
            reason,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid config field '{}': {} (value: {})",
            self.field, self.reason, self.value
        )
    }
}

impl std::error::Error for ConfigError {}

/// Named WCAG contrast targets.
///
/// The success criteria distinguish normal text, large text, and the enhanced
/// level; these map onto the three ratios a caller actually reaches for.
#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum TargetPreset {
    /// 4.5:1, AA for normal-size text.
    #[clap(name = "aa")]
    AaNormal,
    /// 3.0:1, AA for large-scale text.
    #[clap(name = "aa-large")]
    AaLarge,
    /// 7.0:1, AAA for normal-size text.
    #[clap(name = "aaa")]
    AaaNormal,
}

impl TargetPreset {
    /// The contrast ratio this preset targets.
    pub fn ratio(self) -> f32 {
        match self {
            TargetPreset::AaNormal => 4.5,
            TargetPreset::AaLarge => 3.0,
            TargetPreset::AaaNormal => 7.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(ContrastConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_out_of_range_fields() {
        let bad = ContrastConfig {
            max_distance: 0.0,
            ..Default::default()
        };
        let err = bad.validate().unwrap_err();
        assert_eq!(err.field, "max_distance");

        let bad = ContrastConfig {
            target_contrast: 30.0,
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "target_contrast");

        let bad = ContrastConfig {
            sample_distance: f32::NAN,
            ..Default::default()
        };
        assert_eq!(bad.validate().unwrap_err().field, "sample_distance");
    }

    #[test]
    fn presets_match_wcag_ratios() {
        assert_eq!(TargetPreset::AaNormal.ratio(), 4.5);
        assert_eq!(TargetPreset::AaLarge.ratio(), 3.0);
        assert_eq!(TargetPreset::AaaNormal.ratio(), 7.0);
    }
}
