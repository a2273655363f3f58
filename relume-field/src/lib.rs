// SPDX-License-Identifier: MIT
//! # relume-field: Distance-Field and Contrast Kernels for Text Recoloring
//!
//! This crate provides the per-pixel math behind low-contrast text detection and
//! recoloring: an approximate Euclidean distance transform over a text-coverage
//! grid, WCAG luminance/contrast arithmetic, and the classification rule that
//! turns a distance field into a set of adjustable glyph pixels.
//!
//! ## Architecture Overview
//!
//! The crate is deliberately small and dependency-light:
//! 1. **Pure functions**: every kernel is a plain function over slices
//! 2. **No I/O, no threads, no GPU**: callers own parallelism and transport
//! 3. **Buffer-reuse friendly**: `_into` variants write into caller buffers
//!
//! ## Key Components
//!
//! - [`esdt`]: offset-field propagation (four directional sweeps) and edge weights
//! - [`contrast`]: sRGB linearization, WCAG relative luminance, contrast ratio,
//!   and the color-adjustment rule
//! - [`coverage`]: RGBA → text-coverage grid with automatic polarity detection
//! - [`glyph`]: glyph-pixel classification and background sample placement
//! - [`presets`]: validated pipeline configuration and contrast-target presets
//!
//! ## Usage Example
//!
//! ```rust
//! use relume_field::{coverage, esdt};
//!
//! let (w, h) = (16usize, 16usize);
//! let rgba = vec![255u8; w * h * 4]; // blank white frame
//!
//! let polarity = coverage::detect_polarity(&rgba, w, h);
//! let mut levels = Vec::new();
//! coverage::coverage_map(&rgba, w, h, polarity, &mut levels);
//!
//! let field = esdt::compute_distance_field(&levels, w, h, false).unwrap();
//! assert!(field.distance(0, 0) > 1000.0); // no foreground anywhere
//! ```

pub mod contrast;
pub mod coverage;
pub mod esdt;
pub mod glyph;
pub mod presets;

pub use contrast::{adjustment, apply, contrast_ratio, relative_luminance, Adjustment};
pub use coverage::Polarity;
pub use esdt::{compute_distance_field, edge_weight, OffsetField, SENTINEL};
pub use glyph::GlyphPixel;
pub use presets::{ContrastConfig, TargetPreset};
