//! # Pipeline Metrics
//!
//! Per-call timing and throughput records, kept in a bounded ring so a
//! long-running session holds a sliding window of recent history instead of a
//! growing list. The ring, its summary, and the report below are the only
//! state the pipeline persists, and only for the lifetime of the process.

use std::collections::VecDeque;
use std::time::SystemTime;

/// How many pipeline calls of history the ring retains.
pub const METRICS_CAPACITY: usize = 120;

/// One record per `run_full_pipeline` call.
#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    /// Label of the backend that produced the result (after any fallback).
    pub backend: &'static str,
    pub width: u32,
    pub height: u32,
    pub total_pixels: u64,
    /// Pixels whose color actually changed.
    pub adjusted_pixels: u64,
    /// Time spent inside the backend.
    pub pipeline_ms: f64,
    /// Dispatch, validation and bookkeeping around the backend call.
    pub overhead_ms: f64,
    pub total_ms: f64,
    /// Pixels per millisecond over the whole call.
    pub throughput: f64,
    pub timestamp: SystemTime,
}

impl PipelineMetrics {
    pub fn new(
        backend: &'static str,
        width: u32,
        height: u32,
        adjusted_pixels: u64,
        pipeline_ms: f64,
        overhead_ms: f64,
    ) -> Self {
        let total_pixels = width as u64 * height as u64;
        let total_ms = pipeline_ms + overhead_ms;
        Self {
            backend,
            width,
            height,
            total_pixels,
            adjusted_pixels,
            pipeline_ms,
            overhead_ms,
            total_ms,
            throughput: total_pixels as f64 / total_ms.max(1e-6),
            timestamp: SystemTime::now(),
        }
    }
}

/// Aggregates over the current ring contents.
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub calls: usize,
    pub avg_pipeline_ms: f64,
    pub avg_total_ms: f64,
    pub peak_total_ms: f64,
    pub avg_throughput: f64,
    pub total_adjusted_pixels: u64,
}

/// Bounded history of pipeline metrics: oldest entries are evicted first.
#[derive(Debug, Default)]
pub struct MetricsRing {
    entries: VecDeque<PipelineMetrics>,
}

impl MetricsRing {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(METRICS_CAPACITY),
        }
    }

    pub fn push(&mut self, entry: PipelineMetrics) {
        if self.entries.len() == METRICS_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&PipelineMetrics> {
        self.entries.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &PipelineMetrics> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn summary(&self) -> MetricsSummary {
        if self.entries.is_empty() {
            return MetricsSummary::default();
        }
        let calls = self.entries.len();
        let mut summary = MetricsSummary {
            calls,
            ..Default::default()
        };
        for entry in &self.entries {
            summary.avg_pipeline_ms += entry.pipeline_ms;
            summary.avg_total_ms += entry.total_ms;
            summary.avg_throughput += entry.throughput;
            summary.peak_total_ms = summary.peak_total_ms.max(entry.total_ms);
            summary.total_adjusted_pixels += entry.adjusted_pixels;
        }
        summary.avg_pipeline_ms /= calls as f64;
        summary.avg_total_ms /= calls as f64;
        summary.avg_throughput /= calls as f64;
        summary
    }

    /// Human-readable report over the retained window.
    pub fn report(&self) -> String {
        let summary = self.summary();
        let backend = self
            .latest()
            .map(|entry| entry.backend)
            .unwrap_or("none");
        let dims = self
            .latest()
            .map(|entry| format!("{}x{}", entry.width, entry.height))
            .unwrap_or_else(|| "-".to_string());

        format!(
            "Contrast Pipeline Metrics\n\
             =========================\n\
             Calls retained:     {} (capacity {})\n\
             Active backend:     {}\n\
             Frame size:         {}\n\
             Avg pipeline time:  {:.3} ms\n\
             Avg total time:     {:.3} ms\n\
             Peak total time:    {:.3} ms\n\
             Avg throughput:     {:.1} px/ms\n\
             Adjusted pixels:    {}\n",
            summary.calls,
            METRICS_CAPACITY,
            backend,
            dims,
            summary.avg_pipeline_ms,
            summary.avg_total_ms,
            summary.peak_total_ms,
            summary.avg_throughput,
            summary.total_adjusted_pixels,
        )
    }

    /// JSON export of every retained entry, newest last.
    pub fn to_json(&self) -> serde_json::Value {
        let entries: Vec<serde_json::Value> = self
            .entries
            .iter()
            .map(|entry| {
                let epoch_ms = entry
                    .timestamp
                    .duration_since(SystemTime::UNIX_EPOCH)
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0);
                serde_json::json!({
                    "backend": entry.backend,
                    "width": entry.width,
                    "height": entry.height,
                    "total_pixels": entry.total_pixels,
                    "adjusted_pixels": entry.adjusted_pixels,
                    "pipeline_ms": entry.pipeline_ms,
                    "overhead_ms": entry.overhead_ms,
                    "total_ms": entry.total_ms,
                    "throughput_px_per_ms": entry.throughput,
                    "timestamp_ms": epoch_ms,
                })
            })
            .collect();
        serde_json::Value::Array(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(backend: &'static str, adjusted: u64) -> PipelineMetrics {
        PipelineMetrics::new(backend, 64, 32, adjusted, 2.0, 0.5)
    }

    #[test]
    fn derived_fields() {
        let m = entry("reference", 10);
        assert_eq!(m.total_pixels, 64 * 32);
        assert!((m.total_ms - 2.5).abs() < 1e-9);
        assert!((m.throughput - (64.0 * 32.0) / 2.5).abs() < 1e-6);
    }

    #[test]
    fn ring_is_bounded() {
        let mut ring = MetricsRing::new();
        for i in 0..(METRICS_CAPACITY + 15) {
            ring.push(entry("reference", i as u64));
        }
        assert_eq!(ring.len(), METRICS_CAPACITY);
        // Oldest evicted first: the first retained entry is number 15.
        assert_eq!(ring.iter().next().unwrap().adjusted_pixels, 15);
        assert_eq!(
            ring.latest().unwrap().adjusted_pixels,
            (METRICS_CAPACITY + 14) as u64
        );
    }

    #[test]
    fn summary_aggregates() {
        let mut ring = MetricsRing::new();
        ring.push(entry("reference", 5));
        ring.push(entry("native-rayon", 7));
        let summary = ring.summary();
        assert_eq!(summary.calls, 2);
        assert_eq!(summary.total_adjusted_pixels, 12);
        assert!((summary.avg_total_ms - 2.5).abs() < 1e-9);
    }

    #[test]
    fn json_export_shape() {
        let mut ring = MetricsRing::new();
        ring.push(entry("reference", 3));
        let json = ring.to_json();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["backend"], "reference");
        assert_eq!(arr[0]["adjusted_pixels"], 3);
    }
}
