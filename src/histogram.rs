//! C9: Histogram / Feedback — 256-bin readback stats and auto-threshold
//! parameter updates (§4.9).
//!
//! Grounded in `pool.rs`'s mappable-staging-buffer pattern (a
//! `COPY_DST | MAP_READ` buffer copied into, then `map_async`/`get_mapped_range`),
//! generalized from raw pixel readback to a 256-bin histogram reduction
//! plus the derived statistics the spec's feedback loop needs.
use std::collections::HashMap;

use crate::buffer_manager::FilterBuffer;
use crate::error::EngineError;
use crate::filter::Binding;

pub const BIN_COUNT: usize = 256;

/// Derived statistics over a 256-bin histogram (§4.9).
#[derive(Clone, Debug, PartialEq)]
pub struct HistogramStats {
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    pub median: f32,
    pub total: u64,
    pub normalized: Vec<f32>,
}

impl HistogramStats {
    /// All-null stats for a zero-sample histogram (§4.9 "total == 0 ->
    /// all-null stats"): every derived field zeroed rather than `NaN`.
    pub fn all_null() -> Self {
        HistogramStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
            total: 0,
            normalized: vec![0.0; BIN_COUNT],
        }
    }

    /// Reduce raw per-bin counts into stats. `bins.len()` must be
    /// `BIN_COUNT`; a mismatched length is a programmer error upstream
    /// (the buffer layout is fixed, so this never happens from live data).
    pub fn from_bins(bins: &[u32]) -> Self {
        debug_assert_eq!(bins.len(), BIN_COUNT);
        let total: u64 = bins.iter().map(|&count| count as u64).sum();
        if total == 0 {
            return HistogramStats::all_null();
        }

        let mut min = None;
        let mut max = None;
        let mut weighted_sum = 0f64;

        for (bin, &count) in bins.iter().enumerate() {
            if count == 0 {
                continue;
            }
            min.get_or_insert(bin);
            max = Some(bin);
            weighted_sum += bin as f64 * count as f64;
        }

        let min = min.unwrap_or(0) as f32;
        let max = max.unwrap_or(0) as f32;
        let mean = (weighted_sum / total as f64) as f32;
        let median = Self::interpolated_median(bins, total);
        let normalized = bins.iter().map(|&count| count as f32 / total as f32).collect();

        HistogramStats { min, max, mean, median, total, normalized }
    }

    /// The median bin, linearly interpolated within the bin that crosses
    /// the 50th percentile (§4.9 "interpolated median").
    fn interpolated_median(bins: &[u32], total: u64) -> f32 {
        let half = total as f64 / 2.0;
        let mut cumulative = 0f64;
        for (bin, &count) in bins.iter().enumerate() {
            let next = cumulative + count as f64;
            if next >= half && count > 0 {
                let fraction = (half - cumulative) / count as f64;
                return bin as f32 + fraction as f32;
            }
            cumulative = next;
        }
        (bins.len() - 1) as f32
    }
}

/// Copies a storage buffer into a `MAP_READ` staging buffer and reads it
/// back, decoding 256 little-endian `u32` bin counts (§4.9 "readback via
/// mappable-buffer copy + map/unmap").
pub async fn read_histogram_bins(device: &wgpu::Device, queue: &wgpu::Queue, source: &wgpu::Buffer) -> Result<Vec<u32>, EngineError> {
    let byte_len = (BIN_COUNT * 4) as u64;
    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("histogram-readback"),
        size: byte_len,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: None });
    encoder.copy_buffer_to_buffer(source, 0, &staging, 0, byte_len);
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = futures_channel_oneshot();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);

    receiver
        .recv()
        .map_err(|_| EngineError::Internal("histogram readback channel closed".into()))?
        .map_err(|_| EngineError::Internal("histogram buffer mapping failed".into()))?;

    let bytes = slice.get_mapped_range();
    let bins: Vec<u32> = bytes.chunks_exact(4).map(|chunk| u32::from_le_bytes(chunk.try_into().unwrap())).collect();
    drop(bytes);
    staging.unmap();

    Ok(bins)
}

/// A minimal synchronous rendezvous channel, standing in for the
/// callback-based `map_async` API's need for a blocking wait point
/// without pulling in a full async runtime (the teacher itself blocks on
/// futures via `waker_fn`/`pollster`, never tokio/async-std).
fn futures_channel_oneshot<T>() -> (std::sync::mpsc::Sender<T>, std::sync::mpsc::Receiver<T>) {
    std::sync::mpsc::channel()
}

/// Auto-threshold feedback (§4.9): derive `samplePoint`/`range` uniform
/// updates from histogram stats and apply them, marking the filter for
/// re-render.
pub fn auto_threshold_updates(stats: &HistogramStats) -> HashMap<String, Binding> {
    let sample = (stats.median / 255.0).clamp(0.001, 0.999);
    let range = ((stats.max - stats.min) / 255.0).clamp(0.001, 1.0);

    let mut updates = HashMap::new();
    updates.insert("samplePoint".to_string(), Binding::Uniform(sample));
    updates.insert("range".to_string(), Binding::Uniform(range));
    updates
}

pub fn apply_auto_threshold(
    queue: &wgpu::Queue,
    filter_name: &str,
    target: &FilterBuffer,
    stats: &HistogramStats,
) -> Result<HashMap<String, Binding>, EngineError> {
    let updates = auto_threshold_updates(stats);
    crate::buffer_manager::BufferManager::apply_update(queue, filter_name, target, &updates)?;
    Ok(updates)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_total_gives_all_null_stats() {
        let bins = vec![0u32; BIN_COUNT];
        let stats = HistogramStats::from_bins(&bins);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.min, 0.0);
        assert_eq!(stats.max, 0.0);
        assert!(stats.normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn single_bin_has_degenerate_stats() {
        let mut bins = vec![0u32; BIN_COUNT];
        bins[128] = 10;
        let stats = HistogramStats::from_bins(&bins);
        assert_eq!(stats.min, 128.0);
        assert_eq!(stats.max, 128.0);
        assert_eq!(stats.mean, 128.0);
        assert_eq!(stats.median, 128.0);
        assert_eq!(stats.total, 10);
    }

    #[test]
    fn median_interpolates_within_crossing_bin() {
        let mut bins = vec![0u32; BIN_COUNT];
        bins[0] = 5;
        bins[10] = 5;
        let stats = HistogramStats::from_bins(&bins);
        // half = 5; bin 0 alone already reaches cumulative >= half, so
        // the crossing bin is bin 0 itself: 0 + (5-0)/5 = 1.0.
        assert_eq!(stats.median, 1.0);
    }

    #[test]
    fn auto_threshold_clamps_to_valid_ranges() {
        let stats = HistogramStats {
            min: 0.0,
            max: 0.0,
            mean: 0.0,
            median: 0.0,
            total: 1,
            normalized: vec![0.0; BIN_COUNT],
        };
        let updates = auto_threshold_updates(&stats);
        match updates.get("samplePoint") {
            Some(Binding::Uniform(v)) => assert!((*v - 0.001).abs() < 1e-6),
            _ => panic!("expected samplePoint uniform"),
        }
        match updates.get("range") {
            Some(Binding::Uniform(v)) => assert!((*v - 0.001).abs() < 1e-6),
            _ => panic!("expected range uniform"),
        }
    }
}
