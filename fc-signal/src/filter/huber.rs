//! Huber robust filter: windowed median with Huber-weighted averaging.
//!
//! Outliers past the threshold get down-weighted instead of discarded,
//! so a stuck or sparking tachometer cannot drag the estimate far.

use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterStats};

pub struct HuberFilter {
    threshold: f64,
    window_size: usize,
    buffer: Vec<f64>,
    value: f64,
    outliers: u64,
    stats: FilterStats,
}

impl HuberFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            threshold: config.huber_threshold,
            window_size: config.huber_window,
            buffer: Vec::with_capacity(config.huber_window),
            value: 0.0,
            outliers: 0,
            stats: FilterStats::default(),
        }
    }

    fn huber_weight(&self, residual: f64) -> f64 {
        let abs = residual.abs();
        if abs <= self.threshold {
            1.0
        } else {
            self.threshold / abs
        }
    }

    fn median(values: &[f64]) -> f64 {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            (sorted[mid - 1] + sorted[mid]) / 2.0
        } else {
            sorted[mid]
        }
    }
}

impl DigitalFilter for HuberFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();

        self.buffer.push(sample.value);
        if self.buffer.len() > self.window_size {
            self.buffer.remove(0);
        }

        if self.buffer.len() == 1 {
            self.value = sample.value;
        } else {
            let median = Self::median(&self.buffer);
            let mut weighted_sum = 0.0;
            let mut weight_sum = 0.0;
            for &v in &self.buffer {
                let weight = self.huber_weight(v - median);
                if weight < 1.0 {
                    self.outliers += 1;
                }
                weighted_sum += weight * v;
                weight_sum += weight;
            }
            self.value = if weight_sum > 0.0 {
                weighted_sum / weight_sum
            } else {
                median
            };
        }

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: self.value,
            group_delay: self.buffer.len() as f64 / 2.0,
            gain: 1.0,
            processing_time: elapsed,
        }
    }

    fn reset(&mut self) {
        self.buffer.clear();
        self.value = 0.0;
        self.outliers = 0;
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        stats.extra.push(("outliers_detected", self.outliers as f64));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMethod;

    fn config(window: usize, threshold: f64) -> FilterConfig {
        FilterConfig {
            method: FilterMethod::Huber,
            huber_window: window,
            huber_threshold: threshold,
            ..FilterConfig::default()
        }
    }

    fn sample(value: f64) -> Sample {
        Sample {
            timestamp: 0.0,
            channel_id: 0,
            value,
            raw_value: 0,
            quality: 1.0,
        }
    }

    #[test]
    fn first_sample_passes_through() {
        let mut filter = HuberFilter::new(&config(5, 1.345));
        let out = filter.process(&sample(7.0));
        assert!((out.filtered_value - 7.0).abs() < f64::EPSILON);
    }

    #[test]
    fn outlier_is_downweighted_not_followed() {
        let mut filter = HuberFilter::new(&config(5, 1.345));
        for _ in 0..5 {
            filter.process(&sample(100.0));
        }
        let out = filter.process(&sample(1_000.0)).filtered_value;
        // A plain mean of the window would be 280.
        assert!(out < 200.0, "outlier dragged estimate to {}", out);

        let outliers = filter
            .stats()
            .extra
            .iter()
            .find(|(n, _)| *n == "outliers_detected")
            .unwrap()
            .1;
        assert!(outliers >= 1.0);
    }

    #[test]
    fn clean_signal_counts_no_outliers() {
        let mut filter = HuberFilter::new(&config(5, 1.345));
        let mut out = 0.0;
        for _ in 0..20 {
            out = filter.process(&sample(50.0)).filtered_value;
        }
        assert!((out - 50.0).abs() < 1e-9);
        let outliers = filter
            .stats()
            .extra
            .iter()
            .find(|(n, _)| *n == "outliers_detected")
            .unwrap()
            .1;
        assert_eq!(outliers, 0.0);
    }

    #[test]
    fn window_slides() {
        let mut filter = HuberFilter::new(&config(3, 10.0));
        for v in [1.0, 2.0, 3.0, 4.0, 5.0] {
            filter.process(&sample(v));
        }
        // Window holds [3, 4, 5]; small threshold-free residuals give the
        // plain mean.
        let out = filter.process(&sample(6.0)).filtered_value;
        assert!((out - 5.0).abs() < 1e-9);
    }
}
