//! LMS adaptive filter with a fixed tap count.
//!
//! Adaptation needs a reference signal. Inside a chain no reference is
//! available, so the weights freeze and the filter acts as a fixed FIR;
//! callers that have a reference use [`LmsFilter::process_adaptive`].

use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterStats};

pub struct LmsFilter {
    weights: Vec<f64>,
    input: Vec<f64>,
    mu: f64,
    last_error: f64,
    updates: u64,
    stats: FilterStats,
}

impl LmsFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            weights: vec![0.0; config.taps],
            input: vec![0.0; config.taps],
            mu: config.adaptation_rate,
            last_error: 0.0,
            updates: 0,
            stats: FilterStats::default(),
        }
    }

    fn output(&mut self, sample: &Sample) -> f64 {
        self.input.rotate_right(1);
        self.input[0] = sample.value;
        self.weights
            .iter()
            .zip(&self.input)
            .map(|(w, x)| w * x)
            .sum()
    }

    /// Process with a reference: the weights chase the reference via the
    /// LMS update `w += mu * e * x`.
    pub fn process_adaptive(&mut self, sample: &Sample, reference: f64) -> FilteredSample {
        let start = Instant::now();
        let y = self.output(sample);
        let error = reference - y;
        self.last_error = error;
        self.updates += 1;
        for (w, x) in self.weights.iter_mut().zip(&self.input) {
            *w += self.mu * error * x;
        }
        self.finish(sample, y, start)
    }

    fn finish(&mut self, sample: &Sample, y: f64, start: Instant) -> FilteredSample {
        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: y,
            group_delay: (self.weights.len() - 1) as f64 / 2.0,
            gain: 1.0,
            processing_time: elapsed,
        }
    }
}

impl DigitalFilter for LmsFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();
        let y = self.output(sample);
        self.finish(sample, y, start)
    }

    fn reset(&mut self) {
        self.weights.iter_mut().for_each(|w| *w = 0.0);
        self.input.iter_mut().for_each(|x| *x = 0.0);
        self.last_error = 0.0;
        self.updates = 0;
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        stats.extra.push(("weight_updates", self.updates as f64));
        stats.extra.push(("last_error", self.last_error));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{FilterMethod, FilterConfig};

    fn config(taps: usize, mu: f64) -> FilterConfig {
        FilterConfig {
            method: FilterMethod::Lms,
            taps,
            adaptation_rate: mu,
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
    fn converges_to_identity_for_matching_reference() {
        let mut filter = LmsFilter::new(&config(4, 0.1));
        // Reference equals input: weights should learn a passthrough.
        let mut error = f64::MAX;
        for n in 0..500 {
            let x = if n % 2 == 0 { 1.0 } else { -0.5 };
            let out = filter.process_adaptive(&sample(x), x);
            error = (x - out.filtered_value).abs();
        }
        assert!(error < 0.05, "residual error {}", error);
    }

    #[test]
    fn without_reference_weights_freeze() {
        let mut filter = LmsFilter::new(&config(4, 0.1));
        for _ in 0..10 {
            let out = filter.process(&sample(1.0));
            // Zero-initialized weights, no adaptation: output stays zero.
            assert_eq!(out.filtered_value, 0.0);
        }
        assert_eq!(
            filter
                .stats()
                .extra
                .iter()
                .find(|(n, _)| *n == "weight_updates")
                .unwrap()
                .1,
            0.0
        );
    }

    #[test]
    fn reset_forgets_learned_weights() {
        let mut filter = LmsFilter::new(&config(4, 0.1));
        for _ in 0..100 {
            filter.process_adaptive(&sample(1.0), 1.0);
        }
        filter.reset();
        let out = filter.process(&sample(1.0));
        assert_eq!(out.filtered_value, 0.0);
    }
}
