//! Alpha-beta filter: fixed-gain position/velocity estimator.

use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterStats};

pub struct AlphaBetaFilter {
    alpha: f64,
    beta: f64,
    /// Sample interval.
    dt: f64,
    position: f64,
    velocity: f64,
    primed: bool,
    velocity_abs_sum: f64,
    stats: FilterStats,
}

impl AlphaBetaFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            alpha: config.alpha,
            beta: config.beta,
            dt: 1.0 / config.sampling_rate,
            position: 0.0,
            velocity: 0.0,
            primed: false,
            velocity_abs_sum: 0.0,
            stats: FilterStats::default(),
        }
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }
}

impl DigitalFilter for AlphaBetaFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();

        if !self.primed {
            self.position = sample.value;
            self.velocity = 0.0;
            self.primed = true;
        } else {
            let predicted = self.position + self.velocity * self.dt;
            let residual = sample.value - predicted;
            self.position = predicted + self.alpha * residual;
            self.velocity += self.beta * residual / self.dt;
        }
        self.velocity_abs_sum += self.velocity.abs();

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: self.position,
            group_delay: 0.0,
            gain: self.alpha,
            processing_time: elapsed,
        }
    }

    fn reset(&mut self) {
        self.position = 0.0;
        self.velocity = 0.0;
        self.primed = false;
        self.velocity_abs_sum = 0.0;
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        let n = self.stats.samples_processed.max(1) as f64;
        stats
            .extra
            .push(("velocity_avg", self.velocity_abs_sum / n));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMethod;

    fn config(alpha: f64, beta: f64) -> FilterConfig {
        FilterConfig {
            method: FilterMethod::AlphaBeta,
            alpha,
            beta,
            sampling_rate: 100.0,
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
    fn first_sample_initializes_position() {
        let mut filter = AlphaBetaFilter::new(&config(0.85, 0.005));
        let out = filter.process(&sample(1_500.0));
        assert!((out.filtered_value - 1_500.0).abs() < f64::EPSILON);
        assert_eq!(filter.velocity(), 0.0);
    }

    #[test]
    fn tracks_a_ramp() {
        let mut filter = AlphaBetaFilter::new(&config(0.85, 0.05));
        let mut error = f64::MAX;
        for n in 0..500 {
            // 10 units per sample.
            let truth = 10.0 * n as f64;
            let out = filter.process(&sample(truth));
            error = (out.filtered_value - truth).abs();
        }
        assert!(error < 5.0, "lag {}", error);
        assert!(filter.velocity() > 0.0);
    }

    #[test]
    fn gain_field_reports_alpha() {
        let mut filter = AlphaBetaFilter::new(&config(0.3, 0.005));
        let out = filter.process(&sample(1.0));
        assert!((out.gain - 0.3).abs() < f64::EPSILON);
    }

    #[test]
    fn reset_unprimes() {
        let mut filter = AlphaBetaFilter::new(&config(0.85, 0.005));
        filter.process(&sample(100.0));
        filter.reset();
        let out = filter.process(&sample(5.0));
        assert!((out.filtered_value - 5.0).abs() < f64::EPSILON);
    }
}
