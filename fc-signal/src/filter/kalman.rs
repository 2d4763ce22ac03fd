//! Scalar Kalman filter: one-dimensional state, identity transition.

use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterStats};

pub struct KalmanFilter {
    /// State estimate.
    x: f64,
    /// Estimate error covariance.
    p: f64,
    /// Process noise covariance.
    q: f64,
    /// Measurement noise covariance.
    r: f64,
    /// Last Kalman gain.
    k: f64,
    initial_estimate: f64,
    initial_error: f64,
    gain_sum: f64,
    innovation_sum: f64,
    stats: FilterStats,
}

impl KalmanFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            x: config.initial_estimate,
            p: config.initial_error,
            q: config.process_noise,
            r: config.measurement_noise,
            k: 0.0,
            initial_estimate: config.initial_estimate,
            initial_error: config.initial_error,
            gain_sum: 0.0,
            innovation_sum: 0.0,
            stats: FilterStats::default(),
        }
    }
}

impl DigitalFilter for KalmanFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();

        // Predict (identity transition).
        let x_pred = self.x;
        let p_pred = self.p + self.q;

        // Update.
        let innovation = sample.value - x_pred;
        let s = p_pred + self.r;
        self.k = p_pred / s;
        self.x = x_pred + self.k * innovation;
        self.p = (1.0 - self.k) * p_pred;

        self.gain_sum += self.k;
        self.innovation_sum += innovation.abs();

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: self.x,
            group_delay: 0.0,
            gain: self.k,
            processing_time: elapsed,
        }
    }

    fn reset(&mut self) {
        self.x = self.initial_estimate;
        self.p = self.initial_error;
        self.k = 0.0;
        self.gain_sum = 0.0;
        self.innovation_sum = 0.0;
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        let n = self.stats.samples_processed.max(1) as f64;
        stats.extra.push(("kalman_gain_avg", self.gain_sum / n));
        stats
            .extra
            .push(("innovation_avg", self.innovation_sum / n));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMethod;

    fn config() -> FilterConfig {
        FilterConfig {
            method: FilterMethod::Kalman,
            process_noise: 0.01,
            measurement_noise: 1.0,
            initial_estimate: 0.0,
            initial_error: 1.0,
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
    fn tracks_a_constant_signal() {
        let mut filter = KalmanFilter::new(&config());
        let mut estimate = 0.0;
        for _ in 0..500 {
            estimate = filter.process(&sample(10.0)).filtered_value;
        }
        assert!((estimate - 10.0).abs() < 0.1, "estimate {}", estimate);
    }

    #[test]
    fn smooths_alternating_noise() {
        let mut filter = KalmanFilter::new(&config());
        let mut last = 0.0;
        for n in 0..500 {
            let noise = if n % 2 == 0 { 0.5 } else { -0.5 };
            last = filter.process(&sample(5.0 + noise)).filtered_value;
        }
        // Steady-state estimate hugs the mean far tighter than the noise.
        assert!((last - 5.0).abs() < 0.2, "estimate {}", last);
    }

    #[test]
    fn gain_decreases_as_estimate_converges() {
        let mut filter = KalmanFilter::new(&config());
        let first_gain = filter.process(&sample(1.0)).gain;
        let mut late_gain = first_gain;
        for _ in 0..200 {
            late_gain = filter.process(&sample(1.0)).gain;
        }
        assert!(late_gain < first_gain);
    }

    #[test]
    fn reset_restores_initial_state() {
        let mut filter = KalmanFilter::new(&config());
        for _ in 0..50 {
            filter.process(&sample(42.0));
        }
        filter.reset();
        assert_eq!(filter.stats().samples_processed, 0);
        let out = filter.process(&sample(0.0)).filtered_value;
        assert!(out.abs() < 1.0);
    }
}
