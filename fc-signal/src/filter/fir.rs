//! Windowed-sinc FIR filter with a moving-average special case.

use std::f64::consts::PI;
use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterKind, FilterStats, Window};

pub struct FirFilter {
    coefficients: Vec<f64>,
    delay_line: Vec<f64>,
    stats: FilterStats,
}

impl FirFilter {
    pub fn new(config: &FilterConfig) -> Self {
        let nyquist = config.sampling_rate / 2.0;
        let n = config.order + 1;
        let coefficients = match config.kind {
            FilterKind::Lowpass => design_lowpass(config.cutoff / nyquist, n, config.window),
            FilterKind::Highpass => design_highpass(config.cutoff / nyquist, n, config.window),
            FilterKind::Bandpass | FilterKind::Bandstop => design_bandpass(
                config.cutoff / nyquist,
                config.cutoff_high.unwrap_or(config.cutoff * 1.2) / nyquist,
                n,
                config.window,
            ),
            FilterKind::MovingAverage => vec![1.0 / n as f64; n],
        };
        let delay_line = vec![0.0; coefficients.len()];
        Self {
            coefficients,
            delay_line,
            stats: FilterStats::default(),
        }
    }

    pub fn tap_count(&self) -> usize {
        self.coefficients.len()
    }
}

fn sinc(x: f64) -> f64 {
    if x.abs() < 1e-12 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Zeroth-order modified Bessel function, for the Kaiser window.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..=25 {
        term *= (x / (2.0 * k as f64)).powi(2);
        sum += term;
        if term < 1e-12 * sum {
            break;
        }
    }
    sum
}

fn window_values(window: Window, n: usize) -> Vec<f64> {
    let m = (n - 1) as f64;
    (0..n)
        .map(|i| {
            let x = i as f64;
            match window {
                Window::Hamming => 0.54 - 0.46 * (2.0 * PI * x / m).cos(),
                Window::Hanning => 0.5 * (1.0 - (2.0 * PI * x / m).cos()),
                Window::Blackman => {
                    0.42 - 0.5 * (2.0 * PI * x / m).cos() + 0.08 * (4.0 * PI * x / m).cos()
                }
                Window::Kaiser => {
                    let beta = 8.6;
                    let arg = beta * (1.0 - (2.0 * x / m - 1.0).powi(2)).max(0.0).sqrt();
                    bessel_i0(arg) / bessel_i0(beta)
                }
                Window::Rectangular => 1.0,
            }
        })
        .collect()
}

fn ideal_lowpass(wc: f64, n: usize) -> Vec<f64> {
    let center = (n - 1) as f64 / 2.0;
    (0..n)
        .map(|i| sinc(2.0 * wc * (i as f64 - center)))
        .collect()
}

fn design_lowpass(wc: f64, n: usize, window: Window) -> Vec<f64> {
    let win = window_values(window, n);
    let mut h: Vec<f64> = ideal_lowpass(wc, n)
        .iter()
        .zip(&win)
        .map(|(a, b)| a * b)
        .collect();
    // Unity DC gain.
    let sum: f64 = h.iter().sum();
    if sum.abs() > f64::EPSILON {
        h.iter_mut().for_each(|v| *v /= sum);
    }
    h
}

/// Highpass by spectral inversion of the windowed lowpass.
fn design_highpass(wc: f64, n: usize, window: Window) -> Vec<f64> {
    let lp = design_lowpass(wc, n, window);
    let mut h = vec![0.0; n];
    h[(n - 1) / 2] = 1.0;
    h.iter_mut().zip(&lp).for_each(|(hp, l)| *hp -= l);
    h
}

/// Bandpass as the difference of two lowpass designs.
fn design_bandpass(wc1: f64, wc2: f64, n: usize, window: Window) -> Vec<f64> {
    let win = window_values(window, n);
    let lp1 = ideal_lowpass(wc1, n);
    let lp2 = ideal_lowpass(wc2, n);
    lp1.iter()
        .zip(&lp2)
        .zip(&win)
        .map(|((a, b), w)| (b - a) * w)
        .collect()
}

impl DigitalFilter for FirFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();
        self.delay_line.rotate_right(1);
        self.delay_line[0] = sample.value;

        let value: f64 = self
            .coefficients
            .iter()
            .zip(&self.delay_line)
            .map(|(c, x)| c * x)
            .sum();

        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: value,
            group_delay: (self.coefficients.len() - 1) as f64 / 2.0,
            gain: 1.0,
            processing_time: elapsed,
        }
    }

    fn reset(&mut self) {
        self.delay_line.iter_mut().for_each(|v| *v = 0.0);
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        stats.extra.push(("taps", self.coefficients.len() as f64));
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::FilterMethod;

    fn config(kind: FilterKind, order: usize, window: Window) -> FilterConfig {
        FilterConfig {
            method: FilterMethod::Fir,
            kind,
            order,
            window,
            cutoff: 50.0,
            cutoff_high: Some(150.0),
            sampling_rate: 1_000.0,
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
    fn moving_average_is_exact() {
        let mut filter = FirFilter::new(&config(FilterKind::MovingAverage, 3, Window::Hamming));
        assert_eq!(filter.tap_count(), 4);
        let inputs = [4.0, 8.0, 4.0, 8.0];
        let mut out = 0.0;
        for x in inputs {
            out = filter.process(&sample(x)).filtered_value;
        }
        assert!((out - 6.0).abs() < 1e-12);
    }

    #[test]
    fn lowpass_passes_dc_exactly() {
        for window in [
            Window::Hamming,
            Window::Hanning,
            Window::Blackman,
            Window::Kaiser,
            Window::Rectangular,
        ] {
            let mut filter = FirFilter::new(&config(FilterKind::Lowpass, 10, window));
            let mut out = 0.0;
            for _ in 0..50 {
                out = filter.process(&sample(1.0)).filtered_value;
            }
            assert!((out - 1.0).abs() < 1e-9, "{:?} settled at {}", window, out);
        }
    }

    #[test]
    fn highpass_blocks_dc() {
        let mut filter = FirFilter::new(&config(FilterKind::Highpass, 10, Window::Hamming));
        let mut out = 1.0;
        for _ in 0..50 {
            out = filter.process(&sample(1.0)).filtered_value;
        }
        assert!(out.abs() < 1e-9, "dc leaked: {}", out);
    }

    #[test]
    fn bandpass_attenuates_dc() {
        let mut filter = FirFilter::new(&config(FilterKind::Bandpass, 10, Window::Hamming));
        let mut out = 1.0;
        for _ in 0..50 {
            out = filter.process(&sample(1.0)).filtered_value;
        }
        assert!(out.abs() < 0.05, "dc through bandpass: {}", out);
    }

    #[test]
    fn group_delay_is_half_the_taps() {
        let mut filter = FirFilter::new(&config(FilterKind::Lowpass, 8, Window::Hamming));
        let out = filter.process(&sample(1.0));
        assert!((out.group_delay - 4.0).abs() < f64::EPSILON);
    }
}
