//! Butterworth IIR filter: closed-form first/second order sections,
//! cascaded identical biquads for higher orders.

use std::f64::consts::PI;
use std::time::Instant;

use fc_types::{FilteredSample, Sample};

use super::{DigitalFilter, FilterConfig, FilterKind, FilterStats};

/// One second-order (or first-order) direct-form-I section.
#[derive(Debug, Clone)]
struct Section {
    b: Vec<f64>,
    a: Vec<f64>,
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Section {
    fn new(b: Vec<f64>, a: Vec<f64>) -> Self {
        let x = vec![0.0; b.len()];
        let y = vec![0.0; a.len() - 1];
        Self { b, a, x, y }
    }

    fn process(&mut self, input: f64) -> f64 {
        self.x.rotate_right(1);
        self.x[0] = input;

        let mut out = 0.0;
        for (i, b) in self.b.iter().enumerate() {
            out += b * self.x[i];
        }
        for (i, a) in self.a.iter().skip(1).enumerate() {
            out -= a * self.y[i];
        }

        if !self.y.is_empty() {
            self.y.rotate_right(1);
            self.y[0] = out;
        }
        out
    }

    fn reset(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
        self.y.iter_mut().for_each(|v| *v = 0.0);
    }
}

pub struct IirFilter {
    sections: Vec<Section>,
    stats: FilterStats,
}

impl IirFilter {
    pub fn new(config: &FilterConfig) -> Self {
        let nyquist = config.sampling_rate / 2.0;
        let sections = match config.kind {
            FilterKind::Lowpass | FilterKind::MovingAverage => {
                design_lowpass(config.cutoff / nyquist, config.order)
            }
            FilterKind::Highpass => design_highpass(config.cutoff / nyquist, config.order),
            FilterKind::Bandpass => design_band(
                config.cutoff / nyquist,
                config.cutoff_high.unwrap_or(config.cutoff * 1.2) / nyquist,
                true,
            ),
            FilterKind::Bandstop => design_band(
                config.cutoff / nyquist,
                config.cutoff_high.unwrap_or(config.cutoff * 1.2) / nyquist,
                false,
            ),
        };
        Self {
            sections,
            stats: FilterStats::default(),
        }
    }
}

/// First-order lowpass: y[n] = (1-a) x[n] + a y[n-1], a = e^(-2 pi wc).
fn first_order_lowpass(wc: f64) -> Section {
    let alpha = (-2.0 * PI * wc).exp();
    Section::new(vec![1.0 - alpha], vec![1.0, -alpha])
}

fn first_order_highpass(wc: f64) -> Section {
    let alpha = (-2.0 * PI * wc).exp();
    Section::new(vec![alpha, -alpha], vec![1.0, -alpha])
}

/// Second-order Butterworth lowpass via the bilinear transform.
fn butterworth_lowpass_biquad(wc: f64) -> Section {
    let k = (PI * wc).tan();
    let norm = 1.0 + 2f64.sqrt() * k + k * k;
    Section::new(
        vec![k * k / norm, 2.0 * k * k / norm, k * k / norm],
        vec![
            1.0,
            2.0 * (k * k - 1.0) / norm,
            (1.0 - 2f64.sqrt() * k + k * k) / norm,
        ],
    )
}

fn butterworth_highpass_biquad(wc: f64) -> Section {
    let k = (PI * wc).tan();
    let norm = 1.0 + 2f64.sqrt() * k + k * k;
    Section::new(
        vec![1.0 / norm, -2.0 / norm, 1.0 / norm],
        vec![
            1.0,
            2.0 * (k * k - 1.0) / norm,
            (1.0 - 2f64.sqrt() * k + k * k) / norm,
        ],
    )
}

fn design_lowpass(wc: f64, order: usize) -> Vec<Section> {
    if order == 1 {
        vec![first_order_lowpass(wc)]
    } else {
        (0..order.div_ceil(2))
            .map(|_| butterworth_lowpass_biquad(wc))
            .collect()
    }
}

fn design_highpass(wc: f64, order: usize) -> Vec<Section> {
    if order == 1 {
        vec![first_order_highpass(wc)]
    } else {
        (0..order.div_ceil(2))
            .map(|_| butterworth_highpass_biquad(wc))
            .collect()
    }
}

/// Second-order resonator band filter.
///
/// The resonator recipe takes its center and bandwidth as fractions of
/// the sample rate; the incoming edges are normalized by Nyquist, so
/// halve them first. The pole radius `r = 1 - 3*bw` must stay inside
/// the unit circle, which holds for bandwidths under a third of the
/// sample rate.
fn design_band(wc1: f64, wc2: f64, pass: bool) -> Vec<Section> {
    let f1 = wc1 / 2.0;
    let f2 = wc2 / 2.0;
    let w0 = 2.0 * PI * (f1 * f2).sqrt();
    let bw = f2 - f1;
    let r = 1.0 - 3.0 * bw;
    let k = (1.0 - 2.0 * r * w0.cos() + r * r) / (2.0 - 2.0 * w0.cos());

    let section = if pass {
        Section::new(
            vec![1.0 - k, 2.0 * (k - r) * w0.cos(), r * r - k],
            vec![1.0, -2.0 * r * w0.cos(), r * r],
        )
    } else {
        Section::new(
            vec![k, -2.0 * k * w0.cos(), k],
            vec![1.0, -2.0 * r * w0.cos(), r * r],
        )
    };
    vec![section]
}

impl DigitalFilter for IirFilter {
    fn process(&mut self, sample: &Sample) -> FilteredSample {
        let start = Instant::now();
        let mut value = sample.value;
        for section in &mut self.sections {
            value = section.process(value);
        }
        let elapsed = start.elapsed().as_secs_f64();
        self.stats.samples_processed += 1;
        self.stats.processing_time_total += elapsed;
        FilteredSample {
            sample: *sample,
            filtered_value: value,
            group_delay: 0.0,
            gain: 1.0,
            processing_time: elapsed,
        }
    }

    fn reset(&mut self) {
        for section in &mut self.sections {
            section.reset();
        }
        self.stats = FilterStats::default();
    }

    fn stats(&self) -> FilterStats {
        let mut stats = self.stats.clone();
        stats.extra.push(("sections", self.sections.len() as f64));
        stats
    }
}
