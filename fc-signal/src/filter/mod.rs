//! Per-channel digital filters: a closed set of stateful variants that
//! can be chained.
//!
//! Every filter consumes one [`Sample`] at a time and yields a
//! [`FilteredSample`]; `reset()` clears state but keeps configuration.

mod alpha_beta;
mod fir;
mod huber;
mod iir;
mod kalman;
mod lms;

pub use alpha_beta::AlphaBetaFilter;
pub use fir::FirFilter;
pub use huber::HuberFilter;
pub use iir::IirFilter;
pub use kalman::KalmanFilter;
pub use lms::LmsFilter;

use fc_types::error::{FcError, Result};
use fc_types::{FilteredSample, Sample};

/// Which filter family a config describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMethod {
    Iir,
    Fir,
    Lms,
    Kalman,
    Huber,
    AlphaBeta,
}

/// Frequency response shape for IIR/FIR designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterKind {
    Lowpass,
    Highpass,
    Bandpass,
    Bandstop,
    /// FIR special case: equal taps.
    MovingAverage,
}

/// Window function for FIR designs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    Hamming,
    Hanning,
    Blackman,
    Kaiser,
    Rectangular,
}

/// One filter's full parameter set. Fields irrelevant to the selected
/// method keep their defaults.
#[derive(Debug, Clone)]
pub struct FilterConfig {
    pub method: FilterMethod,
    pub kind: FilterKind,
    pub sampling_rate: f64,
    /// Cutoff (Hz); lower edge for bandpass/bandstop.
    pub cutoff: f64,
    /// Upper edge (Hz) for bandpass/bandstop.
    pub cutoff_high: Option<f64>,
    /// Design order, 1..=10.
    pub order: usize,
    pub window: Window,
    /// LMS adaptation rate, 0 < mu < 1.
    pub adaptation_rate: f64,
    /// LMS tap count.
    pub taps: usize,
    /// Kalman process noise Q.
    pub process_noise: f64,
    /// Kalman measurement noise R.
    pub measurement_noise: f64,
    pub initial_estimate: f64,
    /// Kalman initial error covariance P.
    pub initial_error: f64,
    pub huber_threshold: f64,
    pub huber_window: usize,
    /// Alpha-beta position smoothing factor, in [0, 1].
    pub alpha: f64,
    /// Alpha-beta velocity smoothing factor, in [0, 1].
    pub beta: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            method: FilterMethod::Iir,
            kind: FilterKind::Lowpass,
            sampling_rate: 1_000.0,
            cutoff: 100.0,
            cutoff_high: None,
            order: 4,
            window: Window::Hamming,
            adaptation_rate: 0.01,
            taps: 32,
            process_noise: 0.01,
            measurement_noise: 0.1,
            initial_estimate: 0.0,
            initial_error: 1.0,
            huber_threshold: 1.345,
            huber_window: 10,
            alpha: 0.85,
            beta: 0.005,
        }
    }
}

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.sampling_rate <= 0.0 {
            return Err(FcError::validation("sampling rate must be positive"));
        }
        if self.order == 0 {
            return Err(FcError::validation("filter order must be at least 1"));
        }
        // Biquad cascades get unwieldy past order 10; FIR tap counts may
        // run much higher.
        if self.method == FilterMethod::Iir && self.order > 10 {
            return Err(FcError::validation(format!(
                "IIR order {} outside 1..=10",
                self.order
            )));
        }
        if self.order > 128 {
            return Err(FcError::validation(format!(
                "filter order {} outside 1..=128",
                self.order
            )));
        }
        if self.cutoff <= 0.0 || self.cutoff >= self.sampling_rate / 2.0 {
            return Err(FcError::validation("cutoff outside (0, nyquist)"));
        }
        if matches!(self.kind, FilterKind::Bandpass | FilterKind::Bandstop) {
            match self.cutoff_high {
                Some(high) if high > self.cutoff && high < self.sampling_rate / 2.0 => {}
                _ => {
                    return Err(FcError::validation(
                        "band filters need cutoff_high in (cutoff, nyquist)",
                    ))
                }
            }
        }
        if self.method == FilterMethod::Lms {
            if self.adaptation_rate <= 0.0 || self.adaptation_rate >= 1.0 {
                return Err(FcError::validation("adaptation rate outside (0, 1)"));
            }
            if self.taps == 0 {
                return Err(FcError::validation("LMS needs at least one tap"));
            }
        }
        if self.method == FilterMethod::AlphaBeta
            && (!(0.0..=1.0).contains(&self.alpha) || !(0.0..=1.0).contains(&self.beta))
        {
            return Err(FcError::validation("alpha and beta must be in [0, 1]"));
        }
        if self.method == FilterMethod::Huber && self.huber_window == 0 {
            return Err(FcError::validation("huber window must be positive"));
        }
        Ok(())
    }
}

/// Running statistics every filter maintains.
#[derive(Debug, Clone, Default)]
pub struct FilterStats {
    pub samples_processed: u64,
    /// Total wall time spent in `process`, seconds.
    pub processing_time_total: f64,
    /// Variant-specific scalars, e.g. ("kalman_gain_avg", 0.42).
    pub extra: Vec<(&'static str, f64)>,
}

/// The common contract for all filter variants.
pub trait DigitalFilter: Send {
    fn process(&mut self, sample: &Sample) -> FilteredSample;

    /// Clear state; configuration survives.
    fn reset(&mut self);

    fn stats(&self) -> FilterStats;
}

/// Build a filter from its config, validating first.
pub fn create_filter(config: &FilterConfig) -> Result<Box<dyn DigitalFilter>> {
    config.validate()?;
    Ok(match config.method {
        FilterMethod::Iir => Box::new(IirFilter::new(config)),
        FilterMethod::Fir => Box::new(FirFilter::new(config)),
        FilterMethod::Lms => Box::new(LmsFilter::new(config)),
        FilterMethod::Kalman => Box::new(KalmanFilter::new(config)),
        FilterMethod::Huber => Box::new(HuberFilter::new(config)),
        FilterMethod::AlphaBeta => Box::new(AlphaBetaFilter::new(config)),
    })
}

/// Zero or more filters applied in sequence on one channel.
pub struct FilterChain {
    filters: Vec<Box<dyn DigitalFilter>>,
}

impl FilterChain {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
        }
    }

    pub fn push(&mut self, filter: Box<dyn DigitalFilter>) {
        self.filters.push(filter);
    }

    pub fn remove(&mut self, index: usize) -> bool {
        if index < self.filters.len() {
            self.filters.remove(index);
            true
        } else {
            false
        }
    }

    pub fn len(&self) -> usize {
        self.filters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    /// Run a sample through every stage; later stages see the previous
    /// stage's filtered value as their input.
    pub fn process(&mut self, sample: &Sample) -> FilteredSample {
        let mut current = *sample;
        let mut last = passthrough(sample);
        let mut delay = 0.0;
        let mut time = 0.0;
        for filter in &mut self.filters {
            last = filter.process(&current);
            delay += last.group_delay;
            time += last.processing_time;
            current.value = last.filtered_value;
        }
        last.sample = *sample;
        last.group_delay = delay;
        last.processing_time = time;
        last
    }

    pub fn reset(&mut self) {
        for filter in &mut self.filters {
            filter.reset();
        }
    }

    pub fn stats(&self) -> Vec<FilterStats> {
        self.filters.iter().map(|f| f.stats()).collect()
    }
}

impl Default for FilterChain {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity sample for empty chains.
fn passthrough(sample: &Sample) -> FilteredSample {
    FilteredSample {
        sample: *sample,
        filtered_value: sample.value,
        group_delay: 0.0,
        gain: 1.0,
        processing_time: 0.0,
    }
}
