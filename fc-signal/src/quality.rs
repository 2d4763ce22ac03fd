//! Per-channel signal quality scoring.
//!
//! A windowed monitor blending amplitude stability, spike rate, and
//! saturation into one score in [0, 1]. Channels that fall below the
//! degraded threshold are reported so the UI can flag suspect fans.

use std::collections::HashMap;

/// Window of recent values considered per channel.
const WINDOW: usize = 64;

/// Residuals beyond this many sigmas count as spikes.
const SPIKE_SIGMAS: f64 = 3.0;

/// Scores below this mark a channel as degraded.
pub const DEGRADED_THRESHOLD: f64 = 0.5;

/// Coarse quality buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityLevel {
    Excellent,
    Good,
    Fair,
    Poor,
}

impl QualityLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.9 {
            QualityLevel::Excellent
        } else if score >= 0.7 {
            QualityLevel::Good
        } else if score >= 0.5 {
            QualityLevel::Fair
        } else {
            QualityLevel::Poor
        }
    }
}

/// Score breakdown for one channel.
#[derive(Debug, Clone)]
pub struct ChannelQuality {
    pub score: f64,
    pub level: QualityLevel,
    pub stability: f64,
    pub spike_ratio: f64,
    pub saturation_ratio: f64,
    pub samples: u64,
}

struct ChannelWindow {
    values: Vec<f64>,
    next: usize,
    filled: bool,
    total: u64,
}

impl ChannelWindow {
    fn new() -> Self {
        Self {
            values: Vec::with_capacity(WINDOW),
            next: 0,
            filled: false,
            total: 0,
        }
    }

    fn push(&mut self, value: f64) {
        if self.values.len() < WINDOW {
            self.values.push(value);
        } else {
            self.values[self.next] = value;
            self.filled = true;
        }
        self.next = (self.next + 1) % WINDOW;
        self.total += 1;
    }
}

/// The monitor: feed values, read scores.
pub struct QualityMonitor {
    /// Full-scale bound used for saturation detection.
    full_scale: f64,
    channels: HashMap<u32, ChannelWindow>,
}

impl QualityMonitor {
    pub fn new(full_scale: f64) -> Self {
        Self {
            full_scale,
            channels: HashMap::new(),
        }
    }

    pub fn push(&mut self, channel: u32, value: f64) {
        self.channels
            .entry(channel)
            .or_insert_with(ChannelWindow::new)
            .push(value);
    }

    /// Score one channel; `None` until enough samples arrived.
    pub fn score(&self, channel: u32) -> Option<ChannelQuality> {
        let window = self.channels.get(&channel)?;
        let values = &window.values;
        if values.len() < 8 {
            return None;
        }

        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        let std = variance.sqrt();

        // Stability as the inverse coefficient of variation.
        let stability = if mean.abs() > f64::EPSILON {
            1.0 / (1.0 + std / mean.abs())
        } else {
            1.0 / (1.0 + std)
        };

        let spike_threshold = SPIKE_SIGMAS * std;
        let spikes = if std > f64::EPSILON {
            values
                .iter()
                .filter(|v| (*v - mean).abs() > spike_threshold)
                .count()
        } else {
            0
        };
        let spike_ratio = spikes as f64 / n;

        let saturated = values
            .iter()
            .filter(|v| v.abs() >= 0.95 * self.full_scale)
            .count();
        let saturation_ratio = saturated as f64 / n;

        let score = (0.5 * stability + 0.25 * (1.0 - spike_ratio) + 0.25
            * (1.0 - saturation_ratio))
            .clamp(0.0, 1.0);

        Some(ChannelQuality {
            score,
            level: QualityLevel::from_score(score),
            stability,
            spike_ratio,
            saturation_ratio,
            samples: window.total,
        })
    }

    /// Channels currently scoring below the degraded threshold.
    pub fn degraded(&self) -> Vec<(u32, f64)> {
        let mut out: Vec<(u32, f64)> = self
            .channels
            .keys()
            .filter_map(|id| {
                self.score(*id)
                    .filter(|q| q.score < DEGRADED_THRESHOLD)
                    .map(|q| (*id, q.score))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub fn reset(&mut self) {
        self.channels.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn steady_signal_scores_high() {
        let mut monitor = QualityMonitor::new(30_000.0);
        for _ in 0..WINDOW {
            monitor.push(0, 1_500.0);
        }
        let quality = monitor.score(0).unwrap();
        assert!(quality.score > 0.9, "score {}", quality.score);
        assert_eq!(quality.level, QualityLevel::Excellent);
        assert!(monitor.degraded().is_empty());
    }

    #[test]
    fn erratic_signal_scores_lower_than_steady() {
        let mut monitor = QualityMonitor::new(30_000.0);
        for n in 0..WINDOW {
            monitor.push(0, 1_500.0);
            // Channel 1 swings wildly around the same mean.
            monitor.push(1, if n % 2 == 0 { 300.0 } else { 2_700.0 });
        }
        let steady = monitor.score(0).unwrap().score;
        let erratic = monitor.score(1).unwrap().score;
        assert!(erratic < steady);
    }

    #[test]
    fn saturated_channel_is_penalized() {
        let mut monitor = QualityMonitor::new(1_000.0);
        for _ in 0..WINDOW {
            monitor.push(0, 990.0);
        }
        let quality = monitor.score(0).unwrap();
        assert!(quality.saturation_ratio > 0.99);
        assert!(quality.score < 0.9);
    }

    #[test]
    fn too_few_samples_yield_no_score() {
        let mut monitor = QualityMonitor::new(1_000.0);
        for _ in 0..4 {
            monitor.push(0, 1.0);
        }
        assert!(monitor.score(0).is_none());
        assert!(monitor.score(9).is_none());
    }
}
