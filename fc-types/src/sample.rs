//! Acquisition sample types shared by the signal pipeline.

use serde::{Deserialize, Serialize};

/// One timestamped reading from an acquisition channel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Seconds since the acquisition epoch.
    pub timestamp: f64,
    pub channel_id: u32,
    /// Calibrated value.
    pub value: f64,
    /// Raw converter counts.
    pub raw_value: i64,
    /// Signal quality in [0, 1].
    pub quality: f64,
}

/// A sample after one pass through a filter chain.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FilteredSample {
    pub sample: Sample,
    pub filtered_value: f64,
    /// Group delay estimate in samples.
    pub group_delay: f64,
    /// Instantaneous filter gain (Kalman gain, alpha, or 1.0).
    pub gain: f64,
    /// Wall time spent filtering, in seconds.
    pub processing_time: f64,
}

/// One tachometer reading off the fan network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TachReading {
    /// Flat fan id: `slave * max_fans + fan`.
    pub fan_id: u32,
    pub rpm: f64,
    /// Seconds since the acquisition epoch.
    pub timestamp: f64,
    /// Normalized duty cycle commanded when this reading was taken.
    pub duty_cycle: f64,
    /// Counter timed out before enough pulses arrived.
    pub timeout_flag: bool,
    /// Raw pulse count.
    pub raw_pulse: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filtered_sample_keeps_original() {
        let s = Sample {
            timestamp: 1.5,
            channel_id: 3,
            value: 0.7,
            raw_value: 22937,
            quality: 0.98,
        };
        let f = FilteredSample {
            sample: s,
            filtered_value: 0.69,
            group_delay: 2.0,
            gain: 1.0,
            processing_time: 1e-6,
        };
        assert_eq!(f.sample.channel_id, 3);
        assert!((f.sample.value - 0.7).abs() < f64::EPSILON);
    }
}
