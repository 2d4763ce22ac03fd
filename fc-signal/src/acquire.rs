//! Sample acquisition: a paced producer over a pluggable hardware seam.
//!
//! Two backends satisfy [`HardwareInterface`]: a simulated source
//! (per-channel sine plus noise) and the tach stream off the fan network.
//! The engine thread paces reads at the sampling rate and feeds a bounded
//! queue; when the queue is full the newest samples are dropped and
//! counted, never blocking the producer.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, TrySendError};
use log::{error, info, warn};

use fc_types::error::{ErrorKind, FcError, Result};
use fc_types::{Sample, TachReading};

/// Which backend the engine should drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareType {
    Simulated,
    Real,
    /// Try real, fall back to simulated.
    Auto,
}

/// Acquisition parameters, validated before use.
#[derive(Debug, Clone)]
pub struct AcquisitionConfig {
    /// Samples per second per channel, 1..=100_000.
    pub sampling_rate: f64,
    /// Converter resolution in bits: 8, 12, 16, or 24.
    pub resolution: u32,
    /// Outbound queue capacity, 1..=65_536.
    pub buffer_size: usize,
    /// Channel ids, 1..=32 of them.
    pub channels: Vec<u32>,
    pub hardware: HardwareType,
    /// When true, a real-backend failure is an error instead of a
    /// fallback to simulation.
    pub prefer_real: bool,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 1_000.0,
            resolution: 16,
            buffer_size: 1_024,
            channels: vec![0, 1, 2, 3],
            hardware: HardwareType::Simulated,
            prefer_real: false,
        }
    }
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(1.0..=100_000.0).contains(&self.sampling_rate) {
            return Err(FcError::validation(format!(
                "sampling rate {} outside 1..=100000",
                self.sampling_rate
            )));
        }
        if ![8, 12, 16, 24].contains(&self.resolution) {
            return Err(FcError::validation(format!(
                "resolution {} not one of 8/12/16/24",
                self.resolution
            )));
        }
        if self.buffer_size == 0 || self.buffer_size > 65_536 {
            return Err(FcError::validation("buffer size outside 1..=65536"));
        }
        if self.channels.is_empty() || self.channels.len() > 32 {
            return Err(FcError::validation("channel count outside 1..=32"));
        }
        Ok(())
    }
}

/// Per-channel trim applied by the backend.
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    pub channel_id: u32,
    pub enabled: bool,
    pub gain: f64,
    pub offset: f64,
}

impl ChannelConfig {
    pub fn new(channel_id: u32) -> Self {
        Self {
            channel_id,
            enabled: true,
            gain: 1.0,
            offset: 0.0,
        }
    }
}

/// Backend status snapshot.
#[derive(Debug, Clone)]
pub struct HardwareStatus {
    pub running: bool,
    pub channels: usize,
    pub samples_read: u64,
}

/// The backend seam: simulated or the tach stream.
pub trait HardwareInterface: Send {
    fn initialize(&mut self, config: &AcquisitionConfig) -> Result<()>;
    fn start(&mut self) -> Result<()>;
    fn stop(&mut self) -> Result<()>;
    /// Non-blocking: up to `n` samples, fewer on starvation.
    fn read_samples(&mut self, n: usize) -> Vec<Sample>;
    fn configure_channel(&mut self, config: ChannelConfig) -> Result<()>;
    fn status(&self) -> HardwareStatus;
}

/// Sine-plus-noise source for bench runs without an array.
pub struct SimulatedHardware {
    channels: Vec<ChannelConfig>,
    sampling_rate: f64,
    resolution: u32,
    running: bool,
    counter: u64,
    samples_read: u64,
    rng: u64,
}

impl SimulatedHardware {
    pub fn new() -> Self {
        Self {
            channels: Vec::new(),
            sampling_rate: 1_000.0,
            resolution: 16,
            running: false,
            counter: 0,
            samples_read: 0,
            rng: 0x9E37_79B9_7F4A_7C15,
        }
    }
}

impl Default for SimulatedHardware {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareInterface for SimulatedHardware {
    fn initialize(&mut self, config: &AcquisitionConfig) -> Result<()> {
        self.sampling_rate = config.sampling_rate;
        self.resolution = config.resolution;
        self.channels = config.channels.iter().map(|id| ChannelConfig::new(*id)).collect();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        self.counter = 0;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn read_samples(&mut self, n: usize) -> Vec<Sample> {
        if !self.running {
            return Vec::new();
        }
        let mut samples = Vec::with_capacity(n * self.channels.len());
        let max_raw = (1i64 << (self.resolution - 1)) - 1;
        for _ in 0..n {
            let t = self.counter as f64 / self.sampling_rate;
            for (idx, channel) in self.channels.iter().enumerate() {
                if !channel.enabled {
                    continue;
                }
                // Distinct tone per channel so chains are tellable apart.
                let freq = 10.0 + idx as f64 * 5.0;
                let rng = {
                    // Simple xorshift
                    let mut r = self.rng;
                    r ^= r << 13;
                    r ^= r >> 7;
                    r ^= r << 17;
                    r
                };
                self.rng = rng;
                let noise = (rng >> 11) as f64 / (1u64 << 53) as f64 * 2.0 - 1.0;
                let value = (2.0 * std::f64::consts::PI * freq * t).sin() + 0.1 * noise;
                let value = value * channel.gain + channel.offset;
                let raw_value = (value * max_raw as f64 / 10.0) as i64;
                samples.push(Sample {
                    timestamp: t,
                    channel_id: channel.channel_id,
                    value,
                    raw_value,
                    quality: 0.95 + 0.05 * ((rng >> 20) & 0xFF) as f64 / 255.0,
                });
            }
            self.counter += 1;
        }
        self.samples_read += samples.len() as u64;
        samples
    }

    fn configure_channel(&mut self, config: ChannelConfig) -> Result<()> {
        match self
            .channels
            .iter_mut()
            .find(|c| c.channel_id == config.channel_id)
        {
            Some(slot) => {
                *slot = config;
                Ok(())
            }
            None => Err(FcError::validation(format!(
                "unknown channel {}",
                config.channel_id
            ))),
        }
    }

    fn status(&self) -> HardwareStatus {
        HardwareStatus {
            running: self.running,
            channels: self.channels.len(),
            samples_read: self.samples_read,
        }
    }
}

/// The "real" backend: tach readings off the fan network.
pub struct TachHardware {
    source: Option<Receiver<TachReading>>,
    channels: Vec<ChannelConfig>,
    running: bool,
    samples_read: u64,
}

impl TachHardware {
    /// `source` is the feedback stream; `None` models absent hardware.
    pub fn new(source: Option<Receiver<TachReading>>) -> Self {
        Self {
            source,
            channels: Vec::new(),
            running: false,
            samples_read: 0,
        }
    }
}

impl HardwareInterface for TachHardware {
    fn initialize(&mut self, config: &AcquisitionConfig) -> Result<()> {
        if self.source.is_none() {
            return Err(FcError::new(
                ErrorKind::HardwareInit,
                "no tach stream connected",
            ));
        }
        self.channels = config.channels.iter().map(|id| ChannelConfig::new(*id)).collect();
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        if self.source.is_none() {
            return Err(FcError::new(ErrorKind::HardwareInit, "no tach stream"));
        }
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }

    fn read_samples(&mut self, n: usize) -> Vec<Sample> {
        let Some(source) = &self.source else {
            return Vec::new();
        };
        if !self.running {
            return Vec::new();
        }
        let mut samples = Vec::new();
        while samples.len() < n {
            match source.try_recv() {
                Ok(reading) => {
                    let enabled = self
                        .channels
                        .iter()
                        .find(|c| c.channel_id == reading.fan_id)
                        .map(|c| c.enabled)
                        .unwrap_or(false);
                    if !enabled {
                        continue;
                    }
                    samples.push(Sample {
                        timestamp: reading.timestamp,
                        channel_id: reading.fan_id,
                        value: reading.rpm,
                        raw_value: i64::from(reading.raw_pulse),
                        quality: if reading.timeout_flag { 0.0 } else { 1.0 },
                    });
                }
                Err(_) => break,
            }
        }
        self.samples_read += samples.len() as u64;
        samples
    }

    fn configure_channel(&mut self, config: ChannelConfig) -> Result<()> {
        match self
            .channels
            .iter_mut()
            .find(|c| c.channel_id == config.channel_id)
        {
            Some(slot) => {
                *slot = config;
                Ok(())
            }
            None => Err(FcError::validation(format!(
                "unknown channel {}",
                config.channel_id
            ))),
        }
    }

    fn status(&self) -> HardwareStatus {
        HardwareStatus {
            running: self.running,
            channels: self.channels.len(),
            samples_read: self.samples_read,
        }
    }
}

/// Running counters exposed by the engine.
#[derive(Debug, Clone, Default)]
pub struct AcquirerStats {
    pub samples_produced: u64,
    pub queue_overflows: u64,
}

/// The paced acquisition engine.
pub struct Acquirer {
    config: AcquisitionConfig,
    hardware: Option<Box<dyn HardwareInterface>>,
    output: Option<Receiver<Sample>>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<Box<dyn HardwareInterface>>>,
    produced: Arc<AtomicU64>,
    overflows: Arc<AtomicU64>,
}

impl std::fmt::Debug for Acquirer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Acquirer")
            .field("config", &self.config)
            .field("produced", &self.produced)
            .field("overflows", &self.overflows)
            .finish()
    }
}

impl Acquirer {
    /// Validate the config and select a backend per the hardware policy.
    ///
    /// `tach_source` feeds the real backend when present.
    pub fn configure(
        config: AcquisitionConfig,
        tach_source: Option<Receiver<TachReading>>,
    ) -> Result<Self> {
        config.validate()?;

        let hardware: Box<dyn HardwareInterface> = match config.hardware {
            HardwareType::Simulated => {
                let mut hw = SimulatedHardware::new();
                hw.initialize(&config)?;
                Box::new(hw)
            }
            HardwareType::Real | HardwareType::Auto => {
                let mut real = TachHardware::new(tach_source);
                match real.initialize(&config) {
                    Ok(()) => Box::new(real),
                    Err(e) if config.prefer_real => {
                        return Err(FcError::new(
                            ErrorKind::HardwareInit,
                            format!("real backend required but unavailable: {}", e),
                        ));
                    }
                    Err(e) => {
                        warn!(target: "acquire", "real backend unavailable ({}), simulating", e);
                        let mut sim = SimulatedHardware::new();
                        sim.initialize(&config)?;
                        Box::new(sim)
                    }
                }
            }
        };

        Ok(Self {
            config,
            hardware: Some(hardware),
            output: None,
            stop: Arc::new(AtomicBool::new(false)),
            join: None,
            produced: Arc::new(AtomicU64::new(0)),
            overflows: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Spawn the paced producer thread.
    pub fn start(&mut self) -> Result<()> {
        let Some(mut hardware) = self.hardware.take() else {
            return Err(FcError::invariant("acquirer already started"));
        };
        hardware.start()?;

        let (tx, rx) = bounded::<Sample>(self.config.buffer_size);
        self.output = Some(rx);
        self.stop.store(false, Ordering::SeqCst);

        let stop = Arc::clone(&self.stop);
        let produced = Arc::clone(&self.produced);
        let overflows = Arc::clone(&self.overflows);
        let rate = self.config.sampling_rate;
        let join = thread::Builder::new()
            .name("fc-acquire".into())
            .spawn(move || {
                // Batch so high rates do not burn a syscall per sample.
                let batch = ((rate / 100.0).ceil() as usize).max(1);
                let period = Duration::from_secs_f64(batch as f64 / rate);
                let mut next = Instant::now();
                while !stop.load(Ordering::SeqCst) {
                    for sample in hardware.read_samples(batch) {
                        match tx.try_send(sample) {
                            Ok(()) => {
                                produced.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Full(_)) => {
                                // Drop-newest: the queue keeps its oldest
                                // backlog, the fresh sample is counted out.
                                overflows.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(TrySendError::Disconnected(_)) => {
                                stop.store(true, Ordering::SeqCst);
                                break;
                            }
                        }
                    }
                    next += period;
                    let now = Instant::now();
                    if next > now {
                        thread::sleep(next - now);
                    } else {
                        // Fell behind; re-anchor rather than spiral.
                        next = now;
                    }
                }
                if let Err(e) = hardware.stop() {
                    error!(target: "acquire", "backend stop failed: {}", e);
                }
                hardware
            })
            .map_err(|e| FcError::new(ErrorKind::HardwareInit, e.to_string()))?;
        self.join = Some(join);
        info!(target: "acquire", "acquisition started at {} Hz", rate);
        Ok(())
    }

    /// Signal the producer and join it, recovering the backend.
    pub fn stop(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            match join.join() {
                Ok(hardware) => self.hardware = Some(hardware),
                Err(_) => {
                    return Err(FcError::invariant("acquisition thread panicked"));
                }
            }
        }
        Ok(())
    }

    /// Non-blocking read of up to `n` queued samples.
    pub fn read(&self, n: usize) -> Vec<Sample> {
        let Some(output) = &self.output else {
            return Vec::new();
        };
        let mut samples = Vec::with_capacity(n.min(64));
        while samples.len() < n {
            match output.try_recv() {
                Ok(sample) => samples.push(sample),
                Err(_) => break,
            }
        }
        samples
    }

    /// Receiver end of the sample queue, for the filter processor.
    pub fn output(&self) -> Option<Receiver<Sample>> {
        self.output.clone()
    }

    pub fn stats(&self) -> AcquirerStats {
        AcquirerStats {
            samples_produced: self.produced.load(Ordering::Relaxed),
            queue_overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampling_rate_boundaries() {
        let mut config = AcquisitionConfig::default();
        config.sampling_rate = 1.0;
        assert!(config.validate().is_ok());
        config.sampling_rate = 100_000.0;
        assert!(config.validate().is_ok());
        config.sampling_rate = 100_001.0;
        assert!(config.validate().is_err());
        config.sampling_rate = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn resolution_and_channels_are_bounded() {
        let mut config = AcquisitionConfig::default();
        config.resolution = 10;
        assert!(config.validate().is_err());
        config.resolution = 24;
        assert!(config.validate().is_ok());
        config.channels = vec![];
        assert!(config.validate().is_err());
        config.channels = (0..33).collect();
        assert!(config.validate().is_err());
    }

    #[test]
    fn simulated_backend_produces_per_channel_samples() {
        let mut hw = SimulatedHardware::new();
        let config = AcquisitionConfig::default();
        hw.initialize(&config).unwrap();
        hw.start().unwrap();
        let samples = hw.read_samples(10);
        assert_eq!(samples.len(), 10 * 4);
        assert!(samples.iter().all(|s| (0.0..=1.0).contains(&s.quality)));
        hw.stop().unwrap();
        assert!(hw.read_samples(1).is_empty());
    }

    #[test]
    fn disabled_channels_are_skipped() {
        let mut hw = SimulatedHardware::new();
        hw.initialize(&AcquisitionConfig::default()).unwrap();
        hw.configure_channel(ChannelConfig {
            channel_id: 2,
            enabled: false,
            gain: 1.0,
            offset: 0.0,
        })
        .unwrap();
        hw.start().unwrap();
        let samples = hw.read_samples(4);
        assert_eq!(samples.len(), 4 * 3);
        assert!(samples.iter().all(|s| s.channel_id != 2));
    }

    #[test]
    fn real_without_stream_falls_back_unless_preferred() {
        let mut config = AcquisitionConfig::default();
        config.hardware = HardwareType::Real;
        config.prefer_real = false;
        assert!(Acquirer::configure(config.clone(), None).is_ok());

        config.prefer_real = true;
        let err = Acquirer::configure(config, None).unwrap_err();
        assert_eq!(err.kind, ErrorKind::HardwareInit);
    }

    #[test]
    fn tach_backend_maps_readings() {
        let (tx, rx) = bounded(8);
        let mut hw = TachHardware::new(Some(rx));
        let mut config = AcquisitionConfig::default();
        config.channels = vec![0, 1];
        hw.initialize(&config).unwrap();
        hw.start().unwrap();

        tx.send(TachReading {
            fan_id: 1,
            rpm: 1_500.0,
            timestamp: 2.0,
            duty_cycle: 0.4,
            timeout_flag: false,
            raw_pulse: 50,
        })
        .unwrap();
        tx.send(TachReading {
            fan_id: 9, // not configured
            rpm: 900.0,
            timestamp: 2.0,
            duty_cycle: 0.4,
            timeout_flag: false,
            raw_pulse: 30,
        })
        .unwrap();

        let samples = hw.read_samples(10);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].channel_id, 1);
        assert!((samples[0].value - 1_500.0).abs() < f64::EPSILON);
    }

    #[test]
    fn engine_runs_and_reports_stats() {
        let mut config = AcquisitionConfig::default();
        config.sampling_rate = 1_000.0;
        config.buffer_size = 4_096;
        let mut acquirer = Acquirer::configure(config, None).unwrap();
        acquirer.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        let samples = acquirer.read(100);
        assert!(!samples.is_empty());
        acquirer.stop().unwrap();
        assert!(acquirer.stats().samples_produced > 0);
    }

    #[test]
    fn overflow_drops_newest_without_aborting() {
        let mut config = AcquisitionConfig::default();
        config.sampling_rate = 10_000.0;
        config.buffer_size = 8;
        let mut acquirer = Acquirer::configure(config, None).unwrap();
        acquirer.start().unwrap();
        thread::sleep(Duration::from_millis(100));
        acquirer.stop().unwrap();
        let stats = acquirer.stats();
        assert!(stats.queue_overflows > 0);
        // The queue still holds the oldest backlog.
        assert_eq!(acquirer.read(100).len(), 8);
    }
}
