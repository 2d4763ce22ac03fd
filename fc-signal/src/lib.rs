//! # fc-signal
//!
//! The signal pipeline of the Fan Club master: sample acquisition,
//! per-channel digital filtering, quality scoring, and the closed-loop
//! PI speed controller.

pub mod acquire;
pub mod controller;
pub mod filter;
pub mod processor;
pub mod quality;

pub use acquire::{
    AcquirerStats, AcquisitionConfig, Acquirer, ChannelConfig, HardwareInterface, HardwareType,
    SimulatedHardware, TachHardware,
};
pub use controller::{
    schedule_gains, ControlMode, Controller, ControllerConfig, ControllerStats, Gains,
};
pub use filter::{
    create_filter, DigitalFilter, FilterChain, FilterConfig, FilterKind, FilterMethod,
    FilterStats, Window,
};
pub use processor::{FilterProcessor, ProcessorStats};
pub use quality::{ChannelQuality, QualityLevel, QualityMonitor};
