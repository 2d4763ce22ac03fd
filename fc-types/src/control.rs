//! Control vectors: the duty-cycle commands routed to slaves.

use serde::{Deserialize, Serialize};

use crate::codes::{dc_normalizer, CTL_DC_SINGLE, CTL_DC_VECTOR, TGT_ALL, TGT_SELECTED};
use crate::slave::SlaveId;

/// Which slaves a control vector addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    All,
    Selected(Vec<SlaveId>),
}

impl Target {
    pub fn code(&self) -> u32 {
        match self {
            Target::All => TGT_ALL,
            Target::Selected(_) => TGT_SELECTED,
        }
    }

    pub fn includes(&self, slave: SlaveId) -> bool {
        match self {
            Target::All => true,
            Target::Selected(ids) => ids.contains(&slave),
        }
    }
}

/// Which fans of an addressed slave a single-duty command touches.
///
/// The bitstring is one `'1'`/`'0'` per fan slot, e.g. `"11110000"`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FanSelection {
    All,
    Mask(String),
}

impl FanSelection {
    /// Parse a selection string; `None` on characters outside {0,1}.
    pub fn parse_mask(s: &str) -> Option<Self> {
        if !s.is_empty() && s.chars().all(|c| c == '0' || c == '1') {
            Some(FanSelection::Mask(s.to_string()))
        } else {
            None
        }
    }

    pub fn selects(&self, fan: usize) -> bool {
        match self {
            FanSelection::All => true,
            FanSelection::Mask(mask) => mask.as_bytes().get(fan).copied() == Some(b'1'),
        }
    }
}

/// A duty-cycle command, multiplexed by a leading control code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ControlVector {
    /// Apply one duty to a subset of fans per addressed slave.
    SingleDc {
        target: Target,
        /// Normalized duty in [0, 1].
        duty: f64,
        /// One selection per addressed slave, in target order.
        selections: Vec<FanSelection>,
    },
    /// Full duty matrix, `max_fans`-padded per slave.
    VectorDc {
        target: Target,
        /// Normalized duties, `n_slaves * max_fans` long.
        duties: Vec<f64>,
    },
}

impl ControlVector {
    pub fn code(&self) -> u32 {
        match self {
            ControlVector::SingleDc { .. } => CTL_DC_SINGLE,
            ControlVector::VectorDc { .. } => CTL_DC_VECTOR,
        }
    }

    pub fn target(&self) -> &Target {
        match self {
            ControlVector::SingleDc { target, .. } => target,
            ControlVector::VectorDc { target, .. } => target,
        }
    }
}

/// Normalized duty [0, 1] to its scaled wire integer.
pub fn duty_to_wire(duty: f64, decimals: u32) -> i64 {
    (duty.clamp(0.0, 1.0) * dc_normalizer(decimals)).round() as i64
}

/// Scaled wire integer back to a normalized duty.
pub fn wire_to_duty(wire: i64, decimals: u32) -> f64 {
    wire as f64 / dc_normalizer(decimals)
}
