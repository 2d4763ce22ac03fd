//! The three state vectors: network (N), slaves (S), feedback (F).
//!
//! These are the sole inter-layer data contract between the back end and
//! any front end, logger, or external bridge.

use serde::{Deserialize, Serialize};

use crate::codes::{NS_CONNECTED, NS_DISCONNECTED, NS_LEN, PAD, RIP, SD_LEN};
use crate::error::{FcError, Result};
use crate::slave::{Mac, SlaveId, SlaveStatus};

/// Connection status and endpoint summary of the master itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkVector {
    pub connected: bool,
    pub local_ip: String,
    pub broadcast_ip: String,
    pub broadcast_port: u16,
    pub listener_port: u16,
}

impl NetworkVector {
    /// Flatten into the wire row of length `NS_LEN`.
    pub fn to_row(&self) -> Vec<String> {
        let status = if self.connected {
            NS_CONNECTED
        } else {
            NS_DISCONNECTED
        };
        let row = vec![
            status.to_string(),
            self.local_ip.clone(),
            self.broadcast_ip.clone(),
            self.broadcast_port.to_string(),
            self.listener_port.to_string(),
        ];
        debug_assert_eq!(row.len(), NS_LEN);
        row
    }
}

/// One 6-tuple of the slaves vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaveEntry {
    pub index: SlaveId,
    pub name: String,
    pub mac: Mac,
    pub status: SlaveStatus,
    pub fan_count: usize,
    pub version: String,
}

impl SlaveEntry {
    pub fn to_row(&self) -> Vec<String> {
        let row = vec![
            self.index.to_string(),
            self.name.clone(),
            self.mac.to_string(),
            self.status.code().to_string(),
            self.fan_count.to_string(),
            self.version.clone(),
        ];
        debug_assert_eq!(row.len(), SD_LEN);
        row
    }
}

/// Full-array state snapshot: RPM half followed by DC half.
///
/// For N slaves with `max_fans` fan slots each, the vector holds
/// `2 * N * max_fans` integers. DC values are scaled wire integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackVector {
    n_slaves: usize,
    max_fans: usize,
    values: Vec<i64>,
}

impl FeedbackVector {
    /// A vector with every slot set to `RIP` (no slave heard yet).
    pub fn rip(n_slaves: usize, max_fans: usize) -> Self {
        Self {
            n_slaves,
            max_fans,
            values: vec![RIP; 2 * n_slaves * max_fans],
        }
    }

    /// Wrap an existing flat vector, enforcing the length invariant.
    pub fn from_values(n_slaves: usize, max_fans: usize, values: Vec<i64>) -> Result<Self> {
        if values.len() != 2 * n_slaves * max_fans {
            return Err(FcError::invariant(format!(
                "feedback vector length {} != 2*{}*{}",
                values.len(),
                n_slaves,
                max_fans
            )));
        }
        Ok(Self {
            n_slaves,
            max_fans,
            values,
        })
    }

    pub fn n_slaves(&self) -> usize {
        self.n_slaves
    }

    pub fn max_fans(&self) -> usize {
        self.max_fans
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[i64] {
        &self.values
    }

    /// Index of the RPM slot for `(slave, fan)`.
    pub fn rpm_slot(&self, slave: SlaveId, fan: usize) -> usize {
        slave * self.max_fans + fan
    }

    /// Index of the DC slot for `(slave, fan)`.
    pub fn dc_slot(&self, slave: SlaveId, fan: usize) -> usize {
        self.n_slaves * self.max_fans + slave * self.max_fans + fan
    }

    pub fn rpm(&self, slave: SlaveId, fan: usize) -> i64 {
        self.values[self.rpm_slot(slave, fan)]
    }

    pub fn dc(&self, slave: SlaveId, fan: usize) -> i64 {
        self.values[self.dc_slot(slave, fan)]
    }

    pub fn set_rpm(&mut self, slave: SlaveId, fan: usize, value: i64) {
        let slot = self.rpm_slot(slave, fan);
        self.values[slot] = value;
    }

    pub fn set_dc(&mut self, slave: SlaveId, fan: usize, value: i64) {
        let slot = self.dc_slot(slave, fan);
        self.values[slot] = value;
    }

    /// Mark every slot of one slave as `RIP`, preserving nothing.
    pub fn rip_slave(&mut self, slave: SlaveId) {
        for fan in 0..self.max_fans {
            self.set_rpm(slave, fan, RIP);
            self.set_dc(slave, fan, RIP);
        }
    }

    /// Mark fan slots beyond `fan_count` as `PAD` for one slave.
    pub fn pad_slave(&mut self, slave: SlaveId, fan_count: usize) {
        for fan in fan_count..self.max_fans {
            self.set_rpm(slave, fan, PAD);
            self.set_dc(slave, fan, PAD);
        }
    }

    /// Grow to hold `n_slaves` slaves, new slots filled with `RIP`.
    pub fn grow(&mut self, n_slaves: usize) {
        if n_slaves <= self.n_slaves {
            return;
        }
        let mut next = FeedbackVector::rip(n_slaves, self.max_fans);
        for slave in 0..self.n_slaves {
            for fan in 0..self.max_fans {
                next.set_rpm(slave, fan, self.rpm(slave, fan));
                next.set_dc(slave, fan, self.dc(slave, fan));
            }
        }
        *self = next;
    }
}

/// True for any of the closed sentinel set.
pub fn is_sentinel(value: i64) -> bool {
    value == RIP || value == PAD || value == crate::codes::END
}
