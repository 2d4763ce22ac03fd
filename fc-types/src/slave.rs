//! Slave identity and lifecycle status.

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::codes::{SS_AVAILABLE, SS_CONNECTED, SS_DISCONNECTED, SS_KNOWN, SS_UPDATING};

/// Dense per-session slave index, assigned on first contact.
pub type SlaveId = usize;

/// Lifecycle status of one slave module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SlaveStatus {
    /// Seen on the network, never configured.
    Available,
    /// Configured (saved or added), not currently exchanging traffic.
    Known,
    /// Live: heartbeats arriving, control vectors accepted.
    Connected,
    /// Was connected; heartbeats stopped. Entry retained for reconnect.
    Disconnected,
    /// Firmware update in flight; control vectors are withheld.
    Updating,
}

impl SlaveStatus {
    /// Wire/status code for this state.
    pub fn code(self) -> i32 {
        match self {
            SlaveStatus::Connected => SS_CONNECTED,
            SlaveStatus::Known => SS_KNOWN,
            SlaveStatus::Disconnected => SS_DISCONNECTED,
            SlaveStatus::Available => SS_AVAILABLE,
            SlaveStatus::Updating => SS_UPDATING,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            SS_CONNECTED => Some(SlaveStatus::Connected),
            SS_KNOWN => Some(SlaveStatus::Known),
            SS_DISCONNECTED => Some(SlaveStatus::Disconnected),
            SS_AVAILABLE => Some(SlaveStatus::Available),
            SS_UPDATING => Some(SlaveStatus::Updating),
            _ => None,
        }
    }
}

impl fmt::Display for SlaveStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SlaveStatus::Available => "AVAILABLE",
            SlaveStatus::Known => "KNOWN",
            SlaveStatus::Connected => "CONNECTED",
            SlaveStatus::Disconnected => "DISCONNECTED",
            SlaveStatus::Updating => "UPDATING",
        };
        f.write_str(s)
    }
}

/// MAC address in canonical `AA:BB:CC:DD:EE:FF` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mac(String);

fn mac_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[0-9A-Fa-f]{2}(:[0-9A-Fa-f]{2}){5}$").unwrap())
}

impl Mac {
    /// Parse and canonicalize (uppercase) a MAC string.
    pub fn parse(s: &str) -> Option<Self> {
        if mac_regex().is_match(s) {
            Some(Self(s.to_ascii_uppercase()))
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Mac {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parse_canonicalizes() {
        let mac = Mac::parse("aa:bb:cc:00:11:22").unwrap();
        assert_eq!(mac.as_str(), "AA:BB:CC:00:11:22");
        assert_eq!(mac.as_str().len(), 17);
    }

    #[test]
    fn mac_parse_rejects_malformed() {
        assert!(Mac::parse("aa:bb:cc:00:11").is_none());
        assert!(Mac::parse("aa-bb-cc-00-11-22").is_none());
        assert!(Mac::parse("zz:bb:cc:00:11:22").is_none());
        assert!(Mac::parse("").is_none());
    }

    #[test]
    fn status_codes_roundtrip() {
        for status in [
            SlaveStatus::Available,
            SlaveStatus::Known,
            SlaveStatus::Connected,
            SlaveStatus::Disconnected,
            SlaveStatus::Updating,
        ] {
            assert_eq!(SlaveStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(SlaveStatus::from_code(0), None);
    }
}
