//! Shared numeric codes for the fan array wire protocol and state vectors.
//!
//! These constants are the closed vocabulary spoken between the master and
//! the slave modules. Values are part of the wire contract and must not
//! change between releases.

use std::time::Duration;

/// Bound on how long any task's `stop()` waits for its thread to join.
pub const MP_STOP_TIMEOUT: Duration = Duration::from_millis(500);

/// Decimal places carried for duty cycles on the wire.
pub const DC_DECIMALS: u32 = 2;

/// Scale factor between normalized duty cycles and their wire integers.
///
/// Divide a wire duty by this to get a value in [0, 1].
pub fn dc_normalizer(decimals: u32) -> f64 {
    10f64.powi(decimals as i32 + 2)
}

// Command codes (master -> slave) ---------------------------------------------
pub const CMD_ADD: u32 = 3031;
pub const CMD_DISCONNECT: u32 = 3032;
pub const CMD_REBOOT: u32 = 3033;
pub const CMD_SHUTDOWN: u32 = 3035;
pub const CMD_FUPDATE_START: u32 = 3036;
pub const CMD_FUPDATE_STOP: u32 = 3037;
pub const CMD_BMODE: u32 = 3039;
pub const CMD_BIP: u32 = 3040;
pub const CMD_CHASE: u32 = 3043;
pub const CMD_PISET: u32 = 3048;

// Target codes ----------------------------------------------------------------
pub const TGT_ALL: u32 = 4041;
pub const TGT_SELECTED: u32 = 4042;

// Control vector codes --------------------------------------------------------
pub const CTL_DC_SINGLE: u32 = 5051;
pub const CTL_DC_VECTOR: u32 = 5052;

// Slave statuses --------------------------------------------------------------
pub const SS_CONNECTED: i32 = 30001;
pub const SS_KNOWN: i32 = 30002;
pub const SS_DISCONNECTED: i32 = 30003;
pub const SS_AVAILABLE: i32 = 30004;
pub const SS_UPDATING: i32 = 30005;

// Network statuses ------------------------------------------------------------
pub const NS_CONNECTED: i32 = 20001;
pub const NS_CONNECTING: i32 = 20002;
pub const NS_DISCONNECTED: i32 = 20003;
pub const NS_DISCONNECTING: i32 = 20004;

// Broadcast modes -------------------------------------------------------------
pub const BMODE_BROADCAST: u32 = 8391;
pub const BMODE_TARGETTED: u32 = 8392;

// Disconnection event statuses ------------------------------------------------
pub const DISC_STATUS_NORMAL: i32 = 70001;
pub const DISC_STATUS_TIMEOUT: i32 = 70002;
pub const DISC_STATUS_ERROR: i32 = 70003;
pub const DISC_STATUS_FORCED: i32 = 70004;

/// Fan-slot sentinels in the feedback vector.
///
/// The slot existed but its slave is gone.
pub const RIP: i64 = -666;
/// The slot is within a slave's allowance but the fan is not wired.
pub const PAD: i64 = -69;
/// End-of-vector marker used by external bridges.
pub const END: i64 = -354;

/// Length of the network vector.
pub const NS_LEN: usize = 5;
/// Width of one slave entry in the slaves vector.
pub const SD_LEN: usize = 6;

/// Field splitter for wire frames.
pub const CMD_SPLITTER: char = '|';
/// Element splitter inside a single frame field.
pub const LIST_SPLITTER: char = ',';

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dc_normalizer_default() {
        assert_eq!(dc_normalizer(DC_DECIMALS), 10_000.0);
        assert_eq!(dc_normalizer(0), 100.0);
    }

    #[test]
    fn sentinels_are_distinct() {
        assert_ne!(RIP, PAD);
        assert_ne!(PAD, END);
        assert_ne!(RIP, END);
    }
}
