//! Wire protocol for master <-> slave traffic.
//!
//! All frames are ASCII text, `|`-delimited, newline-terminated. The
//! first field is the message code, the second the passcode echoed from
//! the profile. A frame with the wrong passcode is rejected at parse
//! time; the passcode addresses a fan array, it does not authenticate.

use fc_types::codes::{
    BMODE_BROADCAST, BMODE_TARGETTED, CMD_ADD, CMD_BIP, CMD_BMODE, CMD_CHASE, CMD_DISCONNECT,
    CMD_FUPDATE_START, CMD_FUPDATE_STOP, CMD_PISET, CMD_REBOOT, CMD_SHUTDOWN, CMD_SPLITTER,
};
use fc_types::error::{FcError, Result};
use fc_types::Mac;

/// Broadcast mode carried by `BMODE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BroadcastMode {
    Broadcast,
    Targetted,
}

impl BroadcastMode {
    pub fn code(self) -> u32 {
        match self {
            BroadcastMode::Broadcast => BMODE_BROADCAST,
            BroadcastMode::Targetted => BMODE_TARGETTED,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            BMODE_BROADCAST => Some(BroadcastMode::Broadcast),
            BMODE_TARGETTED => Some(BroadcastMode::Targetted),
            _ => None,
        }
    }
}

/// Firmware-update phase reported by a slave.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdatePhase {
    StartOk,
    Done,
    Stopped,
}

impl UpdatePhase {
    fn as_str(self) -> &'static str {
        match self {
            UpdatePhase::StartOk => "START_OK",
            UpdatePhase::Done => "DONE",
            UpdatePhase::Stopped => "STOPPED",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "START_OK" => Some(UpdatePhase::StartOk),
            "DONE" => Some(UpdatePhase::Done),
            "STOPPED" => Some(UpdatePhase::Stopped),
            _ => None,
        }
    }
}

/// The closed command set (master -> slave).
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Add,
    Disconnect,
    Reboot,
    Shutdown,
    FupdateStart,
    FupdateStop,
    Bmode(BroadcastMode),
    Bip(String),
    Chase(f64),
    PiSet(f64, f64),
    DcSingle {
        /// Per-fan selection bitstring, e.g. `"11110000"`.
        selection: String,
        /// Scaled wire duty.
        duty: i64,
    },
    DcVector(Vec<i64>),
}

impl Command {
    pub fn code(&self) -> u32 {
        match self {
            Command::Add => CMD_ADD,
            Command::Disconnect => CMD_DISCONNECT,
            Command::Reboot => CMD_REBOOT,
            Command::Shutdown => CMD_SHUTDOWN,
            Command::FupdateStart => CMD_FUPDATE_START,
            Command::FupdateStop => CMD_FUPDATE_STOP,
            Command::Bmode(_) => CMD_BMODE,
            Command::Bip(_) => CMD_BIP,
            Command::Chase(_) => CMD_CHASE,
            Command::PiSet(..) => CMD_PISET,
            Command::DcSingle { .. } => fc_types::codes::CTL_DC_SINGLE,
            Command::DcVector(_) => fc_types::codes::CTL_DC_VECTOR,
        }
    }

    fn keyword(&self) -> &'static str {
        match self {
            Command::Add => "ADD",
            Command::Disconnect => "DISCONNECT",
            Command::Reboot => "REBOOT",
            Command::Shutdown => "SHUTDOWN",
            Command::FupdateStart => "FUPDATE_START",
            Command::FupdateStop => "FUPDATE_STOP",
            Command::Bmode(_) => "BMODE",
            Command::Bip(_) => "BIP",
            Command::Chase(_) => "CHASE",
            Command::PiSet(..) => "PISET",
            Command::DcSingle { .. } => "DC_SINGLE",
            Command::DcVector(_) => "DC_VECTOR",
        }
    }
}

/// Frames a slave may send to the master.
#[derive(Debug, Clone, PartialEq)]
pub enum SlaveFrame {
    /// Broadcast reply; doubles as the keepalive heartbeat.
    Advert {
        mac: Mac,
        fan_count: usize,
        version: String,
        port: u16,
    },
    /// Tachometer feedback: RPM half then DC half.
    Feedback {
        seq: u32,
        rpms: Vec<i64>,
        dcs: Vec<i64>,
    },
    /// Command acknowledgement on the per-slave command socket.
    Ack { seq: u32 },
    /// Firmware-update progress.
    Update { mac: Mac, phase: UpdatePhase },
}

/// `B|<passcode>|<listener_port>|<index_delta>\n`
pub fn encode_broadcast(passcode: &str, listener_port: u16, index_delta: u32) -> String {
    format!("B|{}|{}|{}\n", passcode, listener_port, index_delta)
}

/// `<seq>|<passcode>|<cmd>|<args...>\n`
pub fn encode_command(seq: u32, passcode: &str, command: &Command) -> String {
    let mut frame = format!("{}|{}|{}", seq, passcode, command.keyword());
    match command {
        Command::Add
        | Command::Disconnect
        | Command::Reboot
        | Command::Shutdown
        | Command::FupdateStart
        | Command::FupdateStop => {}
        Command::Bmode(mode) => {
            frame.push(CMD_SPLITTER);
            frame.push_str(&mode.code().to_string());
        }
        Command::Bip(ip) => {
            frame.push(CMD_SPLITTER);
            frame.push_str(ip);
        }
        Command::Chase(rpm) => {
            frame.push(CMD_SPLITTER);
            frame.push_str(&format!("{}", rpm));
        }
        Command::PiSet(kp, ki) => {
            frame.push(CMD_SPLITTER);
            frame.push_str(&format!("{}", kp));
            frame.push(CMD_SPLITTER);
            frame.push_str(&format!("{}", ki));
        }
        Command::DcSingle { selection, duty } => {
            frame.push(CMD_SPLITTER);
            frame.push_str(selection);
            frame.push(CMD_SPLITTER);
            frame.push_str(&duty.to_string());
        }
        Command::DcVector(duties) => {
            for duty in duties {
                frame.push(CMD_SPLITTER);
                frame.push_str(&duty.to_string());
            }
        }
    }
    frame.push('\n');
    frame
}

/// `K|<passcode>|<seq>\n` — emitted by slaves; encoded here for tests
/// and simulated slaves.
pub fn encode_ack(passcode: &str, seq: u32) -> String {
    format!("K|{}|{}\n", passcode, seq)
}

/// `A|<passcode>|<mac>|<fan_count>|<version>|<port>\n`
pub fn encode_advert(
    passcode: &str,
    mac: &Mac,
    fan_count: usize,
    version: &str,
    port: u16,
) -> String {
    format!("A|{}|{}|{}|{}|{}\n", passcode, mac, fan_count, version, port)
}

/// `F|<seq>|<rpm...>|<dc...>\n`
pub fn encode_feedback(seq: u32, rpms: &[i64], dcs: &[i64]) -> String {
    let mut frame = format!("F|{}", seq);
    for value in rpms.iter().chain(dcs.iter()) {
        frame.push(CMD_SPLITTER);
        frame.push_str(&value.to_string());
    }
    frame.push('\n');
    frame
}

/// `U|<passcode>|<mac>|<phase>\n`
pub fn encode_update(passcode: &str, mac: &Mac, phase: UpdatePhase) -> String {
    format!("U|{}|{}|{}\n", passcode, mac, phase.as_str())
}

/// Parse one slave-originated frame, enforcing the passcode.
pub fn parse_slave_frame(line: &str, passcode: &str) -> Result<SlaveFrame> {
    let line = line.trim_end_matches('\n');
    let fields: Vec<&str> = line.split(CMD_SPLITTER).collect();
    if fields.len() < 2 {
        return Err(FcError::protocol("frame has fewer than two fields"));
    }
    match fields[0] {
        "A" => {
            expect_passcode(fields[1], passcode)?;
            if fields.len() != 6 {
                return Err(FcError::protocol("advert expects 6 fields"));
            }
            let mac = Mac::parse(fields[2])
                .ok_or_else(|| FcError::protocol(format!("bad MAC {:?}", fields[2])))?;
            let fan_count = fields[3]
                .parse::<usize>()
                .map_err(|_| FcError::protocol("bad fan count"))?;
            let port = fields[5]
                .parse::<u16>()
                .map_err(|_| FcError::protocol("bad advert port"))?;
            Ok(SlaveFrame::Advert {
                mac,
                fan_count,
                version: fields[4].to_string(),
                port,
            })
        }
        "F" => {
            let seq = fields[1]
                .parse::<u32>()
                .map_err(|_| FcError::protocol("bad feedback seq"))?;
            let values = fields[2..]
                .iter()
                .map(|f| f.parse::<i64>())
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|_| FcError::protocol("non-integer feedback value"))?;
            if values.is_empty() || values.len() % 2 != 0 {
                return Err(FcError::protocol("feedback halves are uneven"));
            }
            let half = values.len() / 2;
            Ok(SlaveFrame::Feedback {
                seq,
                rpms: values[..half].to_vec(),
                dcs: values[half..].to_vec(),
            })
        }
        "K" => {
            expect_passcode(fields[1], passcode)?;
            if fields.len() != 3 {
                return Err(FcError::protocol("ack expects 3 fields"));
            }
            let seq = fields[2]
                .parse::<u32>()
                .map_err(|_| FcError::protocol("bad ack seq"))?;
            Ok(SlaveFrame::Ack { seq })
        }
        "U" => {
            expect_passcode(fields[1], passcode)?;
            if fields.len() != 4 {
                return Err(FcError::protocol("update expects 4 fields"));
            }
            let mac = Mac::parse(fields[2])
                .ok_or_else(|| FcError::protocol(format!("bad MAC {:?}", fields[2])))?;
            let phase = UpdatePhase::parse(fields[3])
                .ok_or_else(|| FcError::protocol(format!("bad update phase {:?}", fields[3])))?;
            Ok(SlaveFrame::Update { mac, phase })
        }
        other => Err(FcError::protocol(format!("unknown frame code {:?}", other))),
    }
}

fn expect_passcode(got: &str, expected: &str) -> Result<()> {
    if got == expected {
        Ok(())
    } else {
        Err(FcError::protocol(format!("passcode mismatch {:?}", got)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mac() -> Mac {
        Mac::parse("AA:BB:CC:DD:EE:01").unwrap()
    }

    #[test]
    fn broadcast_frame_layout() {
        assert_eq!(encode_broadcast("CT", 60169, 10), "B|CT|60169|10\n");
    }

    #[test]
    fn command_frames_encode_args() {
        assert_eq!(encode_command(7, "CT", &Command::Add), "7|CT|ADD\n");
        assert_eq!(
            encode_command(8, "CT", &Command::Chase(1500.0)),
            "8|CT|CHASE|1500\n"
        );
        assert_eq!(
            encode_command(9, "CT", &Command::PiSet(0.5, 0.05)),
            "9|CT|PISET|0.5|0.05\n"
        );
        assert_eq!(
            encode_command(
                10,
                "CT",
                &Command::DcSingle {
                    selection: "1100".into(),
                    duty: 5000
                }
            ),
            "10|CT|DC_SINGLE|1100|5000\n"
        );
        assert_eq!(
            encode_command(11, "CT", &Command::DcVector(vec![0, 2500, 10000])),
            "11|CT|DC_VECTOR|0|2500|10000\n"
        );
        assert_eq!(
            encode_command(12, "CT", &Command::Bmode(BroadcastMode::Targetted)),
            format!("12|CT|BMODE|{}\n", BMODE_TARGETTED)
        );
        assert_eq!(
            encode_command(13, "CT", &Command::Bip("192.168.1.5".into())),
            "13|CT|BIP|192.168.1.5\n"
        );
        assert_eq!(
            encode_command(14, "CT", &Command::FupdateStart),
            "14|CT|FUPDATE_START\n"
        );
    }

    #[test]
    fn advert_roundtrip() {
        let line = encode_advert("CT", &mac(), 21, "IV-1", 50000);
        let frame = parse_slave_frame(&line, "CT").unwrap();
        assert_eq!(
            frame,
            SlaveFrame::Advert {
                mac: mac(),
                fan_count: 21,
                version: "IV-1".into(),
                port: 50000,
            }
        );
    }

    #[test]
    fn feedback_roundtrip_splits_halves() {
        let line = encode_feedback(3, &[1200, 1300], &[5000, 5100]);
        let frame = parse_slave_frame(&line, "CT").unwrap();
        assert_eq!(
            frame,
            SlaveFrame::Feedback {
                seq: 3,
                rpms: vec![1200, 1300],
                dcs: vec![5000, 5100],
            }
        );
    }

    #[test]
    fn feedback_rejects_uneven_halves() {
        assert!(parse_slave_frame("F|1|100|200|300", "CT").is_err());
        assert!(parse_slave_frame("F|1", "CT").is_err());
    }

    #[test]
    fn ack_and_update_roundtrip() {
        let frame = parse_slave_frame(&encode_ack("CT", 42), "CT").unwrap();
        assert_eq!(frame, SlaveFrame::Ack { seq: 42 });

        let line = encode_update("CT", &mac(), UpdatePhase::Done);
        let frame = parse_slave_frame(&line, "CT").unwrap();
        assert_eq!(
            frame,
            SlaveFrame::Update {
                mac: mac(),
                phase: UpdatePhase::Done
            }
        );
    }

    #[test]
    fn wrong_passcode_is_protocol_error() {
        let line = encode_advert("CT", &mac(), 21, "IV-1", 50000);
        let err = parse_slave_frame(&line, "XX").unwrap_err();
        assert_eq!(err.kind, fc_types::ErrorKind::Protocol);
    }

    #[test]
    fn unknown_code_is_protocol_error() {
        assert!(parse_slave_frame("Z|CT|1", "CT").is_err());
        assert!(parse_slave_frame("", "CT").is_err());
    }
}
