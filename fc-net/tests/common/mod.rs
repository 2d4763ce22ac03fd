#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver};

use fc_net::manager::{IngressEvent, ManagerConfig, SlaveManager};
use fc_net::protocol::Command;
use fc_types::Mac;

pub fn mac(n: u8) -> Mac {
    Mac::parse(&format!("AA:BB:CC:DD:EE:{:02X}", n)).unwrap()
}

pub fn addr(n: u8) -> SocketAddr {
    format!("127.0.0.{}:50000", n).parse().unwrap()
}

/// Manager with small limits plus the receiving end of its command channel.
pub fn manager(max_fans: usize, max_timeouts: u32) -> (SlaveManager, Receiver<(Mac, Command)>) {
    let (tx, rx) = unbounded();
    let config = ManagerConfig {
        max_fans,
        max_timeouts,
        dc_decimals: 2,
        heartbeat_period: Duration::from_millis(100),
    };
    (SlaveManager::new(config, tx), rx)
}

pub fn advert(n: u8, fan_count: usize) -> IngressEvent {
    IngressEvent::Advert {
        mac: mac(n),
        fan_count,
        version: "IV-1".into(),
        addr: addr(n),
    }
}
