//! Slave lifecycle management: the table of known modules, their state
//! machines, and the three state vectors derived from them.
//!
//! The manager is a plain state machine; sockets live in the listener,
//! broadcaster, and links. Ingress events arrive through `observe`,
//! outbound commands leave through the channel handed to `new`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use log::{info, warn};

use fc_types::codes::{DISC_STATUS_TIMEOUT, MP_STOP_TIMEOUT};
use fc_types::{
    duty_to_wire, ControlVector, FanSelection, FeedbackVector, Mac, NetworkVector, SlaveEntry,
    SlaveId, SlaveStatus,
};

use crate::protocol::{Command, UpdatePhase};

/// Ingress demultiplexed by the listener into per-slave events.
#[derive(Debug, Clone)]
pub enum IngressEvent {
    Advert {
        mac: Mac,
        fan_count: usize,
        version: String,
        addr: SocketAddr,
    },
    Feedback {
        addr: SocketAddr,
        seq: u32,
        rpms: Vec<i64>,
        dcs: Vec<i64>,
    },
    Update {
        mac: Mac,
        phase: UpdatePhase,
    },
    /// A slave link exhausted its retransmit allowance.
    LinkTimeout { mac: Mac },
}

/// Standardized events the manager emits for the orchestrator/UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlaveEvent {
    Discovered { index: SlaveId, mac: Mac },
    Connected { index: SlaveId, mac: Mac },
    Disconnected {
        index: SlaveId,
        mac: Mac,
        status: i32,
    },
    Updating { index: SlaveId, mac: Mac },
}

/// Manager knobs, read off the profile at construction.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    pub max_fans: usize,
    pub max_timeouts: u32,
    pub dc_decimals: u32,
    /// Interval after which a silent Connected slave accrues a miss.
    pub heartbeat_period: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_fans: 21,
            max_timeouts: 10,
            dc_decimals: 2,
            heartbeat_period: Duration::from_millis(1_000),
        }
    }
}

struct SlaveState {
    index: SlaveId,
    name: String,
    mac: Mac,
    status: SlaveStatus,
    fan_count: usize,
    version: String,
    endpoint: Option<SocketAddr>,
    last_heard: Option<Instant>,
    misses: u32,
    /// Last feedback seq seen, to keep per-slave publication monotonic.
    last_feedback_seq: Option<u32>,
    /// Last live readings, preserved across a disconnection.
    last_rpms: Vec<i64>,
    last_dcs: Vec<i64>,
}

/// Owns the slave set keyed by MAC and the derived state vectors.
pub struct SlaveManager {
    config: ManagerConfig,
    slaves: Vec<SlaveState>,
    by_mac: HashMap<Mac, SlaveId>,
    by_addr: HashMap<SocketAddr, SlaveId>,
    feedback: FeedbackVector,
    network: NetworkVector,
    events: Vec<SlaveEvent>,
    outbound: Sender<(Mac, Command)>,
}

impl SlaveManager {
    pub fn new(config: ManagerConfig, outbound: Sender<(Mac, Command)>) -> Self {
        let max_fans = config.max_fans;
        Self {
            config,
            slaves: Vec::new(),
            by_mac: HashMap::new(),
            by_addr: HashMap::new(),
            feedback: FeedbackVector::rip(0, max_fans),
            network: NetworkVector {
                connected: false,
                local_ip: "0.0.0.0".into(),
                broadcast_ip: "<broadcast>".into(),
                broadcast_port: 0,
                listener_port: 0,
            },
            events: Vec::new(),
            outbound,
        }
    }

    /// Pre-register saved slaves so their indices survive sessions.
    /// Entries arrive in list order; list position is the index.
    pub fn register_saved(&mut self, entries: &[(Mac, String, usize)]) {
        for (mac, name, fan_count) in entries {
            if self.by_mac.contains_key(mac) {
                continue;
            }
            let index = self.allocate(mac.clone());
            let slave = &mut self.slaves[index];
            slave.name = name.clone();
            slave.fan_count = *fan_count;
            slave.status = SlaveStatus::Available;
            info!(target: "manager", "saved slave {} restored at index {}", mac, index);
        }
    }

    /// Stable dense index for a MAC, allocating on first sight.
    pub fn index_for(&mut self, mac: &Mac) -> SlaveId {
        if let Some(index) = self.by_mac.get(mac) {
            return *index;
        }
        self.allocate(mac.clone())
    }

    fn allocate(&mut self, mac: Mac) -> SlaveId {
        let index = self.slaves.len();
        self.slaves.push(SlaveState {
            index,
            name: format!("Module {}", index),
            mac: mac.clone(),
            status: SlaveStatus::Available,
            fan_count: 0,
            version: String::new(),
            endpoint: None,
            last_heard: None,
            misses: 0,
            last_feedback_seq: None,
            last_rpms: Vec::new(),
            last_dcs: Vec::new(),
        });
        self.by_mac.insert(mac, index);
        self.feedback.grow(self.slaves.len());
        self.feedback.rip_slave(index);
        index
    }

    /// Feed one ingress event through the state machine.
    pub fn observe(&mut self, event: IngressEvent, now: Instant) {
        match event {
            IngressEvent::Advert {
                mac,
                fan_count,
                version,
                addr,
            } => self.observe_advert(mac, fan_count, version, addr, now),
            IngressEvent::Feedback {
                addr,
                seq,
                rpms,
                dcs,
            } => self.observe_feedback(addr, seq, rpms, dcs, now),
            IngressEvent::Update { mac, phase } => self.observe_update(mac, phase),
            IngressEvent::LinkTimeout { mac } => self.observe_link_timeout(mac),
        }
    }

    fn observe_advert(
        &mut self,
        mac: Mac,
        fan_count: usize,
        version: String,
        addr: SocketAddr,
        now: Instant,
    ) {
        let index = self.index_for(&mac);
        let max_fans = self.config.max_fans;
        let slave = &mut self.slaves[index];
        slave.fan_count = fan_count.min(max_fans);
        slave.version = version;
        slave.last_heard = Some(now);
        slave.misses = 0;

        match slave.status {
            SlaveStatus::Available => {
                // First reply (fresh contact or a saved slave answering
                // the broadcast): identity is now configured.
                slave.status = SlaveStatus::Known;
                slave.endpoint = Some(addr);
                self.by_addr.insert(addr, index);
                info!(target: "manager", "discovered {} as index {}", mac, index);
                self.events.push(SlaveEvent::Discovered { index, mac });
            }
            SlaveStatus::Known => {
                // Re-heard heartbeat promotes to live.
                slave.status = SlaveStatus::Connected;
                slave.endpoint = Some(addr);
                self.by_addr.insert(addr, index);
                self.restore_feedback(index);
                self.events.push(SlaveEvent::Connected { index, mac });
            }
            SlaveStatus::Disconnected => {
                slave.status = SlaveStatus::Connected;
                slave.endpoint = Some(addr);
                self.by_addr.insert(addr, index);
                self.restore_feedback(index);
                info!(target: "manager", "{} reconnected", mac);
                self.events.push(SlaveEvent::Connected { index, mac });
            }
            SlaveStatus::Connected | SlaveStatus::Updating => {
                // Keepalive only; endpoint may roam.
                if slave.endpoint != Some(addr) {
                    if let Some(old) = slave.endpoint.take() {
                        self.by_addr.remove(&old);
                    }
                    slave.endpoint = Some(addr);
                    self.by_addr.insert(addr, index);
                }
            }
        }
    }

    fn observe_feedback(
        &mut self,
        addr: SocketAddr,
        seq: u32,
        rpms: Vec<i64>,
        dcs: Vec<i64>,
        now: Instant,
    ) {
        let Some(&index) = self.by_addr.get(&addr) else {
            warn!(target: "manager", "feedback from unknown endpoint {}", addr);
            return;
        };
        let slave = &mut self.slaves[index];

        // Per-slave monotonic gate: stale frames are dropped so the
        // published order matches the slave's emission order.
        if let Some(last) = slave.last_feedback_seq {
            if seq.wrapping_sub(last) == 0 || seq.wrapping_sub(last) > u32::MAX / 2 {
                return;
            }
        }
        slave.last_feedback_seq = Some(seq);
        slave.last_heard = Some(now);
        slave.misses = 0;

        // Feedback while Disconnected promotes before the next timeout
        // scan can run.
        if slave.status == SlaveStatus::Disconnected {
            slave.status = SlaveStatus::Connected;
            let mac = slave.mac.clone();
            self.events.push(SlaveEvent::Connected { index, mac });
        }

        let fan_count = slave.fan_count.min(self.config.max_fans);
        slave.last_rpms = rpms.clone();
        slave.last_dcs = dcs.clone();
        for fan in 0..fan_count {
            if let Some(rpm) = rpms.get(fan) {
                self.feedback.set_rpm(index, fan, *rpm);
            }
            if let Some(dc) = dcs.get(fan) {
                self.feedback.set_dc(index, fan, *dc);
            }
        }
        self.feedback.pad_slave(index, fan_count);
    }

    fn observe_update(&mut self, mac: Mac, phase: UpdatePhase) {
        let Some(&index) = self.by_mac.get(&mac) else {
            warn!(target: "manager", "update report from unknown {}", mac);
            return;
        };
        let slave = &mut self.slaves[index];
        match phase {
            UpdatePhase::StartOk => {
                slave.status = SlaveStatus::Updating;
                self.events.push(SlaveEvent::Updating { index, mac });
            }
            UpdatePhase::Done | UpdatePhase::Stopped => {
                if slave.status == SlaveStatus::Updating {
                    slave.status = SlaveStatus::Known;
                }
            }
        }
    }

    fn observe_link_timeout(&mut self, mac: Mac) {
        let Some(&index) = self.by_mac.get(&mac) else {
            return;
        };
        if self.slaves[index].status == SlaveStatus::Connected {
            self.disconnect(index, DISC_STATUS_TIMEOUT);
        }
    }

    /// Periodic timeout scan. Connected slaves silent for a heartbeat
    /// period accrue a miss; at `max_timeouts` misses they disconnect.
    pub fn tick(&mut self, now: Instant) {
        let period = self.config.heartbeat_period;
        let max_timeouts = self.config.max_timeouts;
        let mut to_disconnect = Vec::new();
        for slave in &mut self.slaves {
            if slave.status != SlaveStatus::Connected {
                continue;
            }
            let silent = slave
                .last_heard
                .map(|t| now.duration_since(t) >= period)
                .unwrap_or(true);
            if silent {
                slave.misses += 1;
                // Pretend the scan window restarts so one silent period
                // yields one miss.
                slave.last_heard = Some(now);
                if slave.misses >= max_timeouts {
                    to_disconnect.push(slave.index);
                }
            }
        }
        for index in to_disconnect {
            self.disconnect(index, DISC_STATUS_TIMEOUT);
        }
    }

    fn disconnect(&mut self, index: SlaveId, status: i32) {
        let slave = &mut self.slaves[index];
        slave.status = SlaveStatus::Disconnected;
        // Endpoint survives for reconnection; live slots become RIP while
        // the last readings stay cached on the entry.
        let mac = slave.mac.clone();
        self.feedback.rip_slave(index);
        warn!(target: "manager", "{} disconnected ({})", mac, status);
        self.events.push(SlaveEvent::Disconnected { index, mac, status });
    }

    /// Route a control vector to every targeted, controllable slave.
    ///
    /// Slaves in `Updating` accept no control vectors and are skipped.
    pub fn control(&mut self, vector: ControlVector) {
        let decimals = self.config.dc_decimals;
        let max_fans = self.config.max_fans;
        let mut outbound = Vec::new();

        match &vector {
            ControlVector::SingleDc {
                target,
                duty,
                selections,
            } => {
                let wire = duty_to_wire(*duty, decimals);
                let mut selection_iter = selections.iter();
                for slave in &self.slaves {
                    if !target.includes(slave.index) {
                        continue;
                    }
                    let selection = selection_iter.next().cloned().unwrap_or(FanSelection::All);
                    if !self.controllable(slave.index) {
                        continue;
                    }
                    let mask = match selection {
                        FanSelection::All => "1".repeat(slave.fan_count.max(1)),
                        FanSelection::Mask(mask) => mask,
                    };
                    outbound.push((
                        slave.mac.clone(),
                        Command::DcSingle {
                            selection: mask,
                            duty: wire,
                        },
                    ));
                }
            }
            ControlVector::VectorDc { target, duties } => {
                for slave in &self.slaves {
                    if !target.includes(slave.index) || !self.controllable(slave.index) {
                        continue;
                    }
                    let start = slave.index * max_fans;
                    let slice: Vec<i64> = (0..max_fans)
                        .map(|fan| {
                            duties
                                .get(start + fan)
                                .map(|d| duty_to_wire(*d, decimals))
                                .unwrap_or(0)
                        })
                        .collect();
                    outbound.push((slave.mac.clone(), Command::DcVector(slice)));
                }
            }
        }

        for (mac, command) in outbound {
            self.record_commanded(&mac, &command);
            // Control commands block briefly rather than drop.
            if self
                .outbound
                .send_timeout((mac.clone(), command), MP_STOP_TIMEOUT)
                .is_err()
            {
                warn!(target: "manager", "command channel stalled; dropping for {}", mac);
            }
        }
    }

    fn controllable(&self, index: SlaveId) -> bool {
        let slave = &self.slaves[index];
        slave.status == SlaveStatus::Connected && slave.endpoint.is_some()
    }

    /// Mirror commanded duties into the DC half so the feedback vector
    /// always carries the last commanded value.
    fn record_commanded(&mut self, mac: &Mac, command: &Command) {
        let Some(&index) = self.by_mac.get(mac) else {
            return;
        };
        let fan_count = self.slaves[index].fan_count.min(self.config.max_fans);
        match command {
            Command::DcSingle { selection, duty } => {
                for fan in 0..fan_count {
                    if selection.as_bytes().get(fan).copied() == Some(b'1') {
                        self.feedback.set_dc(index, fan, *duty);
                    }
                }
            }
            Command::DcVector(duties) => {
                for fan in 0..fan_count {
                    if let Some(duty) = duties.get(fan) {
                        self.feedback.set_dc(index, fan, *duty);
                    }
                }
            }
            _ => {}
        }
    }

    /// Queue a bare command for one slave (reboot, firmware, chase...).
    pub fn command(&mut self, mac: &Mac, command: Command) {
        if self
            .outbound
            .send_timeout((mac.clone(), command), MP_STOP_TIMEOUT)
            .is_err()
        {
            warn!(target: "manager", "command channel stalled for {}", mac);
        }
    }

    pub fn set_network(&mut self, network: NetworkVector) {
        self.network = network;
    }

    pub fn network_vector(&self) -> NetworkVector {
        self.network.clone()
    }

    pub fn slaves_vector(&self) -> Vec<SlaveEntry> {
        self.slaves
            .iter()
            .map(|s| SlaveEntry {
                index: s.index,
                name: s.name.clone(),
                mac: s.mac.clone(),
                status: s.status,
                fan_count: s.fan_count,
                version: s.version.clone(),
            })
            .collect()
    }

    pub fn feedback_vector(&self) -> FeedbackVector {
        self.feedback.clone()
    }

    pub fn status_of(&self, mac: &Mac) -> Option<SlaveStatus> {
        self.by_mac.get(mac).map(|i| self.slaves[*i].status)
    }

    pub fn endpoint_of(&self, mac: &Mac) -> Option<SocketAddr> {
        self.by_mac.get(mac).and_then(|i| self.slaves[*i].endpoint)
    }

    pub fn slave_count(&self) -> usize {
        self.slaves.len()
    }

    /// Drain events accumulated since the last call.
    pub fn drain_events(&mut self) -> Vec<SlaveEvent> {
        std::mem::take(&mut self.events)
    }

    fn restore_feedback(&mut self, index: SlaveId) {
        let fan_count = self.slaves[index].fan_count.min(self.config.max_fans);
        let rpms = self.slaves[index].last_rpms.clone();
        let dcs = self.slaves[index].last_dcs.clone();
        for fan in 0..fan_count {
            if let Some(rpm) = rpms.get(fan) {
                self.feedback.set_rpm(index, fan, *rpm);
            }
            if let Some(dc) = dcs.get(fan) {
                self.feedback.set_dc(index, fan, *dc);
            }
        }
        self.feedback.pad_slave(index, fan_count);
    }
}
