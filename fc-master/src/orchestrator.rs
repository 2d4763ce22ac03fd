//! Top-level assembly: one owner for the archive, network tasks, signal
//! pipeline, controller, and logger.
//!
//! The orchestrator's tick drains network ingress into the slave
//! manager, runs the timeout scan, steps the controller on its own
//! period, and publishes the three state vectors to subscribers and the
//! data logger. Shutdown is ordered so command traffic stops first and
//! the archive persists last.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{error, info, warn};

use fc_core::archive::keys::ProfileKey;
use fc_core::{ArchiveHandle, DataLogger, LogSchema, Profile, Value};
use fc_net::broadcaster::NetFatal;
use fc_net::{
    BroadcastMode, Broadcaster, BroadcasterConfig, Command, IngressEvent, LinkConfig, Listener,
    ManagerConfig, SlaveEvent, SlaveLink, SlaveManager,
};
use fc_signal::{Controller, ControllerConfig, QualityMonitor};
use fc_types::error::{FcError, Result};
use fc_types::{
    is_sentinel, wire_to_duty, ControlVector, DutyMap, FanContext, FanSelection, FeedbackVector,
    Mac, NetworkVector, SlaveEntry, Target,
};

/// Orchestrator tick period.
const TICK: Duration = Duration::from_millis(100);

/// Why the run loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Operator asked for shutdown.
    Requested,
    /// A socket task died beyond recovery.
    FatalNetwork(String),
}

type VectorSubscriber = Box<dyn FnMut(&NetworkVector, &[SlaveEntry], &FeedbackVector) + Send>;

/// Everything the master owns at runtime.
pub struct Orchestrator {
    archive: ArchiveHandle,
    profile_path: Option<PathBuf>,
    manager: SlaveManager,
    broadcaster: Broadcaster,
    listener: Listener,
    links: HashMap<Mac, SlaveLink>,
    controller: Controller,
    logger: Option<DataLogger>,
    quality: QualityMonitor,
    ingress_rx: Receiver<IngressEvent>,
    /// Clone of the listener's sender; links report their timeouts here.
    link_ingress: Sender<IngressEvent>,
    outbound_rx: Receiver<(Mac, Command)>,
    fatal_rx: Receiver<NetFatal>,
    subscribers: Vec<VectorSubscriber>,
    link_config: LinkConfig,
    last_controller_step: Instant,
    controller_period: Duration,
    dc_decimals: u32,
    max_rpm: f64,
    /// Description of the last applied duty map, for log headers.
    duty_map_desc: Option<String>,
}

impl Orchestrator {
    /// Bring up the network tasks and the manager off the archive's
    /// current profile. Bind failures surface as `Transport`.
    pub fn start(archive: ArchiveHandle, profile_path: Option<PathBuf>) -> Result<Self> {
        let profile = archive.snapshot()?;

        let passcode = profile.string(ProfileKey::Passcode);
        let max_fans = profile.int(ProfileKey::MaxFans).max(1) as usize;
        let max_timeouts = profile.int(ProfileKey::MaxTimeouts).max(1) as u32;
        let dc_decimals = profile.int(ProfileKey::DcDecimals).max(0) as u32;
        let broadcast_period =
            Duration::from_millis(profile.int(ProfileKey::BroadcastPeriodMs).max(1) as u64);
        let period = Duration::from_millis(profile.int(ProfileKey::PeriodMs).max(1) as u64);

        let (ingress_tx, ingress_rx) =
            bounded(profile.int(ProfileKey::ListenerQueueSize).max(1) as usize * 64);
        let (outbound_tx, outbound_rx) =
            bounded(profile.int(ProfileKey::SlaveQueueSize).max(1) as usize * 64);
        let (fatal_tx, fatal_rx) = bounded(4);

        let link_ingress = ingress_tx.clone();
        let listener = Listener::start(
            &profile.string(ProfileKey::DefaultIpAddress),
            0,
            passcode.clone(),
            ingress_tx,
        )?;

        // The listener's port is ephemeral, so the broadcastPort
        // collision rule can only be enforced once it is bound.
        let broadcast_port = profile.int(ProfileKey::BroadcastPort) as u16;
        if listener.local_port() == broadcast_port {
            let port = listener.local_port();
            listener.stop();
            return Err(FcError::validation(format!(
                "listener bound port {} collides with broadcastPort",
                port
            )));
        }

        let broadcaster = Broadcaster::start(
            BroadcasterConfig {
                broadcast_ip: profile.string(ProfileKey::BroadcastIp),
                broadcast_port,
                period: broadcast_period,
                passcode: passcode.clone(),
                listener_port: listener.local_port(),
                index_delta: profile.int(ProfileKey::ExternalIndexDelta).max(0) as u32,
            },
            fatal_tx,
        )?;

        let mut manager = SlaveManager::new(
            ManagerConfig {
                max_fans,
                max_timeouts,
                dc_decimals,
                heartbeat_period: broadcast_period,
            },
            outbound_tx,
        );
        manager.register_saved(&saved_slaves(&profile));
        manager.set_network(NetworkVector {
            connected: true,
            local_ip: profile.string(ProfileKey::DefaultIpAddress),
            broadcast_ip: profile.string(ProfileKey::BroadcastIp),
            broadcast_port,
            listener_port: listener.local_port(),
        });

        let controller = Controller::new(ControllerConfig {
            period,
            max_rpm: profile.int(ProfileKey::MaxRpm).max(1) as f64,
            dc_decimals,
            auto_tune: false,
        });

        info!(
            target: "orchestrator",
            "master up: broadcast {}:{} every {:?}, listener port {}",
            profile.string(ProfileKey::BroadcastIp),
            profile.int(ProfileKey::BroadcastPort),
            broadcast_period,
            listener.local_port()
        );

        Ok(Self {
            archive,
            profile_path,
            manager,
            broadcaster,
            listener,
            links: HashMap::new(),
            controller,
            logger: None,
            quality: QualityMonitor::new(1.5 * profile.int(ProfileKey::MaxRpm).max(1) as f64),
            ingress_rx,
            link_ingress,
            outbound_rx,
            fatal_rx,
            subscribers: Vec::new(),
            link_config: LinkConfig {
                passcode,
                period,
                max_timeouts,
            },
            last_controller_step: Instant::now(),
            controller_period: period,
            dc_decimals,
            max_rpm: profile.int(ProfileKey::MaxRpm).max(1) as f64,
            duty_map_desc: None,
        })
    }

    /// Register a consumer of the published state vectors.
    pub fn subscribe(&mut self, subscriber: VectorSubscriber) {
        self.subscribers.push(subscriber);
    }

    pub fn controller_mut(&mut self) -> &mut Controller {
        &mut self.controller
    }

    pub fn manager(&self) -> &SlaveManager {
        &self.manager
    }

    /// Start CSV logging of the feedback stream.
    pub fn start_logging(&mut self, path: &std::path::Path) -> Result<()> {
        let profile = self.archive.snapshot()?;
        let slaves = self
            .manager
            .slaves_vector()
            .iter()
            .map(|s| (s.index, s.name.clone(), s.mac.to_string()))
            .collect();
        let fan_array = profile.get(ProfileKey::FanArray).cloned();
        let dim = |key: ProfileKey| {
            fan_array
                .as_ref()
                .and_then(Value::as_sub)
                .and_then(|sub| sub.get(&key.id()))
                .and_then(Value::as_int)
                .unwrap_or(0) as usize
        };
        let schema = LogSchema {
            version: version_string(&self.archive),
            slaves,
            rows: dim(ProfileKey::FaRows),
            cols: dim(ProfileKey::FaColumns),
            layers: dim(ProfileKey::FaLayers),
            max_fans: profile.int(ProfileKey::MaxFans).max(1) as usize,
            duty_map: self.duty_map_desc.clone(),
        };
        self.logger = Some(DataLogger::start(path, schema)?);
        Ok(())
    }

    pub fn stop_logging(&mut self) {
        if let Some(logger) = self.logger.take() {
            logger.stop(fc_types::codes::MP_STOP_TIMEOUT);
        }
    }

    /// Start closed-loop control of all fans.
    pub fn chase(&mut self, target_rpm: f64, selection: FanSelection) -> Result<()> {
        self.controller.chase(target_rpm, selection)
    }

    /// Validate user PI gains and broadcast them verbatim to every
    /// connected slave's local loop.
    pub fn apply_user_gains(&mut self, kp: f64, ki: f64) -> Result<()> {
        let (kp, ki) = Controller::validate_user_gains(kp, ki)?;
        let macs: Vec<Mac> = self
            .manager
            .slaves_vector()
            .iter()
            .filter(|s| s.status == fc_types::SlaveStatus::Connected)
            .map(|s| s.mac.clone())
            .collect();
        for mac in macs {
            self.manager.command(&mac, Command::PiSet(kp, ki));
        }
        Ok(())
    }

    /// Switch the heartbeat between broadcast and a unicast sweep over
    /// the currently known endpoints.
    pub fn set_broadcast_mode(&mut self, mode: BroadcastMode) {
        if mode == BroadcastMode::Targetted {
            let targets = self
                .manager
                .slaves_vector()
                .iter()
                .filter_map(|s| self.manager.endpoint_of(&s.mac))
                .collect();
            self.broadcaster.set_targets(targets);
        }
        self.broadcaster.set_mode(mode);
    }

    /// Evaluate a duty map over the array and command the result.
    ///
    /// Rows map to slaves and columns to fan slots; `t` and `step` let
    /// time-varying maps animate across repeated applications.
    pub fn apply_duty_map(&mut self, map: &DutyMap, t: f64, step: u64) {
        let feedback = self.manager.feedback_vector();
        let n_slaves = feedback.n_slaves();
        let max_fans = feedback.max_fans();
        let mut duties = Vec::with_capacity(n_slaves * max_fans);
        for slave in 0..n_slaves {
            for fan in 0..max_fans {
                let rpm_wire = feedback.rpm(slave, fan);
                let dc_wire = feedback.dc(slave, fan);
                let ctx = FanContext {
                    row: slave,
                    col: fan,
                    layer: 0,
                    slave,
                    fan,
                    dc: if is_sentinel(dc_wire) {
                        0.0
                    } else {
                        wire_to_duty(dc_wire, self.dc_decimals)
                    },
                    rpm: if is_sentinel(rpm_wire) {
                        0.0
                    } else {
                        rpm_wire as f64
                    },
                    rows: n_slaves,
                    cols: max_fans,
                    layers: 1,
                    n_slaves,
                    max_fans,
                    max_rpm: self.max_rpm,
                    t,
                    step,
                };
                duties.push(map.duty(&ctx));
            }
        }
        self.duty_map_desc = Some(map.describe());
        self.manager.control(ControlVector::VectorDc {
            target: Target::All,
            duties,
        });
    }

    /// One orchestrator tick. Returns an exit reason when the loop must
    /// stop.
    pub fn tick(&mut self, now: Instant) -> Option<ExitReason> {
        // 1. Drain network ingress into the state machine.
        while let Ok(event) = self.ingress_rx.try_recv() {
            self.manager.observe(event, now);
        }

        // 2. React to lifecycle events: open links for live slaves.
        for event in self.manager.drain_events() {
            match event {
                SlaveEvent::Connected { ref mac, .. } => self.open_link(mac),
                SlaveEvent::Disconnected { ref mac, index, .. } => {
                    info!(target: "orchestrator", "slave {} ({}) lost", index, mac);
                }
                _ => {}
            }
        }

        // 3. Timeout scan.
        self.manager.tick(now);

        // 4. Controller step on its own period.
        if now.duration_since(self.last_controller_step) >= self.controller_period {
            self.last_controller_step = now;
            let feedback = self.manager.feedback_vector();
            if let Some(vector) = self.controller.step(&feedback, now) {
                self.manager.control(vector);
            }
        }

        // 5. Route queued commands to their links.
        while let Ok((mac, command)) = self.outbound_rx.try_recv() {
            match self.links.get(&mac) {
                Some(link) => {
                    if let Err(e) = link.send(command) {
                        warn!(target: "orchestrator", "{}", e);
                    }
                }
                None => warn!(target: "orchestrator", "no link for {}", mac),
            }
        }

        // 6. Publish the vectors.
        let network = self.manager.network_vector();
        let slaves = self.manager.slaves_vector();
        let feedback = self.manager.feedback_vector();
        for fan in 0..feedback.n_slaves() * feedback.max_fans() {
            let rpm = feedback.rpm(fan / feedback.max_fans(), fan % feedback.max_fans());
            if !is_sentinel(rpm) {
                self.quality.push(fan as u32, rpm as f64);
            }
        }
        for (channel, score) in self.quality.degraded() {
            warn!(target: "orchestrator", "fan channel {} degraded (score {:.2})", channel, score);
        }
        if let Some(logger) = &mut self.logger {
            logger.push(feedback.clone(), now);
        }
        for subscriber in &mut self.subscribers {
            subscriber(&network, &slaves, &feedback);
        }

        // 7. Fatal network events end the loop.
        if let Ok(NetFatal::BroadcasterDown(reason)) = self.fatal_rx.try_recv() {
            error!(target: "orchestrator", "network fatal: {}", reason);
            return Some(ExitReason::FatalNetwork(reason));
        }
        None
    }

    fn open_link(&mut self, mac: &Mac) {
        if self.links.contains_key(mac) {
            return;
        }
        let Some(endpoint) = self.manager.endpoint_of(mac) else {
            warn!(target: "orchestrator", "connected slave {} has no endpoint", mac);
            return;
        };
        // Link timeouts flow through the same ingress channel the
        // listener feeds, so the manager sees them on the next tick.
        match SlaveLink::start(
            mac.clone(),
            endpoint,
            self.link_config.clone(),
            self.link_ingress.clone(),
        ) {
            Ok(link) => {
                info!(target: "orchestrator", "command link open to {} at {}", mac, endpoint);
                self.links.insert(mac.clone(), link);
            }
            Err(e) => warn!(target: "orchestrator", "link to {} failed: {}", mac, e),
        }
    }

    /// Run until asked to stop or a fatal event lands.
    pub fn run(&mut self, stop: &std::sync::atomic::AtomicBool) -> ExitReason {
        loop {
            if stop.load(std::sync::atomic::Ordering::SeqCst) {
                return ExitReason::Requested;
            }
            let started = Instant::now();
            if let Some(reason) = self.tick(started) {
                return reason;
            }
            let elapsed = started.elapsed();
            if elapsed < TICK {
                std::thread::sleep(TICK - elapsed);
            }
        }
    }

    /// Ordered shutdown: controller, logger, network, archive.
    pub fn shutdown(mut self) -> Result<()> {
        // Controller first so no further commands are issued.
        let feedback = self.manager.feedback_vector();
        if let Ok(Some(vector)) = self.controller.stop(&feedback) {
            self.manager.control(vector);
        }
        // Flush pending commands to the links before tearing them down.
        while let Ok((mac, command)) = self.outbound_rx.try_recv() {
            if let Some(link) = self.links.get(&mac) {
                let _ = link.send(command);
            }
        }

        self.stop_logging();

        self.broadcaster.stop();
        self.listener.stop();
        for (_, link) in self.links.drain() {
            link.stop();
        }

        if self.archive.modified().unwrap_or(false) {
            if let Some(path) = self.profile_path.clone() {
                self.archive.save_to(path)?;
            } else {
                warn!(target: "orchestrator", "archive dirty with no path; changes not persisted");
            }
        }
        info!(target: "orchestrator", "shutdown complete");
        Ok(())
    }
}

/// Saved-slave entries as (mac, name, fan count) in list order.
fn saved_slaves(profile: &Profile) -> Vec<(Mac, String, usize)> {
    let Some(Value::List(entries)) = profile.get(ProfileKey::SavedSlaves) else {
        return Vec::new();
    };
    entries
        .iter()
        .filter_map(|entry| {
            let sub = entry.as_sub()?;
            let mac = sub
                .get(&ProfileKey::SvMac.id())
                .and_then(Value::as_str)
                .and_then(Mac::parse)?;
            let name = sub
                .get(&ProfileKey::SvName.id())
                .and_then(Value::as_str)
                .unwrap_or("FAWT Module")
                .to_string();
            let fans = sub
                .get(&ProfileKey::SvMaxFans.id())
                .and_then(Value::as_int)
                .unwrap_or(21) as usize;
            Some((mac, name, fans))
        })
        .collect()
}

fn version_string(archive: &ArchiveHandle) -> String {
    match archive.get(ProfileKey::Version) {
        Ok(Value::Str(s)) => s,
        _ => String::new(),
    }
}
