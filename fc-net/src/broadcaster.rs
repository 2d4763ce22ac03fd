//! Periodic discovery heartbeat over UDP broadcast.
//!
//! Two modes: `Broadcast` sends one datagram to the broadcast address,
//! `Targetted` unicasts the same frame to every known slave endpoint.
//! Mode and address changes apply atomically at the next beat.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use log::{error, info, warn};

use fc_types::error::{ErrorKind, FcError, Result};

use crate::protocol::{encode_broadcast, BroadcastMode};

/// Send failures tolerated before the task gives up.
const MAX_SEND_RETRIES: u32 = 3;

/// Fatal events the broadcaster can raise to its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetFatal {
    /// Transport failed repeatedly; the owning task has exited.
    BroadcasterDown(String),
}

/// Broadcaster configuration at spawn time.
#[derive(Debug, Clone)]
pub struct BroadcasterConfig {
    pub broadcast_ip: String,
    pub broadcast_port: u16,
    pub period: Duration,
    pub passcode: String,
    /// Listener port advertised in every beat.
    pub listener_port: u16,
    pub index_delta: u32,
}

enum Ctl {
    SetMode(BroadcastMode),
    SetIp(String),
    SetTargets(Vec<SocketAddr>),
    Stop,
}

/// Handle to the heartbeat task.
pub struct Broadcaster {
    ctl: Sender<Ctl>,
    join: Option<JoinHandle<()>>,
    restarts: Arc<AtomicU32>,
}

impl Broadcaster {
    pub fn start(config: BroadcasterConfig, fatal: Sender<NetFatal>) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| FcError::new(ErrorKind::Transport, format!("broadcaster bind: {}", e)))?;
        socket
            .set_broadcast(true)
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;

        let (ctl_tx, ctl_rx) = bounded::<Ctl>(8);
        let restarts = Arc::new(AtomicU32::new(0));
        let restarts_counter = Arc::clone(&restarts);
        let join = thread::Builder::new()
            .name("fc-broadcaster".into())
            .spawn(move || {
                let mut state = BeatState {
                    socket,
                    config,
                    mode: BroadcastMode::Broadcast,
                    targets: Vec::new(),
                    restarts: restarts_counter,
                };
                loop {
                    match ctl_rx.recv_timeout(state.config.period) {
                        Ok(Ctl::SetMode(mode)) => {
                            if state.mode != mode {
                                info!(target: "broadcaster", "mode -> {:?}", mode);
                                state.mode = mode;
                            }
                        }
                        Ok(Ctl::SetIp(ip)) => state.set_ip(ip),
                        Ok(Ctl::SetTargets(targets)) => state.targets = targets,
                        Ok(Ctl::Stop) | Err(RecvTimeoutError::Disconnected) => break,
                        Err(RecvTimeoutError::Timeout) => {
                            if let Err(e) = state.beat() {
                                error!(target: "broadcaster", "giving up: {}", e);
                                let _ = fatal.send(NetFatal::BroadcasterDown(e.to_string()));
                                break;
                            }
                        }
                    }
                }
            })
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;

        Ok(Self {
            ctl: ctl_tx,
            join: Some(join),
            restarts,
        })
    }

    /// Atomic mode change, effective at the next beat.
    pub fn set_mode(&self, mode: BroadcastMode) {
        let _ = self.ctl.send(Ctl::SetMode(mode));
    }

    /// Change the broadcast address. Setting the current address again is
    /// a no-op; each actual change counts one socket restart.
    pub fn set_broadcast_ip(&self, ip: impl Into<String>) {
        let _ = self.ctl.send(Ctl::SetIp(ip.into()));
    }

    /// Replace the unicast sweep targets for `Targetted` mode.
    pub fn set_targets(&self, targets: Vec<SocketAddr>) {
        let _ = self.ctl.send(Ctl::SetTargets(targets));
    }

    /// How many times the outbound address was actually rebound.
    pub fn restarts(&self) -> u32 {
        self.restarts.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        let _ = self.ctl.send(Ctl::Stop);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(target: "broadcaster", "broadcaster thread panicked");
            }
        }
    }
}

struct BeatState {
    socket: UdpSocket,
    config: BroadcasterConfig,
    mode: BroadcastMode,
    targets: Vec<SocketAddr>,
    restarts: Arc<AtomicU32>,
}

impl BeatState {
    fn set_ip(&mut self, ip: String) {
        if self.config.broadcast_ip == ip {
            return;
        }
        info!(
            target: "broadcaster",
            "broadcast address {} -> {}",
            self.config.broadcast_ip, ip
        );
        self.config.broadcast_ip = ip;
        self.restarts.fetch_add(1, Ordering::SeqCst);
    }

    fn destination(&self) -> String {
        let ip = if self.config.broadcast_ip == "<broadcast>" {
            "255.255.255.255"
        } else {
            &self.config.broadcast_ip
        };
        format!("{}:{}", ip, self.config.broadcast_port)
    }

    /// Send one heartbeat; retry transient failures with backoff.
    fn beat(&mut self) -> Result<()> {
        let frame = encode_broadcast(
            &self.config.passcode,
            self.config.listener_port,
            self.config.index_delta,
        );
        let mut attempt = 0;
        loop {
            let outcome = match self.mode {
                BroadcastMode::Broadcast => self
                    .socket
                    .send_to(frame.as_bytes(), self.destination())
                    .map(|_| ()),
                BroadcastMode::Targetted => {
                    let mut last = Ok(());
                    for target in &self.targets {
                        if let Err(e) = self.socket.send_to(frame.as_bytes(), target) {
                            last = Err(e);
                        }
                    }
                    last
                }
            };
            match outcome {
                Ok(()) => return Ok(()),
                Err(e) => {
                    attempt += 1;
                    if attempt >= MAX_SEND_RETRIES {
                        return Err(FcError::new(
                            ErrorKind::Transport,
                            format!("send failed {} times: {}", attempt, e),
                        ));
                    }
                    warn!(target: "broadcaster", "send failed (attempt {}): {}", attempt, e);
                    thread::sleep(Duration::from_millis(20 * u64::from(attempt)));
                }
            }
        }
    }
}
