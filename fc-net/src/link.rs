//! Per-slave command channel: sequence numbers, acks, retransmission.
//!
//! One link owns one UDP socket connected to its slave's command
//! endpoint. Commands are delivered in submission order; each frame is
//! retransmitted until acked or the timeout allowance is spent, at which
//! point a timeout event is raised to the slave manager.

use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender, TrySendError};
use log::{error, warn};

use fc_types::error::{ErrorKind, FcError, Result};
use fc_types::Mac;

use crate::manager::IngressEvent;
use crate::protocol::{encode_command, parse_slave_frame, Command, SlaveFrame};

/// Queue depth for pending commands per slave.
const COMMAND_QUEUE: usize = 32;

/// Link knobs, read off the profile.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    pub passcode: String,
    /// Retransmit interval (the per-slave command period).
    pub period: Duration,
    /// Retransmissions tolerated before raising a timeout event.
    pub max_timeouts: u32,
}

/// Handle to one slave's command task.
pub struct SlaveLink {
    mac: Mac,
    commands: Sender<Command>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
    acked: Arc<AtomicU64>,
    timeouts: Arc<AtomicU64>,
}

impl SlaveLink {
    /// Connect a socket to `endpoint` and start the TX task.
    pub fn start(
        mac: Mac,
        endpoint: SocketAddr,
        config: LinkConfig,
        events: Sender<IngressEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))
            .map_err(|e| FcError::new(ErrorKind::Transport, format!("link bind: {}", e)))?;
        socket
            .connect(endpoint)
            .map_err(|e| FcError::new(ErrorKind::Transport, format!("link connect: {}", e)))?;
        let recv_timeout = config.period.min(Duration::from_millis(100));
        socket
            .set_read_timeout(Some(recv_timeout))
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;

        let (tx, rx) = bounded::<Command>(COMMAND_QUEUE);
        let stop = Arc::new(AtomicBool::new(false));
        let acked = Arc::new(AtomicU64::new(0));
        let timeouts = Arc::new(AtomicU64::new(0));

        let thread_mac = mac.clone();
        let thread_stop = Arc::clone(&stop);
        let thread_acked = Arc::clone(&acked);
        let thread_timeouts = Arc::clone(&timeouts);
        let join = thread::Builder::new()
            .name(format!("fc-link-{}", mac))
            .spawn(move || {
                let mut link = LinkState {
                    socket,
                    config,
                    mac: thread_mac,
                    events,
                    next_seq: 0,
                    acked: thread_acked,
                    timeouts: thread_timeouts,
                };
                loop {
                    match rx.recv_timeout(Duration::from_millis(100)) {
                        Ok(command) => link.deliver(command, &thread_stop),
                        Err(RecvTimeoutError::Timeout) => {
                            if thread_stop.load(Ordering::SeqCst) {
                                break;
                            }
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if thread_stop.load(Ordering::SeqCst) {
                        break;
                    }
                }
            })
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;

        Ok(Self {
            mac,
            commands: tx,
            stop,
            join: Some(join),
            acked,
            timeouts,
        })
    }

    pub fn mac(&self) -> &Mac {
        &self.mac
    }

    /// Queue a command; fails when the link is saturated or gone.
    pub fn send(&self, command: Command) -> Result<()> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(FcError::transport(format!(
                "command queue full for {}",
                self.mac
            ))),
            Err(TrySendError::Disconnected(_)) => Err(FcError::transport(format!(
                "link task gone for {}",
                self.mac
            ))),
        }
    }

    pub fn acked(&self) -> u64 {
        self.acked.load(Ordering::SeqCst)
    }

    pub fn timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::SeqCst)
    }

    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(target: "link", "link thread for {} panicked", self.mac);
            }
        }
    }
}

struct LinkState {
    socket: UdpSocket,
    config: LinkConfig,
    mac: Mac,
    events: Sender<IngressEvent>,
    next_seq: u32,
    acked: Arc<AtomicU64>,
    timeouts: Arc<AtomicU64>,
}

impl LinkState {
    /// Send one frame and retransmit until acked or out of allowance.
    fn deliver(&mut self, command: Command, stop: &AtomicBool) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        let frame = encode_command(seq, &self.config.passcode, &command);

        let mut attempts: u32 = 0;
        loop {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            if let Err(e) = self.socket.send(frame.as_bytes()) {
                warn!(target: "link", "{}: send failed: {}", self.mac, e);
            }
            attempts += 1;

            if self.await_ack(seq) {
                self.acked.fetch_add(1, Ordering::SeqCst);
                return;
            }
            if attempts > self.config.max_timeouts {
                self.timeouts.fetch_add(1, Ordering::SeqCst);
                warn!(
                    target: "link",
                    "{}: no ack for seq {} after {} attempts",
                    self.mac, seq, attempts
                );
                let _ = self.events.send(IngressEvent::LinkTimeout {
                    mac: self.mac.clone(),
                });
                return;
            }
        }
    }

    /// Wait one retransmit period for the matching ack.
    fn await_ack(&mut self, seq: u32) -> bool {
        let deadline = std::time::Instant::now() + self.config.period;
        let mut buf = [0u8; 256];
        while std::time::Instant::now() < deadline {
            let len = match self.socket.recv(&mut buf) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue;
                }
                Err(_) => return false,
            };
            let Ok(text) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_slave_frame(text, &self.config.passcode) {
                Ok(SlaveFrame::Ack { seq: got }) if got == seq => return true,
                Ok(SlaveFrame::Ack { seq: got }) => {
                    // Stale ack from an earlier retransmit round.
                    warn!(target: "link", "{}: stale ack {}", self.mac, got);
                }
                _ => {}
            }
        }
        false
    }
}
