//! UDP ingress: one socket, typed events out.
//!
//! Frames that do not parse are dropped; a per-peer error counter feeds a
//! rate-limited warning so a misbehaving peer cannot flood the log.

use std::collections::HashMap;
use std::net::{SocketAddr, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Sender, TrySendError};
use log::{error, info, warn};

use fc_types::error::{ErrorKind, FcError, Result};

use crate::manager::IngressEvent;
use crate::protocol::{parse_slave_frame, SlaveFrame};

/// Socket receive timeout; bounds how long cancellation can go unseen.
const RECV_TIMEOUT: Duration = Duration::from_millis(100);

/// Minimum interval between protocol-error warnings per peer.
const WARN_INTERVAL: Duration = Duration::from_secs(5);

/// Largest frame the listener will consider.
const MAX_FRAME: usize = 4096;

/// The UDP ingress task.
pub struct Listener {
    local_port: u16,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl Listener {
    /// Bind `bind_ip:port` (port 0 for ephemeral) and start receiving.
    pub fn start(
        bind_ip: &str,
        port: u16,
        passcode: String,
        events: Sender<IngressEvent>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind((bind_ip, port))
            .map_err(|e| FcError::new(ErrorKind::Transport, format!("listener bind: {}", e)))?;
        socket
            .set_read_timeout(Some(RECV_TIMEOUT))
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;
        let local_port = socket
            .local_addr()
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?
            .port();

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("fc-listener".into())
            .spawn(move || listen_loop(socket, passcode, events, stop_flag))
            .map_err(|e| FcError::new(ErrorKind::Transport, e.to_string()))?;

        info!(target: "listener", "listening on port {}", local_port);
        Ok(Self {
            local_port,
            stop,
            join: Some(join),
        })
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    /// Signal the loop and join it; the 100 ms receive timeout bounds the
    /// wait well under `MP_STOP_TIMEOUT`.
    pub fn stop(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(target: "listener", "listener thread panicked");
            }
        }
    }
}

struct PeerErrors {
    count: u64,
    last_warned: Option<Instant>,
}

fn listen_loop(
    socket: UdpSocket,
    passcode: String,
    events: Sender<IngressEvent>,
    stop: Arc<AtomicBool>,
) {
    let mut buf = [0u8; MAX_FRAME];
    let mut peer_errors: HashMap<SocketAddr, PeerErrors> = HashMap::new();
    let mut dropped_events: u64 = 0;

    while !stop.load(Ordering::SeqCst) {
        let (len, addr) = match socket.recv_from(&mut buf) {
            Ok(received) => received,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::TimedOut =>
            {
                continue;
            }
            Err(e) => {
                error!(target: "listener", "recv failed: {}", e);
                break;
            }
        };

        let Ok(text) = std::str::from_utf8(&buf[..len]) else {
            note_peer_error(&mut peer_errors, addr, "non-ASCII frame");
            continue;
        };

        let frame = match parse_slave_frame(text, &passcode) {
            Ok(frame) => frame,
            Err(e) => {
                note_peer_error(&mut peer_errors, addr, &e.to_string());
                continue;
            }
        };

        let event = match frame {
            SlaveFrame::Advert {
                mac,
                fan_count,
                version,
                port,
            } => {
                // Command traffic goes to the advertised per-slave port,
                // not the ephemeral source of this datagram.
                let endpoint = SocketAddr::new(addr.ip(), port);
                IngressEvent::Advert {
                    mac,
                    fan_count,
                    version,
                    addr: endpoint,
                }
            }
            SlaveFrame::Feedback { seq, rpms, dcs } => IngressEvent::Feedback {
                addr,
                seq,
                rpms,
                dcs,
            },
            SlaveFrame::Update { mac, phase } => IngressEvent::Update { mac, phase },
            SlaveFrame::Ack { .. } => {
                // Acks belong on the per-slave command sockets.
                note_peer_error(&mut peer_errors, addr, "ack on listener port");
                continue;
            }
        };

        match events.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                dropped_events += 1;
                if dropped_events % 100 == 1 {
                    warn!(
                        target: "listener",
                        "event channel full; {} event(s) dropped",
                        dropped_events
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => break,
        }
    }
}

fn note_peer_error(peers: &mut HashMap<SocketAddr, PeerErrors>, addr: SocketAddr, what: &str) {
    let entry = peers.entry(addr).or_insert(PeerErrors {
        count: 0,
        last_warned: None,
    });
    entry.count += 1;
    let due = entry
        .last_warned
        .map(|t| t.elapsed() >= WARN_INTERVAL)
        .unwrap_or(true);
    if due {
        entry.last_warned = Some(Instant::now());
        warn!(
            target: "listener",
            "dropping frame from {} ({} so far): {}",
            addr, entry.count, what
        );
    }
}
