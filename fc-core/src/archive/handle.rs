//! ArchiveHandle: channel interface to the archive-owning thread.
//!
//! Mutations from any thread serialize through one command channel;
//! readers receive immutable profile snapshots. This is the runtime face
//! of the archive; the [`Archive`](super::Archive) type itself stays
//! single-threaded.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};
use log::{error, warn};

use fc_types::codes::MP_STOP_TIMEOUT;
use fc_types::error::{FcError, Result};

use super::keys::ProfileKey;
use super::profile::{Profile, Value};
use super::report::ValidationReport;
use super::{Archive, LoadOutcome, SnapshotId};

enum ArchiveCmd {
    Get(ProfileKey, Sender<Value>),
    Set(ProfileKey, Value, Sender<Result<()>>),
    Add(ProfileKey, Value, Sender<Result<()>>),
    Snapshot(Sender<Profile>),
    Load(Vec<u8>, Sender<Result<LoadOutcome>>),
    SaveBytes(Sender<Vec<u8>>),
    SaveTo(PathBuf, Sender<Result<()>>),
    Backup(Sender<SnapshotId>),
    Restore(SnapshotId, Sender<Result<()>>),
    Report(Sender<ValidationReport>),
    Modified(Sender<bool>),
    Subscribe(Box<dyn Fn(&Profile) + Send>),
    Stop,
}

/// Cloneable handle to the archive actor.
#[derive(Clone)]
pub struct ArchiveHandle {
    tx: Sender<ArchiveCmd>,
}

/// Owns the archive thread; dropping without `stop()` detaches it.
pub struct ArchiveActor {
    handle: ArchiveHandle,
    join: Option<JoinHandle<()>>,
}

impl ArchiveActor {
    /// Move an archive onto its owning thread.
    pub fn spawn(mut archive: Archive) -> Self {
        let (tx, rx) = bounded::<ArchiveCmd>(16);
        let join = thread::Builder::new()
            .name("fc-archive".into())
            .spawn(move || {
                while let Ok(cmd) = rx.recv() {
                    match cmd {
                        ArchiveCmd::Get(key, reply) => {
                            let _ = reply.send(archive.get(key));
                        }
                        ArchiveCmd::Set(key, value, reply) => {
                            let _ = reply.send(archive.set(key, value));
                        }
                        ArchiveCmd::Add(key, value, reply) => {
                            let _ = reply.send(archive.add(key, value));
                        }
                        ArchiveCmd::Snapshot(reply) => {
                            let _ = reply.send(archive.profile().clone());
                        }
                        ArchiveCmd::Load(bytes, reply) => {
                            let _ = reply.send(archive.load(&bytes));
                        }
                        ArchiveCmd::SaveBytes(reply) => {
                            let _ = reply.send(archive.save_bytes());
                        }
                        ArchiveCmd::SaveTo(path, reply) => {
                            let _ = reply.send(archive.save_to(&path));
                        }
                        ArchiveCmd::Backup(reply) => {
                            let _ = reply.send(archive.backup());
                        }
                        ArchiveCmd::Restore(id, reply) => {
                            let _ = reply.send(archive.restore(id));
                        }
                        ArchiveCmd::Report(reply) => {
                            let _ = reply.send(archive.validation_report());
                        }
                        ArchiveCmd::Modified(reply) => {
                            let _ = reply.send(archive.modified());
                        }
                        ArchiveCmd::Subscribe(callback) => {
                            archive.subscribe(callback);
                        }
                        ArchiveCmd::Stop => break,
                    }
                }
            })
            .expect("failed to spawn archive thread");

        Self {
            handle: ArchiveHandle { tx },
            join: Some(join),
        }
    }

    pub fn handle(&self) -> ArchiveHandle {
        self.handle.clone()
    }

    /// Ask the thread to exit and join it within `MP_STOP_TIMEOUT`.
    pub fn stop(mut self) {
        let _ = self.handle.tx.send_timeout(ArchiveCmd::Stop, MP_STOP_TIMEOUT);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                error!(target: "archive", "archive thread panicked");
            }
        }
    }
}

impl ArchiveHandle {
    fn roundtrip<T>(&self, make: impl FnOnce(Sender<T>) -> ArchiveCmd) -> Result<T> {
        let (reply_tx, reply_rx) = bounded(1);
        self.tx
            .send(make(reply_tx))
            .map_err(|_| FcError::invariant("archive thread is gone"))?;
        reply_rx
            .recv_timeout(MP_STOP_TIMEOUT)
            .map_err(|_| FcError::invariant("archive thread did not answer"))
    }

    pub fn get(&self, key: ProfileKey) -> Result<Value> {
        self.roundtrip(|tx| ArchiveCmd::Get(key, tx))
    }

    pub fn set(&self, key: ProfileKey, value: Value) -> Result<()> {
        self.roundtrip(|tx| ArchiveCmd::Set(key, value, tx))?
    }

    pub fn add(&self, key: ProfileKey, value: Value) -> Result<()> {
        self.roundtrip(|tx| ArchiveCmd::Add(key, value, tx))?
    }

    /// Immutable snapshot of the whole profile.
    pub fn snapshot(&self) -> Result<Profile> {
        self.roundtrip(ArchiveCmd::Snapshot)
    }

    pub fn load(&self, bytes: Vec<u8>) -> Result<LoadOutcome> {
        self.roundtrip(|tx| ArchiveCmd::Load(bytes, tx))?
    }

    pub fn save_bytes(&self) -> Result<Vec<u8>> {
        self.roundtrip(ArchiveCmd::SaveBytes)
    }

    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        self.roundtrip(|tx| ArchiveCmd::SaveTo(path, tx))?
    }

    pub fn backup(&self) -> Result<SnapshotId> {
        self.roundtrip(ArchiveCmd::Backup)
    }

    pub fn restore(&self, id: SnapshotId) -> Result<()> {
        self.roundtrip(|tx| ArchiveCmd::Restore(id, tx))?
    }

    pub fn validation_report(&self) -> Result<ValidationReport> {
        self.roundtrip(ArchiveCmd::Report)
    }

    pub fn modified(&self) -> Result<bool> {
        self.roundtrip(ArchiveCmd::Modified)
    }

    pub fn subscribe(&self, callback: Box<dyn Fn(&Profile) + Send>) {
        if self.tx.send(ArchiveCmd::Subscribe(callback)).is_err() {
            warn!(target: "archive", "subscribe after archive thread exit");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::Archive;

    #[test]
    fn handle_roundtrips_mutations() {
        let actor = ArchiveActor::spawn(Archive::new("IV-1"));
        let handle = actor.handle();

        handle
            .set(ProfileKey::Name, Value::Str("remote".into()))
            .unwrap();
        assert_eq!(
            handle.get(ProfileKey::Name).unwrap(),
            Value::Str("remote".into())
        );
        assert!(handle.modified().unwrap());

        let snapshot = handle.snapshot().unwrap();
        assert_eq!(snapshot.string(ProfileKey::Name), "remote");

        actor.stop();
    }

    #[test]
    fn handle_surfaces_validation_errors() {
        let actor = ArchiveActor::spawn(Archive::new("IV-1"));
        let handle = actor.handle();
        assert!(handle.set(ProfileKey::BroadcastPort, Value::Int(0)).is_err());
        actor.stop();
    }
}
