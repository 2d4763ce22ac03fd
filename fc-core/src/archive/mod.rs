//! The configuration archive: a typed, validated, versioned profile store.
//!
//! Mutations go through `set`/`add`, which validate the value, stage it,
//! re-check global consistency, and either commit (marking the store
//! dirty and notifying subscribers) or roll back to the last good state.
//! Loading rescues invalid fields by substituting their defaults.

pub mod handle;
pub mod keys;
pub mod persistence;
pub mod profile;
pub mod report;
pub mod validators;

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use log::{info, warn};

use fc_types::error::{FcError, Result};

use keys::{ProfileKey, TypeClass, ALL_KEYS, FAN_ARRAY_KEYS, SLAVE_KEYS};
use profile::{default_profile, default_value, Profile, Value};
use report::{Issue, ValidationReport};

/// What `load` had to do to make the incoming profile usable.
#[derive(Debug, Clone, Default)]
pub struct LoadOutcome {
    /// Field names whose values failed validation and were replaced by
    /// their defaults.
    pub rescued: Vec<String>,
    /// Unknown key ids dropped from the payload.
    pub dropped: Vec<u32>,
}

/// Identifier of an in-memory snapshot taken by `backup()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SnapshotId(u64);

struct Snapshot {
    id: SnapshotId,
    taken_unix: u64,
    profile: Profile,
}

type SubscriberFn = Box<dyn Fn(&Profile) + Send>;

/// The profile store. One instance per master process; at runtime it is
/// owned by a single thread (see [`handle`]).
pub struct Archive {
    profile: Profile,
    dirty: bool,
    /// Runtime-only: master software version, re-injected on load.
    fc_version: String,
    /// Runtime-only: platform id.
    platform: i64,
    path: Option<PathBuf>,
    snapshots: Vec<Snapshot>,
    next_snapshot: u64,
    subscribers: Vec<SubscriberFn>,
}

impl Archive {
    /// New archive holding the embedded defaults.
    pub fn new(fc_version: &str) -> Self {
        Self {
            profile: default_profile(),
            dirty: false,
            fc_version: fc_version.to_string(),
            platform: current_platform(),
            path: None,
            snapshots: Vec::new(),
            next_snapshot: 0,
            subscribers: Vec::new(),
        }
    }

    /// Immutable view of the current profile.
    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    /// Whether any mutation has been committed since the last save/load.
    pub fn modified(&self) -> bool {
        self.dirty
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Register a callback invoked after every committed mutation.
    pub fn subscribe(&mut self, callback: SubscriberFn) {
        self.subscribers.push(callback);
    }

    fn notify(&self) {
        for subscriber in &self.subscribers {
            subscriber(&self.profile);
        }
    }

    /// Stored value, or the key default when missing (with a warning).
    /// Runtime keys answer from process state, never from the store.
    pub fn get(&self, key: ProfileKey) -> Value {
        match key {
            ProfileKey::Version => Value::Str(self.fc_version.clone()),
            ProfileKey::Platform => Value::Int(self.platform),
            _ => match self.profile.get(key) {
                Some(value) => value.clone(),
                None => {
                    warn!(
                        target: "archive",
                        "missing key {}; answering with its default",
                        key.name()
                    );
                    default_value(key)
                }
            },
        }
    }

    /// Validate, stage, consistency-check, then commit or roll back.
    pub fn set(&mut self, key: ProfileKey, value: Value) -> Result<()> {
        if !key.editable() {
            return Err(FcError::validation(format!(
                "{} is not editable",
                key.name()
            )));
        }
        let validator = key.validator();
        if !validator.check(&value) {
            return Err(FcError::validation(format!(
                "{} expects {}",
                key.name(),
                validator.describe()
            )));
        }

        let before = self.profile.clone();
        self.profile.insert(key, value);

        let cross = consistency_issues(&self.profile);
        if let Some(issue) = cross
            .iter()
            .find(|i| i.severity == report::Severity::Error)
        {
            self.profile = before;
            return Err(FcError::validation(format!(
                "{} rejected: {}",
                key.name(),
                issue.message
            )));
        }
        for issue in cross
            .iter()
            .filter(|i| i.severity == report::Severity::Warning)
        {
            warn!(target: "archive", "{}", issue);
        }

        self.dirty = true;
        self.notify();
        Ok(())
    }

    /// Append an element to a list-typed key; the element's shape must
    /// match the list's template (`defaultSlave` for `savedSlaves`).
    pub fn add(&mut self, list_key: ProfileKey, value: Value) -> Result<()> {
        if list_key.class() != TypeClass::List {
            return Err(FcError::validation(format!(
                "{} is not a list key",
                list_key.name()
            )));
        }
        let issues = slave_entry_issues(&value);
        if let Some(first) = issues.first() {
            return Err(FcError::validation(format!(
                "rejected {} element: {}",
                list_key.name(),
                first.message
            )));
        }

        let mut list = match self.profile.get(list_key) {
            Some(Value::List(items)) => items.clone(),
            _ => Vec::new(),
        };
        list.push(value);
        self.profile.insert(list_key, Value::List(list));
        self.dirty = true;
        self.notify();
        Ok(())
    }

    /// Capture the current state; the id can later be passed to `restore`.
    pub fn backup(&mut self) -> SnapshotId {
        let id = SnapshotId(self.next_snapshot);
        self.next_snapshot += 1;
        self.snapshots.push(Snapshot {
            id,
            taken_unix: unix_seconds(),
            profile: self.profile.clone(),
        });
        info!(target: "archive", "snapshot {:?} taken", id);
        id
    }

    /// Replace state from a snapshot after re-validating it wholesale.
    pub fn restore(&mut self, id: SnapshotId) -> Result<()> {
        let snapshot = self
            .snapshots
            .iter()
            .find(|s| s.id == id)
            .ok_or_else(|| FcError::validation(format!("unknown snapshot {:?}", id)))?;
        let candidate = snapshot.profile.clone();
        let report = validate_profile(&candidate);
        if !report.is_ok() {
            return Err(FcError::validation(format!(
                "snapshot {:?} failed validation with {} errors",
                id,
                report.error_count()
            )));
        }
        info!(
            target: "archive",
            "restoring snapshot {:?} (taken {})",
            id, snapshot.taken_unix
        );
        self.profile = candidate;
        self.dirty = true;
        self.notify();
        Ok(())
    }

    /// Write a timestamped `.bak` copy next to the archive path.
    pub fn backup_to_file(&self, path: &Path) -> Result<PathBuf> {
        persistence::write_backup(path, &persistence::encode(&self.profile))
    }

    /// Canonical archive bytes for the current profile.
    pub fn save_bytes(&self) -> Vec<u8> {
        persistence::encode(&self.profile)
    }

    /// Atomically persist to `path` and clear the dirty flag.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        persistence::write_atomic(path, &self.save_bytes())?;
        self.path = Some(path.to_path_buf());
        self.dirty = false;
        info!(target: "archive", "saved profile to {}", path.display());
        Ok(())
    }

    /// Deserialize and adopt a profile, rescuing invalid fields.
    pub fn load(&mut self, bytes: &[u8]) -> Result<LoadOutcome> {
        let raw = persistence::decode(bytes)?;
        let mut outcome = LoadOutcome::default();
        let mut profile = Profile::empty();

        for id in raw.keys().collect::<Vec<_>>() {
            let key = match ProfileKey::from_id(id) {
                Some(key) => key,
                None => {
                    warn!(target: "archive", "dropping unknown key id {}", id);
                    outcome.dropped.push(id);
                    continue;
                }
            };
            if key.runtime_only() || SLAVE_KEYS.contains(&key) || FAN_ARRAY_KEYS.contains(&key) {
                // Runtime keys are re-injected; nested keys only live
                // inside their submodules.
                outcome.dropped.push(id);
                continue;
            }
            let value = raw.get(key).cloned().unwrap_or_else(|| default_value(key));
            let adopted = self.adopt_value(key, value, &mut outcome);
            profile.insert(key, adopted);
        }

        // Fill anything the payload omitted.
        for key in ALL_KEYS {
            if key.runtime_only()
                || SLAVE_KEYS.contains(key)
                || FAN_ARRAY_KEYS.contains(key)
                || profile.contains(*key)
            {
                continue;
            }
            warn!(
                target: "archive",
                "payload missing {}; using default",
                key.name()
            );
            outcome.rescued.push(key.name().to_string());
            profile.insert(*key, default_value(*key));
        }

        self.profile = profile;
        self.dirty = false;
        if !outcome.rescued.is_empty() {
            warn!(
                target: "archive",
                "load rescued {} field(s): {}",
                outcome.rescued.len(),
                outcome.rescued.join(", ")
            );
        }
        self.notify();
        Ok(outcome)
    }

    /// Validate one incoming value, substituting the default on failure.
    fn adopt_value(
        &self,
        key: ProfileKey,
        value: Value,
        outcome: &mut LoadOutcome,
    ) -> Value {
        let ok = match key.class() {
            TypeClass::Primitive => key.validator().check(&value),
            TypeClass::Submodule if key == ProfileKey::DefaultSlave => {
                slave_entry_issues(&value).is_empty()
            }
            TypeClass::Submodule => fan_array_issues(&value).is_empty(),
            TypeClass::List => match &value {
                Value::List(items) => items.iter().all(|i| slave_entry_issues(i).is_empty()),
                _ => false,
            },
            TypeClass::Map => matches!(&value, Value::Map(_)),
        };
        if ok {
            value
        } else {
            warn!(
                target: "archive",
                "rescuing {}: stored value failed validation",
                key.name()
            );
            outcome.rescued.push(key.name().to_string());
            default_value(key)
        }
    }

    /// The three-pass validation report over the current profile.
    pub fn validation_report(&self) -> ValidationReport {
        validate_profile(&self.profile)
    }
}

/// Run the structural, per-field, and cross-field passes over a profile.
pub fn validate_profile(profile: &Profile) -> ValidationReport {
    let mut report = ValidationReport::default();

    // Pass 1: structure.
    for key in [
        ProfileKey::DefaultSlave,
        ProfileKey::SavedSlaves,
        ProfileKey::Pinouts,
        ProfileKey::FanArray,
    ] {
        if !profile.contains(key) {
            report
                .structural
                .push(Issue::error(format!("missing required {}", key.name())));
        }
    }
    if profile.string(ProfileKey::Name).is_empty() {
        report.structural.push(Issue::error("profile name is empty"));
    }

    // Pass 2: per-field validators.
    for key in ALL_KEYS {
        if key.runtime_only() || SLAVE_KEYS.contains(key) || FAN_ARRAY_KEYS.contains(key) {
            continue;
        }
        let Some(value) = profile.get(*key) else {
            continue;
        };
        let ok = match key.class() {
            TypeClass::Primitive => key.validator().check(value),
            TypeClass::Submodule if *key == ProfileKey::DefaultSlave => {
                slave_entry_issues(value).is_empty()
            }
            TypeClass::Submodule => fan_array_issues(value).is_empty(),
            TypeClass::List => match value {
                Value::List(items) => items.iter().all(|i| slave_entry_issues(i).is_empty()),
                _ => false,
            },
            TypeClass::Map => matches!(value, Value::Map(_)),
        };
        if !ok {
            report.fields.push(Issue::error(format!(
                "{} expects {}",
                key.name(),
                key.validator().describe()
            )));
        }
    }

    // Pass 3: cross-field consistency.
    report.cross = consistency_issues(profile);
    report
}

/// Cross-field consistency rules.
///
/// The master's ingress ports live in the external listener keys; the
/// broadcast port must not collide with either of them.
fn consistency_issues(profile: &Profile) -> Vec<Issue> {
    let mut issues = Vec::new();

    let broadcast = profile.int(ProfileKey::BroadcastPort);
    let ext_listener = profile.int(ProfileKey::ExternalDefaultListenerPort);
    let ext_broadcast = profile.int(ProfileKey::ExternalDefaultBroadcastPort);
    if broadcast == ext_listener {
        issues.push(Issue::error(format!(
            "broadcastPort {} collides with externalDefaultListenerPort",
            broadcast
        )));
    }
    if broadcast == ext_broadcast {
        issues.push(Issue::error(format!(
            "broadcastPort {} collides with externalDefaultBroadcastPort",
            broadcast
        )));
    }

    let queue_total = profile.int(ProfileKey::MainQueueSize)
        + profile.int(ProfileKey::SlaveQueueSize)
        + profile.int(ProfileKey::BroadcastQueueSize)
        + profile.int(ProfileKey::ListenerQueueSize)
        + profile.int(ProfileKey::MisoQueueSize)
        + profile.int(ProfileKey::PrinterQueueSize);
    let socket_limit = profile.int(ProfileKey::SocketLimit);
    if queue_total > socket_limit {
        issues.push(Issue::error(format!(
            "queue sizes total {} exceeds socketLimit {}",
            queue_total, socket_limit
        )));
    }

    if profile.string(ProfileKey::BroadcastIp) == "<broadcast>" && broadcast < 1024 {
        issues.push(Issue::warning(format!(
            "broadcastPort {} is privileged for <broadcast>",
            broadcast
        )));
    }

    issues
}

/// Shape check for a slave entry (defaultSlave or a savedSlaves element).
fn slave_entry_issues(value: &Value) -> Vec<Issue> {
    let mut issues = Vec::new();
    let Some(sub) = value.as_sub() else {
        return vec![Issue::error("slave entry must be a submodule")];
    };
    for key in SLAVE_KEYS {
        match sub.get(&key.id()) {
            None => issues.push(Issue::error(format!("slave entry missing {}", key.name()))),
            Some(field) => {
                if !key.validator().check(field) {
                    issues.push(Issue::error(format!(
                        "slave entry {} expects {}",
                        key.name(),
                        key.validator().describe()
                    )));
                }
            }
        }
    }
    for id in sub.keys() {
        if !SLAVE_KEYS.iter().any(|k| k.id() == *id) {
            issues.push(Issue::error(format!("slave entry has foreign key id {}", id)));
        }
    }
    issues
}

/// Shape check for the fanArray submodule.
fn fan_array_issues(value: &Value) -> Vec<Issue> {
    let mut issues = Vec::new();
    let Some(sub) = value.as_sub() else {
        return vec![Issue::error("fanArray must be a submodule")];
    };
    for key in FAN_ARRAY_KEYS {
        match sub.get(&key.id()) {
            None => issues.push(Issue::error(format!("fanArray missing {}", key.name()))),
            Some(field) => {
                if !key.validator().check(field) {
                    issues.push(Issue::error(format!(
                        "fanArray {} expects {}",
                        key.name(),
                        key.validator().describe()
                    )));
                }
            }
        }
    }
    issues
}

fn unix_seconds() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn current_platform() -> i64 {
    if cfg!(target_os = "windows") {
        1
    } else if cfg!(target_os = "macos") {
        2
    } else if cfg!(target_os = "linux") {
        3
    } else {
        -1
    }
}

#[cfg(test)]
mod tests;
