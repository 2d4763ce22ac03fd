//! Profile values and the embedded default profile.
//!
//! Values live in ordered maps keyed by stable key id so serialization is
//! canonical: the same logical profile always produces the same bytes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::keys::{ProfileKey, FAN_ARRAY_KEYS, SLAVE_KEYS};
use super::validators::FAN_MODE_SINGLE;

/// Built-in pinout table: name -> (pin assignment string, inverse map).
pub const BUILTIN_PINOUTS: &[(&str, &str)] = &[
    ("BASE", "FGHMALXWKJUVNISOBQTDC qsrnabdtfhvuepckmljoi"),
    ("CAST", "ETRGMLWXPQJKUVBADC edcb_^ng`w\\]porqfs"),
    ("JPL", "FGCDABNOLMHITUQSJK efcdabnolmhirspqjk"),
    ("S117", "VUXWTSQONMLKJIHGFDCBA vutsrqponmlkjihfedcba"),
];

/// Default passcode echoed on every broadcast.
pub const DEFAULT_PASSCODE: &str = "CT";

/// A profile value. Shape metadata lives in the key registry, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    /// (scale, offset) pair, e.g. target relation.
    Pair(f64, f64),
    List(Vec<Value>),
    /// Short name -> opaque two-field pinout string.
    Map(BTreeMap<String, String>),
    /// Submodule: key id -> value.
    Sub(BTreeMap<u32, Value>),
}

impl Value {
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_sub(&self) -> Option<&BTreeMap<u32, Value>> {
        match self {
            Value::Sub(m) => Some(m),
            _ => None,
        }
    }
}

/// The typed key -> value store behind the archive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    values: BTreeMap<u32, Value>,
}

impl Profile {
    pub fn empty() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    pub fn get(&self, key: ProfileKey) -> Option<&Value> {
        self.values.get(&key.id())
    }

    pub fn insert(&mut self, key: ProfileKey, value: Value) {
        self.values.insert(key.id(), value);
    }

    pub fn remove(&mut self, key: ProfileKey) -> Option<Value> {
        self.values.remove(&key.id())
    }

    /// Insert under a raw id, bypassing the registry. Only load paths and
    /// tests should need this.
    pub(crate) fn insert_raw(&mut self, id: u32, value: Value) {
        self.values.insert(id, value);
    }

    pub fn contains(&self, key: ProfileKey) -> bool {
        self.values.contains_key(&key.id())
    }

    pub fn keys(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.keys().copied()
    }

    /// Convenience integer read with a fallback to the key default.
    pub fn int(&self, key: ProfileKey) -> i64 {
        self.get(key)
            .and_then(Value::as_int)
            .or_else(|| default_value(key).as_int())
            .unwrap_or(0)
    }

    pub fn string(&self, key: ProfileKey) -> String {
        self.get(key)
            .and_then(|v| v.as_str().map(str::to_string))
            .or_else(|| default_value(key).as_str().map(str::to_string))
            .unwrap_or_default()
    }
}

/// Default value for a slave-entry key.
fn default_slave_value(key: ProfileKey) -> Value {
    use ProfileKey::*;
    match key {
        SvName => Value::Str("FAWT Module".into()),
        SvMac => Value::Str("None".into()),
        SvIndex => Value::Int(-1),
        SvFanModel => Value::Str("Unknown".into()),
        SvFanMode => Value::Int(FAN_MODE_SINGLE),
        SvTargetRelation => Value::Pair(1.0, 0.0),
        SvChaserTolerance => Value::Float(0.02),
        SvFanFrequencyHz => Value::Int(25_000),
        SvCounterCounts => Value::Int(2),
        SvCounterTimeoutMs => Value::Int(30),
        SvPulsesPerRotation => Value::Int(2),
        SvMaxRpm => Value::Int(25_000),
        SvMinRpm => Value::Int(1_200),
        SvMinDc => Value::Float(0.5),
        SvMaxFans => Value::Int(21),
        SvPinout => Value::Str("BASE".into()),
        MdAssigned => Value::Bool(false),
        MdRow => Value::Int(-1),
        MdColumn => Value::Int(-1),
        MdRows => Value::Int(0),
        MdColumns => Value::Int(0),
        MdMapping => Value::Str(String::new()),
        _ => Value::Int(0),
    }
}

/// The default slave submodule (shape template for savedSlaves entries).
pub fn default_slave() -> Value {
    let mut sub = BTreeMap::new();
    for key in SLAVE_KEYS {
        sub.insert(key.id(), default_slave_value(*key));
    }
    Value::Sub(sub)
}

fn default_fan_array() -> Value {
    let mut sub = BTreeMap::new();
    for key in FAN_ARRAY_KEYS {
        sub.insert(key.id(), Value::Int(0));
    }
    Value::Sub(sub)
}

fn builtin_pinout_map() -> Value {
    let mut map = BTreeMap::new();
    for (name, pins) in BUILTIN_PINOUTS {
        map.insert((*name).to_string(), (*pins).to_string());
    }
    Value::Map(map)
}

/// Default value for any key; used by get-fallback and load rescue.
pub fn default_value(key: ProfileKey) -> Value {
    use ProfileKey::*;
    match key {
        Name => Value::Str("Unnamed FC Profile".into()),
        Description => Value::Str(String::new()),
        Platform => Value::Int(-1),
        Version => Value::Str(String::new()),
        BroadcastIp => Value::Str("<broadcast>".into()),
        BroadcastPort => Value::Int(65_000),
        BroadcastPeriodMs => Value::Int(1_000),
        PeriodMs => Value::Int(100),
        MaxLength => Value::Int(512),
        MaxTimeouts => Value::Int(10),
        MainQueueSize => Value::Int(10),
        SlaveQueueSize => Value::Int(10),
        BroadcastQueueSize => Value::Int(2),
        ListenerQueueSize => Value::Int(3),
        MisoQueueSize => Value::Int(2),
        PrinterQueueSize => Value::Int(3),
        Passcode => Value::Str(DEFAULT_PASSCODE.into()),
        SocketLimit => Value::Int(1_024),
        DefaultSlave => default_slave(),
        SavedSlaves => Value::List(Vec::new()),
        DefaultIpAddress => Value::Str("0.0.0.0".into()),
        DefaultBroadcastIp => Value::Str("<broadcast>".into()),
        ExternalDefaultBroadcastIp => Value::Str("<broadcast>".into()),
        ExternalDefaultBroadcastPort => Value::Int(60_069),
        ExternalDefaultListenerIp => Value::Str("0.0.0.0".into()),
        ExternalDefaultListenerPort => Value::Int(60_169),
        ExternalDefaultRepeat => Value::Int(1),
        ExternalListenerAutoStart => Value::Bool(true),
        ExternalBroadcastAutoStart => Value::Bool(false),
        ExternalIndexDelta => Value::Int(10),
        Pinouts => builtin_pinout_map(),
        MaxRpm => Value::Int(25_000),
        MaxFans => Value::Int(21),
        DcDecimals => Value::Int(2),
        FanArray => default_fan_array(),
        key if SLAVE_KEYS.contains(&key) => default_slave_value(key),
        FaRows | FaColumns | FaLayers => Value::Int(0),
        _ => Value::Int(0),
    }
}

/// The embedded default profile, minus runtime keys.
pub fn default_profile() -> Profile {
    let mut profile = Profile::empty();
    for key in super::keys::ALL_KEYS {
        // Slave-entry and fan-array fields only exist inside their submodules.
        if SLAVE_KEYS.contains(key) || FAN_ARRAY_KEYS.contains(key) || key.runtime_only() {
            continue;
        }
        profile.insert(*key, default_value(*key));
    }
    profile
}
