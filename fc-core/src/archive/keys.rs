//! The closed, versioned registry of profile keys.
//!
//! Every key carries a stable integer id (part of the persisted format),
//! a display name, a precedence used for ordered presentation, a
//! type-class, an editability flag, and a validator. The registry is the
//! schema; values hold only data.

use super::validators::Validator;

/// Type-class of a profile key's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeClass {
    Primitive,
    List,
    Map,
    Submodule,
}

/// A profile key. Discriminants are the stable persisted ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u32)]
pub enum ProfileKey {
    // Core
    Name = 1,
    Description = 2,
    // Runtime (never persisted)
    Platform = 3,
    Version = 5,
    // Networking
    BroadcastIp = 100,
    BroadcastPort = 101,
    BroadcastPeriodMs = 102,
    PeriodMs = 103,
    MaxLength = 104,
    MaxTimeouts = 105,
    MainQueueSize = 106,
    SlaveQueueSize = 107,
    BroadcastQueueSize = 108,
    ListenerQueueSize = 109,
    MisoQueueSize = 110,
    PrinterQueueSize = 111,
    Passcode = 112,
    SocketLimit = 113,
    // Slave management
    DefaultSlave = 114,
    SavedSlaves = 115,
    DefaultIpAddress = 124,
    DefaultBroadcastIp = 125,
    // External communication
    ExternalDefaultBroadcastIp = 116,
    ExternalDefaultBroadcastPort = 117,
    ExternalDefaultListenerIp = 118,
    ExternalDefaultListenerPort = 119,
    ExternalDefaultRepeat = 120,
    ExternalListenerAutoStart = 121,
    ExternalBroadcastAutoStart = 122,
    ExternalIndexDelta = 123,
    // Slave variables (defaultSlave / savedSlaves entries)
    SvName = 216,
    SvMac = 217,
    SvIndex = 218,
    SvFanModel = 219,
    SvFanMode = 220,
    SvTargetRelation = 221,
    SvChaserTolerance = 222,
    SvFanFrequencyHz = 223,
    SvCounterCounts = 224,
    SvCounterTimeoutMs = 225,
    SvPulsesPerRotation = 226,
    SvMaxRpm = 227,
    SvMinRpm = 228,
    SvMinDc = 229,
    SvMaxFans = 230,
    SvPinout = 231,
    // Module data (defaultSlave / savedSlaves entries)
    MdAssigned = 300,
    MdRow = 301,
    MdColumn = 302,
    MdRows = 303,
    MdColumns = 304,
    MdMapping = 306,
    Pinouts = 307,
    // Fan array
    MaxRpm = 400,
    MaxFans = 401,
    DcDecimals = 402,
    FanArray = 403,
    // Fan array data
    FaRows = 408,
    FaColumns = 409,
    FaLayers = 410,
}

/// Every key, in id order.
pub const ALL_KEYS: &[ProfileKey] = &[
    ProfileKey::Name,
    ProfileKey::Description,
    ProfileKey::Platform,
    ProfileKey::Version,
    ProfileKey::BroadcastIp,
    ProfileKey::BroadcastPort,
    ProfileKey::BroadcastPeriodMs,
    ProfileKey::PeriodMs,
    ProfileKey::MaxLength,
    ProfileKey::MaxTimeouts,
    ProfileKey::MainQueueSize,
    ProfileKey::SlaveQueueSize,
    ProfileKey::BroadcastQueueSize,
    ProfileKey::ListenerQueueSize,
    ProfileKey::MisoQueueSize,
    ProfileKey::PrinterQueueSize,
    ProfileKey::Passcode,
    ProfileKey::SocketLimit,
    ProfileKey::DefaultSlave,
    ProfileKey::SavedSlaves,
    ProfileKey::ExternalDefaultBroadcastIp,
    ProfileKey::ExternalDefaultBroadcastPort,
    ProfileKey::ExternalDefaultListenerIp,
    ProfileKey::ExternalDefaultListenerPort,
    ProfileKey::ExternalDefaultRepeat,
    ProfileKey::ExternalListenerAutoStart,
    ProfileKey::ExternalBroadcastAutoStart,
    ProfileKey::ExternalIndexDelta,
    ProfileKey::DefaultIpAddress,
    ProfileKey::DefaultBroadcastIp,
    ProfileKey::SvName,
    ProfileKey::SvMac,
    ProfileKey::SvIndex,
    ProfileKey::SvFanModel,
    ProfileKey::SvFanMode,
    ProfileKey::SvTargetRelation,
    ProfileKey::SvChaserTolerance,
    ProfileKey::SvFanFrequencyHz,
    ProfileKey::SvCounterCounts,
    ProfileKey::SvCounterTimeoutMs,
    ProfileKey::SvPulsesPerRotation,
    ProfileKey::SvMaxRpm,
    ProfileKey::SvMinRpm,
    ProfileKey::SvMinDc,
    ProfileKey::SvMaxFans,
    ProfileKey::SvPinout,
    ProfileKey::MdAssigned,
    ProfileKey::MdRow,
    ProfileKey::MdColumn,
    ProfileKey::MdRows,
    ProfileKey::MdColumns,
    ProfileKey::MdMapping,
    ProfileKey::Pinouts,
    ProfileKey::MaxRpm,
    ProfileKey::MaxFans,
    ProfileKey::DcDecimals,
    ProfileKey::FanArray,
    ProfileKey::FaRows,
    ProfileKey::FaColumns,
    ProfileKey::FaLayers,
];

/// Keys that form the shape of a slave entry (defaultSlave and each
/// savedSlaves element).
pub const SLAVE_KEYS: &[ProfileKey] = &[
    ProfileKey::SvName,
    ProfileKey::SvMac,
    ProfileKey::SvIndex,
    ProfileKey::SvFanModel,
    ProfileKey::SvFanMode,
    ProfileKey::SvTargetRelation,
    ProfileKey::SvChaserTolerance,
    ProfileKey::SvFanFrequencyHz,
    ProfileKey::SvCounterCounts,
    ProfileKey::SvCounterTimeoutMs,
    ProfileKey::SvPulsesPerRotation,
    ProfileKey::SvMaxRpm,
    ProfileKey::SvMinRpm,
    ProfileKey::SvMinDc,
    ProfileKey::SvMaxFans,
    ProfileKey::SvPinout,
    ProfileKey::MdAssigned,
    ProfileKey::MdRow,
    ProfileKey::MdColumn,
    ProfileKey::MdRows,
    ProfileKey::MdColumns,
    ProfileKey::MdMapping,
];

/// Keys that form the fanArray submodule.
pub const FAN_ARRAY_KEYS: &[ProfileKey] = &[
    ProfileKey::FaRows,
    ProfileKey::FaColumns,
    ProfileKey::FaLayers,
];

impl ProfileKey {
    pub fn id(self) -> u32 {
        self as u32
    }

    pub fn from_id(id: u32) -> Option<Self> {
        ALL_KEYS.iter().copied().find(|k| k.id() == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        ALL_KEYS.iter().copied().find(|k| k.name() == name)
    }

    /// Serialized display name, as it appears in profile tooling.
    pub fn name(self) -> &'static str {
        use ProfileKey::*;
        match self {
            Name => "name",
            Description => "description",
            Platform => "platform",
            Version => "version",
            BroadcastIp => "broadcastIP",
            BroadcastPort => "broadcastPort",
            BroadcastPeriodMs => "broadcastPeriodMS",
            PeriodMs => "periodMS",
            MaxLength => "maxLength",
            MaxTimeouts => "maxTimeouts",
            MainQueueSize => "mainQueueSize",
            SlaveQueueSize => "slaveQueueSize",
            BroadcastQueueSize => "broadcastQueueSize",
            ListenerQueueSize => "listenerQueueSize",
            MisoQueueSize => "misoQueueSize",
            PrinterQueueSize => "printerQueueSize",
            Passcode => "passcode",
            SocketLimit => "socketLimit",
            DefaultSlave => "defaultSlave",
            SavedSlaves => "savedSlaves",
            DefaultIpAddress => "defaultIPAddress",
            DefaultBroadcastIp => "defaultBroadcastIP",
            ExternalDefaultBroadcastIp => "externalDefaultBroadcastIP",
            ExternalDefaultBroadcastPort => "externalDefaultBroadcastPort",
            ExternalDefaultListenerIp => "externalDefaultListenerIP",
            ExternalDefaultListenerPort => "externalDefaultListenerPort",
            ExternalDefaultRepeat => "externalDefaultRepeat",
            ExternalListenerAutoStart => "externalListenerAutoStart",
            ExternalBroadcastAutoStart => "externalBroadcastAutoStart",
            ExternalIndexDelta => "externalIndexDelta",
            SvName => "SV_name",
            SvMac => "SV_mac",
            SvIndex => "SV_index",
            SvFanModel => "SV_fanModel",
            SvFanMode => "SV_fanMode",
            SvTargetRelation => "SV_targetRelation",
            SvChaserTolerance => "SV_chaserTolerance",
            SvFanFrequencyHz => "SV_fanFrequencyHZ",
            SvCounterCounts => "SV_counterCounts",
            SvCounterTimeoutMs => "SV_counterTimeoutMS",
            SvPulsesPerRotation => "SV_pulsesPerRotation",
            SvMaxRpm => "SV_maxRPM",
            SvMinRpm => "SV_minRPM",
            SvMinDc => "SV_minDC",
            SvMaxFans => "SV_maxFans",
            SvPinout => "SV_pinout",
            MdAssigned => "MD_assigned",
            MdRow => "MD_row",
            MdColumn => "MD_column",
            MdRows => "MD_rows",
            MdColumns => "MD_columns",
            MdMapping => "MD_mapping",
            Pinouts => "pinouts",
            MaxRpm => "maxRPM",
            MaxFans => "maxFans",
            DcDecimals => "dcDecimals",
            FanArray => "fanArray",
            FaRows => "FA_rows",
            FaColumns => "FA_columns",
            FaLayers => "FA_layers",
        }
    }

    /// Presentation precedence (lower sorts first).
    pub fn precedence(self) -> u8 {
        use ProfileKey::*;
        match self {
            Name | Description => 1,
            Platform => 2,
            Version => 3,
            BroadcastIp | BroadcastPort | BroadcastPeriodMs | PeriodMs | MaxLength
            | MaxTimeouts | MainQueueSize | SlaveQueueSize | BroadcastQueueSize
            | ListenerQueueSize | MisoQueueSize | PrinterQueueSize | Passcode | SocketLimit
            | DefaultIpAddress | DefaultBroadcastIp | ExternalDefaultBroadcastIp
            | ExternalDefaultBroadcastPort | ExternalDefaultListenerIp
            | ExternalDefaultListenerPort | ExternalDefaultRepeat | ExternalListenerAutoStart
            | ExternalBroadcastAutoStart | ExternalIndexDelta => 4,
            DefaultSlave => 5,
            SavedSlaves => 6,
            Pinouts => 7,
            MaxRpm | MaxFans | DcDecimals => 8,
            FanArray => 9,
            SvName => 0,
            SvMac => 1,
            SvIndex => 2,
            SvFanModel => 3,
            SvFanMode => 4,
            SvTargetRelation => 5,
            SvChaserTolerance => 6,
            SvFanFrequencyHz => 7,
            SvCounterCounts => 8,
            SvCounterTimeoutMs => 9,
            SvPulsesPerRotation => 10,
            SvMaxRpm => 11,
            SvMinRpm => 12,
            SvMinDc => 13,
            SvMaxFans => 14,
            SvPinout => 15,
            MdAssigned | MdRow => 16,
            MdColumn => 17,
            MdRows => 18,
            MdColumns => 19,
            MdMapping => 20,
            FaRows => 2,
            FaColumns => 3,
            FaLayers => 4,
        }
    }

    pub fn class(self) -> TypeClass {
        use ProfileKey::*;
        match self {
            SavedSlaves => TypeClass::List,
            Pinouts => TypeClass::Map,
            DefaultSlave | FanArray => TypeClass::Submodule,
            _ => TypeClass::Primitive,
        }
    }

    pub fn editable(self) -> bool {
        use ProfileKey::*;
        !matches!(
            self,
            Platform | Version | DefaultSlave | SavedSlaves | FanArray
        )
    }

    /// Runtime-only keys are re-injected on load and never persisted.
    pub fn runtime_only(self) -> bool {
        matches!(self, ProfileKey::Platform | ProfileKey::Version)
    }

    pub fn validator(self) -> Validator {
        use ProfileKey::*;
        match self {
            Name | Passcode | BroadcastIp | DefaultIpAddress | DefaultBroadcastIp
            | ExternalDefaultBroadcastIp | ExternalDefaultListenerIp => Validator::NonEmptyStr,
            Description | SvName | SvFanModel => Validator::AnyStr,
            Platform | Version | DefaultSlave | SavedSlaves | FanArray => Validator::FailAll,
            BroadcastPort | ExternalDefaultBroadcastPort | ExternalDefaultListenerPort => {
                Validator::Port
            }
            BroadcastPeriodMs | PeriodMs | MaxLength | MaxTimeouts | MainQueueSize
            | SlaveQueueSize | BroadcastQueueSize | ListenerQueueSize | MisoQueueSize
            | PrinterQueueSize | SocketLimit | ExternalDefaultRepeat | SvFanFrequencyHz
            | SvCounterCounts | SvCounterTimeoutMs | SvMaxRpm | SvMaxFans | MaxRpm | MaxFans => {
                Validator::PositiveInt
            }
            ExternalListenerAutoStart | ExternalBroadcastAutoStart | MdAssigned => {
                Validator::Bool
            }
            ExternalIndexDelta | SvMinRpm | DcDecimals | MdRows | MdColumns | FaRows
            | FaColumns | FaLayers => Validator::NonNegativeInt,
            SvMac => Validator::MacString,
            SvIndex => Validator::IndexSentinel,
            SvFanMode => Validator::FanMode,
            SvTargetRelation => Validator::TargetRelation,
            SvChaserTolerance => Validator::Normalized,
            SvPulsesPerRotation => Validator::NonNegativeInt,
            SvMinDc => Validator::DutyCycle,
            SvPinout => Validator::PinoutName,
            MdRow | MdColumn => Validator::RowColumn,
            MdMapping | Pinouts => Validator::PassAll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique_and_stable() {
        let mut seen = std::collections::HashSet::new();
        for key in ALL_KEYS {
            assert!(seen.insert(key.id()), "duplicate id {}", key.id());
        }
        assert_eq!(ProfileKey::Name.id(), 1);
        assert_eq!(ProfileKey::BroadcastPort.id(), 101);
        assert_eq!(ProfileKey::SvPinout.id(), 231);
        assert_eq!(ProfileKey::FaLayers.id(), 410);
    }

    #[test]
    fn id_and_name_lookups_roundtrip() {
        for key in ALL_KEYS {
            assert_eq!(ProfileKey::from_id(key.id()), Some(*key));
            assert_eq!(ProfileKey::from_name(key.name()), Some(*key));
        }
        assert_eq!(ProfileKey::from_id(99_999), None);
        assert_eq!(ProfileKey::from_name("nonesuch"), None);
    }

    #[test]
    fn runtime_keys_are_not_editable() {
        assert!(ProfileKey::Platform.runtime_only());
        assert!(ProfileKey::Version.runtime_only());
        assert!(!ProfileKey::Platform.editable());
        assert!(!ProfileKey::Version.editable());
    }

    #[test]
    fn type_classes() {
        assert_eq!(ProfileKey::SavedSlaves.class(), TypeClass::List);
        assert_eq!(ProfileKey::Pinouts.class(), TypeClass::Map);
        assert_eq!(ProfileKey::DefaultSlave.class(), TypeClass::Submodule);
        assert_eq!(ProfileKey::BroadcastPort.class(), TypeClass::Primitive);
    }
}
