//! Per-field validator predicates for profile values.

use fc_types::Mac;

use super::profile::{Value, BUILTIN_PINOUTS};

// Fan modes stay negative until the slave firmware migrates.
pub const FAN_MODE_SINGLE: i64 = -1;
pub const FAN_MODE_DOUBLE: i64 = -2;

/// Closed set of validator predicates a key may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    PositiveInt,
    NonNegativeInt,
    /// Integer in 1..=65535.
    Port,
    /// Float in [0, 1].
    Normalized,
    /// Canonical 17-character MAC string, or the literal "None".
    MacString,
    /// One of the fan-mode discriminants.
    FanMode,
    /// Duty cycle in [0, 100].
    DutyCycle,
    NonEmptyStr,
    AnyStr,
    Bool,
    /// Unassigned-index sentinel: exactly -1.
    IndexSentinel,
    /// Integer >= -1 (-1 marks "unassigned" rows/columns).
    RowColumn,
    /// Two-number tuple (scale, offset).
    TargetRelation,
    /// Key of the built-in pinout table.
    PinoutName,
    PassAll,
    /// Non-editable submodules: every direct mutation is rejected.
    FailAll,
}

impl Validator {
    pub fn check(self, value: &Value) -> bool {
        match self {
            Validator::PositiveInt => matches!(value, Value::Int(i) if *i > 0),
            Validator::NonNegativeInt => matches!(value, Value::Int(i) if *i >= 0),
            Validator::Port => matches!(value, Value::Int(i) if (1..=65_535).contains(i)),
            Validator::Normalized => match value {
                Value::Float(f) => (0.0..=1.0).contains(f),
                Value::Int(i) => *i == 0 || *i == 1,
                _ => false,
            },
            Validator::MacString => match value {
                Value::Str(s) => s == "None" || Mac::parse(s).is_some(),
                _ => false,
            },
            Validator::FanMode => {
                matches!(value, Value::Int(i) if *i == FAN_MODE_SINGLE || *i == FAN_MODE_DOUBLE)
            }
            Validator::DutyCycle => match value {
                Value::Float(f) => (0.0..=100.0).contains(f),
                Value::Int(i) => (0..=100).contains(i),
                _ => false,
            },
            Validator::NonEmptyStr => matches!(value, Value::Str(s) if !s.is_empty()),
            Validator::AnyStr => matches!(value, Value::Str(_)),
            Validator::Bool => matches!(value, Value::Bool(_)),
            Validator::IndexSentinel => matches!(value, Value::Int(-1)),
            Validator::RowColumn => matches!(value, Value::Int(i) if *i >= -1),
            Validator::TargetRelation => matches!(value, Value::Pair(_, _)),
            Validator::PinoutName => match value {
                Value::Str(s) => BUILTIN_PINOUTS.iter().any(|(name, _)| name == s),
                _ => false,
            },
            Validator::PassAll => true,
            Validator::FailAll => false,
        }
    }

    /// Human description used in validation errors.
    pub fn describe(self) -> &'static str {
        match self {
            Validator::PositiveInt => "a positive integer",
            Validator::NonNegativeInt => "a non-negative integer",
            Validator::Port => "a port in 1..=65535",
            Validator::Normalized => "a number in [0, 1]",
            Validator::MacString => "a 17-character MAC string",
            Validator::FanMode => "a fan mode (-1 single, -2 double)",
            Validator::DutyCycle => "a duty cycle in [0, 100]",
            Validator::NonEmptyStr => "a non-empty string",
            Validator::AnyStr => "a string",
            Validator::Bool => "a boolean",
            Validator::IndexSentinel => "the unassigned index -1",
            Validator::RowColumn => "an integer >= -1",
            Validator::TargetRelation => "a (scale, offset) pair",
            Validator::PinoutName => "a built-in pinout name",
            Validator::PassAll => "anything",
            Validator::FailAll => "nothing (not directly editable)",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_boundaries() {
        assert!(Validator::Port.check(&Value::Int(1)));
        assert!(Validator::Port.check(&Value::Int(65_535)));
        assert!(!Validator::Port.check(&Value::Int(0)));
        assert!(!Validator::Port.check(&Value::Int(65_536)));
        assert!(!Validator::Port.check(&Value::Str("80".into())));
    }

    #[test]
    fn normalized_boundaries() {
        assert!(Validator::Normalized.check(&Value::Float(0.0)));
        assert!(Validator::Normalized.check(&Value::Float(1.0)));
        assert!(!Validator::Normalized.check(&Value::Float(1.01)));
        assert!(!Validator::Normalized.check(&Value::Float(-0.01)));
    }

    #[test]
    fn mac_string_accepts_placeholder() {
        assert!(Validator::MacString.check(&Value::Str("None".into())));
        assert!(Validator::MacString.check(&Value::Str("AA:BB:CC:DD:EE:FF".into())));
        assert!(!Validator::MacString.check(&Value::Str("AA:BB".into())));
    }

    #[test]
    fn fan_mode_is_closed() {
        assert!(Validator::FanMode.check(&Value::Int(-1)));
        assert!(Validator::FanMode.check(&Value::Int(-2)));
        assert!(!Validator::FanMode.check(&Value::Int(0)));
        assert!(!Validator::FanMode.check(&Value::Int(1)));
    }

    #[test]
    fn duty_cycle_range() {
        assert!(Validator::DutyCycle.check(&Value::Float(0.0)));
        assert!(Validator::DutyCycle.check(&Value::Float(100.0)));
        assert!(Validator::DutyCycle.check(&Value::Int(50)));
        assert!(!Validator::DutyCycle.check(&Value::Float(100.5)));
    }

    #[test]
    fn pinout_names_are_builtin() {
        assert!(Validator::PinoutName.check(&Value::Str("BASE".into())));
        assert!(Validator::PinoutName.check(&Value::Str("CAST".into())));
        assert!(!Validator::PinoutName.check(&Value::Str("NOPE".into())));
    }

    #[test]
    fn fail_all_rejects_everything() {
        assert!(!Validator::FailAll.check(&Value::Int(1)));
        assert!(Validator::PassAll.check(&Value::Int(1)));
    }
}
