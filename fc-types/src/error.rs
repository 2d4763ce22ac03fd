//! Error taxonomy shared across the master's subsystems.
//!
//! The kinds form a closed set; recovery policy is keyed off the kind, so
//! new failure modes must map onto an existing kind or extend the set
//! deliberately.

use std::fmt;
use std::io;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// UDP bind/send/recv failure.
    Transport,
    /// Malformed frame, bad passcode, unknown command code.
    Protocol,
    /// Expected heartbeat missed beyond the timeout allowance.
    SlaveTimeout,
    /// A profile value failed its validator.
    Validation,
    /// File read/write failure for archive or logs.
    Io,
    /// Acquisition backend failed to initialize.
    HardwareInit,
    /// A state-machine invariant was breached.
    InternalInvariant,
    /// Archive payload failed the magic/version gate.
    Corrupted,
    /// Archive payload bytes could not be decoded.
    EncodingIssue,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Transport => "transport",
            ErrorKind::Protocol => "protocol",
            ErrorKind::SlaveTimeout => "slave timeout",
            ErrorKind::Validation => "validation",
            ErrorKind::Io => "io",
            ErrorKind::HardwareInit => "hardware init",
            ErrorKind::InternalInvariant => "internal invariant",
            ErrorKind::Corrupted => "corrupted",
            ErrorKind::EncodingIssue => "encoding issue",
        }
    }
}

/// An error with its kind and a human-readable context line.
#[derive(Debug, Clone)]
pub struct FcError {
    pub kind: ErrorKind,
    pub context: String,
}

impl FcError {
    pub fn new(kind: ErrorKind, context: impl Into<String>) -> Self {
        Self {
            kind,
            context: context.into(),
        }
    }

    pub fn transport(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transport, context)
    }

    pub fn protocol(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Protocol, context)
    }

    pub fn validation(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, context)
    }

    pub fn invariant(context: impl Into<String>) -> Self {
        Self::new(ErrorKind::InternalInvariant, context)
    }
}

impl fmt::Display for FcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.as_str(), self.context)
    }
}

impl std::error::Error for FcError {}

impl From<io::Error> for FcError {
    fn from(e: io::Error) -> Self {
        Self::new(ErrorKind::Io, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FcError>;
