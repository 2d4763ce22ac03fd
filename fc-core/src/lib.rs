//! # fc-core
//!
//! Configuration archive and data logging for the Fan Club master.
//! The archive is the single source of configuration truth; the logger
//! records the feedback stream the rest of the system publishes.

pub mod archive;
pub mod logger;

pub use archive::handle::{ArchiveActor, ArchiveHandle};
pub use archive::keys::{ProfileKey, TypeClass};
pub use archive::profile::{default_profile, default_slave, default_value, Profile, Value};
pub use archive::report::{Issue, Severity, ValidationReport};
pub use archive::{Archive, LoadOutcome, SnapshotId};
pub use logger::{DataLogger, LogSchema};
