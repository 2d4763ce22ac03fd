//! Network layer for the Fan Club master.
//!
//! Wire protocol codec, the discovery heartbeat, the UDP ingress task,
//! per-slave command links, and the slave lifecycle manager.

pub mod broadcaster;
pub mod link;
pub mod listener;
pub mod manager;
pub mod protocol;

pub use broadcaster::{Broadcaster, BroadcasterConfig, NetFatal};
pub use link::{LinkConfig, SlaveLink};
pub use listener::Listener;
pub use manager::{IngressEvent, ManagerConfig, SlaveEvent, SlaveManager};
pub use protocol::{BroadcastMode, Command, SlaveFrame, UpdatePhase};
