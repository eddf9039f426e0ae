#![forbid(unsafe_code)]

//! Local-first, file-backed team collaboration control plane.
//!
//! Append-only inbox/event logs are the source of truth; indexes,
//! snapshots and ack/cooldown metadata are derived, rebuildable state.
//! Mutual exclusion is per-team, per-resource advisory file locking on a
//! single host.

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
mod paths;
pub mod service;
pub mod store;
pub mod telemetry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export core types at crate root for convenience.
pub use crate::core::{
    AgentId, CoreError, DeliveryPolicy, Envelope, EventKind, EventRecord, MessageId, MessageType,
    OrderKey, TaskId, TeamId, Timestamp,
};
pub use crate::service::Service;
pub use crate::store::TeamStore;
