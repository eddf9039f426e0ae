//! Core domain types.
//!
//! Module order follows type dependency:
//! - error: bounded domain errors
//! - identity: TeamId, AgentId, TaskId, MessageId
//! - time: Timestamp, OrderKey
//! - envelope: Envelope, MessageType, DeliveryPolicy
//! - event: EventRecord, EventKind

pub mod envelope;
pub mod error;
pub mod event;
pub mod identity;
pub mod time;

pub use envelope::{DeliveryPolicy, Envelope, MessageType, SCHEMA_VERSION};
pub use error::{CoreError, SchemaError, UnknownType, UnsafeIdentifier};
pub use event::{EventKind, EventRecord};
pub use identity::{AgentId, MessageId, TaskId, TeamId};
pub use time::{OrderKey, Timestamp};
