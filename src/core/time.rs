//! Time primitives.
//!
//! Timestamps are RFC 3339 UTC strings with whole-second precision, ordered
//! lexicographically. That string order is the ordering contract for event
//! logs and the task-snapshot merge; `OrderKey` adds the message-id
//! tiebreak.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use super::error::CoreError;
use super::identity::MessageId;

/// Validated RFC 3339 UTC timestamp. Ordering is lexicographic on the raw
/// string, which for uniformly-formatted UTC stamps equals chronological
/// order.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Timestamp(String);

impl Timestamp {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        OffsetDateTime::parse(&s, &Rfc3339)
            .map_err(|e| CoreError::schema(format!("created_at `{s}` is not RFC 3339: {e}")))?;
        Ok(Self(s))
    }

    /// Current wall time, truncated to seconds so all writers emit the same
    /// shape and string comparison stays meaningful.
    pub fn now() -> Self {
        Self::from_unix(OffsetDateTime::now_utc().unix_timestamp())
    }

    pub fn from_unix(secs: i64) -> Self {
        let dt = OffsetDateTime::from_unix_timestamp(secs)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH)
            .replace_nanosecond(0)
            .unwrap_or(OffsetDateTime::UNIX_EPOCH);
        let formatted = dt
            .format(&Rfc3339)
            .unwrap_or_else(|_| String::from("1970-01-01T00:00:00Z"));
        Self(formatted)
    }

    pub fn unix_seconds(&self) -> i64 {
        OffsetDateTime::parse(&self.0, &Rfc3339)
            .map(|dt| dt.unix_timestamp())
            .unwrap_or(0)
    }

    /// UTC day `YYYY-MM-DD`, the event/dead-letter file key.
    pub fn day(&self) -> String {
        if self.0.len() >= 10 {
            self.0[..10].to_string()
        } else {
            String::from("unknown")
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({:?})", self.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Snapshot ordering key: `(created_at, message_id)`, both compared
/// lexicographically. An update applies iff its key is strictly greater
/// than the snapshot's.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderKey {
    pub created_at: Timestamp,
    pub message_id: MessageId,
}

impl OrderKey {
    pub fn new(created_at: Timestamp, message_id: MessageId) -> Self {
        Self {
            created_at,
            message_id,
        }
    }
}

impl PartialOrd for OrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.message_id.cmp(&other.message_id))
    }
}
