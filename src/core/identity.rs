//! Identity atoms.
//!
//! TeamId/AgentId/TaskId name filesystem path segments and must pass the
//! unsafe-identifier check before any path is derived from them.
//! MessageId is an index key, never a path segment; it only has to be
//! non-empty.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::error::{CoreError, UnsafeIdentifier};

/// Charset for path-segment identifiers. `/` and `\` are excluded by
/// construction; `..` is rejected separately because `a..b` would pass a
/// pure charset check.
fn validate_segment(field: &'static str, raw: &str) -> Result<(), CoreError> {
    if raw.is_empty() {
        return Err(UnsafeIdentifier {
            field,
            raw: raw.to_string(),
            reason: "empty",
        }
        .into());
    }
    if raw == "." || raw == ".." {
        return Err(UnsafeIdentifier {
            field,
            raw: raw.to_string(),
            reason: "reserved path component",
        }
        .into());
    }
    if raw.contains("..") {
        return Err(UnsafeIdentifier {
            field,
            raw: raw.to_string(),
            reason: "contains `..`",
        }
        .into());
    }
    for b in raw.bytes() {
        if !(b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || b == b'-') {
            return Err(UnsafeIdentifier {
                field,
                raw: raw.to_string(),
                reason: "contains character outside [A-Za-z0-9._-]",
            }
            .into());
        }
    }
    Ok(())
}

macro_rules! segment_id {
    ($(#[$doc:meta])* $name:ident, $field:literal) => {
        $(#[$doc])*
        #[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
                let s = s.into();
                validate_segment($field, &s)?;
                Ok(Self(s))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:?})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

segment_id!(
    /// Team identifier; names `teams/<team>/`.
    TeamId,
    "team"
);
segment_id!(
    /// Agent identifier; names `inboxes/<agent>.jsonl`.
    AgentId,
    "agent"
);
segment_id!(
    /// Task identifier; names `tasks/<task_id>.json`.
    TaskId,
    "task_id"
);

/// Message identifier - unique per team, used as an index key.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.trim().is_empty() {
            return Err(CoreError::schema("message id must be non-empty"));
        }
        Ok(Self(s))
    }

    /// Generate a fresh `msg_<12 hex>` id.
    pub fn generate() -> Self {
        Self(format!("msg_{}", short_uuid()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({:?})", self.0)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// First 12 hex chars of a v4 uuid, the id suffix used across the crate.
pub(crate) fn short_uuid() -> String {
    let mut s = uuid::Uuid::new_v4().simple().to_string();
    s.truncate(12);
    s
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_identifiers() {
        for raw in ["demo", "dev-1", "qa_bot", "task.7", "A9"] {
            assert!(TeamId::parse(raw).is_ok(), "{raw} should be accepted");
        }
    }

    #[test]
    fn rejects_traversal_and_separators() {
        for raw in ["../etc", "a/b", "a\\b", "..", ".", "", "a..b", "a b"] {
            assert!(AgentId::parse(raw).is_err(), "{raw:?} should be rejected");
        }
    }

    #[test]
    fn message_id_only_requires_non_empty() {
        assert!(MessageId::parse("msg:42/weird").is_ok());
        assert!(MessageId::parse("  ").is_err());
    }

    #[test]
    fn generated_ids_have_prefix() {
        let id = MessageId::generate();
        assert!(id.as_str().starts_with("msg_"));
        assert_eq!(id.as_str().len(), "msg_".len() + 12);
    }
}
