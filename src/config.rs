//! Per-team configuration (`teams/<team>/config.json`).
//!
//! Only the delivery-guard ack policy is configurable today. Overrides
//! merge over the built-in per-type defaults: a `default` entry adjusts
//! every type, a per-type entry wins over both.

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::core::{DeliveryPolicy, MessageType};
use crate::store::{TeamStore, atomic};

#[derive(Clone, Debug, Default, Deserialize)]
pub struct TeamConfig {
    #[serde(default)]
    pub ack_policy: BTreeMap<String, PolicyOverride>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PolicyOverride {
    pub max_attempts: Option<u32>,
    pub base_delay_seconds: Option<u64>,
    pub factor: Option<u32>,
    pub ack_timeout_seconds: Option<u64>,
}

impl PolicyOverride {
    fn apply(&self, policy: &mut DeliveryPolicy) {
        if let Some(v) = self.max_attempts {
            policy.max_attempts = v;
        }
        if let Some(v) = self.base_delay_seconds {
            policy.base_delay_seconds = v;
        }
        if let Some(v) = self.factor {
            policy.factor = v;
        }
        if let Some(v) = self.ack_timeout_seconds {
            policy.ack_timeout_seconds = v;
        }
    }
}

/// Missing or corrupt config reads as defaults; configuration must never
/// wedge an operation.
pub fn load(store: &TeamStore) -> TeamConfig {
    atomic::read_json_or(&store.config_path(), TeamConfig::default)
}

pub fn resolve_policy(config: &TeamConfig, kind: MessageType) -> DeliveryPolicy {
    let mut policy = kind.delivery_policy();
    if let Some(default) = config.ack_policy.get("default") {
        default.apply(&mut policy);
    }
    if let Some(specific) = config.ack_policy.get(kind.as_str()) {
        specific.apply(&mut policy);
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_type_override_beats_default_override() {
        let config: TeamConfig = serde_json::from_str(
            r#"{
                "ack_policy": {
                    "default": {"max_attempts": 9},
                    "task_assign": {"max_attempts": 2, "ack_timeout_seconds": 42}
                }
            }"#,
        )
        .unwrap();

        let assign = resolve_policy(&config, MessageType::TaskAssign);
        assert_eq!(assign.max_attempts, 2);
        assert_eq!(assign.ack_timeout_seconds, 42);
        assert_eq!(assign.base_delay_seconds, 30);

        let handoff = resolve_policy(&config, MessageType::Handoff);
        assert_eq!(handoff.max_attempts, 9);
        assert_eq!(handoff.base_delay_seconds, 10);
    }

    #[test]
    fn empty_config_uses_builtin_defaults() {
        let config = TeamConfig::default();
        let policy = resolve_policy(&config, MessageType::DecisionRequired);
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay_seconds, 30);
    }
}
