//! Nudge cooldown state: per-(team, recipient, key) send suppression.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};

use crate::core::{AgentId, TeamId};

use super::lock::{LockResource, with_lock};
use super::{StoreResult, TeamStore, atomic};

/// Stable state key for one (team, recipient, cooldown_key) triple.
pub fn cooldown_key(team: &TeamId, recipient: &AgentId, key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(team.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(recipient.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest
        .iter()
        .take(8)
        .map(|b| format!("{b:02x}"))
        .collect::<String>()
}

/// Returns the remaining suppression window in seconds, or 0 after
/// recording `now_unix` as the new last-sent time.
pub fn check_and_record(
    store: &TeamStore,
    key: &str,
    cooldown_seconds: u64,
    now_unix: i64,
) -> StoreResult<u64> {
    if cooldown_seconds == 0 {
        return Ok(0);
    }
    let path = store.nudge_index_path();
    with_lock(store, LockResource::NudgeCooldown, || {
        let mut state: BTreeMap<String, i64> = atomic::read_json_or(&path, BTreeMap::new);
        if let Some(&last_sent) = state.get(key) {
            let elapsed = now_unix.saturating_sub(last_sent);
            if elapsed >= 0 && (elapsed as u64) < cooldown_seconds {
                return Ok(cooldown_seconds - elapsed as u64);
            }
        }
        state.insert(key.to_string(), now_unix);
        atomic::write_json_atomic(&path, &state)?;
        Ok(0)
    })
}
