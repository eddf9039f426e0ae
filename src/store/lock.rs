//! Per-team, per-resource advisory file locks.
//!
//! Mutual exclusion is same-host only: an exclusive `flock` on
//! `teams/<team>/locks/<resource>.lock`, held for the whole critical
//! section and released on every exit path via the guard's `Drop`.
//!
//! When a critical section needs more than one lock they must be taken in
//! rank order: messages -> events -> acks -> task-snapshots ->
//! state-rehydrate -> malformed-jsonl. A thread-local stack of held ranks
//! turns an inversion into an error instead of a potential deadlock.

use std::cell::RefCell;
use std::fs::{File, OpenOptions};

use fs2::FileExt;

use super::{StoreError, StoreResult, TeamStore};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockResource {
    NudgeCooldown,
    Messages,
    Events,
    Acks,
    TaskSnapshots,
    StateRehydrate,
    MalformedJsonl,
    DeadLetter,
}

impl LockResource {
    pub fn file_name(self) -> &'static str {
        match self {
            LockResource::NudgeCooldown => "nudge-cooldown.lock",
            LockResource::Messages => "messages.lock",
            LockResource::Events => "events.lock",
            LockResource::Acks => "acks.lock",
            LockResource::TaskSnapshots => "task-snapshots.lock",
            LockResource::StateRehydrate => "state-rehydrate.lock",
            LockResource::MalformedJsonl => "malformed-jsonl.lock",
            LockResource::DeadLetter => "dead-letter.lock",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            LockResource::NudgeCooldown => "nudge-cooldown",
            LockResource::Messages => "messages",
            LockResource::Events => "events",
            LockResource::Acks => "acks",
            LockResource::TaskSnapshots => "task-snapshots",
            LockResource::StateRehydrate => "state-rehydrate",
            LockResource::MalformedJsonl => "malformed-jsonl",
            LockResource::DeadLetter => "dead-letter",
        }
    }

    /// Global acquisition rank. NudgeCooldown and DeadLetter are only ever
    /// held alone today; their ranks keep that honest.
    fn rank(self) -> u8 {
        match self {
            LockResource::NudgeCooldown => 0,
            LockResource::Messages => 1,
            LockResource::Events => 2,
            LockResource::Acks => 3,
            LockResource::TaskSnapshots => 4,
            LockResource::StateRehydrate => 5,
            LockResource::MalformedJsonl => 6,
            LockResource::DeadLetter => 7,
        }
    }
}

thread_local! {
    static HELD_RANKS: RefCell<Vec<u8>> = const { RefCell::new(Vec::new()) };
}

struct LockGuard {
    file: File,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        HELD_RANKS.with(|held| {
            held.borrow_mut().pop();
        });
    }
}

fn acquire(store: &TeamStore, resource: LockResource) -> StoreResult<LockGuard> {
    let inverted = HELD_RANKS.with(|held| {
        held.borrow()
            .last()
            .is_some_and(|&top| top >= resource.rank())
    });
    if inverted {
        return Err(StoreError::Lock {
            resource: resource.name(),
            reason: "lock order inversion".to_string(),
        });
    }

    store.ensure_layout()?;
    let path = store.locks_dir().join(resource.file_name());
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|e| StoreError::io(&path, e))?;
    file.lock_exclusive().map_err(|e| StoreError::Lock {
        resource: resource.name(),
        reason: e.to_string(),
    })?;

    HELD_RANKS.with(|held| held.borrow_mut().push(resource.rank()));
    Ok(LockGuard { file })
}

/// Run `f` under the exclusive advisory lock for `resource`. The lock is
/// released whether `f` succeeds or fails.
pub fn with_lock<T>(
    store: &TeamStore,
    resource: LockResource,
    f: impl FnOnce() -> StoreResult<T>,
) -> StoreResult<T> {
    let _guard = acquire(store, resource)?;
    f()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TeamId;

    fn test_store() -> (tempfile::TempDir, TeamStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = TeamStore::open(dir.path(), TeamId::parse("demo").unwrap());
        (dir, store)
    }

    #[test]
    fn lock_released_after_failure() {
        let (_dir, store) = test_store();
        let result: StoreResult<()> = with_lock(&store, LockResource::Messages, || {
            Err(StoreError::NotFound {
                what: "message",
                id: "x".into(),
            })
        });
        assert!(result.is_err());
        // Re-acquisition succeeds because the guard dropped.
        with_lock(&store, LockResource::Messages, || Ok(())).unwrap();
    }

    #[test]
    fn ordered_nesting_is_allowed() {
        let (_dir, store) = test_store();
        with_lock(&store, LockResource::Messages, || {
            with_lock(&store, LockResource::Events, || {
                with_lock(&store, LockResource::Acks, || Ok(()))
            })
        })
        .unwrap();
    }

    #[test]
    fn inversion_is_rejected() {
        let (_dir, store) = test_store();
        let result = with_lock(&store, LockResource::Events, || {
            with_lock(&store, LockResource::Messages, || Ok(()))
        });
        match result {
            Err(StoreError::Lock { reason, .. }) => {
                assert!(reason.contains("inversion"));
            }
            other => panic!("expected lock order error, got {other:?}"),
        }
        // The outer guard must have been released on the error path.
        with_lock(&store, LockResource::Events, || Ok(())).unwrap();
    }
}
