//! Storage engine: per-team directory layout, locks, atomic writes, logs,
//! indexes, snapshots.
//!
//! Layout under the data root:
//!
//! ```text
//! teams/<team>/
//!   inboxes/<agent>.jsonl        append-only envelopes (source of truth)
//!   events/<YYYY-MM-DD>.jsonl    append-only events (source of truth)
//!   dead-letter/<YYYY-MM-DD>.jsonl
//!   tasks/<task_id>.json         derived snapshots
//!   state/                       derived indexes
//!   locks/<resource>.lock
//!   team.json, config.json
//! ```

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::{AgentId, TaskId, TeamId};
use crate::paths;

pub mod acks;
pub mod atomic;
pub mod cooldown;
pub mod dead_letter;
pub mod diagnostics;
pub mod events;
pub mod inbox;
pub mod index;
pub mod jsonl;
pub mod lock;
pub mod reader;
pub mod snapshot;

pub use lock::LockResource;

/// Storage-layer failures. These abort the current operation and surface
/// with exit code 1; they never represent domain refusals.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("lock `{resource}` failed: {reason}")]
    Lock { resource: &'static str, reason: String },
    #[error("invalid JSON at {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{what} `{id}` not found")]
    NotFound { what: &'static str, id: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Handle to one team's directory tree. Opening performs no filesystem
/// work; all operations are functions of `(data_root, inputs)`.
#[derive(Clone, Debug)]
pub struct TeamStore {
    team: TeamId,
    team_dir: PathBuf,
}

impl TeamStore {
    pub fn open(root: &Path, team: TeamId) -> Self {
        let team_dir = paths::team_dir(root, &team);
        Self { team, team_dir }
    }

    pub fn team(&self) -> &TeamId {
        &self.team
    }

    pub fn team_dir(&self) -> &Path {
        &self.team_dir
    }

    pub fn exists(&self) -> bool {
        self.team_dir.is_dir()
    }

    pub fn ensure_layout(&self) -> StoreResult<()> {
        for dir in [
            self.inboxes_dir(),
            self.events_dir(),
            self.tasks_dir(),
            self.state_dir(),
            self.dead_letter_dir(),
            self.locks_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
        }
        Ok(())
    }

    pub fn inboxes_dir(&self) -> PathBuf {
        self.team_dir.join("inboxes")
    }

    pub fn inbox_path(&self, agent: &AgentId) -> PathBuf {
        self.inboxes_dir().join(format!("{}.jsonl", agent.as_str()))
    }

    pub fn events_dir(&self) -> PathBuf {
        self.team_dir.join("events")
    }

    pub fn event_path(&self, day: &str) -> PathBuf {
        self.events_dir().join(format!("{day}.jsonl"))
    }

    pub fn tasks_dir(&self) -> PathBuf {
        self.team_dir.join("tasks")
    }

    pub fn task_path(&self, task_id: &TaskId) -> PathBuf {
        self.tasks_dir().join(format!("{}.json", task_id.as_str()))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.team_dir.join("state")
    }

    pub fn message_shards_dir(&self) -> PathBuf {
        self.state_dir().join("message-index-shards")
    }

    pub fn legacy_message_index_path(&self) -> PathBuf {
        self.state_dir().join("message-index.json")
    }

    pub fn event_shards_dir(&self) -> PathBuf {
        self.state_dir().join("event-index-shards")
    }

    pub fn legacy_event_index_path(&self) -> PathBuf {
        self.state_dir().join("event-index.json")
    }

    pub fn ack_index_path(&self) -> PathBuf {
        self.state_dir().join("ack-index.json")
    }

    pub fn nudge_index_path(&self) -> PathBuf {
        self.state_dir().join("nudge-index.json")
    }

    pub fn malformed_index_path(&self) -> PathBuf {
        self.state_dir().join("malformed.json")
    }

    pub fn dead_letter_dir(&self) -> PathBuf {
        self.team_dir.join("dead-letter")
    }

    pub fn dead_letter_path(&self, day: &str) -> PathBuf {
        self.dead_letter_dir().join(format!("{day}.jsonl"))
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.team_dir.join("locks")
    }

    pub fn team_meta_path(&self) -> PathBuf {
        self.team_dir.join("team.json")
    }

    pub fn config_path(&self) -> PathBuf {
        self.team_dir.join("config.json")
    }

    /// Inbox files present on disk, sorted by agent name.
    pub fn list_inboxes(&self) -> StoreResult<Vec<(AgentId, PathBuf)>> {
        let dir = self.inboxes_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut inboxes = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(stem) = name.strip_suffix(".jsonl") else {
                continue;
            };
            if let Ok(agent) = AgentId::parse(stem) {
                inboxes.push((agent, path));
            }
        }
        inboxes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(inboxes)
    }

    /// Event day-files sorted ascending by day.
    pub fn list_event_files(&self) -> StoreResult<Vec<PathBuf>> {
        self.list_jsonl_files(&self.events_dir())
    }

    pub fn list_dead_letter_files(&self) -> StoreResult<Vec<PathBuf>> {
        self.list_jsonl_files(&self.dead_letter_dir())
    }

    fn list_jsonl_files(&self, dir: &Path) -> StoreResult<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let entries = std::fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("jsonl") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    /// Task snapshot files sorted by task id.
    pub fn list_task_files(&self) -> StoreResult<Vec<PathBuf>> {
        let dir = self.tasks_dir();
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        let entries = std::fs::read_dir(&dir).map_err(|e| StoreError::io(&dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}
