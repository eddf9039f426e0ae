//! Data-root resolution.
//!
//! The data root is the directory holding `teams/`. Resolution order:
//! explicit `--data-dir`, then `TEAM_CHAT_DIR`, then the current directory.
//! Everything below the root is derived from validated identifiers only
//! (see `store::TeamStore`).

use std::path::PathBuf;

use crate::core::TeamId;

pub const DATA_DIR_ENV: &str = "TEAM_CHAT_DIR";

pub fn data_root(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = std::env::var(DATA_DIR_ENV)
        && !dir.trim().is_empty()
    {
        return PathBuf::from(dir);
    }
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

pub fn teams_dir(root: &std::path::Path) -> PathBuf {
    root.join("teams")
}

pub fn team_dir(root: &std::path::Path, team: &TeamId) -> PathBuf {
    teams_dir(root).join(team.as_str())
}
