// crates/core/src/paths.rs
//! Where the portal client keeps its files. Everything lives under one data
//! directory so `CIVIC_PORTAL_DATA_DIR` can relocate it wholesale.

use std::path::{Path, PathBuf};

/// App data root: `~/Library/Application Support/civic-portal/` (macOS) or `~/.local/share/civic-portal/` (Linux).
pub fn app_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("civic-portal"))
}

/// Durable key/value state (tokens, roles, notifications): `<data_dir>/state.json`.
pub fn state_path(data_dir: &Path) -> PathBuf {
    data_dir.join("state.json")
}

/// Optional user config: `<app_data_dir>/config.toml`.
pub fn default_config_path() -> Option<PathBuf> {
    app_data_dir().map(|d| d.join("config.toml"))
}

/// Rolling log files: `<data_dir>/logs/`.
pub fn log_dir(data_dir: &Path) -> PathBuf {
    data_dir.join("logs")
}

/// Remove the persisted state file (session and notification list).
/// Returns what was removed for user feedback.
pub fn remove_state_data(data_dir: &Path) -> Vec<String> {
    let mut removed = Vec::new();
    let path = state_path(data_dir);
    if path.exists() {
        match std::fs::remove_file(&path) {
            Ok(()) => removed.push(format!("Removed state file: {}", path.display())),
            Err(e) => removed.push(format!("Failed to remove {}: {}", path.display(), e)),
        }
    }
    removed
}
