//! Utility helpers — path resolution, timestamps, string manipulation.

use std::path::PathBuf;

/// Get the Pulsar home directory (e.g. `~/.pulsar/`).
pub fn get_home_path() -> PathBuf {
    let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".pulsar")
}

/// Get the default data directory for snapshots (e.g. `~/.pulsar/data/`).
pub fn get_default_data_path() -> PathBuf {
    get_home_path().join("data")
}

/// Sortable timestamp stamp: `YYYYMMDD_HHMMSS_micros`.
///
/// Lexicographic order of stamps is chronological order.
pub fn stamp() -> String {
    chrono::Local::now().format("%Y%m%d_%H%M%S_%6f").to_string()
}

/// Human-readable local date and time for prompts.
pub fn human_now() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Truncate a string to `max_len` characters, appending "..." if truncated.
///
/// Unicode-safe. The result is at most `max_len + 3` characters long.
pub fn truncate_with_ellipsis(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max_len).collect();
        format!("{}...", truncated)
    }
}

/// Truncate a string to at most `max_len` characters, no marker.
pub fn truncate_chars(s: &str, max_len: usize) -> String {
    s.chars().take(max_len).collect()
}

/// Sanitize a string for use as a filename.
pub fn safe_filename(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Expand `~` to the home directory in a path string.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = home_dir().unwrap_or_else(|| PathBuf::from("."));
        home.join(rest)
    } else if path == "~" {
        home_dir().unwrap_or_else(|| PathBuf::from("."))
    } else {
        PathBuf::from(path)
    }
}

fn home_dir() -> Option<PathBuf> {
    dirs_next::home_dir()
}
