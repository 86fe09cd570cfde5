// Cache path utilities.
// Constructs filesystem paths for the disk backend.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;

use crate::model::Fingerprint;

/// Get the base cache directory (~/.cache/issue-lens on Linux).
pub fn cache_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "issue-lens").map(|dirs| dirs.cache_dir().to_path_buf())
}

/// Directory holding one file per cache entry.
pub fn entries_dir(root: &Path) -> PathBuf {
    root.join("entries")
}

/// Path to a single entry's file.
pub fn entry_path(root: &Path, fingerprint: &Fingerprint) -> PathBuf {
    entries_dir(root).join(format!("{}.json", sanitize_name(fingerprint.as_str())))
}

/// Sanitize a name for use in filesystem paths.
/// Replaces problematic characters with underscores.
fn sanitize_name(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '.' => '_',
            _ => c,
        })
        .collect()
}
