//! Filesystem-safe path construction.

use std::path::{Path, PathBuf};

const VALID_EXTRA: &str = "-_.() ";

/// Strip everything but ASCII letters, digits, and `-_.() ` from a path
/// component, then replace spaces with underscores.
pub fn sanitize_component(component: &str) -> String {
    let filtered: String = component
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || VALID_EXTRA.contains(*c))
        .collect();
    filtered.replace(' ', "_")
}

/// Join `base` with each of `parts`, sanitizing every part.
pub fn make_safe_path<P: AsRef<Path>>(base: P, parts: &[&str]) -> PathBuf {
    let mut path = base.as_ref().to_path_buf();
    for part in parts {
        path.push(sanitize_component(part));
    }
    path
}
