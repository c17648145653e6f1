//! Alternate names used to resolve naming conflicts.

use anyhow::{Context, Result};
use tracing::instrument;

/// Returns `path` with `suffix` appended to its last component.
#[must_use]
pub fn with_suffix(path: &std::path::Path, suffix: &str) -> std::path::PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push("_");
    name.push(suffix);
    std::path::PathBuf::from(name)
}

fn timestamp_suffix() -> String {
    chrono::Local::now().format("%Y%m%d%H%M%S%6f").to_string()
}

/// Returns whether anything (including a dangling symlink) occupies `path`.
pub async fn is_occupied(path: &std::path::Path) -> Result<bool> {
    match tokio::fs::symlink_metadata(path).await {
        Ok(_) => Ok(true),
        Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(error) => {
            Err(error).with_context(|| format!("failed reading metadata from {:?}", &path))
        }
    }
}

/// Picks a path derived from `path` by appending a time based suffix that is currently free.
///
/// The suffix is `_<local time with microseconds>`; if that is taken as well a counter is
/// appended until a free name is found.
#[instrument]
pub async fn pick_unique_path(path: &std::path::Path) -> Result<std::path::PathBuf> {
    let candidate = with_suffix(path, &timestamp_suffix());
    if !is_occupied(&candidate).await? {
        return Ok(candidate);
    }
    let mut counter = 1u64;
    loop {
        let numbered = with_suffix(&candidate, &counter.to_string());
        if !is_occupied(&numbered).await? {
            tracing::debug!("picked {:?} for {:?}", &numbered, &path);
            return Ok(numbered);
        }
        counter += 1;
    }
}
