use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::RecordError;

/// Output file named after `now`: `<dir>/<UTC ISO-8601>.<container>`.
pub fn output_path(dir: &Path, container: &str, now: DateTime<Utc>) -> PathBuf {
    dir.join(format!("{}.{container}", now.format("%Y-%m-%dT%H:%M:%S%.3fZ")))
}

/// Prepare [`output_path`] for a new session.
///
/// The directory is created if needed. A stale file at exactly that path is
/// removed so the writer starts from an empty file; nothing else is touched.
pub fn allocate_output_path(
    dir: &Path,
    container: &str,
    now: DateTime<Utc>,
) -> Result<PathBuf, RecordError> {
    fs::create_dir_all(dir)?;
    let path = output_path(dir, container, now);
    if path.exists() {
        debug!("removing stale recording at {}", path.display());
        fs::remove_file(&path)?;
    }
    Ok(path)
}
