//! Builder execution and package directory naming shared by the storage
//! backends.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{PackageError, PackageResult};
use crate::traits::Builder;

/// Run `builder` against a freshly emptied output directory.
///
/// On failure the partial output is discarded. Logs are kept so the failure
/// can be inspected; the next attempt starts them over.
pub(crate) fn run_builder(
    id: &str,
    output: &Path,
    logs: &Path,
    builder: Builder<'_>,
) -> PackageResult<()> {
    reset_dir(output)?;
    reset_dir(logs)?;

    info!(id, "building package");
    let started = Instant::now();
    match builder(output) {
        Ok(()) => {
            info!(
                id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "package built"
            );
            Ok(())
        }
        Err(e) => {
            warn!(id, error = %e, "build failed");
            if let Err(cleanup) = remove_dir_if_present(output) {
                warn!(id, error = %cleanup, "could not discard partial output");
            }
            Err(PackageError::BuildFailed {
                id: id.to_string(),
                reason: e.to_string(),
            })
        }
    }
}

/// Remove `path` and everything below it, then recreate it empty.
pub(crate) fn reset_dir(path: &Path) -> io::Result<()> {
    remove_dir_if_present(path)?;
    fs::create_dir_all(path)
}

pub(crate) fn remove_dir_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_dir_all(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Map an ID onto a single, safe path component.
pub(crate) fn dir_name(id: &str) -> String {
    let mut name: String = id
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '+' => c,
            _ => '_',
        })
        .collect();
    if name.is_empty() || name.starts_with('.') {
        name.insert(0, '_');
    }
    name
}
