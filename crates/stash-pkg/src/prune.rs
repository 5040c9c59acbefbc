//! Eviction of stale packages.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::traits::PackageHandle;

/// Cooperative cancellation flag for long sweeps.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Outcome of one prune sweep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Packages looked at.
    pub examined: usize,
    pub removed: usize,
    /// Candidates left in place, usually because they were referenced.
    pub skipped: usize,
    /// Whether the sweep stopped early on cancellation.
    pub cancelled: bool,
    pub bytes_freed: u64,
}

/// Sweep `packages`, removing available ones idle for longer than `ttl`.
///
/// Best effort: a failed removal is logged and counted as skipped, and a
/// referenced package is passed over without waiting.
pub fn prune(
    packages: Vec<PackageHandle>,
    cancel: &CancelToken,
    ttl: Duration,
    max: usize,
) -> PruneReport {
    let mut report = PruneReport {
        examined: packages.len(),
        ..Default::default()
    };
    let Some(cutoff) = cutoff(Utc::now(), ttl) else {
        return report;
    };

    let mut candidates: Vec<(DateTime<Utc>, PackageHandle)> = packages
        .into_iter()
        .filter_map(|pkg| {
            let availability = pkg.available();
            match availability.last_used {
                Some(last_used) if availability.available && last_used <= cutoff => {
                    Some((last_used, pkg))
                }
                _ => None,
            }
        })
        .collect();
    candidates.sort_by_key(|(last_used, _)| *last_used);
    debug!(candidates = candidates.len(), %cutoff, "prune candidates");

    let mut attempts = 0;
    for (last_used, pkg) in candidates {
        if max != 0 && attempts >= max {
            break;
        }
        if cancel.is_cancelled() {
            info!(removed = report.removed, "prune cancelled");
            report.cancelled = true;
            break;
        }
        attempts += 1;

        let size = dir_size(pkg.output_directory()) + dir_size(pkg.logging_directory());
        match pkg.try_remove() {
            Ok(true) => {
                debug!(id = pkg.id(), %last_used, bytes = size, "pruned package");
                report.removed += 1;
                report.bytes_freed += size;
            }
            Ok(false) => {
                debug!(id = pkg.id(), "package in use, skipping");
                report.skipped += 1;
            }
            Err(e) => {
                warn!(id = pkg.id(), error = %e, "prune failed to remove package");
                report.skipped += 1;
            }
        }
    }

    info!(
        examined = report.examined,
        removed = report.removed,
        skipped = report.skipped,
        bytes_freed = report.bytes_freed,
        "prune finished"
    );
    report
}

/// `None` when `ttl` reaches back past the representable range, meaning
/// nothing can be old enough.
fn cutoff(now: DateTime<Utc>, ttl: Duration) -> Option<DateTime<Utc>> {
    let ttl = TimeDelta::from_std(ttl).ok()?;
    now.checked_sub_signed(ttl)
}

/// Total size of the regular files below `path`.
pub fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum()
}
