//! Cache reconciliation against the editor's set of live cells.
//!
//! Both operations are best-effort: a missing directory is a no-op, files that
//! do not follow the artifact naming convention are left alone, and individual
//! deletion failures are logged and skipped.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::artifacts::cell_id_from_file_name;

/// Delete every artifact in `dir` whose cell id is not in `valid_ids`.
///
/// Returns the paths that were removed.
pub async fn purge_cache(valid_ids: &[String], dir: &Path) -> Vec<PathBuf> {
    let keep: HashSet<&str> = valid_ids.iter().map(String::as_str).collect();
    let removed = sweep(dir, |cell_id| !keep.contains(cell_id)).await;
    if !removed.is_empty() {
        info!(
            "[cache] Purged {} stale artifact(s) from {}",
            removed.len(),
            dir.display()
        );
    }
    removed
}

/// Delete every artifact in `dir` whose cell id is in `ids`.
///
/// Returns the paths that were removed.
pub async fn remove_cache(ids: &[String], dir: &Path) -> Vec<PathBuf> {
    let targets: HashSet<&str> = ids.iter().map(String::as_str).collect();
    let removed = sweep(dir, |cell_id| targets.contains(cell_id)).await;
    if !removed.is_empty() {
        info!(
            "[cache] Removed {} artifact(s) from {}",
            removed.len(),
            dir.display()
        );
    }
    removed
}

async fn sweep(dir: &Path, should_delete: impl Fn(&str) -> bool) -> Vec<PathBuf> {
    let mut removed = Vec::new();

    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            debug!("[cache] {} does not exist, nothing to do", dir.display());
            return removed;
        }
        Err(e) => {
            warn!("[cache] Failed to read {}: {}", dir.display(), e);
            return removed;
        }
    };

    loop {
        let entry = match entries.next_entry().await {
            Ok(Some(entry)) => entry,
            Ok(None) => break,
            Err(e) => {
                warn!("[cache] Failed to list {}: {}", dir.display(), e);
                break;
            }
        };

        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => {}
            _ => continue,
        }

        let name = entry.file_name().to_string_lossy().to_string();
        let Some(cell_id) = cell_id_from_file_name(&name) else {
            continue;
        };
        if !should_delete(cell_id) {
            continue;
        }

        let path = entry.path();
        match tokio::fs::remove_file(&path).await {
            Ok(()) => removed.push(path),
            Err(e) => warn!("[cache] Failed to delete {}: {}", path.display(), e),
        }
    }

    removed.sort();
    removed
}
