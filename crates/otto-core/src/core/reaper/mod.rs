//! Mark-and-sweep retention for the update store.
//!
//! The reaper asks the selection policy which rows the launched update has
//! made obsolete, deprecates them, and deletes deprecated rows once a grace
//! window has passed. Asset rows follow their last reference, and payload
//! files with no row at all are swept straight from disk.

use std::env;
use std::fs;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;
use tracing::{debug, warn};

use otto_domain::{FilterAwarePolicy, FilterMap, SelectionPolicy, UpdateId};

use crate::store::{
    classify_store_error, file_modified_secs, fsync_dir, timestamp_secs, UpdateStore,
};
use crate::{CommandContext, ExecutionOutcome};

/// Grace window before deprecated rows and orphaned files are removed.
pub const DEFAULT_REAP_GRACE_SECS: u64 = 172_800;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapSummary {
    pub deprecated: usize,
    pub deleted_updates: usize,
    pub deleted_assets: usize,
    pub reclaimed_bytes: u64,
    pub orphan_files_removed: usize,
    pub skipped_lock_held: bool,
    pub dry_run: bool,
    /// Rows a dry run would deprecate or delete. Empty on real runs.
    pub planned: Vec<UpdateId>,
}

/// Perform a mark-and-sweep pass over the store.
///
/// Marking deprecates every row the policy says the launched update has
/// superseded; sweeping deletes deprecated rows whose last access predates
/// the grace window, then unreferenced asset rows and their files. Without a
/// launched update nothing is safe to deprecate and the pass is a no-op.
///
/// # Errors
/// Returns an error if the store cannot be read or written. A held reap lock
/// is not an error; the summary reports the skip instead.
pub fn reap(
    store: &UpdateStore,
    policy: &dyn SelectionPolicy,
    filters: &FilterMap,
    grace: Duration,
    dry_run: bool,
) -> Result<ReapSummary> {
    let mut summary = ReapSummary {
        dry_run,
        ..ReapSummary::default()
    };
    let Some(_lock) = store.try_lock("reap")? else {
        warn!("another process holds the reap lock; skipping the sweep");
        summary.skipped_lock_held = true;
        return Ok(summary);
    };

    let Some(launched) = store.launched_update()? else {
        debug!("no launched update; nothing is safe to deprecate");
        return Ok(summary);
    };

    let updates = store.all_updates()?;
    let doomed = policy.updates_to_delete(&launched, &updates, filters);
    let cutoff = timestamp_secs().saturating_sub(grace.as_secs());

    if dry_run {
        let expired = store.deprecated_updates_before(cutoff)?;
        summary.deprecated = doomed.len();
        summary.deleted_updates = expired.len();
        summary.deleted_assets = store.unreferenced_asset_hashes()?.len();
        let mut planned = doomed;
        for id in expired {
            if !planned.contains(&id) {
                planned.push(id);
            }
        }
        summary.planned = planned;
        return Ok(summary);
    }

    summary.deprecated = store.mark_reap_candidates(&doomed)?;
    let expired = store.deprecated_updates_before(cutoff)?;
    summary.deleted_updates = store.delete_updates(&expired)?;

    let (deleted_assets, reclaimed_bytes) = store.delete_unreferenced_assets()?;
    summary.deleted_assets = deleted_assets;
    summary.reclaimed_bytes = reclaimed_bytes;

    let (orphans, orphan_bytes) = sweep_orphan_files(store, cutoff)?;
    summary.orphan_files_removed = orphans;
    summary.reclaimed_bytes = summary.reclaimed_bytes.saturating_add(orphan_bytes);

    sweep_stale_partials(store, cutoff);

    debug!(
        deprecated = summary.deprecated,
        deleted_updates = summary.deleted_updates,
        deleted_assets = summary.deleted_assets,
        reclaimed_bytes = summary.reclaimed_bytes,
        orphan_files = summary.orphan_files_removed,
        "reap sweep complete"
    );
    Ok(summary)
}

/// Remove payload files that have no index row and predate the cutoff.
/// Tolerates files vanishing underneath it.
fn sweep_orphan_files(store: &UpdateStore, cutoff: u64) -> Result<(usize, u64)> {
    let assets_root = store.assets_root();
    if !assets_root.exists() {
        return Ok((0, 0));
    }
    let mut removed = 0usize;
    let mut removed_bytes = 0u64;
    for entry in walkdir::WalkDir::new(&assets_root).min_depth(2).max_depth(2) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(_) => continue,
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path().to_path_buf();
        let Some(file_name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        if store.asset_recorded(file_name)? {
            continue;
        }
        let modified = file_modified_secs(&path).unwrap_or(0);
        if modified > cutoff {
            continue;
        }
        let size = fs::metadata(&path).map(|meta| meta.len()).unwrap_or(0);
        let _ = fs::remove_file(&path);
        if let Some(parent) = path.parent() {
            fsync_dir(parent).ok();
        }
        removed += 1;
        removed_bytes = removed_bytes.saturating_add(size);
    }
    Ok((removed, removed_bytes))
}

fn sweep_stale_partials(store: &UpdateStore, cutoff: u64) {
    let Ok(entries) = fs::read_dir(store.tmp_root()) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("partial") {
            continue;
        }
        if file_modified_secs(&path).unwrap_or(0) > cutoff {
            continue;
        }
        let _ = fs::remove_file(&path);
    }
}

/// Run the reaper with environment-driven policy. Returns `Ok(None)` when
/// disabled via `OTTO_REAPER_DISABLE=1`.
pub fn run_reaper_with_env_policy(
    store: &UpdateStore,
    policy: &dyn SelectionPolicy,
    filters: &FilterMap,
    dry_run: bool,
) -> Result<Option<ReapSummary>> {
    if env::var("OTTO_REAPER_DISABLE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return Ok(None);
    }
    let grace_secs = env::var("OTTO_REAPER_GRACE_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_REAP_GRACE_SECS);
    let summary = reap(
        store,
        policy,
        filters,
        Duration::from_secs(grace_secs),
        dry_run,
    )?;
    Ok(Some(summary))
}

#[derive(Clone, Debug, Default)]
pub struct ReapRequest {
    /// Filters the launched update was selected under.
    pub filters: FilterMap,
    /// Plan the sweep without touching the store.
    pub dry_run: bool,
}

/// Reclaims disk space from superseded updates.
///
/// # Errors
/// Returns an error if the store cannot be opened or written.
pub fn reap_store(ctx: &CommandContext, request: &ReapRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };
    let policy = match ctx.config().runtime().version.clone() {
        Some(version) => FilterAwarePolicy::new(version),
        None => FilterAwarePolicy::with_runtime_versions(Vec::new()),
    };

    let summary = match run_reaper_with_env_policy(&store, &policy, &request.filters, request.dry_run)
    {
        Ok(Some(summary)) => summary,
        Ok(None) => {
            return Ok(ExecutionOutcome::success(
                "reaper disabled via OTTO_REAPER_DISABLE",
                json!({ "disabled": true }),
            ))
        }
        Err(err) => return classify_store_error(err),
    };

    let details = json!({
        "deprecated": summary.deprecated,
        "deleted_updates": summary.deleted_updates,
        "deleted_assets": summary.deleted_assets,
        "reclaimed_bytes": summary.reclaimed_bytes,
        "orphan_files_removed": summary.orphan_files_removed,
        "dry_run": summary.dry_run,
        "skipped": summary.skipped_lock_held,
        "planned": summary
            .planned
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>(),
    });
    let message = if summary.skipped_lock_held {
        "another process holds the reap lock; nothing to do".to_string()
    } else if summary.dry_run {
        format!(
            "reap would deprecate {} updates and delete {} ({} unreferenced assets)",
            summary.deprecated,
            summary.deleted_updates,
            summary.deleted_assets
        )
    } else {
        format!(
            "deprecated {} updates, deleted {} updates and {} assets ({} bytes reclaimed)",
            summary.deprecated,
            summary.deleted_updates,
            summary.deleted_assets,
            summary.reclaimed_bytes
        )
    };
    Ok(ExecutionOutcome::success(message, details))
}
