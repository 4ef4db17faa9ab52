//! Manifest staging: parse, gate, download bookkeeping, and batch intake.
//!
//! Staging takes raw manifests the host downloaded and decides, per manifest,
//! whether the update belongs in the store: malformed or filter-inconsistent
//! manifests are rejected, ones no better than the running update are
//! skipped, and the rest land as rows plus payloads. Batches fan out over a
//! small worker pool; each manifest is an independent unit of work.

use std::env;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;

use anyhow::Result;
use serde_json::json;
use tracing::debug;

use otto_domain::{
    check_filter_consistency, parse_manifest, FilterAwarePolicy, FilterMap, ManifestConfig,
    SelectionPolicy, UpdateId,
};

use crate::store::{classify_store_error, PendingAsset, StoreError, UpdateStore};
use crate::{CommandContext, ExecutionOutcome};

/// Cooperative cancellation for a staging batch. Workers check the flag
/// between payload intake and the index insert, so a cancelled stage never
/// leaves a row behind.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// One raw manifest in a batch, tagged with where it came from for reporting.
#[derive(Clone, Debug)]
pub struct StagedManifest {
    pub source: String,
    pub raw: Vec<u8>,
}

/// What staging decided for a single manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StageDisposition {
    /// The update is in the store; `ready` says whether every payload landed.
    Staged { ready: bool },
    Skipped { reason: String },
    Rejected { reason: String },
    Cancelled,
}

#[derive(Clone, Debug)]
pub struct StageOutcome {
    pub update_id: Option<UpdateId>,
    pub disposition: StageDisposition,
}

/// [`StageOutcome`] plus the source tag, as returned for batch members.
#[derive(Clone, Debug)]
pub struct StageReport {
    pub source: String,
    pub update_id: Option<UpdateId>,
    pub disposition: StageDisposition,
}

/// Stage one manifest into the store.
///
/// The gate asks the selection policy whether the candidate beats the
/// currently launched update under the active filters. Without an explicit
/// runtime version the candidate's own is accepted, which keeps offline
/// re-staging of known-good manifests possible.
///
/// # Errors
/// Returns an error if the store cannot be read or written. Problems with the
/// manifest itself come back as a disposition, not an error.
pub fn stage_update(
    store: &UpdateStore,
    manifest: &[u8],
    assets_dir: Option<&Path>,
    filters: &FilterMap,
    runtime_version: Option<&str>,
    token: &CancellationToken,
) -> Result<StageOutcome> {
    let candidate = match parse_manifest(manifest, &ManifestConfig::default()) {
        Ok(update) => update,
        Err(err) => {
            return Ok(StageOutcome {
                update_id: None,
                disposition: StageDisposition::Rejected {
                    reason: err.to_string(),
                },
            })
        }
    };
    if let Err(err) = check_filter_consistency(&candidate, filters) {
        return Ok(StageOutcome {
            update_id: Some(candidate.id),
            disposition: StageDisposition::Rejected {
                reason: err.to_string(),
            },
        });
    }

    let launched = store.launched_update()?;
    let gate = match runtime_version {
        Some(version) => FilterAwarePolicy::new(version),
        None => FilterAwarePolicy::with_runtime_versions(vec![candidate.runtime_version.clone()]),
    };
    if !gate.should_load_new_update(&candidate, launched.as_ref(), filters) {
        // Filter contradictions were rejected above, so a failed gate means
        // the candidate is stale or built for a foreign runtime.
        let reason = if let Some(current) = launched
            .as_ref()
            .filter(|current| candidate.commit_time <= current.commit_time)
        {
            format!("not newer than launched update {}", current.id)
        } else {
            "runtime version not accepted".to_string()
        };
        return Ok(StageOutcome {
            update_id: Some(candidate.id),
            disposition: StageDisposition::Skipped { reason },
        });
    }

    let mut update = candidate;
    let mut pendings: Vec<PendingAsset> = Vec::new();
    let mut missing = 0usize;
    if let Some(dir) = assets_dir {
        for asset in &mut update.assets {
            let path = dir.join(asset.file_key());
            if !path.is_file() {
                missing += 1;
                continue;
            }
            let expected = (!asset.hash_derived).then_some(asset.hash.as_str());
            let pending = match store.hash_asset_payload(&path, expected) {
                Ok(pending) => pending,
                Err(err) => {
                    for pending in pendings {
                        pending.discard();
                    }
                    let Some(reason) = digest_mismatch_reason(&err) else {
                        return Err(err);
                    };
                    return Ok(StageOutcome {
                        update_id: Some(update.id),
                        disposition: StageDisposition::Rejected { reason },
                    });
                }
            };
            if asset.hash_derived {
                asset.hash = pending.hash.clone();
                asset.hash_derived = false;
            }
            if asset.size.is_none() {
                asset.size = Some(pending.size);
            }
            pendings.push(pending);
        }
    } else {
        missing = update.assets.len();
    }

    if token.is_cancelled() {
        for pending in pendings {
            pending.discard();
        }
        return Ok(StageOutcome {
            update_id: Some(update.id),
            disposition: StageDisposition::Cancelled,
        });
    }

    if let Err(err) = store.insert_staged_update(&update, filters) {
        for pending in pendings {
            pending.discard();
        }
        if matches!(
            err.downcast_ref::<StoreError>(),
            Some(StoreError::DuplicateUpdate { .. })
        ) {
            return Ok(StageOutcome {
                update_id: Some(update.id),
                disposition: StageDisposition::Skipped {
                    reason: "already in the store".to_string(),
                },
            });
        }
        return Err(err);
    }

    let mut pendings = pendings;
    while let Some(pending) = pendings.pop() {
        if let Err(err) = store.commit_asset(pending) {
            for rest in pendings {
                rest.discard();
            }
            return Err(err);
        }
    }

    if missing == 0 {
        store.mark_update_ready(update.id)?;
        debug!(update = %update.id, "staged update is ready to launch");
        return Ok(StageOutcome {
            update_id: Some(update.id),
            disposition: StageDisposition::Staged { ready: true },
        });
    }
    debug!(update = %update.id, missing, "staged update is waiting on assets");
    Ok(StageOutcome {
        update_id: Some(update.id),
        disposition: StageDisposition::Staged { ready: false },
    })
}

fn digest_mismatch_reason(err: &anyhow::Error) -> Option<String> {
    err.chain().find_map(|cause| {
        match cause.downcast_ref::<StoreError>() {
            Some(mismatch @ StoreError::DigestMismatch { .. }) => Some(mismatch.to_string()),
            _ => None,
        }
    })
}

/// Stage a batch of manifests across a worker pool. Reports come back sorted
/// by source tag so batch output is stable regardless of scheduling.
///
/// # Errors
/// Returns the first store-level error any worker hit.
pub fn run_stage_batch(
    store: &UpdateStore,
    manifests: &[StagedManifest],
    assets_dir: Option<&Path>,
    filters: &FilterMap,
    runtime_version: Option<&str>,
    token: &CancellationToken,
) -> Result<Vec<StageReport>> {
    if manifests.is_empty() {
        return Ok(Vec::new());
    }

    let worker_count = stage_concurrency(manifests.len());
    let (job_tx, job_rx) = mpsc::channel();
    for manifest in manifests {
        job_tx.send(manifest.clone()).expect("queue manifests");
    }
    drop(job_tx);

    let job_rx = Arc::new(Mutex::new(job_rx));
    let (result_tx, result_rx) = mpsc::channel();

    for _ in 0..worker_count {
        let work_rx = Arc::clone(&job_rx);
        let result_tx = result_tx.clone();
        let store = store.clone();
        let assets_dir = assets_dir.map(Path::to_path_buf);
        let filters = filters.clone();
        let runtime_version = runtime_version.map(ToOwned::to_owned);
        let token = token.clone();
        thread::spawn(move || loop {
            let manifest = {
                let guard = work_rx.lock().expect("lock job receiver");
                match guard.recv() {
                    Ok(manifest) => manifest,
                    Err(_) => break,
                }
            };

            let outcome = stage_update(
                &store,
                &manifest.raw,
                assets_dir.as_deref(),
                &filters,
                runtime_version.as_deref(),
                &token,
            )
            .map(|outcome| StageReport {
                source: manifest.source,
                update_id: outcome.update_id,
                disposition: outcome.disposition,
            });
            if result_tx.send(outcome).is_err() {
                break;
            }
        });
    }
    drop(result_tx);

    let mut reports = Vec::with_capacity(manifests.len());
    for result in result_rx {
        reports.push(result?);
    }
    reports.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(reports)
}

/// Worker count for a staging batch: `OTTO_STAGE_WORKERS` wins, otherwise the
/// machine's parallelism, clamped to a sane window and the batch size.
pub(crate) fn stage_concurrency(total: usize) -> usize {
    let requested = env::var("OTTO_STAGE_WORKERS")
        .ok()
        .and_then(|value| value.parse::<usize>().ok());
    let available = thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(4)
        .max(1);
    let max_workers = requested.unwrap_or(available).clamp(1, 16);
    max_workers.min(total.max(1))
}

#[derive(Clone, Debug, Default)]
pub struct StageRequest {
    pub manifests: Vec<StagedManifest>,
    /// Directory holding downloaded payloads, keyed by file key.
    pub assets_dir: Option<PathBuf>,
    /// Filters the manifests were downloaded under.
    pub filters: FilterMap,
    /// Runtime version the gate should accept; falls back to
    /// `OTTO_RUNTIME_VERSION`, then to each candidate's own.
    pub runtime: Option<String>,
}

/// Stages a batch of manifests under the active filters.
///
/// # Errors
/// Returns an error if the store cannot be opened or written.
pub fn stage_updates(ctx: &CommandContext, request: &StageRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };
    let runtime = request
        .runtime
        .clone()
        .or_else(|| ctx.config().runtime().version.clone());
    let token = CancellationToken::new();
    let reports = match run_stage_batch(
        &store,
        &request.manifests,
        request.assets_dir.as_deref(),
        &request.filters,
        runtime.as_deref(),
        &token,
    ) {
        Ok(reports) => reports,
        Err(err) => return classify_store_error(err),
    };

    let mut staged = 0usize;
    let mut skipped = 0usize;
    let mut rejected = 0usize;
    let mut cancelled = 0usize;
    let mut lines = Vec::with_capacity(reports.len());
    let mut entries = Vec::with_capacity(reports.len());
    for report in &reports {
        let id = report.update_id.map(|id| id.to_string());
        let (label, note, ready) = match &report.disposition {
            StageDisposition::Staged { ready } => {
                staged += 1;
                let note = if *ready { "ready" } else { "awaiting assets" };
                ("staged", Some(note.to_string()), Some(*ready))
            }
            StageDisposition::Skipped { reason } => {
                skipped += 1;
                ("skipped", Some(reason.clone()), None)
            }
            StageDisposition::Rejected { reason } => {
                rejected += 1;
                ("rejected", Some(reason.clone()), None)
            }
            StageDisposition::Cancelled => {
                cancelled += 1;
                ("cancelled", None, None)
            }
        };
        let line = match (&id, &note) {
            (Some(id), Some(note)) => format!("{}: {label} {id} ({note})", report.source),
            (Some(id), None) => format!("{}: {label} {id}", report.source),
            (None, Some(note)) => format!("{}: {label} ({note})", report.source),
            (None, None) => format!("{}: {label}", report.source),
        };
        lines.push(line);
        entries.push(json!({
            "source": report.source,
            "update_id": id,
            "status": label,
            "note": note,
            "ready": ready,
        }));
    }

    let message = if reports.is_empty() {
        "no manifests to stage".to_string()
    } else {
        format!(
            "staged {staged} of {} manifests\n{}",
            reports.len(),
            lines.join("\n")
        )
    };
    let mut details = json!({
        "reports": entries,
        "staged": staged,
        "skipped": skipped,
        "rejected": rejected,
        "cancelled": cancelled,
    });
    if rejected > 0 {
        details["code"] = json!(crate::diagnostics::commands::STAGE);
        return Ok(ExecutionOutcome::user_error(message, details));
    }
    Ok(ExecutionOutcome::success(message, details))
}
