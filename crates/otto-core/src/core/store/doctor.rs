use anyhow::{Context, Result};
use serde_json::json;
use tracing::warn;

use otto_domain::UpdateStatus;

use super::{classify_store_error, StoreError};
use crate::{CommandContext, ExecutionOutcome};

#[derive(Clone, Debug, Default)]
pub struct DoctorRequest;

/// Checks index integrity and verifies every ready update's asset payloads,
/// demoting updates whose payloads are missing or corrupt back to
/// `downloading`.
///
/// # Errors
/// Returns an error if the store cannot be opened or the index cannot be
/// updated.
pub fn store_doctor(ctx: &CommandContext, _request: &DoctorRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };

    let conn = store.connection()?;
    let verdict: String = conn
        .query_row("PRAGMA quick_check", [], |row| row.get(0))
        .context("failed to check the update index integrity")?;
    drop(conn);
    if verdict != "ok" {
        let err = StoreError::IndexCorrupt(verdict);
        return Ok(ExecutionOutcome::failure(
            err.to_string(),
            json!({ "code": err.code() }),
        ));
    }

    let updates = match store.all_updates() {
        Ok(updates) => updates,
        Err(err) => return classify_store_error(err),
    };
    let mut checked_updates = 0usize;
    let mut checked_assets = 0usize;
    let mut missing = 0usize;
    let mut corrupt = 0usize;
    let mut broken: Vec<String> = Vec::new();
    for update in &updates {
        if update.status != UpdateStatus::Ready {
            continue;
        }
        checked_updates += 1;
        for asset in &update.assets {
            checked_assets += 1;
            if let Err(err) = store.verify_asset(&asset.hash) {
                let is_missing = err.chain().any(|cause| {
                    matches!(
                        cause.downcast_ref::<StoreError>(),
                        Some(StoreError::MissingAsset { .. })
                    )
                });
                let is_corrupt = err.chain().any(|cause| {
                    matches!(
                        cause.downcast_ref::<StoreError>(),
                        Some(StoreError::DigestMismatch { .. })
                    )
                });
                if is_missing {
                    missing += 1;
                } else if is_corrupt {
                    corrupt += 1;
                } else {
                    return Err(err);
                }
                warn!(hash = %asset.hash, update = %update.id, "asset failed verification");
                broken.push(asset.hash.clone());
            }
        }
    }
    broken.sort();
    broken.dedup();

    let demoted = match store.mark_missing_assets(&broken) {
        Ok(ids) => ids,
        Err(err) => return classify_store_error(err),
    };
    let message = if broken.is_empty() {
        format!("store healthy ({checked_updates} updates, {checked_assets} assets verified)")
    } else {
        format!(
            "found {} broken assets; demoted {} updates to downloading",
            broken.len(),
            demoted.len()
        )
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({
            "checked_updates": checked_updates,
            "checked_assets": checked_assets,
            "missing": missing,
            "corrupt": corrupt,
            "demoted": demoted.iter().map(ToString::to_string).collect::<Vec<_>>(),
        }),
    ))
}
