use std::path::PathBuf;

use anyhow::Result;
use serde_json::json;
use tracing::warn;

use otto_domain::{parse_manifest, ManifestConfig, UpdateStatus};

use super::{classify_store_error, PendingAsset};
use crate::{CommandContext, ExecutionOutcome};

#[derive(Clone, Debug)]
pub struct ImportRequest {
    /// Raw manifest bytes, in either supported format.
    pub manifest: Vec<u8>,
    /// Directory holding asset payloads, keyed by file key.
    pub assets_dir: Option<PathBuf>,
    /// Register the update as the embedded fallback instead of a staged one.
    pub embedded: bool,
}

/// Imports a manifest and its local asset payloads into the store.
///
/// The update lands `ready` when every payload is present, or stays
/// `downloading` with the missing file keys reported. Embedded imports must
/// be complete.
///
/// # Errors
/// Returns an error if the store cannot be opened or written.
pub fn import_update(ctx: &CommandContext, request: &ImportRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };

    let mut update = match parse_manifest(&request.manifest, &ManifestConfig::default()) {
        Ok(update) => update,
        Err(err) => {
            return Ok(ExecutionOutcome::user_error(
                err.to_string(),
                json!({ "code": err.code() }),
            ))
        }
    };

    let mut pendings: Vec<PendingAsset> = Vec::new();
    let mut missing: Vec<String> = Vec::new();
    if let Some(dir) = &request.assets_dir {
        for asset in &mut update.assets {
            let path = dir.join(asset.file_key());
            if !path.is_file() {
                missing.push(asset.file_key().to_string());
                continue;
            }
            let expected = (!asset.hash_derived).then_some(asset.hash.as_str());
            let pending = match store.hash_asset_payload(&path, expected) {
                Ok(pending) => pending,
                Err(err) => {
                    for pending in pendings {
                        pending.discard();
                    }
                    return classify_store_error(err);
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
        for asset in &update.assets {
            missing.push(asset.file_key().to_string());
        }
    }

    if request.embedded && !missing.is_empty() {
        for pending in pendings {
            pending.discard();
        }
        return Ok(ExecutionOutcome::user_error(
            format!(
                "an embedded update needs every asset payload; missing: {}",
                missing.join(", ")
            ),
            json!({ "code": crate::diagnostics::commands::IMPORT, "missing": missing }),
        ));
    }

    update.status = if request.embedded {
        UpdateStatus::Embedded
    } else {
        UpdateStatus::Downloading
    };
    let inserted = if request.embedded {
        store.insert_embedded_update(&update)
    } else {
        store.insert_update(&update, false)
    };
    if let Err(err) = inserted {
        for pending in pendings {
            pending.discard();
        }
        return classify_store_error(err);
    }

    let mut pendings = pendings;
    while let Some(pending) = pendings.pop() {
        if let Err(err) = store.commit_asset(pending) {
            for rest in pendings {
                rest.discard();
            }
            return classify_store_error(err);
        }
    }

    let asset_count = update.assets.len();
    if missing.is_empty() {
        if !request.embedded {
            if let Err(err) = store.mark_update_ready(update.id) {
                return classify_store_error(err);
            }
        }
        let kind = if request.embedded { "embedded" } else { "ready" };
        return Ok(ExecutionOutcome::success(
            format!("imported {kind} update {} ({asset_count} assets)", update.id),
            json!({
                "update_id": update.id.to_string(),
                "assets": asset_count,
                "missing": missing,
                "embedded": request.embedded,
            }),
        ));
    }

    warn!(
        update = %update.id,
        missing = missing.len(),
        "imported update is missing asset payloads"
    );
    Ok(ExecutionOutcome::success(
        format!(
            "imported update {} with {} missing assets; left downloading",
            update.id,
            missing.len()
        ),
        json!({
            "update_id": update.id.to_string(),
            "assets": asset_count,
            "missing": missing,
            "embedded": request.embedded,
        }),
    ))
}
