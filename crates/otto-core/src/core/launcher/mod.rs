//! Update selection against the live store.
//!
//! [`DatabaseLauncher`] pairs a [`SelectionPolicy`] with the on-disk store:
//! it asks the policy for the best candidate, skips candidates whose payloads
//! are not actually on disk, and falls back to the registered embedded update
//! when nothing else survives.

use std::path::PathBuf;

use anyhow::Result;
use indexmap::IndexMap;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use otto_domain::{
    FilterAwarePolicy, FilterMap, SelectionPolicy, SingleUpdatePolicy, Update, UpdateId,
    UpdateStatus,
};

use crate::store::{classify_store_error, UpdateStore, JSON_DATA_EMBEDDED_UPDATE};
use crate::{CommandContext, ExecutionOutcome};

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("[OT501] update store is unavailable: {0}")]
    DatabaseUnavailable(String),
    #[error("[OT502] no launchable update: {reason}")]
    NoLaunchableUpdate { reason: String },
}

impl LaunchError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DatabaseUnavailable(_) => crate::diagnostics::launcher::DATABASE_UNAVAILABLE,
            Self::NoLaunchableUpdate { .. } => crate::diagnostics::launcher::NO_LAUNCHABLE_UPDATE,
        }
    }
}

/// Everything a host process needs to hand off control to an update.
#[derive(Clone, Debug)]
pub struct LaunchResult {
    pub launched_update_id: UpdateId,
    /// Local path of the launch asset.
    pub bundle_path: PathBuf,
    /// File key to local path, launch asset included.
    pub asset_map: IndexMap<String, PathBuf>,
}

pub struct DatabaseLauncher<'a> {
    store: &'a UpdateStore,
    policy: &'a dyn SelectionPolicy,
}

impl<'a> DatabaseLauncher<'a> {
    #[must_use]
    pub fn new(store: &'a UpdateStore, policy: &'a dyn SelectionPolicy) -> Self {
        Self { store, policy }
    }

    /// Pick the update to run under the given filters and mark it launched.
    ///
    /// Candidates whose payloads are missing on disk are skipped one at a
    /// time so a half-downloaded newest update cannot block an older complete
    /// one. When no candidate survives, the embedded update is launched
    /// regardless of the policy's verdict.
    ///
    /// # Errors
    /// [`LaunchError::DatabaseUnavailable`] when the index cannot be read or
    /// written, [`LaunchError::NoLaunchableUpdate`] when the store holds
    /// nothing runnable.
    pub fn launch(&self, filters: &FilterMap) -> Result<LaunchResult, LaunchError> {
        let mut viable = match self.store.launch_candidates() {
            Ok(candidates) => candidates,
            Err(err) => {
                warn!(error = %format!("{err:#}"), "retrying launch candidate query");
                self.store.launch_candidates().map_err(db_unavailable)?
            }
        };

        let selected = loop {
            let Some(chosen) = self.policy.launchable_update(&viable, filters) else {
                break None;
            };
            if chosen.launch_asset().is_some()
                && chosen
                    .assets
                    .iter()
                    .all(|asset| self.store.asset_exists_locally(asset))
            {
                break Some(chosen.clone());
            }
            warn!(
                update = %chosen.id,
                "selected update has missing assets on disk; trying the next candidate"
            );
            let skip = chosen.id;
            viable.retain(|update| update.id != skip);
        };

        let update = match selected {
            Some(update) => update,
            None => self.embedded_fallback()?,
        };

        if update.status == UpdateStatus::Embedded {
            self.store.mark_update_ready(update.id).map_err(db_unavailable)?;
        }
        self.store
            .mark_update_launched(update.id)
            .map_err(db_unavailable)?;

        let launch_asset = update
            .launch_asset()
            .ok_or_else(|| LaunchError::NoLaunchableUpdate {
                reason: format!("update {} has no launch asset", update.id),
            })?;
        let bundle_path = self.store.asset_path(&launch_asset.hash);
        let mut asset_map = IndexMap::new();
        for asset in &update.assets {
            asset_map.insert(
                asset.file_key().to_string(),
                self.store.asset_path(&asset.hash),
            );
        }
        debug!(update = %update.id, assets = update.assets.len(), "selected update for launch");
        Ok(LaunchResult {
            launched_update_id: update.id,
            bundle_path,
            asset_map,
        })
    }

    /// The registered embedded update, provided its payloads are intact. This
    /// path ignores filters and runtime constraints: a build always ships a
    /// runnable fallback.
    fn embedded_fallback(&self) -> Result<Update, LaunchError> {
        let pointer = self
            .store
            .json_data(JSON_DATA_EMBEDDED_UPDATE)
            .map_err(db_unavailable)?;
        let Some(Value::String(raw)) = pointer else {
            return Err(LaunchError::NoLaunchableUpdate {
                reason: "no update matches and no embedded update is registered".to_string(),
            });
        };
        let id = raw.parse::<UpdateId>().map_err(|_| {
            LaunchError::DatabaseUnavailable(format!("invalid embedded update pointer '{raw}'"))
        })?;
        let update = self
            .store
            .update_by_id(id)
            .map_err(db_unavailable)?
            .ok_or_else(|| LaunchError::NoLaunchableUpdate {
                reason: format!("embedded update {id} is missing from the store"),
            })?;
        if update.launch_asset().is_none()
            || !update
                .assets
                .iter()
                .all(|asset| self.store.asset_exists_locally(asset))
        {
            return Err(LaunchError::NoLaunchableUpdate {
                reason: "embedded update assets are missing".to_string(),
            });
        }
        Ok(update)
    }
}

fn db_unavailable(err: anyhow::Error) -> LaunchError {
    LaunchError::DatabaseUnavailable(format!("{err:#}"))
}

/// Record that the launched update ran successfully. Returns the id it was
/// recorded against, or `None` when nothing holds launched status.
///
/// # Errors
/// Returns an error if the index cannot be updated.
pub fn record_launch_success(store: &UpdateStore) -> Result<Option<UpdateId>> {
    let Some(update) = store.launched_update()? else {
        return Ok(None);
    };
    store.record_successful_launch(update.id)?;
    Ok(Some(update.id))
}

/// Record that the launched update crashed before handing back control.
///
/// # Errors
/// Returns an error if the index cannot be updated.
pub fn record_launch_failure(store: &UpdateStore) -> Result<Option<UpdateId>> {
    let Some(update) = store.launched_update()? else {
        return Ok(None);
    };
    store.record_failed_launch(update.id)?;
    Ok(Some(update.id))
}

#[derive(Clone, Debug, Default)]
pub struct LaunchRequest {
    pub filters: FilterMap,
    /// Runtime version to select under; falls back to `OTTO_RUNTIME_VERSION`.
    pub runtime: Option<String>,
    /// Pin selection to one update id, bypassing filters and runtime checks.
    pub pinned: Option<UpdateId>,
}

/// Selects the update to run and reports its bundle path and asset map.
///
/// # Errors
/// Returns an error if the store cannot be opened.
pub fn launch_update(ctx: &CommandContext, request: &LaunchRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };
    let policy: Box<dyn SelectionPolicy> = if let Some(pinned) = request.pinned {
        Box::new(SingleUpdatePolicy::new(pinned))
    } else {
        let runtime = request
            .runtime
            .clone()
            .or_else(|| ctx.config().runtime().version.clone());
        let Some(runtime) = runtime else {
            return Ok(ExecutionOutcome::user_error(
                "a runtime version is required; pass --runtime or set OTTO_RUNTIME_VERSION",
                json!({ "code": crate::diagnostics::commands::LAUNCH }),
            ));
        };
        Box::new(FilterAwarePolicy::new(runtime))
    };

    let launcher = DatabaseLauncher::new(&store, policy.as_ref());
    match launcher.launch(&request.filters) {
        Ok(result) => {
            let assets: Vec<Value> = result
                .asset_map
                .iter()
                .map(|(key, path)| json!({ "key": key, "path": path.display().to_string() }))
                .collect();
            Ok(ExecutionOutcome::success(
                format!(
                    "launching update {} from {}",
                    result.launched_update_id,
                    result.bundle_path.display()
                ),
                json!({
                    "update_id": result.launched_update_id.to_string(),
                    "bundle_path": result.bundle_path.display().to_string(),
                    "assets": assets,
                }),
            ))
        }
        Err(err @ LaunchError::NoLaunchableUpdate { .. }) => Ok(ExecutionOutcome::user_error(
            err.to_string(),
            json!({ "code": err.code() }),
        )),
        Err(err @ LaunchError::DatabaseUnavailable(_)) => Ok(ExecutionOutcome::failure(
            err.to_string(),
            json!({ "code": err.code() }),
        )),
    }
}
