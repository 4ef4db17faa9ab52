use anyhow::Result;
use serde_json::{json, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use otto_domain::Update;

use super::classify_store_error;
use crate::{CommandContext, ExecutionOutcome};

#[derive(Clone, Debug, Default)]
pub struct ListRequest {
    /// Cap the listing at the newest N updates.
    pub limit: Option<usize>,
}

/// Lists stored updates, newest first.
///
/// # Errors
/// Returns an error if the update index cannot be read.
pub fn list_updates(ctx: &CommandContext, request: &ListRequest) -> Result<ExecutionOutcome> {
    let store = match ctx.store() {
        Ok(store) => store,
        Err(err) => return classify_store_error(err),
    };
    let mut updates = match store.all_updates() {
        Ok(updates) => updates,
        Err(err) => return classify_store_error(err),
    };
    let total = updates.len();
    if let Some(limit) = request.limit {
        updates.truncate(limit);
    }

    let details: Vec<Value> = updates.iter().map(update_to_json).collect();
    let message = if updates.is_empty() {
        "no updates in the store".to_string()
    } else if updates.len() < total {
        format!("showing the newest {} of {total} updates", updates.len())
    } else if total == 1 {
        "1 update in the store".to_string()
    } else {
        format!("{total} updates in the store")
    };
    Ok(ExecutionOutcome::success(
        message,
        json!({ "updates": details, "total": total }),
    ))
}

fn update_to_json(update: &Update) -> Value {
    json!({
        "id": update.id.to_string(),
        "commit_time": update.commit_time,
        "commit_time_rfc3339": format_commit_time(update.commit_time),
        "runtime_version": update.runtime_version,
        "status": update.status.as_str(),
        "successful_launch_count": update.successful_launch_count,
        "failed_launch_count": update.failed_launch_count,
        "assets": update.assets.len(),
    })
}

fn format_commit_time(millis: i64) -> String {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000)
        .ok()
        .and_then(|ts| ts.format(&Rfc3339).ok())
        .unwrap_or_else(|| millis.to_string())
}
