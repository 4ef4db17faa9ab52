use anyhow::Result;
use serde_json::json;

use super::{classify_store_error, SCHEMA_VERSION, STORE_FORMAT_VERSION};
use crate::{CommandContext, ExecutionOutcome};

#[derive(Clone, Debug, Default)]
pub struct InitRequest;

/// Creates the store layout and index at the resolved root, or verifies an
/// existing store there.
///
/// # Errors
/// Returns an error if the root cannot be created or inspected.
pub fn store_init(ctx: &CommandContext, _request: &InitRequest) -> Result<ExecutionOutcome> {
    let location = ctx.store_root().clone();
    if let Err(err) = ctx.store() {
        return classify_store_error(err);
    }
    Ok(ExecutionOutcome::success(
        format!("store ready at {}", location.path.display()),
        json!({
            "root": location.path.display().to_string(),
            "source": location.source,
            "format_version": STORE_FORMAT_VERSION,
            "schema_version": SCHEMA_VERSION,
        }),
    ))
}
