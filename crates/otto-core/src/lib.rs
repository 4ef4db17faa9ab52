#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

mod core;

pub(crate) use crate::core::config;
pub(crate) use crate::core::config::context;
pub(crate) use crate::core::store;
pub(crate) use crate::core::tooling::diagnostics;

pub use crate::core::config::context::{CommandContext, CommandGroup, CommandHandler, CommandInfo};
pub use crate::core::config::{Config, GlobalOptions, RuntimeConfig, StoreConfig};
pub use crate::core::launcher::{
    launch_update, record_launch_failure, record_launch_success, DatabaseLauncher, LaunchError,
    LaunchRequest, LaunchResult,
};
pub use crate::core::reaper::{
    reap, reap_store, run_reaper_with_env_policy, ReapRequest, ReapSummary,
    DEFAULT_REAP_GRACE_SECS,
};
pub use crate::core::stage::{
    run_stage_batch, stage_update, stage_updates, CancellationToken, StageDisposition,
    StageOutcome, StageReport, StageRequest, StagedManifest,
};
pub use crate::core::store::{
    import_update, list_updates, store_doctor, store_error_outcome, store_init, DoctorRequest,
    ImportRequest, InitRequest, ListRequest, PendingAsset, StoreError, StoreLocation, UpdateStore,
};
pub use crate::core::tooling::diagnostics::commands as diag_commands;
pub use crate::core::tooling::outcome::{
    format_status_message, to_json_response, CommandStatus, ExecutionOutcome,
};
