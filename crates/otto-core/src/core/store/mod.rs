use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Context, Result};
use fs4::FileExt;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::ExecutionOutcome;
use otto_domain::{Asset, FilterMap, Update, UpdateId, UpdateStatus};

mod assets;
mod connection;
mod doctor;
mod import;
mod init;
mod json_data;
mod list;
mod location;
mod meta;
mod schema;
mod updates;

pub use assets::PendingAsset;
pub use doctor::{store_doctor, DoctorRequest};
pub use import::{import_update, ImportRequest};
pub use init::{store_init, InitRequest};
pub use list::{list_updates, ListRequest};
pub use location::StoreLocation;
pub(crate) use location::resolve_store_root;


const DB_FILENAME: &str = "otto.db";
const ASSETS_DIR: &str = "assets";
const LOCKS_DIR: &str = "locks";
const TMP_DIR: &str = "tmp";
const STORE_FORMAT_VERSION: u32 = 1;
const SCHEMA_VERSION: u32 = 1;
const META_KEY_STORE_FORMAT_VERSION: &str = "store_format_version";
const META_KEY_SCHEMA_VERSION: &str = "schema_version";
const META_KEY_CREATED_BY: &str = "created_by_otto_version";
const META_KEY_LAST_USED: &str = "last_used_otto_version";
const OTTO_VERSION: &str = env!("CARGO_PKG_VERSION");

pub(crate) const JSON_DATA_EMBEDDED_UPDATE: &str = "embedded_update_id";
pub(crate) const JSON_DATA_MANIFEST_FILTERS: &str = "manifest_filters";

/// Errors surfaced by the update store.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("[OT800] update {id} is already in the store")]
    DuplicateUpdate { id: UpdateId },
    #[error("[OT801] update {id} is not in the store")]
    UnknownUpdate { id: UpdateId },
    #[error("[OT802] update {id} cannot transition from {from} to {to}")]
    InvalidTransition {
        id: UpdateId,
        from: UpdateStatus,
        to: UpdateStatus,
    },
    #[error("[OT803] asset {hash} is missing from the store")]
    MissingAsset { hash: String },
    #[error("[OT803] asset {hash} digest mismatch (found {actual})")]
    DigestMismatch { hash: String, actual: String },
    #[error("[OT810] store write failed: {0}")]
    StoreWriteFailure(String),
    #[error("[OT811] update index is corrupt: {0}")]
    IndexCorrupt(String),
    #[error("[OT812] store metadata is missing required key '{0}'")]
    MissingMeta(String),
    #[error("[OT812] store format/schema incompatible for {key}: expected {expected}, found {found}")]
    IncompatibleFormat {
        key: String,
        expected: String,
        found: String,
    },
}

impl StoreError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::DuplicateUpdate { .. } => {
                crate::core::tooling::diagnostics::store::DUPLICATE_UPDATE
            }
            Self::UnknownUpdate { .. } => crate::core::tooling::diagnostics::store::UNKNOWN_UPDATE,
            Self::InvalidTransition { .. } => {
                crate::core::tooling::diagnostics::store::INVALID_TRANSITION
            }
            Self::MissingAsset { .. } | Self::DigestMismatch { .. } => {
                crate::core::tooling::diagnostics::store::MISSING_OR_CORRUPT
            }
            Self::StoreWriteFailure(_) => {
                crate::core::tooling::diagnostics::store::STORE_WRITE_FAILURE
            }
            Self::IndexCorrupt(_) => crate::core::tooling::diagnostics::store::INDEX_CORRUPT,
            Self::MissingMeta(_) | Self::IncompatibleFormat { .. } => {
                crate::core::tooling::diagnostics::store::FORMAT_INCOMPATIBLE
            }
        }
    }
}

/// Classify a store error from an error chain into a CLI outcome. Corruption
/// and write failures are internal errors; the rest are actionable by the
/// caller.
pub fn store_error_outcome(err: &anyhow::Error) -> Option<ExecutionOutcome> {
    let store_err = err
        .chain()
        .find_map(|cause| cause.downcast_ref::<StoreError>())?;
    let details = json!({ "code": store_err.code() });
    let outcome = match store_err {
        StoreError::IndexCorrupt(_) | StoreError::StoreWriteFailure(_) => {
            ExecutionOutcome::failure(store_err.to_string(), details)
        }
        _ => ExecutionOutcome::user_error(store_err.to_string(), details),
    };
    Some(outcome)
}

/// Shorthand for command handlers: turn a classified store error into its
/// outcome, or propagate anything unrecognized.
pub(crate) fn classify_store_error(err: anyhow::Error) -> Result<ExecutionOutcome> {
    match store_error_outcome(&err) {
        Some(outcome) => Ok(outcome),
        None => Err(err),
    }
}

/// On-disk update store: a SQLite index next to a content-addressed asset
/// tree. Clones share the same root and may be used from multiple threads.
#[derive(Clone, Debug)]
pub struct UpdateStore {
    root: PathBuf,
}

impl UpdateStore {
    /// Open a store at the provided root, creating the directory layout and
    /// index schema on first use.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout cannot be created or the index reports
    /// an incompatible format version.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        store.ensure_layout()?;
        Ok(store)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn db_path(&self) -> PathBuf {
        self.root.join(DB_FILENAME)
    }

    pub(crate) fn assets_root(&self) -> PathBuf {
        self.root.join(ASSETS_DIR)
    }

    pub(crate) fn tmp_root(&self) -> PathBuf {
        self.root.join(TMP_DIR)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [ASSETS_DIR, LOCKS_DIR, TMP_DIR] {
            fs::create_dir_all(self.root.join(dir)).with_context(|| {
                format!(
                    "failed to ensure store directory {}",
                    self.root.join(dir).display()
                )
            })?;
        }
        let mut conn = self.connection_raw()?;
        self.init_schema(&conn)?;
        self.ensure_meta(&mut conn)?;
        Ok(())
    }

    /// Sharded relative path of an asset under the store root.
    pub(crate) fn asset_relative_path(hash: &str) -> PathBuf {
        let prefix = hash.get(..2).unwrap_or(hash);
        Path::new(ASSETS_DIR).join(prefix).join(hash)
    }

    pub(crate) fn asset_path(&self, hash: &str) -> PathBuf {
        self.root.join(Self::asset_relative_path(hash))
    }

    /// Take a named advisory lock without blocking. `None` means another
    /// process holds it.
    pub(crate) fn try_lock(&self, name: &str) -> Result<Option<File>> {
        let path = self.lock_path(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(file)),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn lock_path(&self, name: &str) -> PathBuf {
        let filename = if !name.is_empty()
            && name.bytes().all(|b| {
                matches!(
                    b,
                    b'0'..=b'9' | b'a'..=b'z' | b'A'..=b'Z' | b'.' | b'_' | b'-'
                )
            }) {
            name.to_string()
        } else {
            hex::encode(Sha256::digest(name.as_bytes()))
        };
        self.root.join(LOCKS_DIR).join(format!("{filename}.lock"))
    }
}

pub(crate) fn fsync_dir(dir: &Path) -> Result<()> {
    let file = File::open(dir)?;
    file.sync_all()?;
    Ok(())
}

pub(crate) fn timestamp_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

pub(crate) fn file_modified_secs(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()?
        .modified()
        .ok()?
        .duration_since(UNIX_EPOCH)
        .ok()
        .map(|d| d.as_secs())
}
