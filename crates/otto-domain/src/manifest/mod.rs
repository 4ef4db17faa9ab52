//! Update manifest parsing.
//!
//! Two wire formats exist in the field: the legacy `releaseId`/`commitTime`
//! generation and the new `id`/`createdAt`/`launchAsset` generation. Both are
//! detected once, parsed, and normalized into the same [`Update`] shape so
//! nothing downstream branches on format. Parsing is pure; persisting the
//! result is the caller's business.

use std::fmt;

use serde_json::Value;
use url::Url;

use crate::policy::matches_filters;
use crate::update::{FilterMap, Update};

mod fields;
mod legacy;
mod new;

/// Errors a manifest can fail with before anything touches storage.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("[OT200] malformed manifest: {reason}")]
    Malformed { reason: String },
    #[error("[OT201] manifest does not satisfy the filters it was downloaded under")]
    FilterMismatch,
}

impl ManifestError {
    pub(crate) fn missing(field: &str) -> Self {
        Self::Malformed {
            reason: format!("required field '{field}' is missing"),
        }
    }

    pub(crate) fn invalid(field: &str, detail: impl fmt::Display) -> Self {
        Self::Malformed {
            reason: format!("field '{field}' {detail}"),
        }
    }

    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "OT200",
            Self::FilterMismatch => "OT201",
        }
    }
}

/// Caller-supplied parsing context. Legacy manifests may omit
/// `assetUrlOverride`, in which case bundled asset URLs derive from this base.
#[derive(Clone, Debug, Default)]
pub struct ManifestConfig {
    pub asset_base_url: Option<Url>,
}

/// The two manifest generations, detected before parsing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManifestFormat {
    Legacy,
    New,
}

impl ManifestFormat {
    pub fn detect(value: &Value) -> Result<Self, ManifestError> {
        let Some(map) = value.as_object() else {
            return Err(ManifestError::Malformed {
                reason: "manifest is not a JSON object".to_string(),
            });
        };
        if map.contains_key("launchAsset") {
            return Ok(Self::New);
        }
        if map.contains_key("releaseId") || map.contains_key("commitTime") {
            return Ok(Self::Legacy);
        }
        Err(ManifestError::Malformed {
            reason: "neither 'launchAsset' (new format) nor 'releaseId' (legacy) is present"
                .to_string(),
        })
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Legacy => "legacy",
            Self::New => "new",
        }
    }
}

impl fmt::Display for ManifestFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A server must hand back a manifest that satisfies the filters it was
/// asked under. Anything else is rejected before it can reach storage.
pub fn check_filter_consistency(
    update: &Update,
    filters: &FilterMap,
) -> Result<(), ManifestError> {
    if matches_filters(update, filters) {
        Ok(())
    } else {
        Err(ManifestError::FilterMismatch)
    }
}

/// Parse raw manifest JSON into the uniform [`Update`] shape.
pub fn parse_manifest(raw: &[u8], config: &ManifestConfig) -> Result<Update, ManifestError> {
    let value: Value = serde_json::from_slice(raw).map_err(|err| ManifestError::Malformed {
        reason: format!("invalid JSON: {err}"),
    })?;
    let format = ManifestFormat::detect(&value)?;
    let Some(map) = value.as_object() else {
        return Err(ManifestError::Malformed {
            reason: "manifest is not a JSON object".to_string(),
        });
    };
    match format {
        ManifestFormat::Legacy => legacy::parse_update(map, config),
        ManifestFormat::New => new::parse_update(map),
    }
}
