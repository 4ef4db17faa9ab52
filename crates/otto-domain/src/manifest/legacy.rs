//! Legacy manifest parsing (`releaseId`/`commitTime` generation).
//!
//! Legacy manifests predate content addressing: neither the bundle nor the
//! `bundledAssets` entries declare a SHA-256, so every asset leaves here with
//! a derived placeholder hash the importer replaces with the payload's real
//! digest.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use url::Url;

use super::{fields, ManifestConfig, ManifestError};
use crate::update::{Asset, Update, UpdateStatus};

pub(super) fn parse_update(
    map: &Map<String, Value>,
    config: &ManifestConfig,
) -> Result<Update, ManifestError> {
    let id = fields::update_id(map, "releaseId")?;
    let commit_time = fields::commit_time_millis(map, "commitTime")?;
    let runtime_version = fields::required_str(map, "runtimeVersion")?.to_string();
    let bundle_url = fields::parse_url(fields::required_str(map, "bundleUrl")?, "bundleUrl")?;
    let bundle_key = fields::optional_str(map, "bundleKey")?;

    let asset_base = match fields::optional_str(map, "assetUrlOverride")? {
        Some(value) => Some(fields::parse_url(value, "assetUrlOverride")?),
        None => config.asset_base_url.clone(),
    };

    let mut assets = vec![Asset {
        key: Some(bundle_key.unwrap_or("bundle").to_string()),
        hash: derived_hash(&format!("{id}:{bundle_url}")),
        url: Some(bundle_url),
        size: None,
        is_launch_asset: true,
        hash_derived: true,
    }];

    for entry in fields::optional_array(map, "bundledAssets")? {
        let Value::String(name) = entry else {
            return Err(ManifestError::invalid(
                "bundledAssets",
                "entries must be strings",
            ));
        };
        assets.push(bundled_asset(name, asset_base.as_ref())?);
    }

    let mut filter_metadata = IndexMap::new();
    if let Some(channel) = fields::optional_str(map, "releaseChannel")? {
        filter_metadata.insert("releaseChannel".to_string(), channel.to_string());
    }

    Ok(Update {
        id,
        commit_time,
        runtime_version,
        status: UpdateStatus::Downloading,
        filter_metadata,
        manifest: Value::Object(map.clone()),
        assets,
        successful_launch_count: 0,
        failed_launch_count: 0,
    })
}

/// `bundledAssets` entries are `<name>.<ext>` where the name doubles as the
/// asset's legacy identity. The download URL appends the name to the base.
fn bundled_asset(entry: &str, base: Option<&Url>) -> Result<Asset, ManifestError> {
    if entry.is_empty() {
        return Err(ManifestError::invalid(
            "bundledAssets",
            "entries must not be empty",
        ));
    }
    let name = entry.split('.').next().unwrap_or(entry);
    let url = match base {
        Some(base) => Some(join_asset_url(base, name)?),
        None => None,
    };
    Ok(Asset {
        key: Some(entry.to_string()),
        hash: derived_hash(name),
        url,
        size: None,
        is_launch_asset: false,
        hash_derived: true,
    })
}

fn join_asset_url(base: &Url, name: &str) -> Result<Url, ManifestError> {
    let mut joined = base.clone();
    joined
        .path_segments_mut()
        .map_err(|()| ManifestError::invalid("assetUrlOverride", "must be a base URL"))?
        .pop_if_empty()
        .push(name);
    Ok(joined)
}

fn derived_hash(seed: &str) -> String {
    hex::encode(Sha256::digest(seed.as_bytes()))
}
