//! New-format manifest parsing (`id`/`createdAt`/`launchAsset` generation).

use serde_json::{Map, Value};

use super::{fields, ManifestError};
use crate::update::{Asset, Update, UpdateStatus};

pub(super) fn parse_update(map: &Map<String, Value>) -> Result<Update, ManifestError> {
    let id = fields::update_id(map, "id")?;
    let commit_time = fields::commit_time_millis(map, "createdAt")?;
    let runtime_version = fields::required_str(map, "runtimeVersion")?.to_string();

    let launch = fields::required_object(map, "launchAsset")?;
    let mut assets = vec![parse_asset(launch, "launchAsset", true)?];

    for entry in fields::optional_array(map, "assets")? {
        let Value::Object(object) = entry else {
            return Err(ManifestError::invalid("assets", "entries must be objects"));
        };
        assets.push(parse_asset(object, "assets", false)?);
    }

    let filter_metadata = fields::string_map(map, "metadata")?;

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

fn parse_asset(
    object: &Map<String, Value>,
    field: &'static str,
    is_launch_asset: bool,
) -> Result<Asset, ManifestError> {
    let hash = fields::asset_hash(fields::required_str(object, "hash")?, field)?;
    let url = match fields::optional_str(object, "url")? {
        Some(value) => Some(fields::parse_url(value, field)?),
        None if is_launch_asset => return Err(ManifestError::missing("launchAsset.url")),
        None => None,
    };
    let size = match object.get("size") {
        Some(Value::Number(number)) => number.as_u64(),
        Some(Value::Null) | None => None,
        Some(_) => return Err(ManifestError::invalid(field, "size must be a number")),
    };
    Ok(Asset {
        key: fields::optional_str(object, "key")?.map(ToString::to_string),
        hash,
        url,
        size,
        is_launch_asset,
        hash_derived: false,
    })
}
