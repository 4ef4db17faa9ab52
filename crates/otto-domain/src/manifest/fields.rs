//! Typed extraction helpers over raw manifest JSON.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use url::Url;

use super::ManifestError;
use crate::update::UpdateId;

pub(super) fn required_str<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a str, ManifestError> {
    match map.get(field) {
        Some(Value::String(value)) => Ok(value),
        Some(_) => Err(ManifestError::invalid(field, "must be a string")),
        None => Err(ManifestError::missing(field)),
    }
}

pub(super) fn optional_str<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<Option<&'a str>, ManifestError> {
    match map.get(field) {
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(ManifestError::invalid(field, "must be a string")),
    }
}

pub(super) fn required_object<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a Map<String, Value>, ManifestError> {
    match map.get(field) {
        Some(Value::Object(value)) => Ok(value),
        Some(_) => Err(ManifestError::invalid(field, "must be an object")),
        None => Err(ManifestError::missing(field)),
    }
}

pub(super) fn optional_array<'a>(
    map: &'a Map<String, Value>,
    field: &'static str,
) -> Result<&'a [Value], ManifestError> {
    match map.get(field) {
        Some(Value::Array(values)) => Ok(values),
        Some(Value::Null) | None => Ok(&[]),
        Some(_) => Err(ManifestError::invalid(field, "must be an array")),
    }
}

pub(super) fn update_id(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<UpdateId, ManifestError> {
    required_str(map, field)?
        .parse::<UpdateId>()
        .map_err(|err| ManifestError::invalid(field, format!("is not a UUID: {err}")))
}

/// Commit times arrive as RFC 3339 strings; a plain integer is accepted as
/// unix milliseconds directly.
pub(super) fn commit_time_millis(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<i64, ManifestError> {
    match map.get(field) {
        Some(Value::String(text)) => {
            let parsed = OffsetDateTime::parse(text, &Rfc3339)
                .map_err(|err| ManifestError::invalid(field, format!("is not RFC 3339: {err}")))?;
            i64::try_from(parsed.unix_timestamp_nanos() / 1_000_000)
                .map_err(|_| ManifestError::invalid(field, "is out of range"))
        }
        Some(Value::Number(number)) => number
            .as_i64()
            .ok_or_else(|| ManifestError::invalid(field, "must be integer milliseconds")),
        Some(_) => Err(ManifestError::invalid(
            field,
            "must be an RFC 3339 string or integer milliseconds",
        )),
        None => Err(ManifestError::missing(field)),
    }
}

pub(super) fn parse_url(value: &str, field: &'static str) -> Result<Url, ManifestError> {
    Url::parse(value).map_err(|err| ManifestError::invalid(field, format!("is not a URL: {err}")))
}

pub(super) fn asset_hash(value: &str, field: &'static str) -> Result<String, ManifestError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(ManifestError::invalid(field, "is not a valid asset hash"));
    }
    Ok(value.to_ascii_lowercase())
}

/// Flat string map for filter matching. String values pass through, other
/// scalars are compared by their JSON rendering, structured values are not
/// filterable and get skipped.
pub(super) fn string_map(
    map: &Map<String, Value>,
    field: &'static str,
) -> Result<IndexMap<String, String>, ManifestError> {
    let mut out = IndexMap::new();
    let Some(value) = map.get(field) else {
        return Ok(out);
    };
    let object = match value {
        Value::Object(object) => object,
        Value::Null => return Ok(out),
        _ => return Err(ManifestError::invalid(field, "must be an object")),
    };
    for (key, entry) in object {
        match entry {
            Value::String(text) => {
                out.insert(key.clone(), text.clone());
            }
            Value::Bool(_) | Value::Number(_) => {
                out.insert(key.clone(), entry.to_string());
            }
            Value::Array(_) | Value::Object(_) => {
                tracing::debug!("metadata key `{key}` is not a scalar; ignored for filtering");
            }
            Value::Null => {}
        }
    }
    Ok(out)
}
