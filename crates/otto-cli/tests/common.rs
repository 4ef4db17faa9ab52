#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};

use assert_cmd::assert::Assert;
use assert_cmd::cargo::cargo_bin_cmd;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

/// Command pointed at the given store root, scrubbed of ambient otto env.
pub fn otto(store: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("otto");
    for key in [
        "OTTO_STORE_DIR",
        "OTTO_RUNTIME_VERSION",
        "OTTO_REAPER_DISABLE",
        "OTTO_REAPER_GRACE_SECS",
        "OTTO_STAGE_WORKERS",
        "OTTO_LOG",
        "NO_COLOR",
    ] {
        cmd.env_remove(key);
    }
    cmd.arg("--store").arg(store);
    cmd
}

pub fn new_store(prefix: &str) -> (TempDir, PathBuf) {
    let temp = tempfile::Builder::new()
        .prefix(prefix)
        .tempdir()
        .expect("tempdir");
    let store = temp.path().join("store");
    (temp, store)
}

pub fn manifest_value(id: &str, created_at: i64, runtime: &str, key: &str, payload: &[u8]) -> Value {
    json!({
        "id": id,
        "createdAt": created_at,
        "runtimeVersion": runtime,
        "launchAsset": {
            "url": format!("https://cdn.example.test/{key}"),
            "key": key,
            "hash": payload_hash(payload),
        },
        "assets": [],
    })
}

pub fn manifest_with_channel(
    id: &str,
    created_at: i64,
    runtime: &str,
    key: &str,
    payload: &[u8],
    channel: &str,
) -> Value {
    let mut manifest = manifest_value(id, created_at, runtime, key, payload);
    manifest["metadata"] = json!({ "channel": channel });
    manifest
}

pub fn write_manifest(path: &Path, manifest: &Value) {
    let bytes = serde_json::to_vec(manifest).expect("manifest encodes");
    fs::write(path, bytes).expect("write manifest");
}

pub fn write_payload(dir: &Path, key: &str, payload: &[u8]) {
    fs::create_dir_all(dir).expect("create assets dir");
    fs::write(dir.join(key), payload).expect("write payload");
}

pub fn payload_hash(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Sharded location of a committed payload under the store root.
pub fn asset_payload_path(store: &Path, hash: &str) -> PathBuf {
    store.join("assets").join(&hash[..2]).join(hash)
}

pub fn parse_json(assert: &Assert) -> Value {
    serde_json::from_slice(&assert.get_output().stdout).expect("valid json")
}

pub fn stdout_text(assert: &Assert) -> String {
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout")
}

pub fn stderr_text(assert: &Assert) -> String {
    String::from_utf8(assert.get_output().stderr.clone()).expect("utf8 stderr")
}
