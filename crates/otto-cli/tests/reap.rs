//! End-to-end retention runs through the binary.

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;

use common::{
    asset_payload_path, manifest_value, new_store, otto, parse_json, payload_hash, write_manifest,
    write_payload,
};

const UPDATE_A: &str = "11111111-1111-4111-8111-111111111111";
const UPDATE_B: &str = "22222222-2222-4222-8222-222222222222";
const UPDATE_C: &str = "33333333-3333-4333-8333-333333333333";

fn import_ready(store: &Path, dir: &Path, id: &str, commit_time: i64, key: &str, payload: &[u8]) {
    let manifest = dir.join(format!("{id}.json"));
    write_manifest(
        &manifest,
        &manifest_value(id, commit_time, "1.0.0", key, payload),
    );
    let assets = dir.join(format!("payloads-{id}"));
    write_payload(&assets, key, payload);
    otto(store)
        .arg("import")
        .arg(&manifest)
        .arg("--assets")
        .arg(&assets)
        .assert()
        .success();
}

/// Three ready updates with the newest one launched, so the oldest is the
/// only row retention may claim.
fn seeded_store(prefix: &str) -> (TempDir, PathBuf) {
    let (temp, store) = new_store(prefix);
    import_ready(&store, temp.path(), UPDATE_A, 1_000, "a.js", b"payload-a");
    import_ready(&store, temp.path(), UPDATE_B, 2_000, "b.js", b"payload-b");
    import_ready(&store, temp.path(), UPDATE_C, 3_000, "c.js", b"payload-c");
    otto(&store)
        .arg("launch")
        .arg("--pinned")
        .arg(UPDATE_C)
        .assert()
        .success();
    (temp, store)
}

fn status_of(store: &Path, id: &str) -> Option<String> {
    let assert = otto(store).arg("--json").arg("list").assert().success();
    let payload = parse_json(&assert);
    payload["details"]["updates"]
        .as_array()
        .expect("updates array")
        .iter()
        .find(|row| row["id"] == id)
        .map(|row| row["status"].as_str().expect("status string").to_string())
}

#[test]
fn retention_deprecates_then_deletes() {
    let (_temp, store) = seeded_store("otto-reap-cycle");

    let first = otto(&store).arg("--json").arg("reap").assert().success();
    let payload = parse_json(&first);
    assert_eq!(
        payload["details"]["deprecated"], 1,
        "only the superseded row is marked: {payload}"
    );
    assert_eq!(
        payload["details"]["deleted_updates"], 0,
        "fresh deprecations ride out the grace window: {payload}"
    );
    assert_eq!(
        status_of(&store, UPDATE_A).as_deref(),
        Some("deprecated"),
        "the oldest row is deprecated, not gone"
    );
    assert_eq!(status_of(&store, UPDATE_B).as_deref(), Some("ready"));

    // Let the deprecation timestamp fall behind a zero-grace cutoff.
    thread::sleep(Duration::from_millis(1_100));
    let second = otto(&store)
        .arg("--json")
        .arg("reap")
        .env("OTTO_REAPER_GRACE_SECS", "0")
        .assert()
        .success();
    let payload = parse_json(&second);
    assert_eq!(payload["details"]["deleted_updates"], 1, "{payload}");
    assert_eq!(payload["details"]["deleted_assets"], 1, "{payload}");
    assert!(
        payload["details"]["reclaimed_bytes"].as_u64().unwrap_or(0) > 0,
        "deleting a payload reclaims bytes: {payload}"
    );

    assert!(
        !asset_payload_path(&store, &payload_hash(b"payload-a")).exists(),
        "the doomed payload leaves the disk"
    );
    assert!(
        asset_payload_path(&store, &payload_hash(b"payload-b")).is_file(),
        "the rollback payload survives"
    );
    assert_eq!(status_of(&store, UPDATE_A), None, "the row is gone");
    assert_eq!(status_of(&store, UPDATE_C).as_deref(), Some("launched"));
}

#[test]
fn dry_run_only_plans() {
    let (_temp, store) = seeded_store("otto-reap-dry-run");

    let assert = otto(&store)
        .arg("--json")
        .arg("reap")
        .arg("--dry-run")
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["dry_run"], true);
    assert_eq!(payload["details"]["deprecated"], 1, "{payload}");
    assert_eq!(payload["details"]["planned"], json!([UPDATE_A]), "{payload}");
    assert!(
        payload["message"]
            .as_str()
            .expect("message string")
            .contains("reap would deprecate 1 updates"),
        "dry runs report in the conditional: {payload}"
    );

    assert_eq!(
        status_of(&store, UPDATE_A).as_deref(),
        Some("ready"),
        "a dry run leaves the store untouched"
    );
    assert!(asset_payload_path(&store, &payload_hash(b"payload-a")).is_file());
}

#[test]
fn reaper_disable_env_short_circuits() {
    let (_temp, store) = seeded_store("otto-reap-disabled");

    let assert = otto(&store)
        .arg("--json")
        .arg("reap")
        .env("OTTO_REAPER_DISABLE", "1")
        .assert()
        .success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"], json!({ "disabled": true }));
    assert_eq!(
        payload["message"],
        "otto reap: reaper disabled via OTTO_REAPER_DISABLE"
    );

    assert_eq!(
        status_of(&store, UPDATE_A).as_deref(),
        Some("ready"),
        "a disabled reaper deprecates nothing"
    );
}

#[test]
fn a_held_lock_turns_reap_into_a_report() {
    use fs4::FileExt;

    let (_temp, store) = seeded_store("otto-reap-locked");
    let lock_dir = store.join("locks");
    fs::create_dir_all(&lock_dir).expect("create lock dir");
    let lock_file = fs::OpenOptions::new()
        .create(true)
        .read(true)
        .write(true)
        .open(lock_dir.join("reap.lock"))
        .expect("open reap lock");
    lock_file.try_lock_exclusive().expect("hold reap lock");

    let assert = otto(&store).arg("--json").arg("reap").assert().success();
    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["skipped"], true, "{payload}");
    assert_eq!(
        payload["message"],
        "otto reap: another process holds the reap lock; nothing to do"
    );
    assert_eq!(
        status_of(&store, UPDATE_A).as_deref(),
        Some("ready"),
        "nothing is deprecated while the lock is contested"
    );
    drop(lock_file);
}
