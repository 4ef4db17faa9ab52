use std::fs;
use std::path::Path;

mod common;

use common::{
    asset_payload_path, manifest_value, new_store, otto, parse_json, payload_hash, stderr_text,
    write_manifest, write_payload,
};

const UPDATE_OLD: &str = "11111111-1111-4111-8111-111111111111";
const UPDATE_NEW: &str = "22222222-2222-4222-8222-222222222222";
const UPDATE_EMBEDDED: &str = "33333333-3333-4333-8333-333333333333";

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

#[test]
fn launches_the_newest_matching_update() {
    let (temp, store) = new_store("otto-launch-newest");
    import_ready(&store, temp.path(), UPDATE_OLD, 1_000, "old.js", b"old-bundle");
    import_ready(&store, temp.path(), UPDATE_NEW, 2_000, "new.js", b"new-bundle");

    let assert = otto(&store)
        .arg("--json")
        .arg("launch")
        .arg("--runtime")
        .arg("1.0.0")
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["update_id"], UPDATE_NEW);
    let bundle = payload["details"]["bundle_path"]
        .as_str()
        .expect("bundle path");
    assert!(
        Path::new(bundle).is_file(),
        "bundle path should exist on disk: {bundle}"
    );
    let assets = payload["details"]["assets"].as_array().expect("asset map");
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0]["key"], "new.js");
}

#[test]
fn relaunching_is_idempotent() {
    let (temp, store) = new_store("otto-launch-again");
    import_ready(&store, temp.path(), UPDATE_NEW, 2_000, "new.js", b"new-bundle");

    for _ in 0..2 {
        let assert = otto(&store)
            .arg("--json")
            .arg("launch")
            .arg("--runtime")
            .arg("1.0.0")
            .assert()
            .success();
        let payload = parse_json(&assert);
        assert_eq!(payload["details"]["update_id"], UPDATE_NEW);
    }
}

#[test]
fn missing_payloads_cascade_to_the_next_candidate() {
    let (temp, store) = new_store("otto-launch-cascade");
    import_ready(&store, temp.path(), UPDATE_OLD, 1_000, "old.js", b"old-bundle");
    import_ready(&store, temp.path(), UPDATE_NEW, 2_000, "new.js", b"new-bundle");
    fs::remove_file(asset_payload_path(&store, &payload_hash(b"new-bundle")))
        .expect("remove newest payload");

    let assert = otto(&store)
        .arg("--json")
        .arg("launch")
        .arg("--runtime")
        .arg("1.0.0")
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(
        payload["details"]["update_id"], UPDATE_OLD,
        "gutted newest update must not block the older complete one"
    );
}

#[test]
fn falls_back_to_the_embedded_update() {
    let (temp, store) = new_store("otto-launch-embedded");
    let manifest = temp.path().join("embedded.json");
    write_manifest(
        &manifest,
        &manifest_value(UPDATE_EMBEDDED, 100, "1.0.0", "bundle.js", b"factory"),
    );
    let assets = temp.path().join("payloads");
    write_payload(&assets, "bundle.js", b"factory");
    otto(&store)
        .arg("import")
        .arg(&manifest)
        .arg("--assets")
        .arg(&assets)
        .arg("--embedded")
        .assert()
        .success();

    let assert = otto(&store)
        .arg("--json")
        .arg("launch")
        .arg("--runtime")
        .arg("9.9.9")
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(
        payload["details"]["update_id"], UPDATE_EMBEDDED,
        "embedded update backstops an empty store"
    );
}

#[test]
fn pinned_launches_skip_the_policy() {
    let (temp, store) = new_store("otto-launch-pinned");
    import_ready(&store, temp.path(), UPDATE_OLD, 1_000, "old.js", b"old-bundle");
    import_ready(&store, temp.path(), UPDATE_NEW, 2_000, "new.js", b"new-bundle");

    let assert = otto(&store)
        .arg("--json")
        .arg("launch")
        .arg("--pinned")
        .arg(UPDATE_OLD)
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["update_id"], UPDATE_OLD);
}

#[test]
fn a_runtime_version_is_required_without_a_pin() {
    let (_temp, store) = new_store("otto-launch-no-runtime");

    let assert = otto(&store).arg("launch").assert().code(1);

    let stderr = stderr_text(&assert);
    assert!(
        stderr.contains("OT105"),
        "launch without runtime should use the launch code: {stderr}"
    );
    assert!(
        stderr.contains("a runtime version is required"),
        "unexpected error text: {stderr}"
    );
}

#[test]
fn an_empty_store_has_nothing_to_launch() {
    let (_temp, store) = new_store("otto-launch-empty");

    let assert = otto(&store)
        .arg("launch")
        .arg("--runtime")
        .arg("1.0.0")
        .assert()
        .code(1);

    let stderr = stderr_text(&assert);
    assert!(
        stderr.contains("OT502"),
        "empty store should surface the no-launchable code: {stderr}"
    );
}
