mod common;

use std::fs;
use std::path::Path;

use common::{
    asset_payload_path, manifest_value, new_store, otto, parse_json, payload_hash, write_manifest,
    write_payload,
};

const UPDATE_ONE: &str = "11111111-1111-4111-8111-111111111111";
const UPDATE_TWO: &str = "22222222-2222-4222-8222-222222222222";

fn import_ready(store: &Path, dir: &Path, id: &str, key: &str, payload: &[u8]) {
    let manifest = dir.join(format!("{id}.json"));
    write_manifest(&manifest, &manifest_value(id, 1_000, "1.0.0", key, payload));
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
fn a_healthy_store_reports_its_counts() {
    let (temp, store) = new_store("otto-doctor-healthy");
    import_ready(&store, temp.path(), UPDATE_ONE, "bundle.js", b"payload-one");

    let assert = otto(&store).arg("--json").arg("doctor").assert().success();
    let payload = parse_json(&assert);
    assert_eq!(
        payload["message"],
        "otto doctor: store healthy (1 updates, 1 assets verified)"
    );
    assert_eq!(payload["details"]["checked_updates"], 1);
    assert_eq!(payload["details"]["checked_assets"], 1);
    assert_eq!(payload["details"]["missing"], 0);
    assert_eq!(payload["details"]["corrupt"], 0);
}

#[test]
fn broken_payloads_demote_their_updates() {
    let (temp, store) = new_store("otto-doctor-broken");
    import_ready(&store, temp.path(), UPDATE_ONE, "one.js", b"payload-one");
    import_ready(&store, temp.path(), UPDATE_TWO, "two.js", b"payload-two");

    // One payload vanishes, the other is silently rewritten on disk.
    fs::remove_file(asset_payload_path(&store, &payload_hash(b"payload-one")))
        .expect("remove payload");
    fs::write(
        asset_payload_path(&store, &payload_hash(b"payload-two")),
        b"bitrot",
    )
    .expect("corrupt payload");

    let assert = otto(&store).arg("--json").arg("doctor").assert().success();
    let payload = parse_json(&assert);
    assert_eq!(
        payload["message"], "otto doctor: found 2 broken assets; demoted 2 updates to downloading",
        "{payload}"
    );
    assert_eq!(payload["details"]["missing"], 1, "{payload}");
    assert_eq!(payload["details"]["corrupt"], 1, "{payload}");
    let demoted = payload["details"]["demoted"].as_array().expect("demoted array");
    assert_eq!(demoted.len(), 2);
    assert!(demoted.iter().any(|id| id == UPDATE_ONE));
    assert!(demoted.iter().any(|id| id == UPDATE_TWO));

    let list = otto(&store).arg("--json").arg("list").assert().success();
    let listing = parse_json(&list);
    for row in listing["details"]["updates"].as_array().expect("updates array") {
        assert_eq!(
            row["status"], "downloading",
            "demoted rows wait for a re-import: {listing}"
        );
    }
}

#[test]
fn a_second_pass_skips_demoted_rows() {
    let (temp, store) = new_store("otto-doctor-second-pass");
    import_ready(&store, temp.path(), UPDATE_ONE, "bundle.js", b"payload-one");
    fs::remove_file(asset_payload_path(&store, &payload_hash(b"payload-one")))
        .expect("remove payload");
    otto(&store).arg("doctor").assert().success();

    // Only ready rows are verified, so the demoted one drops out of the set.
    let assert = otto(&store).arg("--json").arg("doctor").assert().success();
    let payload = parse_json(&assert);
    assert_eq!(
        payload["message"],
        "otto doctor: store healthy (0 updates, 0 assets verified)"
    );
    assert_eq!(payload["details"]["demoted"], serde_json::json!([]));
}
