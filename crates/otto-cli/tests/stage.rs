use std::fs;

mod common;

use common::{
    asset_payload_path, manifest_value, manifest_with_channel, new_store, otto, parse_json,
    payload_hash, stdout_text, write_manifest, write_payload,
};

const UPDATE_A: &str = "11111111-1111-4111-8111-111111111111";
const UPDATE_B: &str = "22222222-2222-4222-8222-222222222222";

#[test]
fn stages_every_manifest_and_reports_by_source() {
    let (temp, store) = new_store("otto-stage-batch");
    let first = temp.path().join("a.json");
    let second = temp.path().join("b.json");
    write_manifest(
        &first,
        &manifest_value(UPDATE_A, 1_000, "1.0.0", "a.js", b"payload-a"),
    );
    write_manifest(
        &second,
        &manifest_value(UPDATE_B, 2_000, "1.0.0", "b.js", b"payload-b"),
    );
    let assets = temp.path().join("payloads");
    write_payload(&assets, "a.js", b"payload-a");
    write_payload(&assets, "b.js", b"payload-b");

    let assert = otto(&store)
        .arg("--json")
        .arg("stage")
        .arg(&first)
        .arg(&second)
        .arg("--assets")
        .arg(&assets)
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["staged"], 2);
    let reports = payload["details"]["reports"]
        .as_array()
        .expect("reports array");
    assert_eq!(reports.len(), 2);
    for report in reports {
        assert_eq!(report["status"], "staged");
        assert_eq!(report["ready"], true);
    }
    assert!(asset_payload_path(&store, &payload_hash(b"payload-a")).is_file());
    assert!(asset_payload_path(&store, &payload_hash(b"payload-b")).is_file());
}

#[test]
fn filter_contradictions_are_rejected_before_insert() {
    let (temp, store) = new_store("otto-stage-filter");
    let manifest = temp.path().join("beta.json");
    write_manifest(
        &manifest,
        &manifest_with_channel(UPDATE_A, 1_000, "1.0.0", "bundle.js", b"payload", "beta"),
    );
    let assets = temp.path().join("payloads");
    write_payload(&assets, "bundle.js", b"payload");

    let assert = otto(&store)
        .arg("--json")
        .arg("stage")
        .arg(&manifest)
        .arg("--assets")
        .arg(&assets)
        .arg("--filter")
        .arg("channel=stable")
        .assert()
        .code(1);

    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["staged"], 0);
    assert_eq!(payload["details"]["rejected"], 1);
    let note = payload["details"]["reports"][0]["note"]
        .as_str()
        .expect("note string");
    assert!(
        note.contains("does not satisfy the filters"),
        "unexpected rejection note: {note}"
    );
}

#[test]
fn runtime_gate_skips_foreign_bundles() {
    let (temp, store) = new_store("otto-stage-runtime");
    let manifest = temp.path().join("old.json");
    write_manifest(
        &manifest,
        &manifest_value(UPDATE_A, 1_000, "1.0.0", "bundle.js", b"payload"),
    );
    let assets = temp.path().join("payloads");
    write_payload(&assets, "bundle.js", b"payload");

    let assert = otto(&store)
        .arg("--json")
        .arg("stage")
        .arg(&manifest)
        .arg("--assets")
        .arg(&assets)
        .arg("--runtime")
        .arg("2.0.0")
        .assert()
        .success();

    let payload = parse_json(&assert);
    assert_eq!(payload["details"]["skipped"], 1);
    let note = payload["details"]["reports"][0]["note"]
        .as_str()
        .expect("note string");
    assert!(
        note.contains("runtime version not accepted"),
        "unexpected skip note: {note}"
    );
}

#[test]
fn malformed_manifests_reject_the_batch() {
    let (temp, store) = new_store("otto-stage-malformed");
    let manifest = temp.path().join("broken.json");
    fs::write(&manifest, b"not json at all").expect("write manifest");

    let assert = otto(&store)
        .arg("--json")
        .arg("stage")
        .arg(&manifest)
        .assert()
        .code(1);

    let payload = parse_json(&assert);
    assert_eq!(payload["status"], "user-error");
    assert_eq!(payload["details"]["rejected"], 1);
    assert_eq!(payload["details"]["code"], "OT103");
}

#[test]
fn human_output_lists_one_line_per_manifest() {
    let (temp, store) = new_store("otto-stage-human");
    let good = temp.path().join("good.json");
    let foreign = temp.path().join("foreign.json");
    write_manifest(
        &good,
        &manifest_value(UPDATE_A, 1_000, "1.0.0", "a.js", b"payload-a"),
    );
    write_manifest(
        &foreign,
        &manifest_value(UPDATE_B, 2_000, "0.9.0", "b.js", b"payload-b"),
    );
    let assets = temp.path().join("payloads");
    write_payload(&assets, "a.js", b"payload-a");
    write_payload(&assets, "b.js", b"payload-b");

    let assert = otto(&store)
        .arg("stage")
        .arg(&good)
        .arg(&foreign)
        .arg("--assets")
        .arg(&assets)
        .arg("--runtime")
        .arg("1.0.0")
        .assert()
        .success();

    let stdout = stdout_text(&assert);
    assert!(
        stdout.contains("staged 1 of 2 manifests"),
        "summary line missing: {stdout}"
    );
    assert!(
        stdout.contains("runtime version not accepted"),
        "skip reason missing: {stdout}"
    );
}
