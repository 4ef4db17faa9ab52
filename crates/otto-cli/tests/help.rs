use assert_cmd::cargo::cargo_bin_cmd;

fn help_output(args: &[&str]) -> String {
    let assert = cargo_bin_cmd!("otto").args(args).assert().success();
    String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 help")
}

#[test]
fn top_level_help_lists_every_command() {
    let output = help_output(&["--help"]);
    for command in [
        "init",
        "import",
        "stage",
        "list",
        "launch",
        "reap",
        "doctor",
        "completions",
    ] {
        assert!(
            output.contains(command),
            "help should mention {command}: {output}"
        );
    }
    assert!(
        output.contains("otto stage release/*.json --assets payloads/"),
        "top-level example missing: {output}"
    );
}

#[test]
fn stage_help_shows_usage_and_examples() {
    let output = help_output(&["stage", "--help"]);
    assert!(
        output.contains("Gate manifests against the launched update and stage the survivors."),
        "stage about missing: {output}"
    );
    assert!(
        output
            .contains("otto stage <MANIFEST>... [--assets DIR] [--filter KEY=VALUE] [--runtime VERSION]"),
        "stage usage missing: {output}"
    );
    assert!(
        output.contains("otto stage nightly.json --filter channel=nightly --runtime 1.2.0"),
        "stage example missing: {output}"
    );
}

#[test]
fn launch_help_mentions_the_pinned_escape_hatch() {
    let output = help_output(&["launch", "--help"]);
    assert!(
        output.contains("--pinned"),
        "launch help missing --pinned: {output}"
    );
    assert!(
        output.contains("bypassing filters and the runtime gate"),
        "pinned help text missing: {output}"
    );
}

#[test]
fn import_help_mentions_stdin_and_embedded() {
    let output = help_output(&["import", "--help"]);
    assert!(
        output.contains("pass - to read stdin"),
        "import stdin note missing: {output}"
    );
    assert!(
        output.contains("Register the update as the embedded fallback"),
        "import embedded help missing: {output}"
    );
}

#[test]
fn reap_help_mentions_dry_run() {
    let output = help_output(&["reap", "--help"]);
    assert!(
        output.contains("Report what would be removed without deleting anything"),
        "reap dry-run help missing: {output}"
    );
    assert!(
        output.contains("otto reap --dry-run"),
        "reap example missing: {output}"
    );
}
