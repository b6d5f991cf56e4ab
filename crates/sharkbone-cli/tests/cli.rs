use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::PredicateBooleanExt;
use predicates::str::contains;
use serde_json::Value;
use sharkbone_core::fixtures;
use tempfile::TempDir;

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("sharkbone"))
}

fn mixed_capture(dir: &Path) -> PathBuf {
    let path = dir.join("mixed_udp.pcapng");
    let frames = fixtures::mixed_capture().expect("capture");
    fixtures::write_pcapng(&path, &frames).expect("write fixture");
    path
}

fn lmsg_capture(dir: &Path) -> PathBuf {
    let path = dir.join("lmsg_stream.pcapng");
    let frames = fixtures::lmsg_capture().expect("capture");
    fixtures::write_pcapng(&path, &frames).expect("write fixture");
    path
}

fn stdout_json(assert: &assert_cmd::assert::Assert) -> Value {
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 stdout");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn help_supports_analyse_and_analyze() {
    cmd()
        .arg("pcap")
        .arg("analyse")
        .arg("--help")
        .assert()
        .success();
    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg("--help")
        .assert()
        .success();
}

#[test]
fn missing_input_shows_error_and_hint() {
    let temp = TempDir::new().expect("tempdir");
    let missing = temp.path().join("missing.pcapng");
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(missing)
        .arg("-o")
        .arg(report)
        .assert()
        .code(2)
        .stderr(contains("error:").and(contains("hint:")));
}

#[test]
fn stdout_outputs_json_report() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    let assert = cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("--stdout")
        .assert()
        .success();
    let report = stdout_json(&assert);
    assert_eq!(report["tool"]["name"], "sharkbone");
    assert_eq!(report["capture_summary"]["packets_total"], 7);
    assert_eq!(report["frames"].as_array().expect("frames").len(), 7);
    assert_eq!(report["frames"][1]["protocols"], "frame:eth:ip:udp:sacn");
    assert!(report["frames"][0].get("tree").is_none());
}

#[test]
fn trees_flag_embeds_field_trees() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    let assert = cmd()
        .arg("pcap")
        .arg("analyse")
        .arg(input)
        .arg("--stdout")
        .arg("--trees")
        .assert()
        .success();
    let report = stdout_json(&assert);
    assert!(report["frames"][0]["tree"].is_array());
}

#[test]
fn stdout_and_report_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("--stdout")
        .arg("-o")
        .arg(report)
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn pretty_and_compact_conflict() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--pretty")
        .arg("--compact")
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn report_file_is_written_with_ok_message() {
    let temp = TempDir::new().expect("tempdir");
    let input = lmsg_capture(temp.path());
    let report = temp.path().join("out").join("report.json");

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("-o")
        .arg(&report)
        .assert()
        .success()
        .stderr(contains("OK: report written"));

    let text = std::fs::read_to_string(&report).expect("report");
    let value: Value = serde_json::from_str(&text).expect("json");
    assert_eq!(value["frames"][2]["protocols"], "frame:eth:ip:tcp:lmsg");
}

#[test]
fn quiet_suppresses_ok_message() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());
    let report = temp.path().join("report.json");

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("-o")
        .arg(report)
        .arg("--quiet")
        .assert()
        .success()
        .stderr(contains("OK:").not());
}

#[test]
fn report_may_not_overwrite_input() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(&input)
        .arg("-o")
        .arg(&input)
        .assert()
        .code(2)
        .stderr(contains("must differ from input"));
}

#[test]
fn decode_as_and_disable_change_the_paths() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    let assert = cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(&input)
        .arg("--stdout")
        .arg("--decode-as")
        .arg("udp.port==6454,data")
        .arg("--disable-heuristic")
        .arg("sacn_udp")
        .assert()
        .success();
    let report = stdout_json(&assert);
    assert_eq!(report["frames"][0]["protocols"], "frame:eth:ip:udp:data");
    assert_eq!(report["frames"][2]["protocols"], "frame:eth:ip:udp:data");
}

#[test]
fn malformed_decode_as_is_rejected_by_the_parser() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("--stdout")
        .arg("--decode-as")
        .arg("udp.port:6454")
        .assert()
        .failure()
        .stderr(contains("error:"));
}

#[test]
fn unknown_protocol_name_shows_hint() {
    let temp = TempDir::new().expect("tempdir");
    let input = mixed_capture(temp.path());

    cmd()
        .arg("pcap")
        .arg("analyze")
        .arg(input)
        .arg("--stdout")
        .arg("--disable")
        .arg("nosuchproto")
        .assert()
        .code(2)
        .stderr(contains("error:").and(contains("sharkbone dissectors")));
}

#[test]
fn batch_writes_one_report_per_capture() {
    let temp = TempDir::new().expect("tempdir");
    mixed_capture(temp.path());
    lmsg_capture(temp.path());
    let out_dir = temp.path().join("reports");
    let pattern = temp.path().join("*.pcapng");

    cmd()
        .arg("pcap")
        .arg("batch")
        .arg(pattern.to_string_lossy().as_ref())
        .arg("--out-dir")
        .arg(&out_dir)
        .arg("--quiet")
        .assert()
        .success();

    let mixed: Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.join("mixed_udp.json")).expect("mixed report"),
    )
    .expect("json");
    let lmsg: Value = serde_json::from_str(
        &std::fs::read_to_string(out_dir.join("lmsg_stream.json")).expect("lmsg report"),
    )
    .expect("json");
    assert_eq!(mixed["capture_summary"]["packets_total"], 7);
    assert_eq!(lmsg["capture_summary"]["packets_total"], 4);
}

#[test]
fn batch_reports_failed_captures_and_keeps_the_rest() {
    let temp = TempDir::new().expect("tempdir");
    let good = mixed_capture(temp.path());
    let bad = temp.path().join("broken.pcap");
    std::fs::write(&bad, [0u8; 3]).expect("write broken");
    let out_dir = temp.path().join("reports");

    cmd()
        .arg("pcap")
        .arg("batch")
        .arg(good.to_string_lossy().as_ref())
        .arg(bad.to_string_lossy().as_ref())
        .arg("--out-dir")
        .arg(&out_dir)
        .assert()
        .code(2)
        .stderr(contains("broken.pcap").and(contains("1 of 2 captures failed")));

    assert!(out_dir.join("mixed_udp.json").is_file());
    assert!(!out_dir.join("broken.json").exists());
}

#[test]
fn dissectors_lists_tables_and_heuristics() {
    cmd()
        .arg("dissectors")
        .assert()
        .success()
        .stdout(
            contains("Protocols:")
                .and(contains("udp.port"))
                .and(contains("sacn_udp"))
                .and(contains("recs_udp")),
        );
}

#[test]
fn dissectors_json_marks_disabled_entries() {
    let assert = cmd()
        .arg("dissectors")
        .arg("--json")
        .arg("--disable")
        .arg("artnet")
        .assert()
        .success();
    let listing = stdout_json(&assert);

    let artnet = listing["protocols"]
        .as_array()
        .expect("protocols")
        .iter()
        .find(|p| p["filter_name"] == "artnet")
        .expect("artnet listed");
    assert_eq!(artnet["enabled"], false);

    let udp = listing["tables"]
        .as_array()
        .expect("tables")
        .iter()
        .find(|t| t["name"] == "udp.port")
        .expect("udp.port listed");
    assert_eq!(udp["key_type"], "uint");
    assert_eq!(udp["policy"], "stack");
}

#[test]
fn long_version_carries_build_commit_and_date() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(contains(env!("CARGO_PKG_VERSION")).and(contains("(commit ")));
}
