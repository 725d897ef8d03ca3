//! Tests for report rendering and persistence.

use super::*;
use crate::backup::VolumeKind;
use crate::ops::{AssignRow, AssignStatus, Scope};
use cap_std::fs_utf8::Dir;
use chrono::TimeZone;
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn started() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 20, 9, 5, 7)
        .single()
        .expect("timestamp")
}

fn row(volume_id: &str, status: AssignStatus) -> AssignRow {
    AssignRow {
        scope: Scope {
            region: String::from("sa-saopaulo-1"),
            compartment: String::from("ops"),
        },
        kind: VolumeKind::Block,
        volume_id: volume_id.to_owned(),
        volume_name: format!("{volume_id}-name"),
        policy_id: String::from("ocid1.policy.gold"),
        status,
        attempts: 1,
        error: None,
    }
}

fn report() -> RunReport<AssignRow> {
    let mut report = RunReport::new();
    report.push(row("vol-a", AssignStatus::Assigned));
    report.push(row("vol-b", AssignStatus::AlreadyAssigned));
    report
}

#[rstest]
fn rows_render_one_flat_object_per_line() {
    let rendered = render_jsonl(report().rows()).expect("render");

    let lines: Vec<serde_json::Value> = rendered
        .lines()
        .map(|line| serde_json::from_str(line).expect("json line"))
        .collect();
    assert_eq!(lines.len(), 2);
    let first = lines.first().expect("first line");
    assert_eq!(first.get("region"), Some(&serde_json::json!("sa-saopaulo-1")));
    assert_eq!(first.get("kind"), Some(&serde_json::json!("block")));
    assert_eq!(first.get("status"), Some(&serde_json::json!("assigned")));
    assert!(rendered.ends_with('\n'));
}

#[rstest]
fn file_names_carry_command_and_utc_timestamp(started: DateTime<Utc>) {
    assert_eq!(
        report_file_name("prune-count", started),
        "prune-count-20240620T090507Z.jsonl"
    );
}

#[rstest]
fn writer_creates_missing_directories(started: DateTime<Utc>) {
    let tmp = TempDir::new().expect("tempdir");
    let root = Utf8PathBuf::from_path_buf(tmp.path().join("reports/nested"))
        .unwrap_or_else(|err| panic!("temp path should be utf8: {}", err.display()));
    let writer = ReportWriter::new(root.clone());

    let path = writer
        .write("assign-policy", &report(), started)
        .expect("write report");

    assert_eq!(path, root.join("assign-policy-20240620T090507Z.jsonl"));
    let dir = Dir::open_ambient_dir(&root, ambient_authority()).expect("open dir");
    let contents = dir
        .read_to_string("assign-policy-20240620T090507Z.jsonl")
        .expect("read report");
    assert_eq!(contents.lines().count(), 2);
}
