//! Unit tests for the OCI CLI adapter.

use chrono::{TimeZone, Utc};
use rstest::{fixture, rstest};
use serde_json::json;

use super::*;
use crate::backup::{BackupType, LifecycleState};
use crate::test_support::{ScriptedRunner, backup, json_backup, json_page};

#[fixture]
fn runner() -> ScriptedRunner {
    ScriptedRunner::new()
}

fn client(runner: &ScriptedRunner) -> OciCli<ScriptedRunner> {
    let settings = OciCliSettings::new(DEFAULT_OCI_BIN, "sa-saopaulo-1")
        .expect("settings")
        .with_profile(Some(String::from("OPS")));
    OciCli::new(settings, runner.clone())
}

#[rstest]
#[case("cli_bin", " ", "sa-saopaulo-1")]
#[case("region", "oci", "  ")]
fn settings_reject_blank_fields(#[case] field: &str, #[case] bin: &str, #[case] region: &str) {
    assert_eq!(
        OciCliSettings::new(bin, region),
        Err(OciSettingsError::Missing {
            field: field.to_owned()
        })
    );
}

#[rstest]
#[tokio::test]
async fn list_backups_parses_page_and_token(runner: ScriptedRunner) {
    let created = Utc
        .with_ymd_and_hms(2024, 6, 1, 3, 0, 0)
        .single()
        .expect("timestamp");
    let record = backup("bkp-1", "web-BKPAUTCITEL-20240601", "vol-1", created);
    runner.push_stdout(json_page(&[json_backup(&record)], Some("page-2")));
    let oci = client(&runner);
    let query = BackupQuery::compartment(VolumeKind::Boot, "comp-1").for_volume("vol-1");

    let page = oci.list_backups(&query, None).await.expect("page");

    assert_eq!(page.items, vec![record]);
    assert_eq!(page.next_page.as_deref(), Some("page-2"));
    let invocations = runner.invocations();
    let call = invocations.first().expect("one call");
    assert_eq!(
        call.command_string(),
        "oci bv boot-volume-backup list --compartment-id comp-1 --boot-volume-id vol-1 \
         --region sa-saopaulo-1 --profile OPS --output json"
    );
}

#[rstest]
#[tokio::test]
async fn list_backups_forwards_page_token(runner: ScriptedRunner) {
    runner.push_stdout(json_page(&[], None));
    let oci = client(&runner);
    let query = BackupQuery::compartment(VolumeKind::Block, "comp-1");

    let page = oci
        .list_backups(&query, Some(String::from("tok-9")))
        .await
        .expect("page");

    assert!(page.items.is_empty());
    assert_eq!(page.next_page, None);
    let call = runner.invocations().into_iter().next().expect("one call");
    assert_eq!(call.flag_value("--page").as_deref(), Some("tok-9"));
    assert!(call.command_string().starts_with("oci bv backup list"));
}

#[rstest]
#[tokio::test]
async fn block_backups_read_volume_id(runner: ScriptedRunner) {
    let body = json!({
        "data": [{
            "id": "bkp-b",
            "display-name": "data-disk",
            "volume-id": "vol-b",
            "time-created": "2024-06-01T03:00:00.123000+00:00",
            "lifecycle-state": "TERMINATING",
            "source-type": "SCHEDULED",
            "type": "INCREMENTAL"
        }]
    });
    runner.push_stdout(body.to_string());
    let oci = client(&runner);
    let query = BackupQuery::compartment(VolumeKind::Block, "comp-1");

    let page = oci.list_backups(&query, None).await.expect("page");
    let record = page.items.first().expect("record");

    assert_eq!(record.volume_id, "vol-b");
    assert_eq!(record.lifecycle_state, LifecycleState::Terminating);
    assert_eq!(record.backup_type, BackupType::Incremental);
    assert_eq!(record.kind, VolumeKind::Block);
}

#[rstest]
#[tokio::test]
async fn throttling_is_decoded_from_stderr(runner: ScriptedRunner) {
    runner.push_service_error(429, "TooManyRequests");
    let oci = client(&runner);

    let err = oci
        .delete_backup(VolumeKind::Boot, "bkp-1")
        .await
        .expect_err("throttled");

    assert!(err.is_throttled());
    let service = err.service().expect("service error");
    assert_eq!(service.code, "TooManyRequests");
    assert_eq!(service.request_id.as_deref(), Some("req-test"));
}

#[rstest]
#[tokio::test]
async fn failures_without_body_become_command_failures(runner: ScriptedRunner) {
    runner.push_output(Some(2), "", "Error: Missing option(s) --compartment-id.");
    let oci = client(&runner);

    let err = oci
        .list_instances("comp-1", None)
        .await
        .expect_err("failure");

    assert!(matches!(
        err,
        ProviderError::CommandFailure {
            status: Some(2),
            ..
        }
    ));
}

#[rstest]
#[tokio::test]
async fn unparseable_output_is_a_parse_error(runner: ScriptedRunner) {
    runner.push_stdout("not json");
    let oci = client(&runner);

    let err = oci
        .list_volumes(VolumeKind::Boot, "comp-1", None)
        .await
        .expect_err("parse failure");

    assert!(matches!(err, ProviderError::Parse { .. }));
}

#[rstest]
#[tokio::test]
async fn delete_passes_force_and_kind_specific_flag(runner: ScriptedRunner) {
    runner.push_success();
    let oci = client(&runner);

    oci.delete_backup(VolumeKind::Block, "bkp-9")
        .await
        .expect("delete");

    let call = runner.invocations().into_iter().next().expect("one call");
    assert_eq!(call.flag_value("--volume-backup-id").as_deref(), Some("bkp-9"));
    assert!(call.args.contains(&OsString::from("--force")));
}

#[rstest]
#[tokio::test]
async fn update_sends_every_schedule_as_json(runner: ScriptedRunner) {
    runner.push_success();
    let oci = client(&runner);
    let mut settings = serde_json::Map::new();
    settings.insert(String::from("period"), json!("ONE_DAY"));
    let schedules = vec![PolicySchedule {
        hour_of_day: Some(7),
        settings,
    }];

    oci.update_policy_schedules("policy-1", &schedules)
        .await
        .expect("update");

    let call = runner.invocations().into_iter().next().expect("one call");
    let encoded = call.flag_value("--schedules").expect("schedules flag");
    let decoded: serde_json::Value = serde_json::from_str(&encoded).expect("json");
    assert_eq!(decoded, json!([{ "hour-of-day": 7, "period": "ONE_DAY" }]));
}

#[rstest]
#[tokio::test]
async fn missing_assignment_yields_none(runner: ScriptedRunner) {
    runner.push_stdout(json_page(&[], None));
    runner.push_stdout("");
    let oci = client(&runner);

    assert_eq!(oci.get_policy_assignment("vol-1").await.expect("call"), None);
    assert_eq!(oci.get_policy_assignment("vol-1").await.expect("call"), None);
}

#[rstest]
#[tokio::test]
async fn compartments_report_active_state(runner: ScriptedRunner) {
    let body = json!({
        "data": [
            { "id": "c-1", "name": "prod", "lifecycle-state": "ACTIVE" },
            { "id": "c-2", "name": "old", "lifecycle-state": "DELETED" }
        ]
    });
    runner.push_stdout(body.to_string());
    let oci = client(&runner);

    let page = oci.list_compartments("tenancy", None).await.expect("page");

    let states: Vec<(&str, bool)> = page
        .items
        .iter()
        .map(|item| (item.name.as_str(), item.active))
        .collect();
    assert_eq!(states, [("prod", true), ("old", false)]);
}

#[rstest]
#[case("ServiceError:\n{\"status\": 404, \"code\": \"NotAuthorizedOrNotFound\"}", Some(404))]
#[case("WARNING: deprecated\nServiceError:\n{\"status\": 409, \"code\": \"Conflict\", \"message\": \"x\"}\n", Some(409))]
#[case("ServiceError: not json", None)]
#[case("{\"status\": 500, \"code\": \"X\"}", None)]
fn service_error_body_extraction(#[case] stderr: &str, #[case] status: Option<u16>) {
    assert_eq!(
        parse_service_error(stderr).map(|service| service.status),
        status
    );
}
