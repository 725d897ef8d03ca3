//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use rstest::rstest;
use tempfile::TempDir;

const CONFIG_VARS: &[&str] = &[
    "BVKEEPER_OCI_REGION",
    "BVKEEPER_OCI_COMPARTMENT",
    "BVKEEPER_OCI_TENANCY_ID",
    "BVKEEPER_OCI_PROFILE",
    "BVKEEPER_OCI_CONFIG_FILE",
    "BVKEEPER_OCI_CLI_BIN",
    "BVKEEPER_CONFIG_PATH",
    "BVKEEPER_REPORT_DIR",
];

fn isolated_command(home: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("bvkeeper");
    cmd.current_dir(home.path())
        .env("HOME", home.path())
        .env("XDG_CONFIG_HOME", home.path())
        .env("RUST_LOG", "off");
    for var in CONFIG_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn temp_home() -> TempDir {
    TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"))
}

#[test]
fn help_lists_every_subcommand() {
    let mut cmd = cargo_bin_cmd!("bvkeeper");
    cmd.arg("--help").assert().success().stdout(
        predicate::str::contains("prune-count")
            .and(predicate::str::contains("prune-age"))
            .and(predicate::str::contains("create"))
            .and(predicate::str::contains("assign-policy"))
            .and(predicate::str::contains("reschedule"))
            .and(predicate::str::contains("audit")),
    );
}

#[test]
fn missing_region_is_reported_with_its_env_var() {
    let home = temp_home();
    isolated_command(&home)
        .args(["prune-count", "--kind", "boot", "--dry-run"])
        .assert()
        .code(1)
        .stdout("")
        .stderr(
            predicate::str::contains("BVKEEPER_OCI_REGION")
                .and(predicate::str::contains("bvkeeper.toml")),
        );
}

#[rstest]
#[case::prune_age(&["prune-age", "--kind", "block"])]
#[case::audit(&["audit", "--workers", "2"])]
#[case::reschedule(&["reschedule", "--policy", "gold"])]
fn missing_compartment_is_reported(#[case] args: &[&str]) {
    let home = temp_home();
    isolated_command(&home)
        .env("BVKEEPER_OCI_REGION", "sa-saopaulo-1")
        .args(args)
        .assert()
        .code(1)
        .stderr(predicate::str::contains("BVKEEPER_OCI_COMPARTMENT"));
}

#[test]
fn region_flag_overrides_configuration() {
    let home = temp_home();
    isolated_command(&home)
        .args([
            "assign-policy",
            "--kind",
            "boot",
            "--policy",
            "gold",
            "--region",
            "sa-vinhedo-1",
        ])
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("BVKEEPER_OCI_COMPARTMENT")
                .and(predicate::str::contains("BVKEEPER_OCI_REGION").not()),
        );
}

#[test]
fn named_compartment_requires_tenancy() {
    let home = temp_home();
    isolated_command(&home)
        .args(["create", "--kind", "boot"])
        .args(["--region", "sa-saopaulo-1", "--compartment", "ops"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("BVKEEPER_OCI_TENANCY_ID"));
}

#[test]
fn unknown_volume_kind_is_rejected_by_the_parser() {
    cargo_bin_cmd!("bvkeeper")
        .args(["prune-count", "--kind", "object"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("--kind"));
}

#[test]
fn invalid_arguments_fail_before_any_provider_call() {
    let home = temp_home();
    let missing_bin = home.path().join("no-such-oci");
    isolated_command(&home)
        .env("BVKEEPER_OCI_CLI_BIN", &missing_bin)
        .env("BVKEEPER_OCI_TENANCY_ID", "ocid1.tenancy.oc1..example")
        .args(["prune-count", "--kind", "boot", "--keep", "0"])
        .args(["--region", "sa-saopaulo-1", "--compartment", "ops"])
        .assert()
        .code(1)
        .stderr(
            predicate::str::contains("--keep must be at least 1")
                .and(predicate::str::contains("no-such-oci").not()),
        );
}
