//! Behavioural tests for `snapkeep <region>` against a scripted `aws` binary.
#![cfg(unix)]

#[path = "common/test_constants.rs"]
mod test_constants;

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use rstest::{fixture, rstest};
use tempfile::TempDir;

use test_constants::{MANAGED_PREFIX, TEST_REGION};

const FAKE_AWS: &str = r#"#!/bin/sh
echo "$*" >> "$(dirname "$0")/calls.log"
now=$(date -u +%Y-%m-%dT%H:%M:%SZ)
case "$2" in
  describe-volumes)
    echo '{"Volumes":[{"VolumeId":"vol-1","Size":8,"State":"in-use","Attachments":[{"InstanceId":"i-1","Device":"/dev/sda1"}]}]}'
    ;;
  describe-instances)
    echo '{"Reservations":[{"Instances":[{"InstanceId":"i-1","State":{"Name":"running"},"Tags":[{"Key":"Name","Value":"web 01"}]}]}]}'
    ;;
  create-snapshot)
    echo '{"SnapshotId":"snap-1","State":"pending"}'
    ;;
  describe-snapshots)
    echo "{\"Snapshots\":[{\"SnapshotId\":\"snap-1\",\"VolumeId\":\"vol-1\",\"StartTime\":\"$now\",\"State\":\"completed\",\"Description\":\"Backup web\"}]}"
    ;;
  *)
    echo "An error occurred (UnsupportedOperation) when calling the $2 operation: not scripted" >&2
    exit 254
    ;;
esac
"#;

struct FakeAws {
    dir: TempDir,
    bin: PathBuf,
}

impl FakeAws {
    fn calls(&self) -> String {
        fs::read_to_string(self.dir.path().join("calls.log")).unwrap_or_default()
    }

    fn home(&self) -> &Path {
        self.dir.path()
    }
}

#[fixture]
fn fake_aws() -> FakeAws {
    let dir = TempDir::new().unwrap_or_else(|err| panic!("tempdir: {err}"));
    let bin = dir.path().join("aws");
    fs::write(&bin, FAKE_AWS).unwrap_or_else(|err| panic!("write script: {err}"));
    fs::set_permissions(&bin, fs::Permissions::from_mode(0o755))
        .unwrap_or_else(|err| panic!("chmod script: {err}"));
    FakeAws { dir, bin }
}

fn snapkeep(fake: &FakeAws, aws_bin: &Path) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("snapkeep");
    cmd.current_dir(fake.home())
        .env("HOME", fake.home())
        .env("XDG_CONFIG_HOME", fake.home())
        .env("SNAPKEEP_AWS_BIN", aws_bin)
        .env("SNAPKEEP_POLL_INTERVAL_SECS", "1")
        .env_remove("SNAPKEEP_CONFIG_PATH")
        .env_remove("SNAPKEEP_DRY_RUN")
        .env_remove("http_proxy")
        .env_remove("HTTP_PROXY")
        .env_remove("https_proxy")
        .env_remove("HTTPS_PROXY");
    cmd
}

#[rstest]
fn run_creates_then_cleans(fake_aws: FakeAws) {
    let mut cmd = snapkeep(&fake_aws, &fake_aws.bin);
    cmd.arg(TEST_REGION);

    cmd.assert()
        .success()
        .stdout(contains(format!("Running in region: {TEST_REGION}")))
        .stdout(contains("Instance: web Volume: vol-1 (8GB)"))
        .stdout(contains("Creating snapshot: snap-1"))
        .stdout(contains("Snapshot snap-1 complete in"))
        .stdout(contains("Nothing to delete; 1 snapshot(s) kept."))
        .stdout(contains("Snapshot cleanup complete in"));

    let calls = fake_aws.calls();
    assert!(calls.contains("ec2 create-snapshot --region eu-west-1 --output json --volume-id vol-1 --description Backup web"));
    assert!(!calls.contains("delete-snapshot"));
}

#[rstest]
fn endpoint_argument_is_reduced_to_region(fake_aws: FakeAws) {
    let mut cmd = snapkeep(&fake_aws, &fake_aws.bin);
    cmd.arg("https://ec2.eu-west-1.amazonaws.com/");

    cmd.assert()
        .success()
        .stdout(contains("Running in region: eu-west-1"));
    assert!(fake_aws.calls().contains("--region eu-west-1 "));
}

#[rstest]
fn dry_run_makes_no_mutating_calls(fake_aws: FakeAws) {
    let mut cmd = snapkeep(&fake_aws, &fake_aws.bin);
    cmd.args([TEST_REGION, "--dry-run"]);

    cmd.assert()
        .success()
        .stdout(contains(format!(
            "Dry run: would create snapshot of vol-1 \"{MANAGED_PREFIX}web\""
        )));
    let calls = fake_aws.calls();
    assert!(!calls.contains("create-snapshot"));
    assert!(!calls.contains("delete-snapshot"));
}

#[rstest]
fn proxy_is_passed_to_the_provider_cli(fake_aws: FakeAws) {
    let script = fake_aws.dir.path().join("aws-proxy");
    fs::write(
        &script,
        "#!/bin/sh\necho \"$HTTPS_PROXY\" >> \"$(dirname \"$0\")/proxy.log\"\necho '{\"Volumes\":[]}'\n",
    )
    .unwrap_or_else(|err| panic!("write script: {err}"));
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .unwrap_or_else(|err| panic!("chmod script: {err}"));

    let mut cmd = snapkeep(&fake_aws, &script);
    cmd.env("http_proxy", "http://proxy.internal:3128")
        .arg(TEST_REGION);

    cmd.assert().success();
    let seen = fs::read_to_string(fake_aws.dir.path().join("proxy.log"))
        .unwrap_or_else(|err| panic!("proxy log: {err}"));
    assert!(seen.lines().all(|line| line == "http://proxy.internal:3128"));
}

#[rstest]
fn missing_aws_binary_aborts_with_exit_code_one(fake_aws: FakeAws) {
    let missing = fake_aws.dir.path().join("no-such-aws");
    let mut cmd = snapkeep(&fake_aws, &missing);
    cmd.arg(TEST_REGION);

    cmd.assert()
        .failure()
        .code(1)
        .stdout(contains("Snapshot creation aborted."))
        .stdout(contains("Cleaning snapshots.").not())
        .stderr(contains("snapshot run aborted"));
}

#[rstest]
fn invalid_region_is_rejected_before_any_call(fake_aws: FakeAws) {
    let mut cmd = snapkeep(&fake_aws, &fake_aws.bin);
    cmd.arg("Not A Region");

    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("invalid region"));
    assert!(fake_aws.calls().is_empty());
}
