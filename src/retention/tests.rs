//! Unit tests for retention planning and reconciliation.

use super::*;
use crate::ownership::DescriptionPrefix;
use crate::test_support::{FakeCloud, FixedClock, RecordingReporter, backup_at, reference_now};
use chrono::TimeDelta;
use rstest::{fixture, rstest};

fn policy() -> RetentionPolicy {
    RetentionPolicy {
        daily_window: TimeDelta::days(7),
        delete_after: TimeDelta::days(30),
    }
}

fn aged(id: &str, age: TimeDelta) -> Backup {
    backup_at(id, "vol-1", reference_now() - age, "Backup web")
}

fn actions(verdicts: &[Verdict<'_>]) -> Vec<Action> {
    verdicts.iter().map(|verdict| verdict.action).collect()
}

#[test]
fn worked_example_keeps_first_of_each_bucket() {
    let history = [
        aged("a", TimeDelta::days(40)),
        aged("b", TimeDelta::days(9) + TimeDelta::hours(1)),
        aged("c", TimeDelta::days(9)),
        aged("d", TimeDelta::days(2) + TimeDelta::hours(1)),
        aged("e", TimeDelta::days(2)),
    ];
    let verdicts = plan(&history, reference_now(), &policy());
    assert_eq!(
        actions(&verdicts),
        [
            Action::Delete(DeleteReason::Expired),
            Action::Keep,
            Action::Delete(DeleteReason::DuplicateBucket),
            Action::Keep,
            Action::Delete(DeleteReason::DuplicateBucket),
        ]
    );
}

#[test]
fn single_young_backup_is_kept() {
    let history = [aged("a", TimeDelta::days(29))];
    let verdicts = plan(&history, reference_now(), &policy());
    assert_eq!(actions(&verdicts), [Action::Keep]);
}

#[test]
fn expired_entry_still_claims_its_bucket() {
    // Both sit in ISO week 2024-W20; the first is past expiry.
    let history = [
        aged("a", TimeDelta::days(31)),
        aged("b", TimeDelta::days(29)),
    ];
    let verdicts = plan(&history, reference_now(), &policy());
    assert_eq!(verdicts[0].bucket, verdicts[1].bucket);
    assert_eq!(
        actions(&verdicts),
        [
            Action::Delete(DeleteReason::Expired),
            Action::Delete(DeleteReason::DuplicateBucket),
        ]
    );
}

#[test]
fn plan_is_empty_for_empty_history() {
    assert!(plan(&[], reference_now(), &policy()).is_empty());
}

struct Harness {
    cloud: FakeCloud,
    reporter: RecordingReporter,
    marker: DescriptionPrefix,
    clock: FixedClock,
}

impl Harness {
    fn engine(&self, dry_run: bool) -> RetentionEngine<'_, FakeCloud> {
        RetentionEngine::new(
            &self.cloud,
            &self.marker,
            &self.reporter,
            &self.clock,
            policy(),
            dry_run,
        )
    }
}

#[fixture]
fn harness() -> Harness {
    let cloud = FakeCloud::new();
    // Provider order is deliberately not chronological.
    cloud.add_backup(aged("snap-e", TimeDelta::days(2)));
    cloud.add_backup(aged("snap-a", TimeDelta::days(40)));
    cloud.add_backup(aged("snap-d", TimeDelta::days(2) + TimeDelta::hours(1)));
    cloud.add_backup(aged("snap-c", TimeDelta::days(9)));
    cloud.add_backup(aged("snap-b", TimeDelta::days(9) + TimeDelta::hours(1)));
    Harness {
        cloud,
        reporter: RecordingReporter::new(),
        marker: DescriptionPrefix::new("Backup "),
        clock: FixedClock(reference_now()),
    }
}

fn ids(list: &[BackupId]) -> Vec<&str> {
    list.iter().map(BackupId::as_str).collect()
}

#[rstest]
fn reconcile_deletes_duplicates_and_expired(harness: Harness) {
    let report = harness
        .engine(false)
        .reconcile(&VolumeId::from("vol-1"))
        .expect("reconcile succeeds");
    assert_eq!(ids(&report.kept), ["snap-b", "snap-d"]);
    assert_eq!(ids(&report.deleted), ["snap-a", "snap-c", "snap-e"]);
    assert!(report.failed.is_empty());
    assert_eq!(
        ids(&harness.cloud.deleted_ids()),
        ["snap-a", "snap-c", "snap-e"]
    );
}

#[rstest]
fn dry_run_reports_same_decisions_without_deleting(harness: Harness) {
    let report = harness
        .engine(true)
        .reconcile(&VolumeId::from("vol-1"))
        .expect("reconcile succeeds");
    assert_eq!(ids(&report.deleted), ["snap-a", "snap-c", "snap-e"]);
    assert_eq!(harness.cloud.mutation_count(), 0);
    assert!(
        harness
            .reporter
            .lines()
            .iter()
            .any(|line| line.ends_with("- WOULD DELETE"))
    );
}

#[rstest]
fn delete_failure_is_recorded_and_walk_continues(harness: Harness) {
    harness.cloud.fail_delete("snap-c");
    let report = harness
        .engine(false)
        .reconcile(&VolumeId::from("vol-1"))
        .expect("reconcile succeeds");
    assert_eq!(ids(&report.failed), ["snap-c"]);
    assert_eq!(ids(&report.deleted), ["snap-a", "snap-e"]);
    assert!(
        harness
            .reporter
            .lines()
            .contains(&String::from(
                "Failed to delete snapshot snap-c:\nInternalError:simulated failure"
            ))
    );
}

#[rstest]
fn pending_and_foreign_backups_are_ignored() {
    let cloud = FakeCloud::new();
    let mut pending = aged("snap-p", TimeDelta::days(2) + TimeDelta::hours(2));
    pending.status = BackupStatus::Pending;
    cloud.add_backup(pending);
    cloud.add_backup(backup_at(
        "snap-ami",
        "vol-1",
        reference_now() - TimeDelta::days(2) - TimeDelta::hours(3),
        "Created by CreateImage",
    ));
    cloud.add_backup(aged("snap-x", TimeDelta::days(2)));
    let reporter = RecordingReporter::new();
    let marker = DescriptionPrefix::new("Backup ");
    let clock = FixedClock(reference_now());
    let engine = RetentionEngine::new(&cloud, &marker, &reporter, &clock, policy(), false);

    let report = engine
        .reconcile(&VolumeId::from("vol-1"))
        .expect("reconcile succeeds");
    assert_eq!(ids(&report.kept), ["snap-x"]);
    assert!(report.deleted.is_empty());
    assert_eq!(
        reporter.lines().last().map(String::as_str),
        Some("Nothing to delete; 1 snapshot(s) kept.")
    );
}

#[test]
fn empty_history_is_reported_distinctly() {
    let cloud = FakeCloud::new();
    let reporter = RecordingReporter::new();
    let marker = DescriptionPrefix::new("Backup ");
    let clock = FixedClock(reference_now());
    let engine = RetentionEngine::new(&cloud, &marker, &reporter, &clock, policy(), false);

    let report = engine
        .reconcile(&VolumeId::from("vol-1"))
        .expect("reconcile succeeds");
    assert!(report.is_empty());
    assert_eq!(reporter.lines(), ["No snapshots exist."]);
}

#[rstest]
fn listing_failure_is_typed(harness: Harness) {
    harness.cloud.fail_list_backups();
    let err = harness
        .engine(false)
        .reconcile(&VolumeId::from("vol-1"))
        .expect_err("listing fails");
    assert!(matches!(err, RetentionError::Listing { ref volume_id, .. } if volume_id.as_str() == "vol-1"));
    assert_eq!(harness.cloud.mutation_count(), 0);
}
