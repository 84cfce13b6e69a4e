//! Behavioural tests for whole runs against the in-memory provider.

use std::time::Duration;

use rstest::{fixture, rstest};
use snapkeep::test_support::{
    FakeCloud, FixedClock, RecordingReporter, attached_volume, backup_at, days_ago, instance,
    reference_now, tagged, test_config,
};
use snapkeep::{InstanceState, Orchestrator, SnapshotConfig};

const MANAGED_PREFIX: &str = "Backup ";

#[fixture]
fn cloud() -> FakeCloud {
    let now = reference_now();
    let cloud = FakeCloud::new();
    cloud.add_instance(instance("i-web", InstanceState::Running, Some("web")));
    cloud.add_volume(attached_volume("vol-root", "i-web", "/dev/sda1"));
    cloud.add_volume(tagged(
        attached_volume("vol-data", "i-web", "/dev/sdf"),
        "SNAPSHOT",
    ));
    cloud.add_volume(attached_volume("vol-scratch", "i-web", "/dev/sdg"));

    let managed = format!("{MANAGED_PREFIX}web");
    for (id, days) in [("snap-r1", 1), ("snap-r2", 1), ("snap-r3", 45)] {
        cloud.add_backup(backup_at(id, "vol-root", days_ago(now, days), &managed));
    }
    cloud.add_backup(backup_at("snap-orphan", "vol-deleted", days_ago(now, 40), &managed));
    cloud.add_backup(backup_at("snap-ami", "vol-root", days_ago(now, 90), "Created by AMI"));
    cloud.set_creation_time(now);
    cloud
}

fn orchestrator(
    cloud: &FakeCloud,
    reporter: &RecordingReporter,
    config: &SnapshotConfig,
) -> Orchestrator<FakeCloud, RecordingReporter, FixedClock> {
    Orchestrator::new(
        cloud.clone(),
        reporter.clone(),
        FixedClock(reference_now()),
        config,
    )
    .with_poll_interval(Duration::ZERO)
}

#[rstest]
fn creation_is_not_debounced(cloud: FakeCloud) {
    let reporter = RecordingReporter::new();
    let subject = orchestrator(&cloud, &reporter, &test_config());

    subject.run_creation().expect("first creation phase");
    subject.run_creation().expect("second creation phase");

    let fresh: Vec<_> = cloud
        .backups_of("vol-root")
        .into_iter()
        .filter(|backup| backup.id.as_str().starts_with("snap-new-"))
        .collect();
    assert_eq!(fresh.len(), 2);
    assert_eq!(cloud.backups_of("vol-scratch").len(), 0);
}

#[rstest]
fn full_run_creates_reaps_and_thins(cloud: FakeCloud) {
    let reporter = RecordingReporter::new();
    let summary = orchestrator(&cloud, &reporter, &test_config())
        .run()
        .expect("run succeeds");

    assert_eq!(summary.creation.completed.len(), 2);
    let orphans: Vec<_> = summary
        .cleanup
        .orphans
        .deleted
        .iter()
        .map(|id| id.as_str().to_owned())
        .collect();
    assert_eq!(orphans, ["snap-orphan"]);

    let remaining: Vec<String> = cloud
        .backups_of("vol-root")
        .into_iter()
        .map(|backup| backup.id.as_str().to_owned())
        .collect();
    // The first of yesterday, the foreign snapshot, and today's.
    assert_eq!(remaining, ["snap-r1", "snap-ami", "snap-new-1"]);
}

#[rstest]
fn dry_run_decides_the_same_without_mutating(cloud: FakeCloud) {
    let live = {
        let twin = FakeCloud::new();
        twin.add_instance(instance("i-web", InstanceState::Running, Some("web")));
        twin.add_volume(attached_volume("vol-root", "i-web", "/dev/sda1"));
        for backup in cloud.backups_of("vol-root") {
            twin.add_backup(backup);
        }
        twin.add_backup(backup_at(
            "snap-orphan",
            "vol-deleted",
            days_ago(reference_now(), 40),
            "Backup web",
        ));
        let reporter = RecordingReporter::new();
        orchestrator(&twin, &reporter, &test_config())
            .run_cleanup()
            .expect("cleanup succeeds")
    };

    let dry_config = SnapshotConfig {
        dry_run: true,
        ..test_config()
    };
    cloud.remove_volume("vol-data");
    cloud.remove_volume("vol-scratch");
    let reporter = RecordingReporter::new();
    let dry = orchestrator(&cloud, &reporter, &dry_config)
        .run()
        .expect("dry run succeeds");

    assert_eq!(cloud.mutation_count(), 0);
    assert_eq!(dry.creation.skipped, 1);
    assert_eq!(dry.cleanup.deleted(), live.deleted());
    assert!(
        reporter
            .lines()
            .iter()
            .any(|line| line.contains("WOULD DELETE"))
    );
}
