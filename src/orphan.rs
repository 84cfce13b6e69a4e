//! Reclaims managed backups whose source volume no longer exists.

use chrono::TimeDelta;
use thiserror::Error;

use crate::clock::Clock;
use crate::cloud::{ApiError, BackupFilter, BackupId, CloudApi, CloudError, VolumeId};
use crate::ownership::{Ownership, managed_history};
use crate::report::{ReportEvent, Reporter, VerdictOutcome};

/// Outcome of an orphan sweep.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OrphanReport {
    /// Orphans deleted, or that would be deleted in a dry run.
    pub deleted: Vec<BackupId>,
    /// Orphans whose deletion failed.
    pub failed: Vec<BackupId>,
    /// Backups whose volume was looked up.
    pub examined: usize,
}

/// Failure that stops the sweep.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum OrphanError {
    /// The backup listing failed.
    #[error("failed to list snapshots: {source}")]
    Listing {
        /// Provider failure.
        source: CloudError,
    },
    /// A volume existence check failed.
    #[error("failed to look up volume {volume_id}: {source}")]
    VolumeLookup {
        /// Volume being checked.
        volume_id: VolumeId,
        /// Provider failure.
        source: CloudError,
    },
}

impl OrphanError {
    /// Provider error entries for operator output.
    #[must_use]
    pub fn api_errors(&self) -> Vec<ApiError> {
        match self {
            Self::Listing { source } | Self::VolumeLookup { source, .. } => source.api_errors(),
        }
    }
}

/// Deletes old managed backups of vanished volumes.
pub struct OrphanReaper<'a, A> {
    api: &'a A,
    ownership: &'a dyn Ownership,
    reporter: &'a dyn Reporter,
    clock: &'a dyn Clock,
    orphan_after: TimeDelta,
    dry_run: bool,
}

impl<'a, A: CloudApi> OrphanReaper<'a, A> {
    /// Creates a reaper.
    #[must_use]
    pub fn new(
        api: &'a A,
        ownership: &'a dyn Ownership,
        reporter: &'a dyn Reporter,
        clock: &'a dyn Clock,
        orphan_after: TimeDelta,
        dry_run: bool,
    ) -> Self {
        Self {
            api,
            ownership,
            reporter,
            clock,
            orphan_after,
            dry_run,
        }
    }

    /// Sweeps every managed backup, oldest first.
    ///
    /// The walk stops at the first backup not older than the orphan age;
    /// everything after it is newer. Deletion failures are recorded and the
    /// sweep continues.
    ///
    /// # Errors
    ///
    /// Returns [`OrphanError::Listing`] when the backups cannot be listed and
    /// [`OrphanError::VolumeLookup`] when any volume check fails.
    pub fn reap_orphans(&self) -> Result<OrphanReport, OrphanError> {
        let history = managed_history(self.api, self.ownership, BackupFilter::default())
            .map_err(|source| OrphanError::Listing { source })?;
        let now = self.clock.now();
        let mut report = OrphanReport::default();

        for backup in history
            .iter()
            .take_while(|backup| now - backup.created_at > self.orphan_after)
        {
            report.examined += 1;
            let exists = self
                .api
                .describe_volume(&backup.volume_id)
                .map_err(|source| OrphanError::VolumeLookup {
                    volume_id: backup.volume_id.clone(),
                    source,
                })?
                .is_some();
            if exists {
                continue;
            }

            let outcome = if self.dry_run {
                report.deleted.push(backup.id.clone());
                VerdictOutcome::WouldDelete
            } else {
                match self.api.delete_backup(&backup.id) {
                    Ok(()) => {
                        report.deleted.push(backup.id.clone());
                        VerdictOutcome::Deleted
                    }
                    Err(err) => {
                        tracing::warn!(backup = %backup.id, error = %err, "orphan deletion failed");
                        self.reporter.report(&ReportEvent::Failure {
                            context: format!("Failed to delete snapshot {}", backup.id),
                            errors: err.api_errors(),
                        });
                        report.failed.push(backup.id.clone());
                        VerdictOutcome::DeleteFailed
                    }
                }
            };
            self.reporter.report(&ReportEvent::Orphan {
                backup_id: backup.id.clone(),
                volume_id: backup.volume_id.clone(),
                created_at: backup.created_at,
                description: backup.description.clone(),
                outcome,
            });
        }

        tracing::debug!(
            examined = report.examined,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "orphan sweep finished"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{Backup, BackupStatus};
    use crate::ownership::DescriptionPrefix;
    use crate::test_support::{
        FakeCloud, FixedClock, RecordingReporter, attached_volume, backup_at, days_ago,
        reference_now,
    };
    use rstest::{fixture, rstest};

    struct Harness {
        cloud: FakeCloud,
        reporter: RecordingReporter,
        marker: DescriptionPrefix,
        clock: FixedClock,
    }

    impl Harness {
        fn reaper(&self, dry_run: bool) -> OrphanReaper<'_, FakeCloud> {
            OrphanReaper::new(
                &self.cloud,
                &self.marker,
                &self.reporter,
                &self.clock,
                TimeDelta::days(30),
                dry_run,
            )
        }
    }

    fn old(id: &str, volume: &str, days: i64) -> Backup {
        backup_at(id, volume, days_ago(reference_now(), days), "Backup web")
    }

    #[fixture]
    fn harness() -> Harness {
        let cloud = FakeCloud::new();
        cloud.add_volume(attached_volume("vol-live", "i-1", "/dev/sda1"));
        cloud.add_backup(old("snap-young-gone", "vol-gone", 5));
        cloud.add_backup(old("snap-old-live", "vol-live", 60));
        cloud.add_backup(old("snap-old-gone", "vol-gone", 45));
        cloud.add_backup(old("snap-edge-gone", "vol-gone", 30));
        cloud.add_backup(old("snap-young-other", "vol-other", 10));
        Harness {
            cloud,
            reporter: RecordingReporter::new(),
            marker: DescriptionPrefix::new("Backup "),
            clock: FixedClock(reference_now()),
        }
    }

    #[rstest]
    fn deletes_only_old_orphans(harness: Harness) {
        let report = harness.reaper(false).reap_orphans().expect("sweep succeeds");
        assert_eq!(report.deleted, [BackupId::from("snap-old-gone")]);
        assert_eq!(harness.cloud.deleted_ids(), [BackupId::from("snap-old-gone")]);
    }

    #[rstest]
    fn stops_looking_up_volumes_at_first_young_backup(harness: Harness) {
        let report = harness.reaper(false).reap_orphans().expect("sweep succeeds");
        assert_eq!(report.examined, 2);
        assert_eq!(
            harness.cloud.volume_lookups(),
            [VolumeId::from("vol-live"), VolumeId::from("vol-gone")]
        );
    }

    #[rstest]
    fn volume_lookup_failure_aborts_the_sweep(harness: Harness) {
        harness.cloud.fail_volume_lookup("vol-live");
        let err = harness.reaper(false).reap_orphans().expect_err("lookup fails");
        assert!(matches!(err, OrphanError::VolumeLookup { ref volume_id, .. } if volume_id.as_str() == "vol-live"));
        assert_eq!(harness.cloud.mutation_count(), 0);
    }

    #[rstest]
    fn delete_failure_is_recorded(harness: Harness) {
        harness.cloud.fail_delete("snap-old-gone");
        let report = harness.reaper(false).reap_orphans().expect("sweep succeeds");
        assert_eq!(report.failed, [BackupId::from("snap-old-gone")]);
        assert!(report.deleted.is_empty());
    }

    #[rstest]
    fn dry_run_makes_no_mutations(harness: Harness) {
        let report = harness.reaper(true).reap_orphans().expect("sweep succeeds");
        assert_eq!(report.deleted, [BackupId::from("snap-old-gone")]);
        assert_eq!(harness.cloud.mutation_count(), 0);
    }

    #[rstest]
    fn pending_orphans_are_considered(harness: Harness) {
        let mut stuck = old("snap-stuck", "vol-gone", 90);
        stuck.status = BackupStatus::Pending;
        harness.cloud.add_backup(stuck);
        let report = harness.reaper(false).reap_orphans().expect("sweep succeeds");
        assert_eq!(
            report.deleted,
            [BackupId::from("snap-stuck"), BackupId::from("snap-old-gone")]
        );
    }

    #[rstest]
    fn listing_failure_is_typed(harness: Harness) {
        harness.cloud.fail_list_backups();
        let err = harness.reaper(false).reap_orphans().expect_err("listing fails");
        assert!(matches!(err, OrphanError::Listing { .. }));
        assert!(harness.cloud.volume_lookups().is_empty());
    }
}
