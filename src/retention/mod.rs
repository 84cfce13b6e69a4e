//! Thins a volume's backup history to one backup per day, then per week.
//!
//! [`plan`] is the pure decision: it walks a history sorted oldest first and
//! keeps the first backup of each bucket, deleting later ones and anything
//! past the expiry age. [`RetentionEngine`] fetches the history, applies the
//! plan and reports each verdict.

mod bucket;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;

use crate::clock::Clock;
use crate::cloud::{
    ApiError, Backup, BackupFilter, BackupId, BackupStatus, CloudApi, CloudError, VolumeId,
};
use crate::ownership::{Ownership, managed_history};
use crate::report::{ReportEvent, Reporter, VerdictOutcome};

pub use bucket::BucketKey;

/// Age thresholds for retention.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RetentionPolicy {
    /// Backups younger than this are bucketed per day.
    pub daily_window: TimeDelta,
    /// Backups older than this are always deleted.
    pub delete_after: TimeDelta,
}

/// Why a backup is to be deleted.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum DeleteReason {
    /// An earlier backup already holds the bucket.
    DuplicateBucket,
    /// Older than the expiry age.
    Expired,
}

/// Decision for one backup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Retain.
    Keep,
    /// Delete.
    Delete(DeleteReason),
}

/// Planned action for one backup of a history.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Verdict<'a> {
    /// The backup.
    pub backup: &'a Backup,
    /// Bucket it was placed in.
    pub bucket: BucketKey,
    /// Decision.
    pub action: Action,
}

/// Computes keep/delete verdicts for `history`, which must be sorted oldest
/// first.
///
/// The previous bucket advances on every entry, kept or not, so an expired
/// backup still claims its bucket.
#[must_use]
pub fn plan<'a>(
    history: &'a [Backup],
    now: DateTime<Utc>,
    policy: &RetentionPolicy,
) -> Vec<Verdict<'a>> {
    let mut last_bucket: Option<BucketKey> = None;
    history
        .iter()
        .map(|backup| {
            let age = now - backup.created_at;
            let bucket = BucketKey::classify(backup.created_at, age, policy.daily_window);
            let action = if last_bucket == Some(bucket) {
                Action::Delete(DeleteReason::DuplicateBucket)
            } else if age > policy.delete_after {
                Action::Delete(DeleteReason::Expired)
            } else {
                Action::Keep
            };
            last_bucket = Some(bucket);
            Verdict {
                backup,
                bucket,
                action,
            }
        })
        .collect()
}

/// Outcome of reconciling one volume.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RetentionReport {
    /// Backups retained.
    pub kept: Vec<BackupId>,
    /// Backups deleted, or that would be deleted in a dry run.
    pub deleted: Vec<BackupId>,
    /// Backups whose deletion failed.
    pub failed: Vec<BackupId>,
}

impl RetentionReport {
    /// Returns `true` when the volume had no managed backups.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.kept.is_empty() && self.deleted.is_empty() && self.failed.is_empty()
    }
}

/// Failure that stops reconciliation of a volume.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RetentionError {
    /// The backup listing failed.
    #[error("failed to list snapshots of {volume_id}: {source}")]
    Listing {
        /// Volume being reconciled.
        volume_id: VolumeId,
        /// Provider failure.
        source: CloudError,
    },
}

impl RetentionError {
    /// Provider error entries for operator output.
    #[must_use]
    pub fn api_errors(&self) -> Vec<ApiError> {
        match self {
            Self::Listing { source, .. } => source.api_errors(),
        }
    }
}

/// Applies [`plan`] to the provider's backups.
pub struct RetentionEngine<'a, A> {
    api: &'a A,
    ownership: &'a dyn Ownership,
    reporter: &'a dyn Reporter,
    clock: &'a dyn Clock,
    policy: RetentionPolicy,
    dry_run: bool,
}

impl<'a, A: CloudApi> RetentionEngine<'a, A> {
    /// Creates an engine.
    #[must_use]
    pub fn new(
        api: &'a A,
        ownership: &'a dyn Ownership,
        reporter: &'a dyn Reporter,
        clock: &'a dyn Clock,
        policy: RetentionPolicy,
        dry_run: bool,
    ) -> Self {
        Self {
            api,
            ownership,
            reporter,
            clock,
            policy,
            dry_run,
        }
    }

    /// Reconciles the completed managed backups of `volume_id`.
    ///
    /// Deletion failures are recorded in [`RetentionReport::failed`] and the
    /// walk continues.
    ///
    /// # Errors
    ///
    /// Returns [`RetentionError::Listing`] when the history cannot be fetched.
    pub fn reconcile(&self, volume_id: &VolumeId) -> Result<RetentionReport, RetentionError> {
        let mut history = managed_history(
            self.api,
            self.ownership,
            BackupFilter::default().volume(volume_id),
        )
        .map_err(|source| RetentionError::Listing {
            volume_id: volume_id.clone(),
            source,
        })?;
        history.retain(|backup| backup.status == BackupStatus::Completed);

        let mut report = RetentionReport::default();
        if history.is_empty() {
            self.reporter.report(&ReportEvent::NoBackups {
                volume_id: volume_id.clone(),
            });
            return Ok(report);
        }

        for verdict in plan(&history, self.clock.now(), &self.policy) {
            let outcome = self.apply(&verdict, &mut report);
            self.reporter.report(&ReportEvent::Verdict {
                backup_id: verdict.backup.id.clone(),
                bucket: verdict.bucket.to_string(),
                created_at: verdict.backup.created_at,
                description: verdict.backup.description.clone(),
                outcome,
            });
        }

        if report.deleted.is_empty() && report.failed.is_empty() {
            self.reporter.report(&ReportEvent::NothingToDelete {
                volume_id: volume_id.clone(),
                kept: report.kept.len(),
            });
        }
        tracing::debug!(
            volume = %volume_id,
            kept = report.kept.len(),
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "retention applied"
        );
        Ok(report)
    }

    fn apply(&self, verdict: &Verdict<'_>, report: &mut RetentionReport) -> VerdictOutcome {
        let id = &verdict.backup.id;
        let Action::Delete(reason) = verdict.action else {
            report.kept.push(id.clone());
            return VerdictOutcome::Kept;
        };
        if self.dry_run {
            report.deleted.push(id.clone());
            return VerdictOutcome::WouldDelete;
        }
        match self.api.delete_backup(id) {
            Ok(()) => {
                report.deleted.push(id.clone());
                VerdictOutcome::Deleted
            }
            Err(err) => {
                tracing::warn!(backup = %id, ?reason, error = %err, "snapshot deletion failed");
                self.reporter.report(&ReportEvent::Failure {
                    context: format!("Failed to delete snapshot {id}"),
                    errors: err.api_errors(),
                });
                report.failed.push(id.clone());
                VerdictOutcome::DeleteFailed
            }
        }
    }
}

#[cfg(test)]
mod tests;
