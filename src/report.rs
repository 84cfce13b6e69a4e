//! Operator-facing progress output.
//!
//! Each [`ReportEvent`] renders as one or more human-readable lines. The text
//! is informational and not meant to be parsed.

use std::fmt;
use std::io::{self, Write};
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::cloud::{ApiError, BackupId, VolumeId};

/// Phase of a run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Phase {
    /// Scanning volumes and creating snapshots.
    Creation,
    /// Reaping orphans and enforcing retention.
    Cleanup,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Creation => f.write_str("creation"),
            Self::Cleanup => f.write_str("cleanup"),
        }
    }
}

/// What happened to a backup examined during cleanup.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerdictOutcome {
    /// Retained.
    Kept,
    /// Deleted.
    Deleted,
    /// Would have been deleted, but the run is a dry run.
    WouldDelete,
    /// Deletion was attempted and failed.
    DeleteFailed,
}

impl fmt::Display for VerdictOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kept => f.write_str("KEPT"),
            Self::Deleted => f.write_str("DELETED"),
            Self::WouldDelete => f.write_str("WOULD DELETE"),
            Self::DeleteFailed => f.write_str("ERROR DELETING"),
        }
    }
}

/// Something worth telling the operator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ReportEvent {
    /// The run targets `region`.
    Region {
        /// Region name.
        region: String,
    },
    /// A phase is starting.
    PhaseStarted {
        /// Phase that starts.
        phase: Phase,
    },
    /// A phase finished.
    PhaseCompleted {
        /// Phase that finished.
        phase: Phase,
        /// Wall-clock time spent.
        elapsed: Duration,
    },
    /// A phase stopped early.
    PhaseAborted {
        /// Phase that stopped.
        phase: Phase,
    },
    /// A volume is being examined.
    Volume {
        /// Instance label (name tag or `Unknown`).
        label: String,
        /// Volume identifier.
        volume_id: VolumeId,
        /// Size in GiB.
        size_gb: u64,
    },
    /// The volume does not qualify for snapshots.
    NotRequired {
        /// Volume identifier.
        volume_id: VolumeId,
    },
    /// A snapshot request was accepted.
    CreateRequested {
        /// New backup identifier.
        backup_id: BackupId,
    },
    /// Waiting for a snapshot to finish.
    Waiting {
        /// Backup being waited on.
        backup_id: BackupId,
    },
    /// The snapshot completed.
    CreateCompleted {
        /// Backup identifier.
        backup_id: BackupId,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The provider reported the snapshot as failed.
    CreateErrored {
        /// Backup identifier.
        backup_id: BackupId,
    },
    /// Waiting stopped at the ceiling before the snapshot finished.
    CreateUnverified {
        /// Backup identifier.
        backup_id: BackupId,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// Dry run: a snapshot would have been created.
    CreateSkipped {
        /// Volume identifier.
        volume_id: VolumeId,
        /// Description the snapshot would carry.
        description: String,
    },
    /// The volume has no managed snapshots.
    NoBackups {
        /// Volume identifier.
        volume_id: VolumeId,
    },
    /// The volume has snapshots and none needed deleting.
    NothingToDelete {
        /// Volume identifier.
        volume_id: VolumeId,
        /// Number of snapshots kept.
        kept: usize,
    },
    /// Retention decision for one snapshot.
    Verdict {
        /// Backup identifier.
        backup_id: BackupId,
        /// Rendered bucket key.
        bucket: String,
        /// Creation time.
        created_at: DateTime<Utc>,
        /// Snapshot description.
        description: String,
        /// Decision taken.
        outcome: VerdictOutcome,
    },
    /// Orphan sweep decision for one snapshot.
    Orphan {
        /// Backup identifier.
        backup_id: BackupId,
        /// Volume that no longer exists.
        volume_id: VolumeId,
        /// Creation time.
        created_at: DateTime<Utc>,
        /// Snapshot description.
        description: String,
        /// Decision taken.
        outcome: VerdictOutcome,
    },
    /// A provider call failed.
    Failure {
        /// What was being attempted.
        context: String,
        /// Provider error entries.
        errors: Vec<ApiError>,
    },
}

fn seconds(elapsed: Duration) -> String {
    format!("{:.2}", elapsed.as_secs_f64())
}

impl fmt::Display for ReportEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Region { region } => write!(f, "Running in region: {region}"),
            Self::PhaseStarted { phase: Phase::Creation } => f.write_str("Taking snapshots."),
            Self::PhaseStarted { phase: Phase::Cleanup } => f.write_str("Cleaning snapshots."),
            Self::PhaseCompleted {
                phase: Phase::Creation,
                elapsed,
            } => write!(f, "All snapshots complete in {} seconds.", seconds(*elapsed)),
            Self::PhaseCompleted {
                phase: Phase::Cleanup,
                elapsed,
            } => write!(f, "Snapshot cleanup complete in {} seconds.", seconds(*elapsed)),
            Self::PhaseAborted { phase } => write!(f, "Snapshot {phase} aborted."),
            Self::Volume {
                label,
                volume_id,
                size_gb,
            } => write!(f, "\nInstance: {label} Volume: {volume_id} ({size_gb}GB)"),
            Self::NotRequired { .. } => f.write_str("No snapshots required."),
            Self::CreateRequested { backup_id } => write!(f, "Creating snapshot: {backup_id}"),
            Self::Waiting { backup_id } => write!(f, "Waiting for snapshot: {backup_id}"),
            Self::CreateCompleted { backup_id, elapsed } => write!(
                f,
                "Snapshot {backup_id} complete in {} seconds.",
                seconds(*elapsed)
            ),
            Self::CreateErrored { backup_id } => write!(f, "Error creating snapshot {backup_id}."),
            Self::CreateUnverified { backup_id, elapsed } => write!(
                f,
                "Snapshot {backup_id} still not complete after {} seconds; moving on.",
                seconds(*elapsed)
            ),
            Self::CreateSkipped {
                volume_id,
                description,
            } => write!(
                f,
                "Dry run: would create snapshot of {volume_id} \"{description}\""
            ),
            Self::NoBackups { .. } => f.write_str("No snapshots exist."),
            Self::NothingToDelete { kept, .. } => {
                write!(f, "Nothing to delete; {kept} snapshot(s) kept.")
            }
            Self::Verdict {
                bucket,
                created_at,
                description,
                outcome,
                ..
            } => write!(
                f,
                "Snapshot code: {bucket} date: {} \"{description}\" - {outcome}",
                created_at.format("%d-%b-%Y %H:%M")
            ),
            Self::Orphan {
                backup_id,
                volume_id,
                created_at,
                description,
                outcome,
            } => write!(
                f,
                "orphan: {backup_id} volume: {volume_id} startTime: {} description: {description} - {outcome}",
                created_at.to_rfc3339()
            ),
            Self::Failure { context, errors } => {
                write!(f, "{context}:")?;
                for error in errors {
                    write!(f, "\n{error}")?;
                }
                Ok(())
            }
        }
    }
}

/// Sink for [`ReportEvent`]s.
pub trait Reporter {
    /// Emits one event.
    fn report(&self, event: &ReportEvent);
}

impl<T: Reporter + ?Sized> Reporter for &T {
    fn report(&self, event: &ReportEvent) {
        (**self).report(event);
    }
}

/// Writes each event to standard output.
#[derive(Clone, Copy, Debug, Default)]
pub struct StdoutReporter;

impl Reporter for StdoutReporter {
    fn report(&self, event: &ReportEvent) {
        write_event(io::stdout(), event);
    }
}

fn write_event(mut target: impl Write, event: &ReportEvent) {
    writeln!(target, "{event}").ok();
}
