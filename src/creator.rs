//! Creates one backup and blocks until it settles.
//!
//! Backups are taken one at a time: each request is followed by a poll loop
//! that only returns once the copy completes, fails, or the wait ceiling is
//! reached.

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::cloud::{
    ApiError, BackupFilter, BackupId, BackupStatus, CloudApi, CloudError, Volume, VolumeId,
};
use crate::ownership::Ownership;
use crate::report::{ReportEvent, Reporter};

/// Timing and mode settings for [`SnapshotCreator`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct CreatorSettings {
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Ceiling on the total wait for one backup.
    pub wait_timeout: Duration,
    /// Report instead of creating.
    pub dry_run: bool,
}

/// Successful end states of a creation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CreationOutcome {
    /// The provider reported the backup as completed.
    Completed {
        /// New backup.
        backup_id: BackupId,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// The wait ceiling passed before the backup settled.
    Unverified {
        /// New backup.
        backup_id: BackupId,
        /// Time spent waiting.
        elapsed: Duration,
    },
    /// Dry run; nothing was requested.
    DryRun {
        /// Description the backup would have carried.
        description: String,
    },
}

/// Failures while creating a backup.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum CreateError {
    /// The create request was rejected.
    #[error("failed to create snapshot of {volume_id}: {source}")]
    Request {
        /// Volume being backed up.
        volume_id: VolumeId,
        /// Provider failure.
        source: CloudError,
    },
    /// The provider moved the backup to `error`.
    #[error("snapshot {backup_id} entered the error state")]
    Errored {
        /// Failed backup.
        backup_id: BackupId,
    },
    /// A status poll failed.
    #[error("failed to query status of snapshot {backup_id}: {source}")]
    Status {
        /// Backup being polled.
        backup_id: BackupId,
        /// Provider failure.
        source: CloudError,
    },
}

impl CreateError {
    /// Provider error entries for operator output.
    #[must_use]
    pub fn api_errors(&self) -> Vec<ApiError> {
        match self {
            Self::Request { source, .. } | Self::Status { source, .. } => source.api_errors(),
            Self::Errored { backup_id } => vec![ApiError::new(
                "SnapshotError",
                format!("snapshot {backup_id} entered the error state"),
            )],
        }
    }
}

/// Issues create requests and waits for them.
pub struct SnapshotCreator<'a, A> {
    api: &'a A,
    ownership: &'a dyn Ownership,
    reporter: &'a dyn Reporter,
    settings: CreatorSettings,
}

impl<'a, A: CloudApi> SnapshotCreator<'a, A> {
    /// Creates a creator.
    #[must_use]
    pub fn new(
        api: &'a A,
        ownership: &'a dyn Ownership,
        reporter: &'a dyn Reporter,
        settings: CreatorSettings,
    ) -> Self {
        Self {
            api,
            ownership,
            reporter,
            settings,
        }
    }

    /// Backs up `volume` under a description derived from `label`, then
    /// waits for the backup to settle.
    ///
    /// # Errors
    ///
    /// Returns [`CreateError::Request`] when the provider rejects the request,
    /// [`CreateError::Errored`] when the backup fails and
    /// [`CreateError::Status`] when a poll fails.
    pub fn create_and_wait(
        &self,
        volume: &Volume,
        label: &str,
    ) -> Result<CreationOutcome, CreateError> {
        let description = self.ownership.description_for(label);
        if self.settings.dry_run {
            self.reporter.report(&ReportEvent::CreateSkipped {
                volume_id: volume.id.clone(),
                description: description.clone(),
            });
            return Ok(CreationOutcome::DryRun { description });
        }

        let backup_id = self
            .api
            .create_backup(&volume.id, &description)
            .map_err(|source| CreateError::Request {
                volume_id: volume.id.clone(),
                source,
            })?;
        self.reporter.report(&ReportEvent::CreateRequested {
            backup_id: backup_id.clone(),
        });
        self.wait_for(backup_id)
    }

    fn wait_for(&self, backup_id: BackupId) -> Result<CreationOutcome, CreateError> {
        self.reporter.report(&ReportEvent::Waiting {
            backup_id: backup_id.clone(),
        });
        let started = Instant::now();
        while started.elapsed() < self.settings.wait_timeout {
            match self.status_of(&backup_id)? {
                Some(BackupStatus::Completed) => {
                    let elapsed = started.elapsed();
                    self.reporter.report(&ReportEvent::CreateCompleted {
                        backup_id: backup_id.clone(),
                        elapsed,
                    });
                    return Ok(CreationOutcome::Completed { backup_id, elapsed });
                }
                Some(BackupStatus::Error) => {
                    self.reporter.report(&ReportEvent::CreateErrored {
                        backup_id: backup_id.clone(),
                    });
                    return Err(CreateError::Errored { backup_id });
                }
                status => {
                    tracing::debug!(backup = %backup_id, ?status, "snapshot still pending");
                }
            }
            thread::sleep(self.settings.poll_interval);
        }

        let elapsed = started.elapsed();
        tracing::warn!(
            backup = %backup_id,
            waited_secs = elapsed.as_secs(),
            "snapshot did not settle before the wait ceiling"
        );
        self.reporter.report(&ReportEvent::CreateUnverified {
            backup_id: backup_id.clone(),
            elapsed,
        });
        Ok(CreationOutcome::Unverified { backup_id, elapsed })
    }

    /// Current status, or `None` while the backup is not yet listed.
    fn status_of(&self, backup_id: &BackupId) -> Result<Option<BackupStatus>, CreateError> {
        let backups = self
            .api
            .list_backups(&BackupFilter::by_id(backup_id))
            .map_err(|source| CreateError::Status {
                backup_id: backup_id.clone(),
                source,
            })?;
        Ok(backups
            .into_iter()
            .find(|backup| &backup.id == backup_id)
            .map(|backup| backup.status))
    }
}
