//! Sequences the creation and cleanup phases of a run.
//!
//! Creation scans every volume and backs up the eligible ones one at a time.
//! Cleanup sweeps orphans once, then enforces retention on each volume that
//! is still eligible. Every decision re-fetches provider state.

use std::time::{Duration, Instant};

use chrono::TimeDelta;
use thiserror::Error;

use crate::clock::Clock;
use crate::cloud::{ApiError, BackupId, CloudApi, CloudError, Volume, VolumeId};
use crate::config::SnapshotConfig;
use crate::creator::{CreateError, CreationOutcome, CreatorSettings, SnapshotCreator};
use crate::eligibility::{EligibilityClassifier, InstanceLookup, resolve_instance};
use crate::orphan::{OrphanReaper, OrphanReport};
use crate::ownership::DescriptionPrefix;
use crate::report::{Phase, ReportEvent, Reporter};
use crate::retention::{RetentionEngine, RetentionError, RetentionPolicy, RetentionReport};

/// Failures that abort a phase.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum RunError {
    /// The volume listing failed.
    #[error("failed to list volumes during {phase}: {source}")]
    ListVolumes {
        /// Phase that was running.
        phase: Phase,
        /// Provider failure.
        source: CloudError,
    },
    /// A volume's backup history could not be fetched.
    #[error(transparent)]
    Retention(#[from] RetentionError),
}

impl RunError {
    /// Phase that was aborted.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        match self {
            Self::ListVolumes { phase, .. } => *phase,
            Self::Retention(_) => Phase::Cleanup,
        }
    }

    fn context(&self) -> String {
        match self {
            Self::ListVolumes { .. } => String::from("Failed to retrieve volumes"),
            Self::Retention(RetentionError::Listing { volume_id, .. }) => {
                format!("Failed to retrieve snapshots of {volume_id}")
            }
        }
    }

    /// Provider error entries for operator output.
    #[must_use]
    pub fn api_errors(&self) -> Vec<ApiError> {
        match self {
            Self::ListVolumes { source, .. } => source.api_errors(),
            Self::Retention(err) => err.api_errors(),
        }
    }
}

/// Result of the creation phase.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CreationSummary {
    /// Volumes examined.
    pub examined: usize,
    /// Volumes found eligible.
    pub eligible: usize,
    /// Backups that completed.
    pub completed: Vec<BackupId>,
    /// Backups still pending at the wait ceiling.
    pub unverified: Vec<BackupId>,
    /// Backups skipped because of a dry run.
    pub skipped: usize,
    /// Volumes whose backup failed.
    pub failed: Vec<VolumeId>,
}

/// Result of the cleanup phase.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CleanupSummary {
    /// Orphan sweep outcome; empty when the sweep failed.
    pub orphans: OrphanReport,
    /// Whether the orphan sweep stopped on an error.
    pub orphan_sweep_failed: bool,
    /// Retention outcome per eligible volume.
    pub volumes: Vec<(VolumeId, RetentionReport)>,
}

impl CleanupSummary {
    /// Backups deleted (or that would be) across the orphan sweep and
    /// retention.
    #[must_use]
    pub fn deleted(&self) -> Vec<BackupId> {
        self.orphans
            .deleted
            .iter()
            .chain(self.volumes.iter().flat_map(|(_, report)| &report.deleted))
            .cloned()
            .collect()
    }
}

/// Result of a full run.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RunSummary {
    /// Creation phase.
    pub creation: CreationSummary,
    /// Cleanup phase.
    pub cleanup: CleanupSummary,
}

/// Drives both phases against one provider.
#[derive(Debug)]
pub struct Orchestrator<A, R, C> {
    api: A,
    reporter: R,
    clock: C,
    ownership: DescriptionPrefix,
    classifier: EligibilityClassifier,
    creator: CreatorSettings,
    retention: RetentionPolicy,
    orphan_after: TimeDelta,
    dry_run: bool,
}

impl<A, R, C> Orchestrator<A, R, C>
where
    A: CloudApi,
    R: Reporter,
    C: Clock,
{
    /// Creates an orchestrator from validated configuration.
    #[must_use]
    pub fn new(api: A, reporter: R, clock: C, config: &SnapshotConfig) -> Self {
        Self {
            api,
            reporter,
            clock,
            ownership: DescriptionPrefix::new(config.description_prefix.clone()),
            classifier: EligibilityClassifier::new(
                config.root_device.clone(),
                config.force_tag.clone(),
            ),
            creator: CreatorSettings {
                poll_interval: config.poll_interval(),
                wait_timeout: config.wait_timeout(),
                dry_run: config.dry_run,
            },
            retention: RetentionPolicy {
                daily_window: config.daily_window(),
                delete_after: config.delete_after(),
            },
            orphan_after: config.orphan_after(),
            dry_run: config.dry_run,
        }
    }

    /// Overrides the snapshot status polling interval.
    ///
    /// This is primarily used by tests to keep waits fast.
    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.creator.poll_interval = interval;
        self
    }

    /// Runs creation, then cleanup.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] from whichever phase aborted; cleanup does not
    /// run when creation aborts.
    pub fn run(&self) -> Result<RunSummary, RunError> {
        let creation = self.run_creation()?;
        let cleanup = self.run_cleanup()?;
        Ok(RunSummary { creation, cleanup })
    }

    /// Scans volumes and backs up the eligible ones.
    ///
    /// Per-volume failures are reported and counted; the scan continues.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::ListVolumes`] when the volume listing fails.
    pub fn run_creation(&self) -> Result<CreationSummary, RunError> {
        self.timed(Phase::Creation, || {
            let volumes = self.list_volumes(Phase::Creation)?;
            let creator = SnapshotCreator::new(
                &self.api,
                &self.ownership,
                &self.reporter,
                self.creator,
            );
            let mut summary = CreationSummary::default();
            for volume in &volumes {
                summary.examined += 1;
                let lookup = self.resolve(volume);
                let label = lookup.label();
                self.announce(volume, &label);
                if !self.is_eligible(volume, &lookup) {
                    continue;
                }
                summary.eligible += 1;
                match creator.create_and_wait(volume, &label) {
                    Ok(CreationOutcome::Completed { backup_id, .. }) => {
                        summary.completed.push(backup_id);
                    }
                    Ok(CreationOutcome::Unverified { backup_id, .. }) => {
                        summary.unverified.push(backup_id);
                    }
                    Ok(CreationOutcome::DryRun { .. }) => summary.skipped += 1,
                    Err(err) => {
                        self.creation_failed(volume, &err);
                        summary.failed.push(volume.id.clone());
                    }
                }
            }
            Ok(summary)
        })
    }

    /// Sweeps orphans, then enforces retention on eligible volumes.
    ///
    /// An orphan sweep failure is reported and retention still runs.
    ///
    /// # Errors
    ///
    /// Returns [`RunError`] when the volume listing or a volume's backup
    /// listing fails.
    pub fn run_cleanup(&self) -> Result<CleanupSummary, RunError> {
        self.timed(Phase::Cleanup, || {
            let mut summary = CleanupSummary::default();
            let reaper = OrphanReaper::new(
                &self.api,
                &self.ownership,
                &self.reporter,
                &self.clock,
                self.orphan_after,
                self.dry_run,
            );
            match reaper.reap_orphans() {
                Ok(report) => summary.orphans = report,
                Err(err) => {
                    tracing::warn!(error = %err, "orphan sweep aborted");
                    self.reporter.report(&ReportEvent::Failure {
                        context: String::from("Orphan sweep aborted"),
                        errors: err.api_errors(),
                    });
                    summary.orphan_sweep_failed = true;
                }
            }

            let engine = RetentionEngine::new(
                &self.api,
                &self.ownership,
                &self.reporter,
                &self.clock,
                self.retention,
                self.dry_run,
            );
            for volume in &self.list_volumes(Phase::Cleanup)? {
                let lookup = self.resolve(volume);
                self.announce(volume, &lookup.label());
                if !self.is_eligible(volume, &lookup) {
                    continue;
                }
                let report = engine.reconcile(&volume.id)?;
                summary.volumes.push((volume.id.clone(), report));
            }
            Ok(summary)
        })
    }

    fn list_volumes(&self, phase: Phase) -> Result<Vec<Volume>, RunError> {
        self.api
            .list_volumes()
            .map_err(|source| RunError::ListVolumes { phase, source })
    }

    fn resolve(&self, volume: &Volume) -> InstanceLookup {
        let lookup = resolve_instance(&self.api, volume);
        if let InstanceLookup::Failed(errors) = &lookup {
            self.reporter.report(&ReportEvent::Failure {
                context: format!("Failed to retrieve instance status for {}", volume.id),
                errors: errors.clone(),
            });
        }
        lookup
    }

    fn announce(&self, volume: &Volume, label: &str) {
        self.reporter.report(&ReportEvent::Volume {
            label: label.to_owned(),
            volume_id: volume.id.clone(),
            size_gb: volume.size_gb,
        });
    }

    fn is_eligible(&self, volume: &Volume, lookup: &InstanceLookup) -> bool {
        let eligibility = self.classifier.classify(volume, lookup);
        tracing::debug!(volume = %volume.id, %eligibility, "classified volume");
        if !eligibility.is_eligible() {
            self.reporter.report(&ReportEvent::NotRequired {
                volume_id: volume.id.clone(),
            });
        }
        eligibility.is_eligible()
    }

    fn creation_failed(&self, volume: &Volume, err: &CreateError) {
        tracing::warn!(volume = %volume.id, error = %err, "snapshot creation failed");
        // Errored backups were already reported by the creator.
        if matches!(err, CreateError::Errored { .. }) {
            return;
        }
        self.reporter.report(&ReportEvent::Failure {
            context: format!("Failed to snapshot volume {}", volume.id),
            errors: err.api_errors(),
        });
    }

    fn timed<T>(
        &self,
        phase: Phase,
        body: impl FnOnce() -> Result<T, RunError>,
    ) -> Result<T, RunError> {
        self.reporter.report(&ReportEvent::PhaseStarted { phase });
        let started = Instant::now();
        match body() {
            Ok(value) => {
                let elapsed = started.elapsed();
                tracing::info!(%phase, duration_secs = elapsed.as_secs_f64(), "phase complete");
                self.reporter
                    .report(&ReportEvent::PhaseCompleted { phase, elapsed });
                Ok(value)
            }
            Err(err) => {
                tracing::error!(%phase, error = %err, "phase aborted");
                self.reporter.report(&ReportEvent::Failure {
                    context: err.context(),
                    errors: err.api_errors(),
                });
                self.reporter.report(&ReportEvent::PhaseAborted { phase });
                Err(err)
            }
        }
    }
}
