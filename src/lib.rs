//! Core library for the `snapkeep` EBS snapshot tool.
//!
//! The crate decides which volumes need a fresh snapshot, takes those
//! snapshots one at a time, and thins the accumulated history to one snapshot
//! per day and then per week, reclaiming snapshots of deleted volumes along
//! the way. All provider access goes through [`CloudApi`]; [`AwsCliApi`]
//! implements it on top of the `aws` command-line client.

pub mod aws;
pub mod clock;
pub mod cloud;
pub mod config;
pub mod creator;
pub mod eligibility;
pub mod orchestrator;
pub mod orphan;
pub mod ownership;
pub mod report;
pub mod retention;
pub mod runner;
pub mod test_support;

pub use aws::AwsCliApi;
pub use clock::{Clock, SystemClock};
pub use cloud::{
    ApiError, Backup, BackupFilter, BackupId, BackupStatus, CloudApi, CloudError, Instance,
    InstanceId, InstanceState, Volume, VolumeId, VolumeState,
};
pub use config::{ConfigError, Region, SnapshotConfig, proxy_from_env};
pub use creator::{CreateError, CreationOutcome, CreatorSettings, SnapshotCreator};
pub use eligibility::{Eligibility, EligibilityClassifier, InstanceLookup};
pub use orchestrator::{CleanupSummary, CreationSummary, Orchestrator, RunError, RunSummary};
pub use orphan::{OrphanError, OrphanReaper, OrphanReport};
pub use ownership::{DescriptionPrefix, Ownership};
pub use report::{Phase, ReportEvent, Reporter, StdoutReporter};
pub use retention::{RetentionEngine, RetentionError, RetentionPolicy, RetentionReport};
pub use runner::{CommandOutput, CommandRunner, ProcessCommandRunner, RunnerError};
