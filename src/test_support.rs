//! Test support utilities shared across unit and integration tests.

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::ffi::OsString;
use std::rc::Rc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};

use crate::clock::Clock;
use crate::cloud::{
    ApiError, Attachment, Backup, BackupFilter, BackupId, BackupStatus, CloudApi, CloudError,
    Instance, InstanceId, InstanceState, Volume, VolumeId, VolumeState,
};
use crate::config::{
    DEFAULT_AWS_BIN, DEFAULT_DESCRIPTION_PREFIX, DEFAULT_FORCE_TAG, DEFAULT_ROOT_DEVICE,
    SnapshotConfig,
};
use crate::report::{ReportEvent, Reporter};
use crate::runner::{CommandOutput, CommandRunner, RunnerError};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Rc<RefCell<VecDeque<CommandOutput>>>,
    invocations: Rc<RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables passed to the program.
    pub envs: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Pushes a successful exit status with the given stdout.
    pub fn push_stdout(&self, stdout: impl Into<String>) {
        self.push_output(Some(0), stdout, "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            envs: envs.to_vec(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| RunnerError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Provider call recorded by [`FakeCloud`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ApiCall {
    /// `list_volumes`.
    ListVolumes,
    /// `describe_volume`.
    DescribeVolume(VolumeId),
    /// `describe_instance`.
    DescribeInstance(InstanceId),
    /// `list_backups`.
    ListBackups(BackupFilter),
    /// `create_backup`.
    CreateBackup {
        /// Volume being backed up.
        volume_id: VolumeId,
        /// Description supplied.
        description: String,
    },
    /// `delete_backup`.
    DeleteBackup(BackupId),
}

impl ApiCall {
    /// Returns `true` for calls that change provider state.
    #[must_use]
    pub const fn is_mutation(&self) -> bool {
        matches!(self, Self::CreateBackup { .. } | Self::DeleteBackup(_))
    }
}

#[derive(Debug, Default)]
struct FakeState {
    volumes: Vec<Volume>,
    instances: Vec<Instance>,
    backups: Vec<Backup>,
    status_scripts: HashMap<BackupId, VecDeque<BackupStatus>>,
    calls: Vec<ApiCall>,
    next_id: usize,
    creation_time: Option<DateTime<Utc>>,
    created_status: Option<BackupStatus>,
    fail_list_volumes: bool,
    fail_list_backups: bool,
    failing_volume_lookups: BTreeSet<VolumeId>,
    failing_instance_lookups: BTreeSet<InstanceId>,
    failing_creates: BTreeSet<VolumeId>,
    failing_deletes: BTreeSet<BackupId>,
}

fn simulated(operation: &str) -> CloudError {
    CloudError::Api {
        operation: operation.to_owned(),
        errors: vec![ApiError::new("InternalError", "simulated failure")],
    }
}

/// In-memory provider with call recording and failure injection.
///
/// Clones share state, so a test can keep a handle while the engine owns
/// another.
#[derive(Clone, Debug, Default)]
pub struct FakeCloud {
    state: Rc<RefCell<FakeState>>,
}

impl FakeCloud {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a volume.
    pub fn add_volume(&self, volume: Volume) {
        self.state.borrow_mut().volumes.push(volume);
    }

    /// Removes a volume, leaving its backups behind.
    pub fn remove_volume(&self, volume_id: &str) {
        self.state
            .borrow_mut()
            .volumes
            .retain(|volume| volume.id.as_str() != volume_id);
    }

    /// Adds an instance.
    pub fn add_instance(&self, instance: Instance) {
        self.state.borrow_mut().instances.push(instance);
    }

    /// Adds a backup; listings return backups in insertion order.
    pub fn add_backup(&self, backup: Backup) {
        self.state.borrow_mut().backups.push(backup);
    }

    /// Scripts the statuses reported for `backup_id` on successive polls.
    /// The last status sticks once the script runs out.
    pub fn script_status(&self, backup_id: &str, statuses: impl IntoIterator<Item = BackupStatus>) {
        self.state
            .borrow_mut()
            .status_scripts
            .insert(BackupId::from(backup_id), statuses.into_iter().collect());
    }

    /// Sets the creation timestamp given to backups created from now on.
    pub fn set_creation_time(&self, at: DateTime<Utc>) {
        self.state.borrow_mut().creation_time = Some(at);
    }

    /// Sets the initial status of backups created from now on
    /// (`completed` by default).
    pub fn set_created_status(&self, status: BackupStatus) {
        self.state.borrow_mut().created_status = Some(status);
    }

    /// Makes `list_volumes` fail.
    pub fn fail_list_volumes(&self) {
        self.state.borrow_mut().fail_list_volumes = true;
    }

    /// Makes every `list_backups` call fail.
    pub fn fail_list_backups(&self) {
        self.state.borrow_mut().fail_list_backups = true;
    }

    /// Makes `describe_volume` fail for `volume_id`.
    pub fn fail_volume_lookup(&self, volume_id: &str) {
        self.state
            .borrow_mut()
            .failing_volume_lookups
            .insert(VolumeId::from(volume_id));
    }

    /// Makes `describe_instance` fail for `instance_id`.
    pub fn fail_instance_lookup(&self, instance_id: &str) {
        self.state
            .borrow_mut()
            .failing_instance_lookups
            .insert(InstanceId::from(instance_id));
    }

    /// Makes `create_backup` fail for `volume_id`.
    pub fn fail_create(&self, volume_id: &str) {
        self.state
            .borrow_mut()
            .failing_creates
            .insert(VolumeId::from(volume_id));
    }

    /// Makes `delete_backup` fail for `backup_id`.
    pub fn fail_delete(&self, backup_id: &str) {
        self.state
            .borrow_mut()
            .failing_deletes
            .insert(BackupId::from(backup_id));
    }

    /// Returns every call made so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ApiCall> {
        self.state.borrow().calls.clone()
    }

    /// Number of create/delete calls made so far.
    #[must_use]
    pub fn mutation_count(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| call.is_mutation())
            .count()
    }

    /// Volume identifiers passed to `describe_volume`, in call order.
    #[must_use]
    pub fn volume_lookups(&self) -> Vec<VolumeId> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::DescribeVolume(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Backup identifiers passed to `delete_backup`, in call order.
    #[must_use]
    pub fn deleted_ids(&self) -> Vec<BackupId> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|call| match call {
                ApiCall::DeleteBackup(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Backups currently stored for `volume_id`, in insertion order.
    #[must_use]
    pub fn backups_of(&self, volume_id: &str) -> Vec<Backup> {
        self.state
            .borrow()
            .backups
            .iter()
            .filter(|backup| backup.volume_id.as_str() == volume_id)
            .cloned()
            .collect()
    }

    fn record(&self, call: ApiCall) {
        self.state.borrow_mut().calls.push(call);
    }

    fn advance_status(state: &mut FakeState, backup_id: &BackupId) {
        let Some(script) = state.status_scripts.get_mut(backup_id) else {
            return;
        };
        let next = if script.len() > 1 {
            script.pop_front()
        } else {
            script.front().cloned()
        };
        let Some(status) = next else {
            return;
        };
        if let Some(backup) = state.backups.iter_mut().find(|b| &b.id == backup_id) {
            backup.status = status;
        }
    }
}

impl CloudApi for FakeCloud {
    fn list_volumes(&self) -> Result<Vec<Volume>, CloudError> {
        self.record(ApiCall::ListVolumes);
        let state = self.state.borrow();
        if state.fail_list_volumes {
            return Err(simulated("DescribeVolumes"));
        }
        Ok(state.volumes.clone())
    }

    fn describe_volume(&self, volume_id: &VolumeId) -> Result<Option<Volume>, CloudError> {
        self.record(ApiCall::DescribeVolume(volume_id.clone()));
        let state = self.state.borrow();
        if state.failing_volume_lookups.contains(volume_id) {
            return Err(simulated("DescribeVolumes"));
        }
        Ok(state
            .volumes
            .iter()
            .find(|volume| &volume.id == volume_id)
            .cloned())
    }

    fn describe_instance(&self, instance_id: &InstanceId) -> Result<Option<Instance>, CloudError> {
        self.record(ApiCall::DescribeInstance(instance_id.clone()));
        let state = self.state.borrow();
        if state.failing_instance_lookups.contains(instance_id) {
            return Err(simulated("DescribeInstances"));
        }
        Ok(state
            .instances
            .iter()
            .find(|instance| &instance.id == instance_id)
            .cloned())
    }

    fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>, CloudError> {
        self.record(ApiCall::ListBackups(filter.clone()));
        let mut state = self.state.borrow_mut();
        if state.fail_list_backups {
            return Err(simulated("DescribeSnapshots"));
        }
        if let Some(backup_id) = &filter.backup_id {
            Self::advance_status(&mut state, backup_id);
        }
        Ok(state
            .backups
            .iter()
            .filter(|backup| {
                filter
                    .owner_prefix
                    .as_ref()
                    .is_none_or(|prefix| backup.description.starts_with(prefix.as_str()))
            })
            .filter(|backup| {
                filter
                    .volume_id
                    .as_ref()
                    .is_none_or(|id| &backup.volume_id == id)
            })
            .filter(|backup| filter.backup_id.as_ref().is_none_or(|id| &backup.id == id))
            .cloned()
            .collect())
    }

    fn create_backup(
        &self,
        volume_id: &VolumeId,
        description: &str,
    ) -> Result<BackupId, CloudError> {
        self.record(ApiCall::CreateBackup {
            volume_id: volume_id.clone(),
            description: description.to_owned(),
        });
        let mut state = self.state.borrow_mut();
        if state.failing_creates.contains(volume_id) {
            return Err(simulated("CreateSnapshot"));
        }
        state.next_id += 1;
        let id = BackupId::new(format!("snap-new-{}", state.next_id));
        let backup = Backup {
            id: id.clone(),
            volume_id: volume_id.clone(),
            created_at: state.creation_time.unwrap_or_else(reference_now),
            status: state
                .created_status
                .clone()
                .unwrap_or(BackupStatus::Completed),
            description: description.to_owned(),
        };
        state.backups.push(backup);
        Ok(id)
    }

    fn delete_backup(&self, backup_id: &BackupId) -> Result<(), CloudError> {
        self.record(ApiCall::DeleteBackup(backup_id.clone()));
        let mut state = self.state.borrow_mut();
        if state.failing_deletes.contains(backup_id) {
            return Err(simulated("DeleteSnapshot"));
        }
        state.backups.retain(|backup| &backup.id != backup_id);
        Ok(())
    }
}

/// Reporter that keeps every event for later assertions.
#[derive(Clone, Debug, Default)]
pub struct RecordingReporter {
    events: Rc<RefCell<Vec<ReportEvent>>>,
}

impl RecordingReporter {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the recorded events.
    #[must_use]
    pub fn events(&self) -> Vec<ReportEvent> {
        self.events.borrow().clone()
    }

    /// Returns the recorded events rendered as text.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.events
            .borrow()
            .iter()
            .map(ToString::to_string)
            .collect()
    }
}

impl Reporter for RecordingReporter {
    fn report(&self, event: &ReportEvent) {
        self.events.borrow_mut().push(event.clone());
    }
}

/// Clock frozen at a fixed instant.
#[derive(Clone, Copy, Debug)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Fixed reference instant used by tests: Saturday 2024-06-15 12:00 UTC.
#[must_use]
pub fn reference_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 15, 12, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

/// Returns `now` minus `days` whole days.
#[must_use]
pub fn days_ago(now: DateTime<Utc>, days: i64) -> DateTime<Utc> {
    now - TimeDelta::days(days)
}

/// Builds a completed backup.
#[must_use]
pub fn backup_at(
    id: &str,
    volume_id: &str,
    created_at: DateTime<Utc>,
    description: &str,
) -> Backup {
    Backup {
        id: BackupId::from(id),
        volume_id: VolumeId::from(volume_id),
        created_at,
        status: BackupStatus::Completed,
        description: description.to_owned(),
    }
}

/// Builds an in-use volume attached to `instance_id` at `device`.
#[must_use]
pub fn attached_volume(id: &str, instance_id: &str, device: &str) -> Volume {
    Volume {
        id: VolumeId::from(id),
        size_gb: 8,
        state: VolumeState::InUse,
        attachment: Some(Attachment {
            instance_id: InstanceId::from(instance_id),
            device: device.to_owned(),
        }),
        tags: BTreeMap::new(),
    }
}

/// Builds an available, unattached volume.
#[must_use]
pub fn detached_volume(id: &str) -> Volume {
    Volume {
        id: VolumeId::from(id),
        size_gb: 8,
        state: VolumeState::Available,
        attachment: None,
        tags: BTreeMap::new(),
    }
}

/// Returns `volume` with an extra tag.
#[must_use]
pub fn tagged(mut volume: Volume, key: &str) -> Volume {
    volume.tags.insert(key.to_owned(), String::new());
    volume
}

/// Builds an instance in `state`, optionally named.
#[must_use]
pub fn instance(id: &str, state: InstanceState, name: Option<&str>) -> Instance {
    let mut tags = BTreeMap::new();
    if let Some(value) = name {
        tags.insert(String::from("Name"), value.to_owned());
    }
    Instance {
        id: InstanceId::from(id),
        state,
        tags,
    }
}

/// Configuration with the shipped defaults.
#[must_use]
pub fn test_config() -> SnapshotConfig {
    SnapshotConfig {
        poll_interval_secs: 15,
        wait_timeout_secs: 3600,
        daily_window_days: 7,
        delete_after_days: 30,
        orphan_after_days: 30,
        description_prefix: DEFAULT_DESCRIPTION_PREFIX.to_owned(),
        force_tag: DEFAULT_FORCE_TAG.to_owned(),
        root_device: DEFAULT_ROOT_DEVICE.to_owned(),
        dry_run: false,
        aws_bin: DEFAULT_AWS_BIN.to_owned(),
    }
}
