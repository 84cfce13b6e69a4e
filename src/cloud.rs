//! Provider abstraction for block-storage volumes, instances, and backups.
//!
//! Everything the engine knows about the cloud arrives through [`CloudApi`].
//! Values are plain snapshots of provider state fetched per call; nothing in
//! this module caches.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;

use chrono::{DateTime, Utc};
use thiserror::Error;

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
        pub struct $name(String);

        impl $name {
            /// Wraps a provider identifier.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Provider identifier of a block-storage volume.
    VolumeId
);
newtype!(
    /// Provider identifier of a compute instance.
    InstanceId
);
newtype!(
    /// Provider identifier of a backup (snapshot).
    BackupId
);

/// Attachment state reported for a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VolumeState {
    /// Attached to an instance.
    InUse,
    /// Not attached.
    Available,
    /// Any other provider state, kept verbatim.
    Other(String),
}

impl From<&str> for VolumeState {
    fn from(value: &str) -> Self {
        match value {
            "in-use" => Self::InUse,
            "available" => Self::Available,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Where a volume is attached.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Attachment {
    /// Instance the volume is attached to.
    pub instance_id: InstanceId,
    /// Device path on the instance (for example `/dev/sda1`).
    pub device: String,
}

/// Block-storage volume as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Volume {
    /// Volume identifier.
    pub id: VolumeId,
    /// Size in GiB.
    pub size_gb: u64,
    /// Attachment state.
    pub state: VolumeState,
    /// Current attachment, if any.
    pub attachment: Option<Attachment>,
    /// Tags keyed by tag name.
    pub tags: BTreeMap<String, String>,
}

impl Volume {
    /// Returns `true` when the volume carries a tag named `key`.
    #[must_use]
    pub fn has_tag(&self, key: &str) -> bool {
        self.tags.contains_key(key)
    }
}

/// Lifecycle state of a compute instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceState {
    /// Booting.
    Pending,
    /// Running.
    Running,
    /// Shutting down towards `stopped`.
    Stopping,
    /// Stopped.
    Stopped,
    /// Shutting down towards `terminated`.
    ShuttingDown,
    /// Terminated.
    Terminated,
    /// Any other provider state, kept verbatim.
    Other(String),
}

impl From<&str> for InstanceState {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "stopping" => Self::Stopping,
            "stopped" => Self::Stopped,
            "shutting-down" => Self::ShuttingDown,
            "terminated" => Self::Terminated,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Compute instance as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Instance {
    /// Instance identifier.
    pub id: InstanceId,
    /// Lifecycle state.
    pub state: InstanceState,
    /// Tags keyed by tag name.
    pub tags: BTreeMap<String, String>,
}

impl Instance {
    /// Returns `true` when the instance is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == InstanceState::Running
    }

    /// Returns the value of the `Name` tag, if present.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.tags.get("Name").map(String::as_str)
    }
}

/// Provider-side progress of a backup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum BackupStatus {
    /// Copy still in progress.
    Pending,
    /// Copy finished.
    Completed,
    /// Copy failed.
    Error,
    /// Any other provider state, kept verbatim.
    Other(String),
}

impl From<&str> for BackupStatus {
    fn from(value: &str) -> Self {
        match value {
            "pending" => Self::Pending,
            "completed" => Self::Completed,
            "error" => Self::Error,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// Point-in-time backup of a volume.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Backup {
    /// Backup identifier.
    pub id: BackupId,
    /// Volume the backup was taken from. The volume may no longer exist.
    pub volume_id: VolumeId,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Provider-side status.
    pub status: BackupStatus,
    /// Free-text description.
    pub description: String,
}

/// Sort key used to order backup histories.
#[must_use]
pub const fn creation_key(backup: &Backup) -> DateTime<Utc> {
    backup.created_at
}

/// Orders backups oldest first.
///
/// The sort is stable, so backups sharing a timestamp keep the order in which
/// the provider returned them.
pub fn sort_chronologically(backups: &mut [Backup]) {
    backups.sort_by_key(creation_key);
}

/// Narrows a backup listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct BackupFilter {
    /// Only backups whose description starts with this prefix.
    pub owner_prefix: Option<String>,
    /// Only backups of this volume.
    pub volume_id: Option<VolumeId>,
    /// Only this backup.
    pub backup_id: Option<BackupId>,
}

impl BackupFilter {
    /// Filter matching a single backup.
    #[must_use]
    pub fn by_id(backup_id: &BackupId) -> Self {
        Self {
            backup_id: Some(backup_id.clone()),
            ..Self::default()
        }
    }

    /// Restricts the filter to backups of `volume_id`.
    #[must_use]
    pub fn volume(mut self, volume_id: &VolumeId) -> Self {
        self.volume_id = Some(volume_id.clone());
        self
    }

    /// Restricts the filter to descriptions starting with `prefix`.
    #[must_use]
    pub fn owner_prefix(mut self, prefix: Option<String>) -> Self {
        self.owner_prefix = prefix;
        self
    }
}

/// Single error entry returned by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ApiError {
    /// Provider error code (for example `InvalidSnapshot.InUse`).
    pub code: String,
    /// Provider error message.
    pub message: String,
}

impl ApiError {
    /// Creates an error entry.
    #[must_use]
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.code, self.message)
    }
}

fn render_errors(errors: &[ApiError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors raised by [`CloudApi`] implementations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum CloudError {
    /// The provider rejected the call.
    #[error("{operation} failed: {}", render_errors(.errors))]
    Api {
        /// Provider operation that failed.
        operation: String,
        /// Structured errors returned by the provider.
        errors: Vec<ApiError>,
    },
    /// The provider could not be reached at all.
    #[error("failed to invoke {program} for {operation}: {message}")]
    Transport {
        /// Program or endpoint used for the call.
        program: String,
        /// Provider operation being attempted.
        operation: String,
        /// Underlying failure.
        message: String,
    },
    /// The provider answered with something unreadable.
    #[error("failed to parse {operation} output: {message}")]
    Parse {
        /// Provider operation whose output was malformed.
        operation: String,
        /// Parser error message.
        message: String,
    },
}

impl CloudError {
    /// Returns the provider error entries to show to the operator.
    ///
    /// Transport and parse failures are rendered as a single synthetic entry.
    #[must_use]
    pub fn api_errors(&self) -> Vec<ApiError> {
        match self {
            Self::Api { errors, .. } => errors.clone(),
            Self::Transport { message, .. } => vec![ApiError::new("Transport", message.clone())],
            Self::Parse { message, .. } => vec![ApiError::new("Parse", message.clone())],
        }
    }
}

/// Interface to the block-storage provider.
///
/// Implementations block until the provider answers.
pub trait CloudApi {
    /// Lists every volume in the region.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider call fails.
    fn list_volumes(&self) -> Result<Vec<Volume>, CloudError>;

    /// Looks up a single volume; `Ok(None)` means it no longer exists.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider call fails.
    fn describe_volume(&self, volume_id: &VolumeId) -> Result<Option<Volume>, CloudError>;

    /// Looks up a single instance; `Ok(None)` means it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider call fails.
    fn describe_instance(&self, instance_id: &InstanceId) -> Result<Option<Instance>, CloudError>;

    /// Lists backups matching `filter`, in provider order.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider call fails.
    fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>, CloudError>;

    /// Starts a backup of `volume_id` and returns its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider rejects the request.
    fn create_backup(
        &self,
        volume_id: &VolumeId,
        description: &str,
    ) -> Result<BackupId, CloudError>;

    /// Deletes a backup.
    ///
    /// # Errors
    ///
    /// Returns [`CloudError`] when the provider rejects the request.
    fn delete_backup(&self, backup_id: &BackupId) -> Result<(), CloudError>;
}

impl<T: CloudApi + ?Sized> CloudApi for &T {
    fn list_volumes(&self) -> Result<Vec<Volume>, CloudError> {
        (**self).list_volumes()
    }

    fn describe_volume(&self, volume_id: &VolumeId) -> Result<Option<Volume>, CloudError> {
        (**self).describe_volume(volume_id)
    }

    fn describe_instance(&self, instance_id: &InstanceId) -> Result<Option<Instance>, CloudError> {
        (**self).describe_instance(instance_id)
    }

    fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>, CloudError> {
        (**self).list_backups(filter)
    }

    fn create_backup(
        &self,
        volume_id: &VolumeId,
        description: &str,
    ) -> Result<BackupId, CloudError> {
        (**self).create_backup(volume_id, description)
    }

    fn delete_backup(&self, backup_id: &BackupId) -> Result<(), CloudError> {
        (**self).delete_backup(backup_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn backup(id: &str, secs: i64) -> Backup {
        Backup {
            id: BackupId::from(id),
            volume_id: VolumeId::from("vol-1"),
            created_at: Utc
                .timestamp_opt(secs, 0)
                .single()
                .unwrap_or_else(|| panic!("valid timestamp {secs}")),
            status: BackupStatus::Completed,
            description: String::from("Backup test"),
        }
    }

    #[test]
    fn sort_chronologically_is_stable_for_equal_timestamps() {
        let mut backups = vec![
            backup("c", 30),
            backup("a1", 10),
            backup("b", 20),
            backup("a2", 10),
        ];
        sort_chronologically(&mut backups);
        let ids: Vec<_> = backups.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["a1", "a2", "b", "c"]);
    }

    #[rstest]
    #[case("in-use", VolumeState::InUse)]
    #[case("available", VolumeState::Available)]
    #[case("creating", VolumeState::Other(String::from("creating")))]
    fn volume_state_parses_provider_strings(#[case] raw: &str, #[case] expected: VolumeState) {
        assert_eq!(VolumeState::from(raw), expected);
    }

    #[test]
    fn api_error_renders_code_and_message() {
        let err = CloudError::Api {
            operation: String::from("DeleteSnapshot"),
            errors: vec![
                ApiError::new("InvalidSnapshot.InUse", "in use by ami-1"),
                ApiError::new("Throttling", "slow down"),
            ],
        };
        assert_eq!(
            err.to_string(),
            "DeleteSnapshot failed: InvalidSnapshot.InUse:in use by ami-1; Throttling:slow down"
        );
    }

    #[test]
    fn transport_failure_surfaces_as_single_entry() {
        let err = CloudError::Transport {
            program: String::from("aws"),
            operation: String::from("DescribeVolumes"),
            message: String::from("not found"),
        };
        assert_eq!(err.api_errors(), vec![ApiError::new("Transport", "not found")]);
    }
}
