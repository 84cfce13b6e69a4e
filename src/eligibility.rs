//! Decides whether a volume needs a fresh backup.
//!
//! Classification is a pure function of the volume and an already resolved
//! [`InstanceLookup`]. [`resolve_instance`] performs the single provider call
//! the caller needs beforehand.

use std::fmt;

use crate::cloud::{ApiError, CloudApi, Instance, Volume, VolumeState};

/// Label used when the owning instance has no usable name.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Result of resolving the instance a volume is attached to.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InstanceLookup {
    /// The provider returned the instance.
    Resolved(Instance),
    /// The provider has no such instance.
    NotFound,
    /// The volume has no attachment to resolve.
    Unattached,
    /// The lookup call itself failed.
    Failed(Vec<ApiError>),
}

impl InstanceLookup {
    /// Short label for descriptions and progress output: the `Name` tag up
    /// to its first space, or [`UNKNOWN_LABEL`].
    ///
    /// A name starting with a space is kept whole.
    #[must_use]
    pub fn label(&self) -> String {
        let Self::Resolved(instance) = self else {
            return UNKNOWN_LABEL.to_owned();
        };
        instance
            .name()
            .map(|name| match name.find(' ') {
                Some(end) if end > 0 => name.get(..end).unwrap_or(name),
                _ => name,
            })
            .filter(|short| !short.is_empty())
            .unwrap_or(UNKNOWN_LABEL)
            .to_owned()
    }
}

/// Looks up the instance owning `volume`.
///
/// Provider failures are captured in [`InstanceLookup::Failed`] rather than
/// returned, so classification can decide how to treat them.
#[must_use]
pub fn resolve_instance<A: CloudApi + ?Sized>(api: &A, volume: &Volume) -> InstanceLookup {
    let Some(attachment) = &volume.attachment else {
        return InstanceLookup::Unattached;
    };
    match api.describe_instance(&attachment.instance_id) {
        Ok(Some(instance)) => InstanceLookup::Resolved(instance),
        Ok(None) => InstanceLookup::NotFound,
        Err(err) => {
            tracing::warn!(
                volume = %volume.id,
                instance = %attachment.instance_id,
                error = %err,
                "instance lookup failed; treating instance as running"
            );
            InstanceLookup::Failed(err.api_errors())
        }
    }
}

/// Why a volume was or was not selected.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Eligibility {
    /// The volume is the instance's root device.
    RootDevice,
    /// The volume carries the force-backup tag.
    ForceTagged,
    /// The volume is not `in-use`.
    NotInUse,
    /// The owning instance is not running, absent, or unknown.
    InstanceNotRunning,
    /// A data volume without the force-backup tag.
    Untagged,
}

impl Eligibility {
    /// Returns `true` when a backup should be taken.
    #[must_use]
    pub const fn is_eligible(&self) -> bool {
        matches!(self, Self::RootDevice | Self::ForceTagged)
    }
}

impl fmt::Display for Eligibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::RootDevice => "root device",
            Self::ForceTagged => "force-backup tag present",
            Self::NotInUse => "volume not in use",
            Self::InstanceNotRunning => "instance not running",
            Self::Untagged => "data volume without force-backup tag",
        };
        f.write_str(text)
    }
}

/// Eligibility rules for new backups.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct EligibilityClassifier {
    root_device: String,
    force_tag: String,
}

impl EligibilityClassifier {
    /// Creates a classifier for the given root device path and tag key.
    #[must_use]
    pub fn new(root_device: impl Into<String>, force_tag: impl Into<String>) -> Self {
        Self {
            root_device: root_device.into(),
            force_tag: force_tag.into(),
        }
    }

    /// Classifies `volume`, returning the reason alongside the decision.
    #[must_use]
    pub fn classify(&self, volume: &Volume, instance: &InstanceLookup) -> Eligibility {
        if volume.state != VolumeState::InUse {
            return Eligibility::NotInUse;
        }
        let running = match instance {
            InstanceLookup::Resolved(found) => found.is_running(),
            InstanceLookup::Failed(_) => true,
            InstanceLookup::NotFound | InstanceLookup::Unattached => false,
        };
        if !running {
            return Eligibility::InstanceNotRunning;
        }
        let on_root = volume
            .attachment
            .as_ref()
            .is_some_and(|attachment| attachment.device == self.root_device);
        if on_root {
            Eligibility::RootDevice
        } else if volume.has_tag(&self.force_tag) {
            Eligibility::ForceTagged
        } else {
            Eligibility::Untagged
        }
    }

    /// Returns `true` when `volume` should be backed up now.
    #[must_use]
    pub fn needs_backup(&self, volume: &Volume, instance: &InstanceLookup) -> bool {
        self.classify(volume, instance).is_eligible()
    }
}
