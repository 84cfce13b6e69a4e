//! JSON shapes emitted by `aws ec2 … --output json`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cloud::{
    Attachment, Backup, BackupId, BackupStatus, Instance, InstanceId, InstanceState, Volume,
    VolumeId, VolumeState,
};

/// Entry of a `--filters` JSON list.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsFilter {
    pub(super) name: String,
    pub(super) values: Vec<String>,
}

impl AwsFilter {
    pub(super) fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: name.to_owned(),
            values: vec![value.into()],
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsTag {
    pub(super) key: String,
    #[serde(default)]
    pub(super) value: String,
}

fn tag_map(tags: Vec<AwsTag>) -> BTreeMap<String, String> {
    tags.into_iter().map(|tag| (tag.key, tag.value)).collect()
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeVolumesResponse {
    #[serde(default)]
    pub(super) volumes: Vec<AwsVolume>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsVolume {
    volume_id: String,
    #[serde(default)]
    size: u64,
    state: String,
    #[serde(default)]
    attachments: Vec<AwsAttachment>,
    #[serde(default)]
    tags: Vec<AwsTag>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct AwsAttachment {
    instance_id: Option<String>,
    device: Option<String>,
}

impl From<AwsVolume> for Volume {
    fn from(value: AwsVolume) -> Self {
        let attachment = value.attachments.into_iter().find_map(|att| {
            att.instance_id.map(|instance_id| Attachment {
                instance_id: InstanceId::from(instance_id),
                device: att.device.unwrap_or_default(),
            })
        });
        Self {
            id: VolumeId::from(value.volume_id),
            size_gb: value.size,
            state: VolumeState::from(value.state.as_str()),
            attachment,
            tags: tag_map(value.tags),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeInstancesResponse {
    #[serde(default)]
    pub(super) reservations: Vec<AwsReservation>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsReservation {
    #[serde(default)]
    pub(super) instances: Vec<AwsInstance>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsInstance {
    instance_id: String,
    state: AwsInstanceState,
    #[serde(default)]
    tags: Vec<AwsTag>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
struct AwsInstanceState {
    name: String,
}

impl From<AwsInstance> for Instance {
    fn from(value: AwsInstance) -> Self {
        Self {
            id: InstanceId::from(value.instance_id),
            state: InstanceState::from(value.state.name.as_str()),
            tags: tag_map(value.tags),
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct DescribeSnapshotsResponse {
    #[serde(default)]
    pub(super) snapshots: Vec<AwsSnapshot>,
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct AwsSnapshot {
    snapshot_id: String,
    volume_id: String,
    start_time: DateTime<Utc>,
    state: String,
    #[serde(default)]
    description: String,
}

impl From<AwsSnapshot> for Backup {
    fn from(value: AwsSnapshot) -> Self {
        Self {
            id: BackupId::from(value.snapshot_id),
            volume_id: VolumeId::from(value.volume_id),
            created_at: value.start_time,
            status: BackupStatus::from(value.state.as_str()),
            description: value.description,
        }
    }
}

#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub(super) struct CreateSnapshotResponse {
    pub(super) snapshot_id: String,
}
