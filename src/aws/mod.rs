//! [`CloudApi`] implementation backed by the `aws` command-line client.
//!
//! Every call runs `aws ec2 <operation> --region <region> --output json`
//! through a [`CommandRunner`], so tests can script the CLI without touching
//! a real account.

mod error;
mod types;

use std::ffi::OsString;

use serde::de::DeserializeOwned;

use crate::cloud::{
    Backup, BackupFilter, BackupId, CloudApi, CloudError, Instance, InstanceId, Volume, VolumeId,
};
use crate::config::Region;
use crate::runner::{CommandRunner, ProcessCommandRunner};
use error::parse_cli_errors;
use types::{
    AwsFilter, CreateSnapshotResponse, DescribeInstancesResponse, DescribeSnapshotsResponse,
    DescribeVolumesResponse,
};

/// Talks to EC2 by shelling out to `aws`.
#[derive(Clone, Debug)]
pub struct AwsCliApi<R: CommandRunner> {
    runner: R,
    aws_bin: String,
    region: Region,
    proxy: Option<String>,
}

impl AwsCliApi<ProcessCommandRunner> {
    /// Creates a client wired to the real process runner.
    #[must_use]
    pub fn with_process_runner(aws_bin: impl Into<String>, region: Region) -> Self {
        Self::new(ProcessCommandRunner, aws_bin, region)
    }
}

impl<R: CommandRunner> AwsCliApi<R> {
    /// Creates a client using the provided runner.
    #[must_use]
    pub fn new(runner: R, aws_bin: impl Into<String>, region: Region) -> Self {
        Self {
            runner,
            aws_bin: aws_bin.into(),
            region,
            proxy: None,
        }
    }

    /// Routes every subsequent call through `proxy`.
    #[must_use]
    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    fn base_args(&self, subcommand: &str) -> Vec<OsString> {
        vec![
            OsString::from("ec2"),
            OsString::from(subcommand),
            OsString::from("--region"),
            OsString::from(self.region.as_str()),
            OsString::from("--output"),
            OsString::from("json"),
        ]
    }

    fn envs(&self) -> Vec<(String, String)> {
        self.proxy
            .as_ref()
            .map(|proxy| {
                vec![
                    (String::from("HTTP_PROXY"), proxy.clone()),
                    (String::from("HTTPS_PROXY"), proxy.clone()),
                ]
            })
            .unwrap_or_default()
    }

    fn push_filters(args: &mut Vec<OsString>, filters: &[AwsFilter]) -> Result<(), CloudError> {
        if filters.is_empty() {
            return Ok(());
        }
        let json = serde_json::to_string(filters).map_err(|err| CloudError::Parse {
            operation: String::from("filters"),
            message: err.to_string(),
        })?;
        args.push(OsString::from("--filters"));
        args.push(OsString::from(json));
        Ok(())
    }

    fn invoke(&self, operation: &str, args: &[OsString]) -> Result<String, CloudError> {
        tracing::debug!(
            program = %self.aws_bin,
            operation,
            region = %self.region,
            "invoking provider CLI"
        );
        let output = self
            .runner
            .run(&self.aws_bin, args, &self.envs())
            .map_err(|err| CloudError::Transport {
                program: self.aws_bin.clone(),
                operation: operation.to_owned(),
                message: err.to_string(),
            })?;

        if output.is_success() {
            return Ok(output.stdout);
        }

        Err(CloudError::Api {
            operation: operation.to_owned(),
            errors: parse_cli_errors(&output.stderr, output.code),
        })
    }

    fn invoke_json<T>(&self, operation: &str, args: &[OsString]) -> Result<T, CloudError>
    where
        T: DeserializeOwned,
    {
        let stdout = self.invoke(operation, args)?;
        serde_json::from_str::<T>(&stdout).map_err(|err| CloudError::Parse {
            operation: operation.to_owned(),
            message: err.to_string(),
        })
    }

    fn describe_volumes(&self, filters: &[AwsFilter]) -> Result<Vec<Volume>, CloudError> {
        let mut args = self.base_args("describe-volumes");
        Self::push_filters(&mut args, filters)?;
        let response: DescribeVolumesResponse = self.invoke_json("DescribeVolumes", &args)?;
        Ok(response.volumes.into_iter().map(Volume::from).collect())
    }
}

impl<R: CommandRunner> CloudApi for AwsCliApi<R> {
    fn list_volumes(&self) -> Result<Vec<Volume>, CloudError> {
        self.describe_volumes(&[])
    }

    fn describe_volume(&self, volume_id: &VolumeId) -> Result<Option<Volume>, CloudError> {
        let filters = [AwsFilter::new("volume-id", volume_id.as_str())];
        Ok(self.describe_volumes(&filters)?.into_iter().next())
    }

    fn describe_instance(&self, instance_id: &InstanceId) -> Result<Option<Instance>, CloudError> {
        let mut args = self.base_args("describe-instances");
        Self::push_filters(
            &mut args,
            &[AwsFilter::new("instance-id", instance_id.as_str())],
        )?;
        let response: DescribeInstancesResponse = self.invoke_json("DescribeInstances", &args)?;
        Ok(response
            .reservations
            .into_iter()
            .flat_map(|reservation| reservation.instances)
            .map(Instance::from)
            .next())
    }

    fn list_backups(&self, filter: &BackupFilter) -> Result<Vec<Backup>, CloudError> {
        let mut args = self.base_args("describe-snapshots");
        args.push(OsString::from("--owner-ids"));
        args.push(OsString::from("self"));

        let mut filters = Vec::new();
        if let Some(prefix) = &filter.owner_prefix {
            filters.push(AwsFilter::new("description", format!("{prefix}*")));
        }
        if let Some(volume_id) = &filter.volume_id {
            filters.push(AwsFilter::new("volume-id", volume_id.as_str()));
        }
        if let Some(backup_id) = &filter.backup_id {
            filters.push(AwsFilter::new("snapshot-id", backup_id.as_str()));
        }
        Self::push_filters(&mut args, &filters)?;

        let response: DescribeSnapshotsResponse = self.invoke_json("DescribeSnapshots", &args)?;
        Ok(response.snapshots.into_iter().map(Backup::from).collect())
    }

    fn create_backup(
        &self,
        volume_id: &VolumeId,
        description: &str,
    ) -> Result<BackupId, CloudError> {
        let mut args = self.base_args("create-snapshot");
        args.extend([
            OsString::from("--volume-id"),
            OsString::from(volume_id.as_str()),
            OsString::from("--description"),
            OsString::from(description),
        ]);
        let response: CreateSnapshotResponse = self.invoke_json("CreateSnapshot", &args)?;
        Ok(BackupId::from(response.snapshot_id))
    }

    fn delete_backup(&self, backup_id: &BackupId) -> Result<(), CloudError> {
        let mut args = self.base_args("delete-snapshot");
        args.extend([
            OsString::from("--snapshot-id"),
            OsString::from(backup_id.as_str()),
        ]);
        self.invoke("DeleteSnapshot", &args).map(|_| ())
    }
}
