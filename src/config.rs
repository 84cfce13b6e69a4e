//! Configuration loading via `ortho-config`.
//!
//! Values merge defaults, `snapkeep.toml`, and `SNAPKEEP_*` environment
//! variables. They are read once at startup and never reloaded.

use std::ffi::OsString;
use std::fmt;
use std::time::Duration;

use chrono::TimeDelta;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Description prefix that marks a snapshot as created by this tool.
pub const DEFAULT_DESCRIPTION_PREFIX: &str = "Backup ";

/// Tag whose presence forces a snapshot regardless of the device.
pub const DEFAULT_FORCE_TAG: &str = "SNAPSHOT";

/// Device path of the boot volume.
pub const DEFAULT_ROOT_DEVICE: &str = "/dev/sda1";

/// Default AWS CLI binary name.
pub const DEFAULT_AWS_BIN: &str = "aws";

/// Proxy variables consulted at startup, in order.
const PROXY_ENV_VARS: [&str; 4] = ["http_proxy", "HTTP_PROXY", "https_proxy", "HTTPS_PROXY"];

/// Snapshot and retention settings layered via `OrthoConfig`.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SNAPKEEP",
    discovery(
        app_name = "snapkeep",
        env_var = "SNAPKEEP_CONFIG_PATH",
        config_file_name = "snapkeep.toml",
        dotfile_name = ".snapkeep.toml",
        project_file_name = "snapkeep.toml"
    )
)]
pub struct SnapshotConfig {
    /// Seconds between status checks while waiting for a new snapshot.
    #[ortho_config(default = 15)]
    pub poll_interval_secs: u64,
    /// Upper bound, in seconds, on waiting for a single snapshot.
    #[ortho_config(default = 3600)]
    pub wait_timeout_secs: u64,
    /// Snapshots younger than this many days are bucketed per day; older ones
    /// per week.
    #[ortho_config(default = 7)]
    pub daily_window_days: u32,
    /// Snapshots older than this many days are deleted.
    #[ortho_config(default = 30)]
    pub delete_after_days: u32,
    /// Orphaned snapshots older than this many days are deleted.
    #[ortho_config(default = 30)]
    pub orphan_after_days: u32,
    /// Description prefix identifying snapshots managed by this tool.
    #[ortho_config(default = DEFAULT_DESCRIPTION_PREFIX.to_owned())]
    pub description_prefix: String,
    /// Volume tag that forces a snapshot.
    #[ortho_config(default = DEFAULT_FORCE_TAG.to_owned())]
    pub force_tag: String,
    /// Device path treated as the system volume.
    #[ortho_config(default = DEFAULT_ROOT_DEVICE.to_owned())]
    pub root_device: String,
    /// Report intended actions without creating or deleting anything.
    #[ortho_config(default = false)]
    pub dry_run: bool,
    /// Path to the `aws` executable.
    #[ortho_config(default = DEFAULT_AWS_BIN.to_owned())]
    pub aws_bin: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "{}: set {} or add {} to snapkeep.toml",
            self.description, self.env_var, self.toml_key
        )
    }
}

impl SnapshotConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("snapkeep")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(ConfigError::MissingField(format!(
                "missing {}",
                metadata.guidance()
            )));
        }
        Ok(())
    }

    const fn require_positive(value: u64, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value == 0 {
            return Err(ConfigError::Invalid {
                field: metadata.toml_key,
                env_var: metadata.env_var,
            });
        }
        Ok(())
    }

    /// Performs semantic validation. Error messages name the environment
    /// variable and TOML key that supply the offending value.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required string is blank
    /// and [`ConfigError::Invalid`] when an interval is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.description_prefix,
            &FieldMetadata::new(
                "snapshot description prefix",
                "SNAPKEEP_DESCRIPTION_PREFIX",
                "description_prefix",
            ),
        )?;
        Self::require_field(
            &self.force_tag,
            &FieldMetadata::new("force-snapshot tag", "SNAPKEEP_FORCE_TAG", "force_tag"),
        )?;
        Self::require_field(
            &self.root_device,
            &FieldMetadata::new("root device path", "SNAPKEEP_ROOT_DEVICE", "root_device"),
        )?;
        Self::require_field(
            &self.aws_bin,
            &FieldMetadata::new("aws CLI path", "SNAPKEEP_AWS_BIN", "aws_bin"),
        )?;
        Self::require_positive(
            self.poll_interval_secs,
            &FieldMetadata::new(
                "poll interval",
                "SNAPKEEP_POLL_INTERVAL_SECS",
                "poll_interval_secs",
            ),
        )?;
        Self::require_positive(
            u64::from(self.daily_window_days),
            &FieldMetadata::new(
                "daily window",
                "SNAPKEEP_DAILY_WINDOW_DAYS",
                "daily_window_days",
            ),
        )?;
        Ok(())
    }

    /// Interval between snapshot status checks.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    /// Ceiling on waiting for a single snapshot.
    #[must_use]
    pub const fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.wait_timeout_secs)
    }

    /// Age below which snapshots are bucketed per day.
    #[must_use]
    pub fn daily_window(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.daily_window_days))
    }

    /// Age above which snapshots are deleted.
    #[must_use]
    pub fn delete_after(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.delete_after_days))
    }

    /// Age above which orphaned snapshots are deleted.
    #[must_use]
    pub fn orphan_after(&self) -> TimeDelta {
        TimeDelta::days(i64::from(self.orphan_after_days))
    }
}

/// Target region, parsed from either a region name or an EC2 endpoint.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Region(String);

impl Region {
    /// Parses `us-east-1`, `ec2.us-east-1.amazonaws.com`, or
    /// `https://ec2.us-east-1.amazonaws.com/`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidRegion`] when no region name can be
    /// extracted.
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let trimmed = raw.trim();
        let host = trimmed
            .strip_prefix("https://")
            .or_else(|| trimmed.strip_prefix("http://"))
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        let name = host
            .strip_prefix("ec2.")
            .and_then(|rest| {
                rest.strip_suffix(".amazonaws.com")
                    .or_else(|| rest.strip_suffix(".amazonaws.com.cn"))
            })
            .unwrap_or(host);

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|ch| ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-');
        if !valid {
            return Err(ConfigError::InvalidRegion(raw.to_owned()));
        }
        Ok(Self(name.to_owned()))
    }

    /// Returns the region name.
    #[must_use]
    pub const fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returns the first non-empty proxy setting found through `lookup`.
///
/// `lookup` is normally `|key| std::env::var(key).ok()`.
#[must_use]
pub fn proxy_from_env(lookup: impl Fn(&str) -> Option<String>) -> Option<String> {
    PROXY_ENV_VARS
        .iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_owned())
        .find(|value| !value.is_empty())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a numeric field holds an unusable value.
    #[error("{field} must be greater than zero: set {env_var} or {field} in snapkeep.toml")]
    Invalid {
        /// TOML key of the offending field.
        field: &'static str,
        /// Environment variable supplying the field.
        env_var: &'static str,
    },
    /// Indicates the region argument could not be understood.
    #[error("invalid region '{0}': expected a region such as us-east-1 or ec2.us-east-1.amazonaws.com")]
    InvalidRegion(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
