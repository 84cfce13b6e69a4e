//! Decides which backups belong to this tool.
//!
//! EC2 snapshots have no ownership field, so managed snapshots are recognised
//! by a description prefix. The convention lives behind [`Ownership`] so a
//! tag-based scheme can replace it without touching retention or the orphan
//! sweep.

use crate::cloud::{Backup, BackupFilter, CloudApi, CloudError, sort_chronologically};

/// Predicate and naming rule for managed backups.
pub trait Ownership {
    /// Returns `true` when `backup` was created by this tool.
    fn is_managed(&self, backup: &Backup) -> bool;

    /// Builds the description recorded on a new backup.
    fn description_for(&self, label: &str) -> String;

    /// Optional prefix the provider can use to narrow listings server-side.
    fn listing_prefix(&self) -> Option<String>;
}

/// Marks backups by a fixed description prefix (`"Backup "` by default).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DescriptionPrefix {
    prefix: String,
}

impl DescriptionPrefix {
    /// Creates the marker.
    #[must_use]
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Ownership for DescriptionPrefix {
    fn is_managed(&self, backup: &Backup) -> bool {
        backup.description.starts_with(&self.prefix)
    }

    fn description_for(&self, label: &str) -> String {
        format!("{}{label}", self.prefix)
    }

    fn listing_prefix(&self) -> Option<String> {
        Some(self.prefix.clone())
    }
}

/// Fetches managed backups matching `filter`, oldest first.
///
/// # Errors
///
/// Returns [`CloudError`] when the listing call fails.
pub fn managed_history<A: CloudApi + ?Sized>(
    api: &A,
    ownership: &dyn Ownership,
    filter: BackupFilter,
) -> Result<Vec<Backup>, CloudError> {
    let narrowed = filter.owner_prefix(ownership.listing_prefix());
    let mut backups: Vec<Backup> = api
        .list_backups(&narrowed)?
        .into_iter()
        .filter(|backup| ownership.is_managed(backup))
        .collect();
    sort_chronologically(&mut backups);
    Ok(backups)
}
