//! Command-line interface definitions for the `snapkeep` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::Parser;

/// Top-level CLI for the `snapkeep` binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapkeep",
    about = "Snapshot EBS volumes of running instances and prune old snapshots",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Region to operate in, as a name (`us-east-1`) or an EC2 endpoint
    /// (`ec2.us-east-1.amazonaws.com`).
    #[arg(value_name = "REGION")]
    pub(crate) region: String,
    /// Report what would be created and deleted without changing anything.
    #[arg(long)]
    pub(crate) dry_run: bool,
}
