//! Build script for the `snapkeep(8)` man page.
//!
//! clap-mangen renders the synopsis and options; the configuration and proxy
//! variables the binary reads are appended as an ENVIRONMENT section.

use std::env;
use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use clap::CommandFactory;
use clap_mangen::Man;

#[path = "src/cli/mod.rs"]
mod cli;

use cli::Cli;

const ENVIRONMENT: &[(&str, &str)] = &[
    ("SNAPKEEP_DRY_RUN", "Decide and report without creating or deleting snapshots."),
    ("SNAPKEEP_AWS_BIN", "Path of the aws CLI (default: aws)."),
    ("SNAPKEEP_DESCRIPTION_PREFIX", "Description prefix marking managed snapshots."),
    ("SNAPKEEP_FORCE_TAG", "Tag key that forces backups of data volumes."),
    ("SNAPKEEP_ROOT_DEVICE", "Device name of root volumes (default: /dev/sda1)."),
    ("SNAPKEEP_POLL_INTERVAL_SECS", "Seconds between snapshot status checks."),
    ("SNAPKEEP_WAIT_TIMEOUT_SECS", "Seconds to wait for one snapshot to complete."),
    ("SNAPKEEP_DAILY_WINDOW_DAYS", "Age below which one snapshot per day is kept."),
    ("SNAPKEEP_DELETE_AFTER_DAYS", "Age above which snapshots are deleted."),
    ("SNAPKEEP_ORPHAN_AFTER_DAYS", "Age above which snapshots of deleted volumes are removed."),
    ("http_proxy, HTTP_PROXY, https_proxy, HTTPS_PROXY", "Proxy exported to every aws invocation."),
    ("RUST_LOG", "Diagnostic log filter written to stderr (default: warn)."),
];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = std::io::stdout();
    writeln!(stdout, "cargo:rerun-if-changed=build.rs")?;
    writeln!(stdout, "cargo:rerun-if-changed=src/cli/mod.rs")?;

    let out_dir =
        PathBuf::from(env::var_os("OUT_DIR").ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "OUT_DIR was not set")
        })?);

    let mut buffer = Vec::new();
    Man::new(Cli::command())
        .section("8")
        .manual("System Administration")
        .source(format!("snapkeep {}", env!("CARGO_PKG_VERSION")))
        .render(&mut buffer)?;
    render_environment(&mut buffer)?;

    let mut file = File::create(out_dir.join("snapkeep.8"))?;
    file.write_all(&buffer)?;

    Ok(())
}

fn render_environment(out: &mut impl Write) -> std::io::Result<()> {
    writeln!(out, ".SH ENVIRONMENT")?;
    for (name, meaning) in ENVIRONMENT {
        writeln!(out, ".TP\n\\fB{name}\\fR\n{meaning}")?;
    }
    writeln!(out, ".PP\nSettings may also be given in snapkeep.toml.")
}
