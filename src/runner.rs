//! Process execution abstraction used to drive the provider CLI.

use std::ffi::OsString;
use std::process::Command;

use thiserror::Error;

/// Result of running an external command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandOutput {
    /// Exit code reported by the process, if available.
    pub code: Option<i32>,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl CommandOutput {
    /// Returns `true` when the exit code equals zero.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, Some(0))
    }
}

/// Errors raised while starting a command.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RunnerError {
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
}

/// Abstraction over command execution to support fakes in tests.
pub trait CommandRunner {
    /// Runs `program` with the given arguments and extra environment
    /// variables, capturing stdout and stderr.
    ///
    /// # Errors
    ///
    /// Returns [`RunnerError::Spawn`] if the command cannot be started.
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError>;
}

/// Real command runner that shells out to the host operating system.
#[derive(Clone, Debug, Default)]
pub struct ProcessCommandRunner;

impl CommandRunner for ProcessCommandRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        envs: &[(String, String)],
    ) -> Result<CommandOutput, RunnerError> {
        let output = Command::new(program)
            .args(args)
            .envs(envs.iter().map(|(key, value)| (key, value)))
            .output()
            .map_err(|err| RunnerError::Spawn {
                program: program.to_owned(),
                message: err.to_string(),
            })?;

        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_program_reports_spawn_error() {
        let err = ProcessCommandRunner
            .run("snapkeep-definitely-missing-binary", &[], &[])
            .expect_err("spawn should fail");
        assert!(
            matches!(err, RunnerError::Spawn { ref program, .. } if program == "snapkeep-definitely-missing-binary"),
            "unexpected error: {err:?}"
        );
    }

    #[test]
    fn exit_code_zero_is_success() {
        let output = CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        };
        assert!(output.is_success());
        assert!(
            !CommandOutput {
                code: None,
                ..output
            }
            .is_success()
        );
    }
}
