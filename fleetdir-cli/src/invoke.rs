//! Running the fleet tool.

use anyhow::{Context, Result};
use fleetdir_core::TargetCommand;
use std::process::{Command, ExitCode, ExitStatus, Stdio};
use tracing::debug;

/// Run `tool` followed by the target arguments, sharing this process's stdio.
pub fn run_tool(tool: &[String], target: &TargetCommand) -> Result<ExitStatus> {
    let (program, leading) = tool.split_first().context("No fleet tool configured")?;

    debug!("Running {} {:?} {:?}", program, leading, target.args());
    Command::new(program)
        .args(leading)
        .args(target.args())
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .with_context(|| format!("Failed to run {}", program))
}

/// Exit code mirroring the tool's status.
pub fn exit_code(status: ExitStatus) -> ExitCode {
    match status.code() {
        Some(code) => ExitCode::from(code.clamp(0, 255) as u8),
        // Terminated by a signal.
        None => ExitCode::FAILURE,
    }
}
