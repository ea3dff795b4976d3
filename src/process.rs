// External command execution
//
// OS utilities (mount helpers, disk image tools) are run with their output
// captured. Output is discarded on success and carried in the error otherwise.

use crate::error::{RedirectError, RedirectResult};
use std::process::Command;

fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run a command, failing with `ExternalTool` if it exits non-zero.
pub fn run_quietly(cmd: &mut Command) -> RedirectResult<()> {
    capture_stdout(cmd).map(|_| ())
}

/// Run a command and return its stdout, failing with `ExternalTool` if it
/// exits non-zero.
pub fn capture_stdout(cmd: &mut Command) -> RedirectResult<String> {
    let command = describe(cmd);
    tracing::debug!("Running {}", command);

    let output = cmd
        .output()
        .map_err(|e| RedirectError::io(format!("Failed to execute {}", command), e))?;

    if !output.status.success() {
        return Err(RedirectError::ExternalTool {
            command,
            status: output.status.to_string(),
            stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Run a command and report only whether it succeeded.
pub fn succeeds(cmd: &mut Command) -> bool {
    match cmd.status() {
        Ok(status) => status.success(),
        Err(e) => {
            tracing::warn!("Failed to execute {}: {}", describe(cmd), e);
            false
        }
    }
}
