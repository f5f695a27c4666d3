//! User supplied shell commands run around a backup.

use std::io;
use std::process::{Command, ExitStatus};

use derive_more::{Display, Error};

/// Point in the pipeline a hook is run at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum HookKind {
    /// Before anything is dumped. A failure aborts the run.
    #[display("pre_backup")]
    PreBackup,
    /// After the combined backup was created.
    #[display("post_backup")]
    PostBackup,
    /// After the backup was delivered.
    #[display("post_transfer")]
    PostTransfer,
}

#[derive(Debug, Display, Error)]
/// Errors of running a hook.
pub enum HookError {
    /// The shell could not be started.
    #[display("{kind} command could not be started: {source}")]
    Spawn { kind: HookKind, source: io::Error },
    /// The command exited unsuccessfully.
    #[display("{kind} command failed with {status}: {stderr}")]
    Failed {
        kind: HookKind,
        status: ExitStatus,
        stderr: String,
    },
}

/// Runs the `command` configured for `kind` through `sh -c`.
///
/// An unset command succeeds without doing anything.
pub fn run_hook(kind: HookKind, command: Option<&str>) -> Result<(), HookError> {
    let Some(command) = command else {
        log::info!(target: "hooks", "No {kind} command configured, skipping execution");
        return Ok(());
    };

    log::info!(target: "hooks", "Executing {kind} command: {command}");
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|source| HookError::Spawn { kind, source })?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if !output.status.success() {
        return Err(HookError::Failed {
            kind,
            status: output.status,
            stderr: stderr.trim_end().to_string(),
        });
    }

    // relay stderr
    if !stderr.is_empty() {
        log::warn!(target: "hooks", "{kind}: {}", stderr.trim_end());
    }
    if !stdout.is_empty() {
        log::info!(target: "hooks", "{kind} command output: {}", stdout.trim_end());
    }
    log::info!(target: "hooks", "{kind} command executed successfully");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_hook_succeeds() {
        assert!(run_hook(HookKind::PreBackup, None).is_ok());
    }

    #[test]
    fn successful_hook() {
        assert!(run_hook(HookKind::PostBackup, Some("echo hello; echo warn >&2")).is_ok());
    }

    #[test]
    fn failing_hook_reports_status_and_stderr() {
        let err = run_hook(HookKind::PostTransfer, Some("echo broken >&2; exit 3")).unwrap_err();
        let HookError::Failed {
            kind,
            status,
            stderr,
        } = err
        else {
            panic!("hook should have run");
        };
        assert_eq!(kind, HookKind::PostTransfer);
        assert_eq!(status.code(), Some(3));
        assert_eq!(stderr, "broken");
    }
}
