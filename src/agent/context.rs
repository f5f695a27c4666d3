use std::fs;
use std::io;
use std::path::Path;

use tempfile::TempDir;

use crate::artifact::{artifact_name, ArtifactKind, RunTimestamp};
use crate::config::ResolvedConfig;

/// State owned by a single backup run.
///
/// The scratch directory is created with the context and removed when it is
/// [release](Self::release)d, or dropped on any other exit path.
#[derive(Debug)]
pub struct RunContext {
    timestamp: RunTimestamp,
    config: ResolvedConfig,
    scratch: TempDir,
}

impl RunContext {
    /// Creates the scratch directory of the run.
    pub fn acquire(config: ResolvedConfig, timestamp: RunTimestamp) -> io::Result<Self> {
        let scratch = tempfile::Builder::new()
            .prefix(&format!("backup_{timestamp}_"))
            .tempdir()?;
        log::debug!(target: "agent", "Created scratch directory {}", scratch.path().display());

        Ok(Self {
            timestamp,
            config,
            scratch,
        })
    }

    pub fn timestamp(&self) -> RunTimestamp {
        self.timestamp
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn server_name(&self) -> &str {
        &self.config.server_name
    }

    /// Directory for intermediate artifacts, exclusive to this run.
    pub fn scratch_dir(&self) -> &Path {
        self.scratch.path()
    }

    /// File name of the artifact `kind` of this run.
    pub fn artifact_name(&self, kind: ArtifactKind) -> String {
        artifact_name(self.timestamp, self.server_name(), kind)
    }

    /// Removes the scratch directory.
    ///
    /// The `combined` backup is removed as well, if it was delivered to a
    /// remote destination and no local copy is to be kept. Failures are logged.
    pub fn release(self, combined: Option<&Path>) {
        let scratch_path = self.scratch.path().to_path_buf();
        log::info!(target: "agent", "Cleaning up temporary directory: {}", scratch_path.display());
        if let Err(e) = self.scratch.close() {
            log::error!(target: "agent", "Removing {} failed: {e}", scratch_path.display());
        }

        let Some(combined) = combined else {
            return;
        };
        if self.config.destination.is_remote() && !self.config.keep_local_copy {
            log::info!(target: "agent", "Removing local backup: {}", combined.display());
            if let Err(e) = fs::remove_file(combined) {
                log::error!(target: "agent", "Removing {} failed: {e}", combined.display());
            }
        }
    }
}
