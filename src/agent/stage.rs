use std::io;
use std::path::{Path, PathBuf};

use derive_more::{Display, Error, From};

use crate::artifact::RunTimestamp;
use crate::config::ConfigError;
use crate::hooks::HookError;
use crate::producers::ToolError;
use crate::transport::TransportError;
use crate::util::retention::Pruned;

/// States of a backup run, in the order they are entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Stage {
    #[display("validating")]
    Validating,
    #[display("pre-backup hook")]
    PreHook,
    #[display("dumping")]
    Dumping,
    #[display("snapshotting")]
    Snapshotting,
    #[display("combining")]
    Combining,
    #[display("post-backup hook")]
    PostHook,
    #[display("transporting")]
    Transporting,
    #[display("rotating")]
    Rotating,
    #[display("cleaning up")]
    CleaningUp,
    #[display("post-transfer hook")]
    PostTransferHook,
    /// Terminal state of a successful run.
    #[display("done")]
    Done,
    /// Terminal state of a failed run.
    #[display("failed")]
    Failed,
}

#[derive(Debug, Display, Error, From)]
/// Failures that decide the verdict of a run.
pub enum StageError {
    /// The configuration is incomplete or invalid. Nothing was touched.
    #[display("Configuration validation failed: {_0}")]
    #[from]
    Config(ConfigError),
    /// The scratch directory of the run could not be created.
    #[display("Creating the scratch directory failed: {_0}")]
    #[from]
    Scratch(io::Error),
    /// The pre-backup hook failed, nothing was dumped.
    #[display("Pre-backup command failed: {_0}")]
    #[from]
    PreHook(HookError),
    /// Producing an artifact failed.
    #[display("{stage} failed: {source}")]
    Tool { stage: Stage, source: ToolError },
    /// The backup could not be delivered to its remote destination.
    #[display("Transfer to {destination} destination failed: {source}")]
    Transport {
        destination: &'static str,
        source: TransportError,
    },
}

/// Whether a run reached its goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Verdict {
    #[display("succeeded")]
    Succeeded,
    #[display("failed")]
    Failed,
}

/// Files deleted by the rotation of a run, per artifact class.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationSummary {
    pub local: Pruned,
    /// [None] for local destinations.
    pub remote: Option<Pruned>,
    pub logs: Pruned,
}

/// Summary of a finished backup run.
#[derive(Debug)]
pub struct RunReport {
    timestamp: RunTimestamp,
    stages: Vec<Stage>,
    backup: Option<PathBuf>,
    rotation: Option<RotationSummary>,
    failure: Option<StageError>,
}

impl RunReport {
    pub(super) fn new(timestamp: RunTimestamp) -> Self {
        Self {
            timestamp,
            stages: Vec::new(),
            backup: None,
            rotation: None,
            failure: None,
        }
    }

    pub(super) fn enter(&mut self, stage: Stage) {
        log::debug!(target: "agent", "Entering stage: {stage}");
        self.stages.push(stage);
    }

    pub(super) fn set_backup(&mut self, path: &Path) {
        self.backup = Some(path.to_path_buf());
    }

    pub(super) fn set_rotation(&mut self, rotation: RotationSummary) {
        self.rotation = Some(rotation);
    }

    pub(super) fn finish(mut self, result: Result<(), StageError>) -> Self {
        match result {
            Ok(()) => self.stages.push(Stage::Done),
            Err(e) => {
                self.stages.push(Stage::Failed);
                self.failure = Some(e);
            }
        }
        self
    }

    pub fn timestamp(&self) -> RunTimestamp {
        self.timestamp
    }

    /// Every stage entered, ending with [Stage::Done] or [Stage::Failed].
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Path of the combined backup, if one was created.
    ///
    /// The file may have been removed again during cleanup.
    pub fn backup(&self) -> Option<&Path> {
        self.backup.as_deref()
    }

    /// Outcome of the rotation, if the run got that far.
    pub fn rotation(&self) -> Option<&RotationSummary> {
        self.rotation.as_ref()
    }

    /// The failure that decided the verdict.
    pub fn failure(&self) -> Option<&StageError> {
        self.failure.as_ref()
    }

    pub fn verdict(&self) -> Verdict {
        if self.failure.is_some() {
            Verdict::Failed
        } else {
            Verdict::Succeeded
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict() == Verdict::Succeeded
    }
}
