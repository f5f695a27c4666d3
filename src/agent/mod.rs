//! Orchestration of a backup run.
//!
//! A run walks through the [Stage]s in a fixed order:
//!
//! 1. Validate the configuration. Nothing is touched before it succeeded.
//! 2. Run the pre-backup hook. A failure aborts the run.
//! 3. Dump the databases, snapshot the files and combine both. Any failure
//!    aborts the run.
//! 4. Run the post-backup hook, best effort.
//! 5. Deliver the backup to its destination.
//! 6. Rotate local backups, remote backups and run logs, best effort.
//! 7. Remove the scratch directory and, if requested, the local copy.
//! 8. Run the post-transfer hook if the delivery succeeded, best effort.
//!
//! The run fails if producing the backup failed, or if a remote destination
//! is configured and the delivery failed.

mod context;
mod stage;

pub use context::RunContext;
pub use stage::{RotationSummary, RunReport, Stage, StageError, Verdict};

use crate::artifact::{belongs_to_server, is_backup_log, Artifact, RunTimestamp};
use crate::config::Settings;
use crate::hooks::{run_hook, HookKind};
use crate::logging::RunLogSink;
use crate::producers::{Producers, SystemProducers};
use crate::transport::{self, LocalTransport, Transport};
use crate::util::retention::{self, Pruned};

/// Performs a single backup run.
pub struct BackupAgent {
    settings: Settings,
    timestamp: RunTimestamp,
    producers: Box<dyn Producers>,
    transport: Option<Box<dyn Transport>>,
    log_sink: Option<RunLogSink>,
}

impl BackupAgent {
    /// Creates an agent for a run started at `timestamp`.
    pub fn new(settings: Settings, timestamp: RunTimestamp) -> Self {
        Self {
            settings,
            timestamp,
            producers: Box::new(SystemProducers::default()),
            transport: None,
            log_sink: None,
        }
    }

    /// Replaces the producers of the backup artifacts.
    pub fn with_producers(mut self, producers: impl Producers + 'static) -> Self {
        self.producers = Box::new(producers);
        self
    }

    /// Uses `transport` instead of the one selected by the configured destination.
    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    /// Mirrors the log output of the run into a log file in the log directory.
    pub fn with_log_sink(mut self, sink: RunLogSink) -> Self {
        self.log_sink = Some(sink);
        self
    }

    /// Runs the backup.
    pub fn run(self) -> RunReport {
        let mut report = RunReport::new(self.timestamp);

        report.enter(Stage::Validating);
        let config = match self.settings.validate() {
            Ok(config) => config,
            Err(e) => {
                log::error!(target: "agent", "Configuration validation failed. Aborting backup: {e}");
                return report.finish(Err(e.into()));
            }
        };

        // detached again when the run is over
        let _run_log = self.log_sink.as_ref().and_then(|sink| {
            sink.attach(&config.log_dir, self.timestamp)
                .inspect_err(|e| log::warn!(target: "agent", "Logging to the log directory failed: {e}"))
                .ok()
        });

        let ctx = match RunContext::acquire(config, self.timestamp) {
            Ok(ctx) => ctx,
            Err(e) => {
                log::error!(target: "agent", "Creating the scratch directory failed. Aborting backup: {e}");
                return report.finish(Err(e.into()));
            }
        };

        let combined = match self.produce(&ctx, &mut report) {
            Ok(combined) => combined,
            Err(e) => {
                log::error!(target: "agent", "{e}. Aborting backup.");
                report.enter(Stage::CleaningUp);
                ctx.release(None);
                return report.finish(Err(e));
            }
        };
        report.set_backup(combined.path());

        report.enter(Stage::PostHook);
        if let Err(e) = run_hook(HookKind::PostBackup, ctx.config().commands.post_backup.as_deref())
        {
            log::error!(target: "agent", "{e}. Continuing with backup process.");
        }

        report.enter(Stage::Transporting);
        let destination = &ctx.config().destination;
        let transport = self
            .transport
            .unwrap_or_else(|| transport::for_destination(destination, &ctx.config().backup_dir));
        let transfer = match transport.upload(combined.path()) {
            Ok(()) => Ok(()),
            Err(e) if destination.is_remote() => {
                log::error!(target: "agent", "Failed to upload backup to {} destination: {e}", transport.name());
                Err(StageError::Transport {
                    destination: destination.name(),
                    source: e,
                })
            }
            Err(e) => {
                log::warn!(target: "agent", "Local delivery reported an error, the backup is in place: {e}");
                Ok(())
            }
        };

        report.enter(Stage::Rotating);
        report.set_rotation(rotate(&ctx, transport.as_ref()));

        let post_transfer = ctx.config().commands.post_transfer.clone();
        report.enter(Stage::CleaningUp);
        ctx.release(Some(combined.path()));

        if transfer.is_ok() {
            report.enter(Stage::PostTransferHook);
            if let Err(e) = run_hook(HookKind::PostTransfer, post_transfer.as_deref()) {
                log::error!(target: "agent", "{e}");
            }
            log::info!(target: "agent", "Backup process completed successfully. Final backup: {}", combined.path().display());
        }

        report.finish(transfer)
    }

    /// Runs the pre-backup hook and creates the combined backup.
    fn produce(&self, ctx: &RunContext, report: &mut RunReport) -> Result<Artifact, StageError> {
        report.enter(Stage::PreHook);
        run_hook(HookKind::PreBackup, ctx.config().commands.pre_backup.as_deref())?;

        report.enter(Stage::Dumping);
        let db_dump = self
            .producers
            .dump_database(ctx)
            .map_err(|source| StageError::Tool {
                stage: Stage::Dumping,
                source,
            })?;

        report.enter(Stage::Snapshotting);
        let snapshot = self
            .producers
            .snapshot_files(ctx)
            .map_err(|source| StageError::Tool {
                stage: Stage::Snapshotting,
                source,
            })?;

        report.enter(Stage::Combining);
        self.producers
            .combine(ctx, &db_dump, &snapshot)
            .map_err(|source| StageError::Tool {
                stage: Stage::Combining,
                source,
            })
    }
}

/// Applies retention to local backups, remote backups and run logs.
///
/// Failures are logged and never affect the verdict.
fn rotate(ctx: &RunContext, destination: &dyn Transport) -> RotationSummary {
    let config = ctx.config();
    let server = ctx.server_name();
    let is_backup = |name: &str| belongs_to_server(name, server);

    let local = LocalTransport::new(&config.backup_dir);
    let local = rotate_class("local backups", &local, &is_backup, config.keep_backups);

    let remote = config.destination.is_remote().then(|| {
        let class = format!("{} backups", destination.name());
        rotate_class(&class, destination, &is_backup, config.keep_backups)
    });

    let logs = LocalTransport::new(&config.log_dir);
    let logs = rotate_class("log files", &logs, &is_backup_log, config.keep_logs);

    RotationSummary {
        local,
        remote,
        logs,
    }
}

/// Lists the files of one class through `transport` and deletes all but the
/// `keep` most recent ones.
pub fn rotate_class(
    class: &str,
    transport: &dyn Transport,
    filter: &dyn Fn(&str) -> bool,
    keep: i64,
) -> Pruned {
    if keep <= 0 {
        log::info!(target: "agent", "Rotation of {class} disabled (keep <= 0)");
        return Pruned::default();
    }

    match transport.list(filter) {
        Ok(names) => retention::prune(class, &names, keep, |name| transport.delete(name)),
        Err(e) => {
            log::error!(target: "agent", "Listing {class} failed, skipping rotation: {e}");
            Pruned::default()
        }
    }
}
