//! Producers of the backup artifacts.
//!
//! - [database]: Compressed dump of the MySQL/MariaDB databases.
//! - [files]: Compressed snapshot of the source directory, and the combined backup.
//! - [archive]: The gzip compressed tar format shared by all artifacts.

pub mod archive;
pub mod database;
pub mod files;

use std::io;
use std::process::ExitStatus;

use derive_more::{Display, Error};

use crate::agent::RunContext;
use crate::artifact::Artifact;

#[derive(Debug, Display, Error)]
/// Errors of the external tools and archive operations creating artifacts.
pub enum ToolError {
    /// The external tool could not be started.
    #[display("{tool} could not be started: {source}")]
    Spawn { tool: String, source: io::Error },
    /// The external tool exited unsuccessfully.
    #[display("{tool} failed with {status}: {stderr}")]
    Failed {
        tool: String,
        status: ExitStatus,
        stderr: String,
    },
    /// Reading or writing an artifact failed.
    #[display("{action} failed: {source}")]
    Io { action: String, source: io::Error },
}

impl ToolError {
    pub fn io(action: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            action: action.into(),
            source,
        }
    }
}

/// Creates the artifacts of a backup run.
///
/// The db dump and the file snapshot are placed in the scratch directory of
/// the [RunContext], the combined backup in its backup directory.
pub trait Producers {
    /// Dumps the configured databases.
    fn dump_database(&self, ctx: &RunContext) -> Result<Artifact, ToolError>;

    /// Archives the configured source directory.
    fn snapshot_files(&self, ctx: &RunContext) -> Result<Artifact, ToolError>;

    /// Bundles the dump and the snapshot into the combined backup.
    fn combine(
        &self,
        ctx: &RunContext,
        db_dump: &Artifact,
        snapshot: &Artifact,
    ) -> Result<Artifact, ToolError>;
}

/// [Producers] backed by the dump tool of the system and in-process archiving.
#[derive(Debug, Clone)]
pub struct SystemProducers {
    dump_program: String,
}

impl Default for SystemProducers {
    fn default() -> Self {
        Self {
            dump_program: database::DEFAULT_DUMP_PROGRAM.to_string(),
        }
    }
}

impl SystemProducers {
    /// Uses `program` instead of `mysqldump` to dump the databases.
    pub fn with_dump_program(program: impl Into<String>) -> Self {
        Self {
            dump_program: program.into(),
        }
    }
}

impl Producers for SystemProducers {
    fn dump_database(&self, ctx: &RunContext) -> Result<Artifact, ToolError> {
        database::dump_database(&self.dump_program, ctx)
    }

    fn snapshot_files(&self, ctx: &RunContext) -> Result<Artifact, ToolError> {
        files::snapshot_files(ctx)
    }

    fn combine(
        &self,
        ctx: &RunContext,
        db_dump: &Artifact,
        snapshot: &Artifact,
    ) -> Result<Artifact, ToolError> {
        files::combine(ctx, db_dump, snapshot)
    }
}
