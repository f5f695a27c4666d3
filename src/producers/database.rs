//! Dump of the configured MySQL or MariaDB databases.

use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};

use super::{archive, ToolError};
use crate::agent::RunContext;
use crate::artifact::{Artifact, ArtifactKind};
use crate::config::{DatabaseSelection, DbConfig};

/// Dump tool invoked by default, for MySQL as well as for MariaDB.
pub const DEFAULT_DUMP_PROGRAM: &str = "mysqldump";

/// Name of the SQL file inside the database artifact.
pub const DUMP_FILE_NAME: &str = "database_dump.sql";

const MASKED_PASSWORD: &str = "-p******";

/// Invocation of the dump tool.
///
/// The password is passed as argument and masked in [redacted](Self::redacted),
/// which is the only form ever logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpCommand {
    program: String,
    args: Vec<String>,
    password_arg: Option<usize>,
}

impl DumpCommand {
    pub fn new(program: &str, db: &DbConfig) -> Self {
        let mut args = Vec::new();

        let password_arg = db.password.as_ref().map(|password| {
            args.push(format!("-p{password}"));
            args.len() - 1
        });

        args.extend([
            "-u".to_string(),
            db.user.clone(),
            "-h".to_string(),
            db.host.clone(),
        ]);
        args.push(match &db.database {
            DatabaseSelection::All => "--all-databases".to_string(),
            DatabaseSelection::Named(name) => name.clone(),
        });

        Self {
            program: program.to_string(),
            args,
            password_arg,
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// The command line with the password replaced by a placeholder.
    pub fn redacted(&self) -> String {
        let args = self.args.iter().enumerate().map(|(i, arg)| {
            if Some(i) == self.password_arg {
                MASKED_PASSWORD
            } else {
                arg.as_str()
            }
        });

        std::iter::once(self.program.as_str())
            .chain(args)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.args(&self.args);
        command
    }
}

/// Dumps the databases into the scratch directory of `ctx` and packs the
/// dump into the [DbDump](ArtifactKind::DbDump) artifact.
pub fn dump_database(program: &str, ctx: &RunContext) -> Result<Artifact, ToolError> {
    let db = &ctx.config().db;
    let sql_path = ctx.scratch_dir().join(DUMP_FILE_NAME);
    let artifact_path = ctx
        .scratch_dir()
        .join(ctx.artifact_name(ArtifactKind::DbDump));

    let dump = DumpCommand::new(program, db);
    log::info!(target: "producers::database", "Creating {} database dump from {}", db.engine, db.host);
    log::info!(target: "producers::database", "Executing: {}", dump.redacted());

    let sql_file = File::create_new(&sql_path)
        .map_err(|source| ToolError::io(format!("creating {}", sql_path.display()), source))?;
    let output = dump
        .command()
        .stdout(sql_file)
        .stderr(Stdio::piped())
        .output()
        .map_err(|source| ToolError::Spawn {
            tool: dump.program().to_string(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr);
    if !output.status.success() {
        return Err(ToolError::Failed {
            tool: dump.program().to_string(),
            status: output.status,
            stderr: stderr.trim_end().to_string(),
        });
    }
    if !stderr.is_empty() {
        log::warn!(target: "producers::database", "{}", stderr.trim_end());
    }

    log::info!(target: "producers::database", "Compressing database dump to {}", artifact_path.display());
    pack(&sql_path, &artifact_path)?;

    let artifact = Artifact::new(artifact_path, ArtifactKind::DbDump)
        .map_err(|source| ToolError::io("inspecting database backup", source))?;
    log::info!(target: "producers::database", "Database backup completed: {}", artifact.path().display());

    Ok(artifact)
}

fn pack(sql_path: &Path, artifact_path: &Path) -> Result<(), ToolError> {
    archive::write_tar_gz(artifact_path, &[sql_path])
        .map_err(|source| ToolError::io("compressing database dump", source))?;
    fs::remove_file(sql_path)
        .map_err(|source| ToolError::io(format!("removing {}", sql_path.display()), source))
}
