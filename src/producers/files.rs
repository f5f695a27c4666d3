//! Snapshot of the configured file tree and bundling of the final backup.

use std::fs;

use super::{archive, ToolError};
use crate::agent::RunContext;
use crate::artifact::{Artifact, ArtifactKind};

/// Archives the source directory into the scratch directory of `ctx`.
pub fn snapshot_files(ctx: &RunContext) -> Result<Artifact, ToolError> {
    let files_dir = &ctx.config().files_dir;
    let artifact_path = ctx
        .scratch_dir()
        .join(ctx.artifact_name(ArtifactKind::FileSnapshot));

    log::info!(target: "producers::files", "Creating backup of directory: {}", files_dir.display());
    archive::write_tar_gz(&artifact_path, &[files_dir.as_path()])
        .map_err(|source| ToolError::io(format!("archiving {}", files_dir.display()), source))?;

    let artifact = Artifact::new(artifact_path, ArtifactKind::FileSnapshot)
        .map_err(|source| ToolError::io("inspecting files backup", source))?;
    log::info!(target: "producers::files", "Files backup completed: {}", artifact.path().display());

    Ok(artifact)
}

/// Bundles both scratch artifacts into the combined backup in the backup directory.
pub fn combine(
    ctx: &RunContext,
    db_dump: &Artifact,
    snapshot: &Artifact,
) -> Result<Artifact, ToolError> {
    let backup_dir = &ctx.config().backup_dir;
    fs::create_dir_all(backup_dir)
        .map_err(|source| ToolError::io(format!("creating {}", backup_dir.display()), source))?;
    let combined_path = backup_dir.join(ctx.artifact_name(ArtifactKind::Combined));

    log::info!(target: "producers::files", "Combining backups into: {}", combined_path.display());
    archive::write_tar_gz(&combined_path, &[db_dump.path(), snapshot.path()])
        .map_err(|source| ToolError::io("combining backups", source))?;

    let artifact = Artifact::new(combined_path, ArtifactKind::Combined)
        .map_err(|source| ToolError::io("inspecting combined backup", source))?;
    log::info!(target: "producers::files", "Combined backup completed: {}", artifact.path().display());

    Ok(artifact)
}
