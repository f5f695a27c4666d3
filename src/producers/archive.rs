//! Writing of gzip compressed tar archives.

use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// Writes `sources` into a new gzip compressed tar archive at `dest`.
///
/// Every source is stored under its base name, directories recursively.
/// `dest` must not exist yet. A partially written archive is removed again.
pub fn write_tar_gz(dest: &Path, sources: &[&Path]) -> io::Result<()> {
    let file = File::create_new(dest)?;

    let result = append_all(file, sources);
    if result.is_err() {
        if let Err(e) = fs::remove_file(dest) {
            log::warn!(target: "archive", "Removing incomplete archive {} failed: {e}", dest.display());
        }
    }

    result
}

fn append_all(file: File, sources: &[&Path]) -> io::Result<()> {
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);
    tar.follow_symlinks(false);

    for source in sources {
        let name = entry_name(source)?;
        log::trace!(target: "archive", "Adding {} as {}", source.display(), name.to_string_lossy());

        if source.is_dir() {
            tar.append_dir_all(&name, source)?;
        } else {
            tar.append_path_with_name(source, &name)?;
        }
    }

    tar.into_inner()?.finish()?;
    Ok(())
}

/// Base name of `source`, resolving paths like `.` that don't end in a name.
fn entry_name(source: &Path) -> io::Result<OsString> {
    if let Some(name) = source.file_name() {
        return Ok(name.to_os_string());
    }

    source
        .canonicalize()?
        .file_name()
        .map(|name| name.to_os_string())
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} has no base name to archive it under", source.display()),
            )
        })
}
