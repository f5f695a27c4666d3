use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use super::{Transport, TransportError};

/// A directory on the local machine.
///
/// Backups are written into this directory in the first place, so
/// [upload](Transport::upload) has nothing left to do. Listings are ordered by
/// modification time.
#[derive(Debug, Clone)]
pub struct LocalTransport {
    dir: PathBuf,
}

impl LocalTransport {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl Transport for LocalTransport {
    fn name(&self) -> &'static str {
        "local"
    }

    fn upload(&self, local_path: &Path) -> Result<(), TransportError> {
        log::info!(target: "transport::local", "Local destination configured, keeping {} in place", local_path.display());
        Ok(())
    }

    fn list(&self, filter: &dyn Fn(&str) -> bool) -> Result<Vec<String>, TransportError> {
        let read_dir = match fs::read_dir(&self.dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::debug!(target: "transport::local", "{} doesn't exist, nothing to list", self.dir.display());
                return Ok(Vec::new());
            }
            Err(e) => {
                return Err(TransportError::io(
                    format!("listing {}", self.dir.display()),
                    e,
                ))
            }
        };

        let mut files: Vec<(SystemTime, String)> = Vec::new();
        for entry in read_dir {
            let entry = entry
                .map_err(|e| TransportError::io(format!("listing {}", self.dir.display()), e))?;
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !filter(&name) {
                continue;
            }

            let metadata = entry
                .metadata()
                .map_err(|e| TransportError::io(format!("inspecting {name}"), e))?;
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|e| TransportError::io(format!("inspecting {name}"), e))?;
            files.push((modified, name));
        }

        // oldest first, the name breaks ties
        files.sort();
        log::info!(target: "transport::local", "Found {} matching files in {}", files.len(), self.dir.display());

        Ok(files.into_iter().map(|(_, name)| name).collect())
    }

    fn delete(&self, name: &str) -> Result<(), TransportError> {
        let path = self.dir.join(name);
        fs::remove_file(&path)
            .map_err(|e| TransportError::io(format!("deleting {}", path.display()), e))
    }

    fn ensure_remote_dir(&self, path: &str) -> Result<(), TransportError> {
        let dir = self.dir.join(path);
        fs::create_dir_all(&dir)
            .map_err(|e| TransportError::io(format!("creating {}", dir.display()), e))
    }
}
