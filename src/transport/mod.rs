//! Delivery of backups to their destination.
//!
//! Every destination implements [Transport]:
//!
//! - [LocalTransport]: The backup directory on the local machine.
//! - [FtpTransport]: A directory on an FTP server.
//! - [SftpTransport]: A directory on an SFTP server (feature `sftp`).
//!
//! Operations don't retry. Each remote operation opens its own session and
//! closes it again before returning.

mod ftp;
mod local;
#[cfg(feature = "sftp")]
mod sftp;

use std::io;
use std::path::Path;

use derive_more::{Display, Error};

pub use ftp::FtpTransport;
pub use local::LocalTransport;
#[cfg(feature = "sftp")]
pub use sftp::SftpTransport;

use crate::config::Destination;

#[derive(Debug, Display, Error)]
/// Errors of a [Transport] operation.
pub enum TransportError {
    /// Local filesystem or network socket failure.
    #[display("{operation} failed: {source}")]
    Io {
        operation: String,
        source: io::Error,
    },
    /// The FTP server rejected a command or the FTP session broke.
    #[display("FTP {operation} failed: {source}")]
    Ftp {
        operation: String,
        source: suppaftp::FtpError,
    },
    /// The SSH session or the SFTP channel failed.
    #[cfg(feature = "sftp")]
    #[display("SFTP {operation} failed: {source}")]
    Ssh {
        operation: String,
        source: ssh2::Error,
    },
    /// The server accepted the connection but not the credentials.
    #[display("authentication as {user} failed")]
    Authentication { user: String },
}

impl TransportError {
    pub(crate) fn io(operation: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            source,
        }
    }
}

/// The capabilities needed from a backup destination.
pub trait Transport {
    /// Name of the destination used in log messages.
    fn name(&self) -> &'static str;

    /// Delivers the file at `local_path` into the destination directory.
    fn upload(&self, local_path: &Path) -> Result<(), TransportError>;

    /// Names of the files in the destination directory accepted by `filter`,
    /// ordered oldest first.
    fn list(&self, filter: &dyn Fn(&str) -> bool) -> Result<Vec<String>, TransportError>;

    /// Deletes the file `name` from the destination directory.
    fn delete(&self, name: &str) -> Result<(), TransportError>;

    /// Creates `path` including every missing parent directory.
    fn ensure_remote_dir(&self, path: &str) -> Result<(), TransportError>;
}

/// Selects the [Transport] for `destination`.
///
/// Local backups live in `backup_dir`.
pub fn for_destination(destination: &Destination, backup_dir: &Path) -> Box<dyn Transport> {
    match destination {
        Destination::Local => Box::new(LocalTransport::new(backup_dir)),
        Destination::Ftp(config) => Box::new(FtpTransport::new(config.clone())),
        #[cfg(feature = "sftp")]
        Destination::Sftp(config) => Box::new(SftpTransport::new(config.clone())),
        // validation rejects sftp destinations without sftp support
        #[cfg(not(feature = "sftp"))]
        Destination::Sftp(_) => unreachable!("sftp destination without sftp support"),
    }
}

/// Joins `name` to the remote directory `dir`.
fn remote_path(dir: &str, name: &str) -> String {
    format!("{}/{name}", dir.trim_end_matches('/'))
}

/// Cumulative paths of the segments of the remote directory `dir`.
///
/// `backups/web01` yields `/backups` and `/backups/web01`.
fn path_segments(dir: &str) -> Vec<String> {
    let mut current = String::new();
    dir.split('/')
        .filter(|part| !part.is_empty())
        .map(|part| {
            current.push('/');
            current.push_str(part);
            current.clone()
        })
        .collect()
}
