use std::fs::File;
use std::io;
use std::net::TcpStream;
use std::path::Path;

use ssh2::{Session, Sftp};

use super::{path_segments, remote_path, Transport, TransportError};
use crate::config::{SftpAuth, SftpConfig};

const DIR_MODE: i32 = 0o755;

/// A directory on an SFTP server.
#[derive(Debug, Clone)]
pub struct SftpTransport {
    config: SftpConfig,
}

impl SftpTransport {
    pub fn new(config: SftpConfig) -> Self {
        Self { config }
    }
}

/// Authenticated SSH session with an open SFTP channel.
///
/// Dropping it closes the channel first and disconnects the session afterwards.
struct SftpSession {
    sftp: Option<Sftp>,
    session: Session,
}

fn ssh_error(operation: impl Into<String>) -> impl FnOnce(ssh2::Error) -> TransportError {
    let operation = operation.into();
    move |source| TransportError::Ssh { operation, source }
}

impl SftpSession {
    fn open(config: &SftpConfig) -> Result<Self, TransportError> {
        let endpoint = format!("{}:{}", config.host, config.port);
        log::info!(target: "transport::sftp", "Connecting to SFTP server: {endpoint}");

        let tcp = TcpStream::connect(&endpoint)
            .map_err(|e| TransportError::io(format!("connecting to {endpoint}"), e))?;
        let mut session = Session::new().map_err(ssh_error("creating session"))?;
        session.set_tcp_stream(tcp);
        session.handshake().map_err(ssh_error("handshake"))?;

        // the session is disconnected on every exit path from here on
        let mut this = Self {
            sftp: None,
            session,
        };

        let auth = match &config.auth {
            SftpAuth::PrivateKey(key) => {
                log::debug!(target: "transport::sftp", "Authenticating with private key {}", key.display());
                this.session
                    .userauth_pubkey_file(&config.username, None, key, None)
            }
            SftpAuth::Password(password) => {
                this.session.userauth_password(&config.username, password)
            }
        };
        if auth.is_err() || !this.session.authenticated() {
            return Err(TransportError::Authentication {
                user: config.username.clone(),
            });
        }

        let sftp = this.session.sftp().map_err(ssh_error("opening channel"))?;
        this.sftp = Some(sftp);

        Ok(this)
    }

    fn sftp(&self) -> &Sftp {
        match &self.sftp {
            Some(sftp) => sftp,
            None => unreachable!("sftp channel is opened on session creation"),
        }
    }

    fn exists(&self, path: &str) -> bool {
        self.sftp().stat(Path::new(path)).is_ok()
    }

    /// Creates `dir` one missing segment at a time.
    fn mkdir_all(&self, dir: &str) -> Result<(), TransportError> {
        if self.exists(dir) {
            return Ok(());
        }
        log::info!(target: "transport::sftp", "Remote directory {dir} not found, attempting to create it");

        for segment in path_segments(dir) {
            if !self.exists(&segment) {
                self.sftp()
                    .mkdir(Path::new(&segment), DIR_MODE)
                    .map_err(ssh_error(format!("mkdir {segment}")))?;
            }
        }

        Ok(())
    }
}

impl Drop for SftpSession {
    fn drop(&mut self) {
        drop(self.sftp.take());
        if let Err(e) = self.session.disconnect(None, "backup finished", None) {
            log::debug!(target: "transport::sftp", "Closing SSH session failed: {e}");
        }
    }
}

impl Transport for SftpTransport {
    fn name(&self) -> &'static str {
        "sftp"
    }

    fn upload(&self, local_path: &Path) -> Result<(), TransportError> {
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TransportError::io(
                    format!("uploading {}", local_path.display()),
                    io::Error::new(io::ErrorKind::InvalidInput, "no valid file name"),
                )
            })?;
        let mut file = File::open(local_path)
            .map_err(|e| TransportError::io(format!("opening {}", local_path.display()), e))?;

        let session = SftpSession::open(&self.config)?;
        session.mkdir_all(&self.config.remote_dir)?;

        let target = remote_path(&self.config.remote_dir, file_name);
        log::info!(target: "transport::sftp", "Uploading {file_name} to SFTP server");
        let mut remote = session
            .sftp()
            .create(Path::new(&target))
            .map_err(ssh_error(format!("creating {target}")))?;
        let bytes = io::copy(&mut file, &mut remote)
            .map_err(|e| TransportError::io(format!("writing {target}"), e))?;
        drop(remote);
        log::info!(target: "transport::sftp", "Successfully uploaded {file_name} ({bytes} bytes) to SFTP server");

        Ok(())
    }

    fn list(&self, filter: &dyn Fn(&str) -> bool) -> Result<Vec<String>, TransportError> {
        let session = SftpSession::open(&self.config)?;
        let remote_dir = &self.config.remote_dir;

        if !session.exists(remote_dir) {
            log::warn!(target: "transport::sftp", "Remote directory {remote_dir} not found, nothing to list");
            return Ok(Vec::new());
        }

        let entries = session
            .sftp()
            .readdir(Path::new(remote_dir))
            .map_err(ssh_error(format!("listing {remote_dir}")))?;
        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|(path, _)| path.file_name()?.to_str())
            .filter(|name| filter(name))
            .map(String::from)
            .collect();
        // names start with a sortable timestamp
        names.sort();
        log::info!(target: "transport::sftp", "Found {} matching files on SFTP server", names.len());

        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<(), TransportError> {
        let session = SftpSession::open(&self.config)?;
        let target = remote_path(&self.config.remote_dir, name);
        session
            .sftp()
            .unlink(Path::new(&target))
            .map_err(ssh_error(format!("removing {target}")))
    }

    fn ensure_remote_dir(&self, path: &str) -> Result<(), TransportError> {
        let session = SftpSession::open(&self.config)?;
        session.mkdir_all(path)
    }
}
