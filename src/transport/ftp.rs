use std::fs::File;
use std::path::Path;

use suppaftp::types::FileType;
use suppaftp::{FtpError, FtpStream, Mode};

use super::{path_segments, Transport, TransportError};
use crate::config::FtpConfig;

/// A directory on an FTP server.
#[derive(Debug, Clone)]
pub struct FtpTransport {
    config: FtpConfig,
}

impl FtpTransport {
    pub fn new(config: FtpConfig) -> Self {
        Self { config }
    }
}

/// Logged in FTP session, closed with `QUIT` when dropped.
struct FtpSession {
    stream: FtpStream,
}

impl FtpSession {
    fn open(config: &FtpConfig) -> Result<Self, TransportError> {
        let endpoint = format!("{}:{}", config.host, config.port);
        log::info!(target: "transport::ftp", "Connecting to FTP server: {endpoint}");

        let stream = FtpStream::connect(&endpoint).map_err(|source| TransportError::Ftp {
            operation: format!("connecting to {endpoint}"),
            source,
        })?;
        // from here on the session is closed on every exit path
        let mut session = Self { stream };

        session
            .stream
            .login(config.username.as_str(), config.password.as_str())
            .map_err(|source| match source {
                FtpError::UnexpectedResponse(_) => TransportError::Authentication {
                    user: config.username.clone(),
                },
                source => TransportError::Ftp {
                    operation: "login".to_string(),
                    source,
                },
            })?;

        session.stream.set_mode(if config.passive {
            Mode::Passive
        } else {
            Mode::Active
        });

        Ok(session)
    }

    fn run<T>(
        &mut self,
        operation: impl FnOnce() -> String,
        command: impl FnOnce(&mut FtpStream) -> Result<T, FtpError>,
    ) -> Result<T, TransportError> {
        command(&mut self.stream).map_err(|source| TransportError::Ftp {
            operation: operation(),
            source,
        })
    }

    /// Changes into `dir`, creating missing segments one at a time.
    fn cwd_creating(&mut self, dir: &str) -> Result<(), TransportError> {
        if entered(self.stream.cwd(dir), dir)? {
            return Ok(());
        }
        log::info!(target: "transport::ftp", "Remote directory {dir} not found, attempting to create it");

        for segment in path_segments(dir) {
            if !entered(self.stream.cwd(&segment), &segment)? {
                self.run(|| format!("mkd {segment}"), |ftp| ftp.mkdir(&segment))?;
                self.run(|| format!("cwd {segment}"), |ftp| ftp.cwd(&segment))?;
            }
        }

        Ok(())
    }
}

/// Returns if the `cwd` into `dir` that produced `result` succeeded.
///
/// A rejected `cwd` means `dir` doesn't exist. Any other failure is an error.
fn entered(result: Result<(), FtpError>, dir: &str) -> Result<bool, TransportError> {
    match result {
        Ok(()) => Ok(true),
        Err(FtpError::UnexpectedResponse(_)) => Ok(false),
        Err(source) => Err(TransportError::Ftp {
            operation: format!("cwd {dir}"),
            source,
        }),
    }
}

impl Drop for FtpSession {
    fn drop(&mut self) {
        if let Err(e) = self.stream.quit() {
            log::debug!(target: "transport::ftp", "Closing FTP session failed: {e}");
        }
    }
}

/// Extracts the file name from a line of a UNIX style `LIST` reply.
///
/// Expects the nine whitespace separated fields of `ls -l`; names containing
/// whitespace are truncated to their first word.
fn parse_list_line(line: &str) -> Option<&str> {
    line.split_whitespace().nth(8)
}

impl Transport for FtpTransport {
    fn name(&self) -> &'static str {
        "ftp"
    }

    fn upload(&self, local_path: &Path) -> Result<(), TransportError> {
        let file_name = local_path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| {
                TransportError::io(
                    format!("uploading {}", local_path.display()),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, "no valid file name"),
                )
            })?;
        let mut file = File::open(local_path)
            .map_err(|e| TransportError::io(format!("opening {}", local_path.display()), e))?;

        let mut session = FtpSession::open(&self.config)?;
        session.cwd_creating(&self.config.remote_dir)?;
        session.run(|| "TYPE I".to_string(), |ftp| ftp.transfer_type(FileType::Binary))?;

        log::info!(target: "transport::ftp", "Uploading {file_name} to FTP server");
        let bytes = session.run(
            || format!("STOR {file_name}"),
            |ftp| ftp.put_file(file_name, &mut file),
        )?;
        log::info!(target: "transport::ftp", "Successfully uploaded {file_name} ({bytes} bytes) to FTP server");

        Ok(())
    }

    fn list(&self, filter: &dyn Fn(&str) -> bool) -> Result<Vec<String>, TransportError> {
        let mut session = FtpSession::open(&self.config)?;
        let remote_dir = &self.config.remote_dir;

        if !entered(session.stream.cwd(remote_dir), remote_dir)? {
            log::warn!(target: "transport::ftp", "Remote directory {remote_dir} not found, nothing to list");
            return Ok(Vec::new());
        }

        let lines = session.run(|| "LIST".to_string(), |ftp| ftp.list(None))?;
        let mut names: Vec<String> = lines
            .iter()
            .filter_map(|line| parse_list_line(line))
            .filter(|name| filter(name))
            .map(String::from)
            .collect();
        // names start with a sortable timestamp
        names.sort();
        log::info!(target: "transport::ftp", "Found {} matching files on FTP server", names.len());

        Ok(names)
    }

    fn delete(&self, name: &str) -> Result<(), TransportError> {
        let mut session = FtpSession::open(&self.config)?;
        let remote_dir = &self.config.remote_dir;
        session.run(|| format!("cwd {remote_dir}"), |ftp| ftp.cwd(remote_dir))?;
        session.run(|| format!("DELE {name}"), |ftp| ftp.rm(name))
    }

    fn ensure_remote_dir(&self, path: &str) -> Result<(), TransportError> {
        let mut session = FtpSession::open(&self.config)?;
        session.cwd_creating(path)
    }
}
