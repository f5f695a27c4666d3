//! Configuration of the backup agent.
//!
//! [Settings] is the raw, section based view read from a TOML file and the
//! `BACKITUP_*` environment variables. [Settings::validate] turns it into
//! the [ResolvedConfig] consumed by the pipeline.

mod env;

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use derive_more::{Display, Error};

pub use env::ENV_PREFIX;

const DEFAULT_DB_USER: &str = "root";
const ALL_DATABASES: &str = "--all-databases";
const DEFAULT_FTP_PORT: u16 = 21;
const DEFAULT_SFTP_PORT: u16 = 22;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_BACKUP_DIR: &str = ".";

/// Merges two layers of configuration, the values of `top` taking precedence.
trait Overlay {
    fn overlay(self, top: Self) -> Self;
}

macro_rules! impl_overlay {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl Overlay for $ty {
            fn overlay(self, top: Self) -> Self {
                Self {
                    $($field: top.$field.or(self.$field)),*
                }
            }
        }
    };
}

fn overlay_section<T: Overlay>(base: Option<T>, top: Option<T>) -> Option<T> {
    match (base, top) {
        (Some(base), Some(top)) => Some(base.overlay(top)),
        (base, top) => top.or(base),
    }
}

/// Unvalidated configuration as it is written in the configuration file.
#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub struct Settings {
    pub system: Option<SystemSection>,
    pub db: Option<DbSection>,
    pub files: Option<FilesSection>,
    pub backup: Option<BackupSection>,
    pub ftp: Option<FtpSection>,
    pub sftp: Option<SftpSection>,
    pub logs: Option<LogsSection>,
    pub commands: Option<CommandsSection>,
}

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct SystemSection {
    /// Identity of the server, used in every artifact name.
    ///
    /// Defaults to the host name.
    pub server_name: Option<String>,
}
impl_overlay!(SystemSection { server_name });

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct DbSection {
    /// Either `mysql` or `mariadb`.
    pub db_type: Option<String>,
    pub db_host: Option<String>,
    pub db_user: Option<String>,
    pub db_password: Option<String>,
    /// Name of the database to dump, or `--all-databases`.
    pub db_name: Option<String>,
}
impl_overlay!(DbSection {
    db_type,
    db_host,
    db_user,
    db_password,
    db_name
});

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct FilesSection {
    /// Directory to archive.
    pub files_dir_path: Option<PathBuf>,
}
impl_overlay!(FilesSection { files_dir_path });

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct BackupSection {
    /// One of `local`, `ftp` or `sftp`.
    pub destination_type: Option<String>,
    pub keep_local_copy: Option<bool>,
    /// Number of backups to keep, `0` disables rotation.
    pub keep_backups: Option<i64>,
    /// Directory combined backups are written to.
    pub backup_dir: Option<PathBuf>,
}
impl_overlay!(BackupSection {
    destination_type,
    keep_local_copy,
    keep_backups,
    backup_dir
});

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct FtpSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub remote_dir: Option<String>,
    pub passive_mode: Option<bool>,
}
impl_overlay!(FtpSection {
    host,
    port,
    username,
    password,
    remote_dir,
    passive_mode
});

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct SftpSection {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub private_key_path: Option<PathBuf>,
    pub remote_dir: Option<String>,
}
impl_overlay!(SftpSection {
    host,
    port,
    username,
    password,
    private_key_path,
    remote_dir
});

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct LogsSection {
    pub log_dir: Option<PathBuf>,
    /// Number of run logs to keep, `0` disables rotation.
    pub keep_logs: Option<i64>,
}
impl_overlay!(LogsSection { log_dir, keep_logs });

#[derive(Debug, Default, Clone, PartialEq, serde::Deserialize)]
pub struct CommandsSection {
    pub pre_backup: Option<String>,
    pub post_backup: Option<String>,
    pub post_transfer: Option<String>,
}
impl_overlay!(CommandsSection {
    pre_backup,
    post_backup,
    post_transfer
});

impl Overlay for Settings {
    fn overlay(self, top: Self) -> Self {
        Self {
            system: overlay_section(self.system, top.system),
            db: overlay_section(self.db, top.db),
            files: overlay_section(self.files, top.files),
            backup: overlay_section(self.backup, top.backup),
            ftp: overlay_section(self.ftp, top.ftp),
            sftp: overlay_section(self.sftp, top.sftp),
            logs: overlay_section(self.logs, top.logs),
            commands: overlay_section(self.commands, top.commands),
        }
    }
}

#[derive(Debug, Display, Error)]
/// Errors of reading or validating the configuration.
pub enum ConfigError {
    /// The configuration file exists but can't be read.
    #[display("Reading the config file {path:?} failed: {source}")]
    Read { path: PathBuf, source: io::Error },
    /// The configuration file is no valid TOML.
    #[display("Parsing the config file {path:?} failed: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Neither the configuration file nor the environment configure anything.
    #[display("No configuration found in config file or environment variables")]
    NoConfiguration,
    /// A mandatory section is absent.
    #[display("Missing '{_0}' section in configuration")]
    MissingSection(#[error(ignore)] &'static str),
    /// A mandatory field is absent.
    #[display("Missing required field '{field}' in {section} section")]
    MissingField {
        section: &'static str,
        field: &'static str,
    },
    /// A field holds a value outside of its allowed set.
    #[display("Invalid {field}: {value}. Must be one of {allowed}")]
    InvalidValue {
        field: &'static str,
        value: String,
        allowed: &'static str,
    },
    /// The directory to back up doesn't exist.
    #[display("Files directory does not exist: {_0:?}")]
    MissingFilesDir(#[error(ignore)] PathBuf),
    /// SFTP is configured without any credentials.
    #[display("Either 'password' or 'private_key_path' must be provided in SFTP section")]
    MissingSftpCredentials,
    /// The configured SFTP private key can't be read.
    #[display("SFTP private key file {path:?} is not readable: {source}")]
    PrivateKeyUnreadable { path: PathBuf, source: io::Error },
    /// SFTP support was not compiled in.
    #[display("SFTP destination type selected but SFTP support is not available")]
    SftpUnavailable,
}

impl Settings {
    /// Reads the configuration file at `path`.
    ///
    /// A missing file is not an error and yields [None].
    pub fn from_file(path: &Path) -> Result<Option<Self>, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!(target: "config", "Configuration file not found: {}. Will try to use environment variables.", path.display());
                return Ok(None);
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let settings = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        log::info!(target: "config", "Loaded configuration from {}", path.display());

        Ok(Some(settings))
    }

    /// Reads the `BACKITUP_*` variables through `lookup`.
    pub fn from_env(lookup: impl Fn(&str) -> Option<String>) -> Self {
        env::settings_from_env(lookup)
    }

    /// Merges `top` into `self`, key by key within every section.
    pub fn overlay(self, top: Self) -> Self {
        Overlay::overlay(self, top)
    }

    /// Loads the configuration file at `path` and applies the environment on top.
    pub fn load(path: &Path, lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let file = Self::from_file(path)?.unwrap_or_default();
        let env = Self::from_env(lookup);
        if env != Self::default() {
            log::info!(target: "config", "Loaded configuration from environment variables");
        }

        let settings = file.overlay(env);
        if settings == Self::default() {
            return Err(ConfigError::NoConfiguration);
        }

        Ok(settings)
    }

    /// Directory for run logs, available before validation.
    pub fn log_dir(&self) -> PathBuf {
        self.logs
            .as_ref()
            .and_then(|logs| logs.log_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_DIR))
    }

    /// Validates the settings.
    ///
    /// Fails on the first missing or invalid value without touching the
    /// filesystem beyond existence checks.
    pub fn validate(&self) -> Result<ResolvedConfig, ConfigError> {
        let server_name = match self.system.as_ref().and_then(|s| s.server_name.clone()) {
            Some(name) => name,
            None => host_identity().ok_or(ConfigError::MissingField {
                section: "SYSTEM",
                field: "server_name",
            })?,
        };
        log::info!(target: "config", "Using server name: {server_name}");

        let (destination, keep_local_copy, keep_backups, backup_dir) = match &self.backup {
            None => (Destination::Local, true, 0, None),
            Some(backup) => {
                let destination_type = required("BACKUP", "destination_type", &backup.destination_type)?;
                let destination = match destination_type.as_str() {
                    "local" => Destination::Local,
                    "ftp" => Destination::Ftp(self.ftp_config()?),
                    "sftp" => Destination::Sftp(self.sftp_config()?),
                    other => {
                        return Err(ConfigError::InvalidValue {
                            field: "destination_type",
                            value: other.to_string(),
                            allowed: "local, ftp, sftp",
                        })
                    }
                };
                (
                    destination,
                    backup.keep_local_copy.unwrap_or(true),
                    backup.keep_backups.unwrap_or(0),
                    backup.backup_dir.clone(),
                )
            }
        };

        let db = self.db.as_ref().ok_or(ConfigError::MissingSection("DB"))?;
        let engine = required("DB", "db_type", &db.db_type)?.parse()?;
        let db = DbConfig {
            engine,
            host: required("DB", "db_host", &db.db_host)?,
            user: db.db_user.clone().unwrap_or_else(|| DEFAULT_DB_USER.to_string()),
            password: db.db_password.clone().filter(|p| !p.is_empty()),
            database: db
                .db_name
                .as_deref()
                .map(DatabaseSelection::from)
                .unwrap_or(DatabaseSelection::All),
        };

        let files = self
            .files
            .as_ref()
            .ok_or(ConfigError::MissingSection("FILES"))?;
        let files_dir = required("FILES", "files_dir_path", &files.files_dir_path)?;
        if !files_dir.exists() {
            return Err(ConfigError::MissingFilesDir(files_dir));
        }

        let logs = self.logs.clone().unwrap_or_default();
        let commands = self.commands.clone().unwrap_or_default();

        Ok(ResolvedConfig {
            server_name,
            db,
            files_dir,
            destination,
            keep_local_copy,
            keep_backups,
            backup_dir: backup_dir.unwrap_or_else(|| PathBuf::from(DEFAULT_BACKUP_DIR)),
            log_dir: self.log_dir(),
            keep_logs: logs.keep_logs.unwrap_or(0),
            commands: Commands {
                pre_backup: non_empty(commands.pre_backup),
                post_backup: non_empty(commands.post_backup),
                post_transfer: non_empty(commands.post_transfer),
            },
        })
    }

    fn ftp_config(&self) -> Result<FtpConfig, ConfigError> {
        let ftp = self.ftp.as_ref().ok_or(ConfigError::MissingSection("FTP"))?;

        Ok(FtpConfig {
            host: required("FTP", "host", &ftp.host)?,
            port: ftp.port.unwrap_or(DEFAULT_FTP_PORT),
            username: required("FTP", "username", &ftp.username)?,
            password: required("FTP", "password", &ftp.password)?,
            remote_dir: required("FTP", "remote_dir", &ftp.remote_dir)?,
            passive: ftp.passive_mode.unwrap_or(true),
        })
    }

    #[cfg(feature = "sftp")]
    fn sftp_config(&self) -> Result<SftpConfig, ConfigError> {
        let sftp = self
            .sftp
            .as_ref()
            .ok_or(ConfigError::MissingSection("SFTP"))?;

        let host = required("SFTP", "host", &sftp.host)?;
        let username = required("SFTP", "username", &sftp.username)?;
        let remote_dir = required("SFTP", "remote_dir", &sftp.remote_dir)?;

        let password = sftp.password.clone().filter(|p| !p.is_empty());
        let private_key = sftp
            .private_key_path
            .clone()
            .filter(|p| !p.as_os_str().is_empty());
        let auth = match (private_key, password) {
            (Some(path), _) => {
                File::open(&path).map_err(|source| ConfigError::PrivateKeyUnreadable {
                    path: path.clone(),
                    source,
                })?;
                SftpAuth::PrivateKey(path)
            }
            (None, Some(password)) => SftpAuth::Password(password),
            (None, None) => return Err(ConfigError::MissingSftpCredentials),
        };

        Ok(SftpConfig {
            host,
            port: sftp.port.unwrap_or(DEFAULT_SFTP_PORT),
            username,
            auth,
            remote_dir,
        })
    }

    #[cfg(not(feature = "sftp"))]
    fn sftp_config(&self) -> Result<SftpConfig, ConfigError> {
        Err(ConfigError::SftpUnavailable)
    }
}

fn required<T: Clone>(
    section: &'static str,
    field: &'static str,
    value: &Option<T>,
) -> Result<T, ConfigError> {
    value
        .clone()
        .ok_or(ConfigError::MissingField { section, field })
}

fn non_empty(command: Option<String>) -> Option<String> {
    command.filter(|c| !c.trim().is_empty())
}

fn host_identity() -> Option<String> {
    hostname::get().ok()?.into_string().ok()
}

/// Validated configuration of a single backup run.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedConfig {
    pub server_name: String,
    pub db: DbConfig,
    /// Directory archived into the file snapshot.
    pub files_dir: PathBuf,
    pub destination: Destination,
    /// Keep the combined backup in [backup_dir](Self::backup_dir) after a remote transfer.
    pub keep_local_copy: bool,
    pub keep_backups: i64,
    pub backup_dir: PathBuf,
    pub log_dir: PathBuf,
    pub keep_logs: i64,
    pub commands: Commands,
}

/// Supported database servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum DbEngine {
    #[display("mysql")]
    MySql,
    #[display("mariadb")]
    MariaDb,
}

impl FromStr for DbEngine {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mysql" => Ok(Self::MySql),
            "mariadb" => Ok(Self::MariaDb),
            other => Err(ConfigError::InvalidValue {
                field: "db_type",
                value: other.to_string(),
                allowed: "mysql, mariadb",
            }),
        }
    }
}

/// Databases included in the dump.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseSelection {
    All,
    Named(String),
}

impl From<&str> for DatabaseSelection {
    fn from(name: &str) -> Self {
        match name {
            ALL_DATABASES | "all" => Self::All,
            name => Self::Named(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub engine: DbEngine,
    pub host: String,
    pub user: String,
    pub password: Option<String>,
    pub database: DatabaseSelection,
}

/// Where the combined backup is delivered to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    /// The backup stays in the backup directory.
    Local,
    Ftp(FtpConfig),
    Sftp(SftpConfig),
}

impl Destination {
    /// Returns if the backup leaves the machine.
    pub fn is_remote(&self) -> bool {
        !matches!(self, Self::Local)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Ftp(_) => "ftp",
            Self::Sftp(_) => "sftp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub remote_dir: String,
    pub passive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SftpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: SftpAuth,
    pub remote_dir: String,
}

/// Authentication against the SFTP server.
///
/// A configured private key takes precedence over a password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SftpAuth {
    PrivateKey(PathBuf),
    Password(String),
}

/// Shell commands run around the backup.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Commands {
    pub pre_backup: Option<String>,
    pub post_backup: Option<String>,
    pub post_transfer: Option<String>,
}
