//! Configuration through `BACKITUP_*` environment variables.

use std::path::PathBuf;
use std::str::FromStr;

use super::{
    BackupSection, CommandsSection, DbSection, FilesSection, FtpSection, LogsSection, Settings,
    SftpSection, SystemSection,
};

/// Prefix of every environment variable read by the agent.
pub const ENV_PREFIX: &str = "BACKITUP_";

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}")).filter(|value| !value.is_empty())
    }

    fn path(&self, key: &str) -> Option<PathBuf> {
        self.string(key).map(PathBuf::from)
    }

    fn flag(&self, key: &str) -> Option<bool> {
        self.string(key)
            .map(|value| matches!(value.to_lowercase().as_str(), "true" | "yes" | "1"))
    }

    fn number<T: FromStr>(&self, key: &str) -> Option<T> {
        let value = self.string(key)?;
        match value.parse() {
            Ok(number) => Some(number),
            Err(_) => {
                log::warn!(target: "config::env", "Invalid value for {ENV_PREFIX}{key}: {value}. Using default.");
                None
            }
        }
    }
}

/// Returns [Some] unless every field of the section is unset.
fn section<T: Default + PartialEq>(section: T) -> Option<T> {
    (section != T::default()).then_some(section)
}

pub(super) fn settings_from_env(lookup: impl Fn(&str) -> Option<String>) -> Settings {
    let env = EnvReader { lookup };

    Settings {
        system: section(SystemSection {
            server_name: env.string("SERVER_NAME"),
        }),
        db: section(DbSection {
            db_type: env.string("DB_TYPE"),
            db_host: env.string("DB_HOST"),
            db_user: env.string("DB_USER"),
            db_password: env.string("DB_PASSWORD"),
            db_name: env.string("DB_NAME"),
        }),
        files: section(FilesSection {
            files_dir_path: env.path("FILES_DIR_PATH"),
        }),
        backup: section(BackupSection {
            destination_type: env.string("DESTINATION_TYPE"),
            keep_local_copy: env.flag("KEEP_LOCAL_COPY"),
            keep_backups: env.number("KEEP_BACKUPS"),
            backup_dir: env.path("BACKUP_DIR"),
        }),
        ftp: section(FtpSection {
            host: env.string("FTP_HOST"),
            port: env.number("FTP_PORT"),
            username: env.string("FTP_USERNAME"),
            password: env.string("FTP_PASSWORD"),
            remote_dir: env.string("FTP_REMOTE_DIR"),
            passive_mode: env.flag("FTP_PASSIVE_MODE"),
        }),
        sftp: section(SftpSection {
            host: env.string("SFTP_HOST"),
            port: env.number("SFTP_PORT"),
            username: env.string("SFTP_USERNAME"),
            password: env.string("SFTP_PASSWORD"),
            private_key_path: env.path("SFTP_PRIVATE_KEY_PATH"),
            remote_dir: env.string("SFTP_REMOTE_DIR"),
        }),
        logs: section(LogsSection {
            log_dir: env.path("LOG_DIR"),
            keep_logs: env.number("KEEP_LOGS"),
        }),
        commands: section(CommandsSection {
            pre_backup: env.string("PRE_BACKUP_COMMAND"),
            post_backup: env.string("POST_BACKUP_COMMAND"),
            post_transfer: env.string("POST_TRANSFER_COMMAND"),
        }),
    }
}
