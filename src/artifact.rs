//! Naming and recognition of the files a backup run produces.
//!
//! Every file name starts with the [RunTimestamp] of the run that produced it,
//! which keeps names unique within a run and lexicographically sortable
//! across runs.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{Local, NaiveDateTime, SubsecRound};

/// Format of the timestamp prefix of every artifact and log file name.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d.%H:%M:%S";

/// Suffix identifying the log file of a backup run.
pub const LOG_SUFFIX: &str = "_backup.log";

/// Point in time a backup run started, with second precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RunTimestamp(NaiveDateTime);

impl RunTimestamp {
    /// Timestamp of the current local time.
    pub fn now() -> Self {
        Self::from(Local::now().naive_local())
    }
}

impl From<NaiveDateTime> for RunTimestamp {
    fn from(date: NaiveDateTime) -> Self {
        Self(date.trunc_subsecs(0))
    }
}

impl fmt::Display for RunTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

/// The different artifacts produced by a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    /// Compressed database dump.
    DbDump,
    /// Compressed snapshot of the source directory.
    FileSnapshot,
    /// Archive bundling [DbDump](Self::DbDump) and [FileSnapshot](Self::FileSnapshot).
    ///
    /// The only artifact that is transported and retained.
    Combined,
}

impl ArtifactKind {
    /// File name suffix of the kind, following the server identity.
    pub fn suffix(self) -> &'static str {
        match self {
            Self::DbDump => "_db.tar.gz",
            Self::FileSnapshot => "_root_files.tar.gz",
            Self::Combined => "_root_files_and_db.tar.gz",
        }
    }
}

/// File name of the artifact `kind` of `server` created at `timestamp`.
pub fn artifact_name(timestamp: RunTimestamp, server: &str, kind: ArtifactKind) -> String {
    format!("{timestamp}_{server}{}", kind.suffix())
}

/// Returns if `file_name` is a combined backup of `server`.
///
/// <div class="warning">
/// This is a plain substring match. The backups of a server whose identity
/// ends with the identity of another server (`web` and `old-web`) are
/// recognized as belonging to both.
/// </div>
pub fn belongs_to_server(file_name: &str, server: &str) -> bool {
    let family = format!("_{server}{}", ArtifactKind::Combined.suffix());
    file_name.contains(&family)
}

/// File name of the log of the run started at `timestamp`.
pub fn log_file_name(timestamp: RunTimestamp) -> String {
    format!("{timestamp}{LOG_SUFFIX}")
}

/// Returns if `file_name` is the log of a backup run.
pub fn is_backup_log(file_name: &str) -> bool {
    file_name.ends_with(LOG_SUFFIX)
}

/// A file produced by a backup run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    path: PathBuf,
    kind: ArtifactKind,
    created_at: SystemTime,
}

impl Artifact {
    /// Describes the already existing artifact at `path`.
    ///
    /// The creation time is taken from the modification time of the file.
    pub fn new(path: PathBuf, kind: ArtifactKind) -> io::Result<Self> {
        let created_at = path.metadata()?.modified()?;

        Ok(Self {
            path,
            kind,
            created_at,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }

    pub fn created_at(&self) -> SystemTime {
        self.created_at
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn timestamp() -> RunTimestamp {
        NaiveDate::from_ymd_opt(2023, 1, 2)
            .and_then(|d| d.and_hms_milli_opt(3, 4, 5, 678))
            .map(RunTimestamp::from)
            .unwrap()
    }

    #[test]
    fn names_follow_kind() {
        let ts = timestamp();
        assert_eq!(ts.to_string(), "2023-01-02.03:04:05");
        assert_eq!(
            artifact_name(ts, "web01", ArtifactKind::DbDump),
            "2023-01-02.03:04:05_web01_db.tar.gz"
        );
        assert_eq!(
            artifact_name(ts, "web01", ArtifactKind::FileSnapshot),
            "2023-01-02.03:04:05_web01_root_files.tar.gz"
        );
        assert_eq!(
            artifact_name(ts, "web01", ArtifactKind::Combined),
            "2023-01-02.03:04:05_web01_root_files_and_db.tar.gz"
        );
    }

    #[test]
    fn combined_backup_is_recognized() {
        let ts = timestamp();
        for server in ["web01", "db.example.org", "a_b", ""] {
            let name = artifact_name(ts, server, ArtifactKind::Combined);
            assert!(belongs_to_server(&name, server), "{name}");
        }
    }

    #[test]
    fn other_artifacts_are_not_backups() {
        let ts = timestamp();
        assert!(!belongs_to_server(
            &artifact_name(ts, "web01", ArtifactKind::DbDump),
            "web01"
        ));
        assert!(!belongs_to_server(
            &artifact_name(ts, "web02", ArtifactKind::Combined),
            "web01"
        ));
    }

    #[test]
    fn suffix_identity_matches_both_servers() {
        let name = artifact_name(timestamp(), "old-web", ArtifactKind::Combined);
        assert!(belongs_to_server(&name, "old-web"));
        assert!(belongs_to_server(&name, "web"));
    }

    #[test]
    fn names_sort_chronologically() {
        let earlier = artifact_name(timestamp(), "web01", ArtifactKind::Combined);
        let later = NaiveDate::from_ymd_opt(2023, 1, 10)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(RunTimestamp::from)
            .map(|ts| artifact_name(ts, "web01", ArtifactKind::Combined))
            .unwrap();
        assert!(earlier < later);
    }

    #[test]
    fn log_names() {
        let name = log_file_name(timestamp());
        assert_eq!(name, "2023-01-02.03:04:05_backup.log");
        assert!(is_backup_log(&name));
        assert!(!is_backup_log("backup.log.1"));
    }
}
