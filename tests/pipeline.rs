use std::cell::RefCell;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use backitup_lib::agent::{BackupAgent, RunContext, Stage, StageError};
use backitup_lib::artifact::{Artifact, RunTimestamp};
use backitup_lib::config::{
    BackupSection, CommandsSection, DbSection, FilesSection, FtpSection, LogsSection, Settings,
    SftpSection, SystemSection,
};
use backitup_lib::producers::{Producers, SystemProducers, ToolError};
use backitup_lib::transport::{Transport, TransportError};
use chrono::NaiveDate;
use filetime::FileTime;
use flate2::read::GzDecoder;
use tempfile::TempDir;

const SERVER: &str = "web01";

fn timestamp(day: u32) -> RunTimestamp {
    NaiveDate::from_ymd_opt(2001, 2, day)
        .and_then(|d| d.and_hms_opt(4, 5, 6))
        .map(RunTimestamp::from)
        .unwrap()
}

struct Workspace {
    root: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir(root.path().join("www")).unwrap();
        fs::write(root.path().join("www/index.html"), "<h1>hello</h1>").unwrap();
        Self { root }
    }

    fn backup_dir(&self) -> PathBuf {
        self.root.path().join("backups")
    }

    fn log_dir(&self) -> PathBuf {
        self.root.path().join("logs")
    }

    fn settings(&self, destination: &str, keep_backups: i64) -> Settings {
        Settings {
            system: Some(SystemSection {
                server_name: Some(SERVER.into()),
            }),
            db: Some(DbSection {
                db_type: Some("mariadb".into()),
                db_host: Some("localhost".into()),
                db_password: Some("secret".into()),
                ..Default::default()
            }),
            files: Some(FilesSection {
                files_dir_path: Some(self.root.path().join("www")),
            }),
            backup: Some(BackupSection {
                destination_type: Some(destination.into()),
                keep_local_copy: Some(false),
                keep_backups: Some(keep_backups),
                backup_dir: Some(self.backup_dir()),
            }),
            ftp: Some(FtpSection {
                host: Some("ftp.invalid".into()),
                username: Some("backup".into()),
                password: Some("secret".into()),
                remote_dir: Some("/backups".into()),
                ..Default::default()
            }),
            logs: Some(LogsSection {
                log_dir: Some(self.log_dir()),
                keep_logs: Some(0),
            }),
            ..Default::default()
        }
    }

    fn backups(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.backup_dir()) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .map(|entry| entry.unwrap().file_name().into_string().unwrap())
            .collect();
        names.sort();
        names
    }
}

fn with_commands(mut settings: Settings, commands: CommandsSection) -> Settings {
    settings.commands = Some(commands);
    settings
}

/// [SystemProducers] recording which producers were called.
struct Recording {
    inner: SystemProducers,
    calls: Rc<RefCell<Vec<&'static str>>>,
    fail_at: Option<&'static str>,
}

impl Recording {
    fn new(dump_program: &str) -> (Self, Rc<RefCell<Vec<&'static str>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let recording = Self {
            inner: SystemProducers::with_dump_program(dump_program),
            calls: calls.clone(),
            fail_at: None,
        };
        (recording, calls)
    }

    /// Fails the producer `call` instead of running it.
    fn failing_at(call: &'static str) -> (Self, Rc<RefCell<Vec<&'static str>>>) {
        let (mut recording, calls) = Self::new("true");
        recording.fail_at = Some(call);
        (recording, calls)
    }

    fn record(&self, call: &'static str) -> Result<(), ToolError> {
        self.calls.borrow_mut().push(call);
        if self.fail_at == Some(call) {
            return Err(ToolError::io(
                call,
                io::Error::new(io::ErrorKind::Other, "no space left on device"),
            ));
        }
        Ok(())
    }
}

impl Producers for Recording {
    fn dump_database(&self, ctx: &RunContext) -> Result<Artifact, ToolError> {
        self.record("dump")?;
        self.inner.dump_database(ctx)
    }

    fn snapshot_files(&self, ctx: &RunContext) -> Result<Artifact, ToolError> {
        self.record("snapshot")?;
        self.inner.snapshot_files(ctx)
    }

    fn combine(
        &self,
        ctx: &RunContext,
        db_dump: &Artifact,
        snapshot: &Artifact,
    ) -> Result<Artifact, ToolError> {
        self.record("combine")?;
        self.inner.combine(ctx, db_dump, snapshot)
    }
}

#[derive(Debug, Default)]
struct Remote {
    uploads: Vec<PathBuf>,
    deleted: Vec<String>,
    listing: Vec<String>,
    fail_upload: bool,
}

/// In-memory remote destination.
#[derive(Debug, Clone, Default)]
struct FakeRemote(Rc<RefCell<Remote>>);

impl FakeRemote {
    fn failing() -> Self {
        let remote = Self::default();
        remote.0.borrow_mut().fail_upload = true;
        remote
    }

    fn with_listing(names: &[&str]) -> Self {
        let remote = Self::default();
        remote.0.borrow_mut().listing = names.iter().map(|name| name.to_string()).collect();
        remote
    }
}

impl Transport for FakeRemote {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn upload(&self, local_path: &Path) -> Result<(), TransportError> {
        let mut remote = self.0.borrow_mut();
        if remote.fail_upload {
            return Err(TransportError::Authentication {
                user: "backup".into(),
            });
        }
        remote.uploads.push(local_path.to_path_buf());
        Ok(())
    }

    fn list(&self, filter: &dyn Fn(&str) -> bool) -> Result<Vec<String>, TransportError> {
        Ok(self
            .0
            .borrow()
            .listing
            .iter()
            .filter(|name| filter(name))
            .cloned()
            .collect())
    }

    fn delete(&self, name: &str) -> Result<(), TransportError> {
        self.0.borrow_mut().deleted.push(name.to_string());
        Ok(())
    }

    fn ensure_remote_dir(&self, _path: &str) -> Result<(), TransportError> {
        Ok(())
    }
}

fn scratch_dirs_of(timestamp: RunTimestamp) -> usize {
    let prefix = format!("backup_{timestamp}_");
    fs::read_dir(std::env::temp_dir())
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_name().to_string_lossy().starts_with(&prefix))
        .count()
}

fn archive_entries(path: &Path) -> Vec<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(path).unwrap()));
    archive
        .entries()
        .unwrap()
        .map(|entry| entry.unwrap().path().unwrap().display().to_string())
        .collect()
}

#[test]
fn failing_dump_aborts_before_snapshot() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::new("false");
    let ts = timestamp(1);

    let report = BackupAgent::new(workspace.settings("local", 0), ts)
        .with_producers(producers)
        .run();

    assert!(!report.is_success());
    assert_eq!(
        report.stages(),
        [
            Stage::Validating,
            Stage::PreHook,
            Stage::Dumping,
            Stage::CleaningUp,
            Stage::Failed
        ]
    );
    assert!(matches!(
        report.failure(),
        Some(StageError::Tool {
            stage: Stage::Dumping,
            ..
        })
    ));
    assert_eq!(*calls.borrow(), ["dump"]);
    assert!(workspace.backups().is_empty());
    assert_eq!(scratch_dirs_of(ts), 0);
}

#[test]
fn failing_snapshot_aborts_before_combine() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::failing_at("snapshot");
    let ts = timestamp(9);

    let report = BackupAgent::new(workspace.settings("local", 0), ts)
        .with_producers(producers)
        .run();

    assert!(!report.is_success());
    assert_eq!(
        report.stages(),
        [
            Stage::Validating,
            Stage::PreHook,
            Stage::Dumping,
            Stage::Snapshotting,
            Stage::CleaningUp,
            Stage::Failed
        ]
    );
    assert!(matches!(
        report.failure(),
        Some(StageError::Tool {
            stage: Stage::Snapshotting,
            ..
        })
    ));
    assert_eq!(*calls.borrow(), ["dump", "snapshot"]);
    assert_eq!(report.backup(), None);
    assert!(workspace.backups().is_empty());
    assert_eq!(scratch_dirs_of(ts), 0);
}

#[test]
fn failing_combine_aborts_before_delivery() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::failing_at("combine");
    let remote = FakeRemote::default();
    let ts = timestamp(13);

    let report = BackupAgent::new(workspace.settings("ftp", 1), ts)
        .with_producers(producers)
        .with_transport(remote.clone())
        .run();

    assert!(!report.is_success());
    assert_eq!(
        report.stages(),
        [
            Stage::Validating,
            Stage::PreHook,
            Stage::Dumping,
            Stage::Snapshotting,
            Stage::Combining,
            Stage::CleaningUp,
            Stage::Failed
        ]
    );
    assert!(matches!(
        report.failure(),
        Some(StageError::Tool {
            stage: Stage::Combining,
            ..
        })
    ));
    assert_eq!(*calls.borrow(), ["dump", "snapshot", "combine"]);
    assert_eq!(report.rotation(), None);
    assert!(remote.0.borrow().uploads.is_empty());
    assert!(workspace.backups().is_empty());
    assert_eq!(scratch_dirs_of(ts), 0);
}

#[test]
fn failing_pre_backup_hook_aborts() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::new("true");
    let settings = with_commands(
        workspace.settings("local", 0),
        CommandsSection {
            pre_backup: Some("exit 3".into()),
            ..Default::default()
        },
    );

    let report = BackupAgent::new(settings, timestamp(2))
        .with_producers(producers)
        .run();

    assert_eq!(
        report.stages(),
        [
            Stage::Validating,
            Stage::PreHook,
            Stage::CleaningUp,
            Stage::Failed
        ]
    );
    assert!(matches!(report.failure(), Some(StageError::PreHook(_))));
    assert!(calls.borrow().is_empty());
    assert!(workspace.backups().is_empty());
}

#[test]
fn failing_post_transfer_hook_keeps_success() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::new("true");
    let ts = timestamp(3);
    let settings = with_commands(
        workspace.settings("local", 0),
        CommandsSection {
            post_backup: Some("exit 1".into()),
            post_transfer: Some("exit 1".into()),
            ..Default::default()
        },
    );

    let report = BackupAgent::new(settings, ts)
        .with_producers(producers)
        .run();

    assert!(report.is_success(), "{:?}", report.failure());
    assert_eq!(
        report.stages(),
        [
            Stage::Validating,
            Stage::PreHook,
            Stage::Dumping,
            Stage::Snapshotting,
            Stage::Combining,
            Stage::PostHook,
            Stage::Transporting,
            Stage::Rotating,
            Stage::CleaningUp,
            Stage::PostTransferHook,
            Stage::Done
        ]
    );
    assert_eq!(*calls.borrow(), ["dump", "snapshot", "combine"]);

    // local destinations always keep their copy
    let combined = format!("{ts}_{SERVER}_root_files_and_db.tar.gz");
    assert_eq!(workspace.backups(), [combined.clone()]);
    assert_eq!(report.backup(), Some(workspace.backup_dir().join(&combined).as_path()));
    assert_eq!(scratch_dirs_of(ts), 0);
}

#[test]
fn failed_upload_still_rotates_and_cleans_up() {
    let workspace = Workspace::new();
    let (producers, _) = Recording::new("true");
    let remote = FakeRemote::failing();
    let ts = timestamp(4);

    let report = BackupAgent::new(workspace.settings("ftp", 5), ts)
        .with_producers(producers)
        .with_transport(remote.clone())
        .run();

    assert!(!report.is_success());
    assert_eq!(
        report.stages()[6..],
        [
            Stage::Transporting,
            Stage::Rotating,
            Stage::CleaningUp,
            Stage::Failed
        ]
    );
    assert!(matches!(
        report.failure(),
        Some(StageError::Transport {
            destination: "ftp",
            ..
        })
    ));
    assert!(report.rotation().is_some());
    assert!(remote.0.borrow().uploads.is_empty());

    // keep_local_copy is disabled
    assert!(workspace.backups().is_empty());
    assert_eq!(scratch_dirs_of(ts), 0);
}

#[test]
fn remote_rotation_deletes_oldest() {
    let workspace = Workspace::new();
    let (producers, _) = Recording::new("true");
    let older = format!("{}_{SERVER}_root_files_and_db.tar.gz", timestamp(5));
    let newer = format!("{}_{SERVER}_root_files_and_db.tar.gz", timestamp(6));
    let remote = FakeRemote::with_listing(&[older.as_str(), newer.as_str(), "unrelated.txt"]);
    let ts = timestamp(7);

    let report = BackupAgent::new(workspace.settings("ftp", 1), ts)
        .with_producers(producers)
        .with_transport(remote.clone())
        .run();

    assert!(report.is_success(), "{:?}", report.failure());
    let remote = remote.0.borrow();
    assert_eq!(remote.deleted, [older]);
    assert_eq!(remote.uploads.len(), 1);

    let rotation = report.rotation().unwrap();
    assert_eq!(rotation.remote.as_ref().unwrap().deleted.len(), 1);
    assert!(rotation.local.deleted.is_empty());
    assert!(workspace.backups().is_empty());
}

#[test]
fn sftp_without_credentials_fails_validation() {
    let workspace = Workspace::new();
    let (producers, calls) = Recording::new("true");
    let mut settings = workspace.settings("sftp", 0);
    settings.sftp = Some(SftpSection {
        host: Some("sftp.invalid".into()),
        username: Some("backup".into()),
        remote_dir: Some("/backups".into()),
        ..Default::default()
    });

    let report = BackupAgent::new(settings, timestamp(8))
        .with_producers(producers)
        .run();

    assert_eq!(report.stages(), [Stage::Validating, Stage::Failed]);
    assert!(matches!(report.failure(), Some(StageError::Config(_))));
    assert!(calls.borrow().is_empty());
    assert!(!workspace.backup_dir().exists());
}

#[test]
fn complete_local_run() {
    let workspace = Workspace::new();
    let ts = timestamp(20);
    fs::create_dir_all(workspace.backup_dir()).unwrap();
    fs::create_dir_all(workspace.log_dir()).unwrap();

    let old_backups: Vec<String> = (10..13)
        .map(|day| format!("{}_{SERVER}_root_files_and_db.tar.gz", timestamp(day)))
        .collect();
    for (age, name) in old_backups.iter().enumerate() {
        let path = workspace.backup_dir().join(name);
        fs::write(&path, "old").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000 * (age as i64 + 1), 0))
            .unwrap();
    }
    let foreign = format!("{}_db01_root_files_and_db.tar.gz", timestamp(10));
    fs::write(workspace.backup_dir().join(&foreign), "other server").unwrap();

    for (age, day) in (10..13).enumerate() {
        let path = workspace.log_dir().join(format!("{}_backup.log", timestamp(day)));
        fs::write(&path, "log").unwrap();
        filetime::set_file_mtime(&path, FileTime::from_unix_time(1_000 * (age as i64 + 1), 0))
            .unwrap();
    }

    let mut settings = workspace.settings("local", 2);
    if let Some(logs) = settings.logs.as_mut() {
        logs.keep_logs = Some(1);
    }

    let report = BackupAgent::new(settings, ts)
        .with_producers(SystemProducers::with_dump_program("true"))
        .run();

    assert!(report.is_success(), "{:?}", report.failure());
    let rotation = report.rotation().unwrap();
    assert_eq!(rotation.local.deleted, old_backups[..2]);
    assert!(rotation.local.failed.is_empty());
    assert_eq!(rotation.remote, None);
    assert_eq!(rotation.logs.deleted.len(), 2);

    let combined = format!("{ts}_{SERVER}_root_files_and_db.tar.gz");
    let mut expected = vec![old_backups[2].clone(), combined.clone(), foreign];
    expected.sort();
    assert_eq!(workspace.backups(), expected);

    assert_eq!(
        archive_entries(&workspace.backup_dir().join(combined)),
        [
            format!("{ts}_{SERVER}_db.tar.gz"),
            format!("{ts}_{SERVER}_root_files.tar.gz")
        ]
    );
}
