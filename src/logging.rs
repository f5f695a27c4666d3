//! Log output of the agent.
//!
//! Everything is logged to stderr through [env_logger]. While a run is in
//! progress the output is additionally written to the log file of the run,
//! `{log_dir}/{timestamp}_backup.log`.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use env_logger::{Env, Target};
use log::{LevelFilter, SetLoggerError};

use crate::artifact::{log_file_name, RunTimestamp};

/// Handle to the log file currently receiving log output, if any.
#[derive(Debug, Clone, Default)]
pub struct RunLogSink {
    file: Arc<Mutex<Option<File>>>,
}

impl RunLogSink {
    /// Starts writing log output to the log file of the run at `timestamp`.
    ///
    /// Output goes to the file until the returned guard is dropped.
    pub fn attach(&self, log_dir: &Path, timestamp: RunTimestamp) -> io::Result<RunLogGuard> {
        fs::create_dir_all(log_dir)?;
        let path = log_dir.join(log_file_name(timestamp));
        let file = File::options().create(true).append(true).open(&path)?;

        if let Ok(mut current) = self.file.lock() {
            *current = Some(file);
        }
        log::info!(target: "logging", "Logging to: {}", path.display());

        Ok(RunLogGuard {
            sink: self.clone(),
            path,
        })
    }

    fn write_to_file(&self, buf: &[u8]) {
        if let Ok(mut current) = self.file.lock() {
            if let Some(file) = current.as_mut() {
                // a broken log file must not break the run
                let _ = file.write_all(buf);
            }
        }
    }
}

/// Keeps the log file of a run attached to its [RunLogSink].
#[derive(Debug)]
pub struct RunLogGuard {
    sink: RunLogSink,
    path: PathBuf,
}

impl RunLogGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLogGuard {
    fn drop(&mut self) {
        if let Ok(mut current) = self.sink.file.lock() {
            if let Some(mut file) = current.take() {
                let _ = file.flush();
            }
        }
    }
}

/// Writes to stderr and to the attached log file.
struct Tee {
    sink: RunLogSink,
}

impl Write for Tee {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.sink.write_to_file(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()
    }
}

/// Installs the global logger.
///
/// Defaults to `info` unless `RUST_LOG` is set; `level` overrides both.
pub fn init(level: Option<LevelFilter>) -> Result<RunLogSink, SetLoggerError> {
    let sink = RunLogSink::default();

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("info"));
    if let Some(level) = level {
        builder.filter_level(level);
    }
    builder.target(Target::Pipe(Box::new(Tee { sink: sink.clone() })));
    builder.try_init()?;

    Ok(sink)
}
