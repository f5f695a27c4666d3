use std::process::ExitCode;

use backitup_lib::agent::BackupAgent;
use backitup_lib::artifact::RunTimestamp;
use backitup_lib::cli::Cli;
use backitup_lib::config::Settings;
use backitup_lib::logging;

use clap::Parser;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_sink = logging::init(cli.verbose).expect("env_logger should not fail");

    let settings = match Settings::load(&cli.config, |key| std::env::var(key).ok()) {
        Ok(settings) => settings,
        Err(e) => {
            log::error!("Reading the configuration failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    let report = BackupAgent::new(settings, RunTimestamp::now())
        .with_log_sink(log_sink)
        .run();

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        if let Some(e) = report.failure() {
            log::error!("Backup {}: {e}", report.verdict());
        }
        ExitCode::FAILURE
    }
}
