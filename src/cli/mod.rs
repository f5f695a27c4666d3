use std::path::PathBuf;

use clap::Parser;
use log::LevelFilter;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path of the TOML configuration file.
    ///
    /// `BACKITUP_*` environment variables override its values.
    #[arg(long, default_value = "config.toml", env = "BACKITUP_CONFIG")]
    pub config: PathBuf,

    /// Verbosity of the command output.
    #[arg(long)]
    pub verbose: Option<LevelFilter>,
}
