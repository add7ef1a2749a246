pub use clap::Parser;

use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "wca")]
#[command(version, about = "Content-addressed video archive")]
pub struct Args {
    /// Path to the archive directory (defaults to ~/.wc-archive)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Log level, overrides the config file (RUST_LOG still wins)
    #[arg(long, global = true)]
    pub log_level: Option<tracing::Level>,

    #[command(subcommand)]
    pub command: crate::Command,
}
