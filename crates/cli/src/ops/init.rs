use std::path::PathBuf;

use clap::Args;

use crate::state::{AppConfig, AppState};

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Default log level written to the config
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Directory for log files (stderr only if not set)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Directory for staging buffers (defaults to the system temp dir)
    #[arg(long)]
    pub scratch_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
}

#[async_trait::async_trait]
impl crate::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let config = AppConfig {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            scratch_dir: self.scratch_dir.clone(),
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;
        // Creates the database and runs migrations.
        let store = state.open_store().await?;

        Ok(format!(
            "Initialized archive directory at: {}\n\
             - Database: {}\n\
             - Blobs: {}\n\
             - Config: {}",
            state.archive_dir.display(),
            state.db_path.display(),
            store.base_dir().display(),
            state.config_path.display(),
        ))
    }
}
