use std::path::PathBuf;

use blob_store::{BlobStoreError, FileId};
use clap::Args;
use tokio::io::AsyncWriteExt;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// File identifier
    pub id: i64,

    /// Write to this path instead of stdout
    #[arg(long, short)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Cat {
    type Error = CatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let (record, mut file) = store.open_file(FileId::new(self.id)).await?;

        match &self.output {
            Some(path) => {
                let mut out = tokio::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .open(path)
                    .await?;
                let copied = tokio::io::copy(&mut file, &mut out).await?;
                out.flush().await?;
                Ok(format!("wrote {} bytes to {}", copied, path.display()))
            }
            None => {
                let mut stdout = tokio::io::stdout();
                tokio::io::copy(&mut file, &mut stdout).await?;
                stdout.flush().await?;
                tracing::debug!(id = %record.id, size = record.size, "streamed blob to stdout");
                Ok(String::new())
            }
        }
    }
}
