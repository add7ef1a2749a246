use std::path::PathBuf;

use blob_store::BlobStoreError;
use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// File to store, or `-` to read from stdin
    pub path: PathBuf,

    /// Extension to store the file under (defaults to the file's own)
    #[arg(long)]
    pub ext: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
    #[error("failed to open {0}: {1}")]
    Open(PathBuf, std::io::Error),
    #[error("no extension given and none could be taken from the file name")]
    NoExtension,
}

impl Put {
    fn is_stdin(&self) -> bool {
        self.path.as_os_str() == "-"
    }

    fn extension(&self) -> Result<String, PutError> {
        if let Some(ext) = &self.ext {
            return Ok(ext.trim_start_matches('.').to_ascii_lowercase());
        }
        if self.is_stdin() {
            return Err(PutError::NoExtension);
        }
        self.path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .ok_or(PutError::NoExtension)
    }
}

#[async_trait::async_trait]
impl crate::op::Op for Put {
    type Error = PutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let extension = self.extension()?;
        let store = ctx.store().await?;

        let id = if self.is_stdin() {
            let mut staging = store.stage(&mut tokio::io::stdin()).await?;
            let stored = store.new_file(&mut staging, &extension).await;
            // Report the store error first; a release failure only matters
            // when the store succeeded.
            let released = staging.release().await;
            let id = stored?;
            released?;
            id
        } else {
            let mut file = tokio::fs::File::open(&self.path)
                .await
                .map_err(|e| PutError::Open(self.path.clone(), e))?;
            store.new_file(&mut file, &extension).await?
        };

        let record = store.get_file(id).await?;
        Ok(format!("{}\t{}", record.id, record.relative_path))
    }
}
