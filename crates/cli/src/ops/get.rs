use blob_store::{BlobStoreError, FileId};
use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Get {
    /// File identifier
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum GetError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

#[async_trait::async_trait]
impl crate::op::Op for Get {
    type Error = GetError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let record = store.get_file(FileId::new(self.id)).await?;

        Ok(format!(
            "id:        {}\n\
             path:      {}\n\
             absolute:  {}\n\
             extension: {}\n\
             size:      {} bytes\n\
             md5:       {}\n\
             sha1:      {}\n\
             sha256:    {}\n\
             created:   {}",
            record.id,
            record.relative_path,
            record.absolute_path.display(),
            record.extension,
            record.size,
            record.digest.md5_hex(),
            record.digest.sha1_hex(),
            record.digest.sha256_hex(),
            record.created_at.format("%Y-%m-%d %H:%M:%S UTC"),
        ))
    }
}
