use blob_store::{BlobStoreError, FileId};
use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Rm {
    /// File identifier
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum RmError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

#[async_trait::async_trait]
impl crate::op::Op for Rm {
    type Error = RmError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let id = FileId::new(self.id);
        store.delete_file(id).await?;
        Ok(format!("deleted {}", id))
    }
}
