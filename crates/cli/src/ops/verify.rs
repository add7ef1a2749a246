use blob_store::{BlobStoreError, FileId, Integrity};
use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Verify {
    /// File identifier
    pub id: i64,
}

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

#[async_trait::async_trait]
impl crate::op::Op for Verify {
    type Error = VerifyError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let id = FileId::new(self.id);

        Ok(match store.verify_file(id).await? {
            Integrity::Intact => format!("{}: ok", id),
            Integrity::Missing => format!("{}: MISSING (record without file)", id),
            Integrity::Mismatch { size, digest } => format!(
                "{}: MISMATCH (on disk: {} bytes, sha256 {})",
                id,
                size,
                digest.sha256_hex()
            ),
        })
    }
}
