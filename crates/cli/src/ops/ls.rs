use blob_store::BlobStoreError;
use clap::Args;

use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Ls;

#[derive(Debug, thiserror::Error)]
pub enum LsError {
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] BlobStoreError),
}

#[async_trait::async_trait]
impl crate::op::Op for Ls {
    type Error = LsError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        let store = ctx.store().await?;
        let records = store.list_files().await?;

        if records.is_empty() {
            return Ok("No files stored".to_string());
        }

        let mut lines: Vec<String> = records
            .iter()
            .map(|r| format!("{}\t{}\t{}", r.id, r.size, r.relative_path))
            .collect();
        lines.push(format!(
            "{} files, {} bytes",
            records.len(),
            store.total_size().await?
        ));
        Ok(lines.join("\n"))
    }
}
