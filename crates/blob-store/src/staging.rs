//! Ephemeral staging buffers for bytes whose identity is not known yet.

use std::io::{self, SeekFrom};
use std::path::Path;
use std::pin::Pin;
use std::task::{Context, Poll};

use tempfile::TempPath;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncSeek, AsyncSeekExt, AsyncWrite, AsyncWriteExt, ReadBuf};
use tracing::{debug, warn};

use crate::error::{BlobStoreError, Result};

const STAGING_PREFIX: &str = "wc-staging-";

/// An exclusively owned temporary file.
///
/// The buffer can be written, rewound and read any number of times, which is
/// what [`BlobStore::new_file`](crate::BlobStore::new_file) needs: it reads
/// its source once to hash it and again to copy it. Call
/// [`release`](Self::release) when done to observe cleanup errors; a buffer
/// that is simply dropped still removes its backing file.
#[derive(Debug)]
pub struct StagingBuffer {
    file: File,
    path: TempPath,
}

impl StagingBuffer {
    /// Create an empty buffer inside `scratch_dir`.
    pub fn new_in(scratch_dir: &Path) -> Result<Self> {
        let named = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(scratch_dir)
            .map_err(|e| {
                BlobStoreError::Resource(format!(
                    "cannot create staging file in {}: {}",
                    scratch_dir.display(),
                    e
                ))
            })?;
        let (file, path) = named.into_parts();
        debug!(path = %path.display(), "created staging buffer");

        Ok(Self {
            file: File::from_std(file),
            path,
        })
    }

    /// Drain a read-once source into a new buffer, rewound and ready to hand
    /// to the store.
    pub async fn from_reader<R>(scratch_dir: &Path, reader: &mut R) -> Result<Self>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut buffer = Self::new_in(scratch_dir)?;
        let copied = match tokio::io::copy(reader, &mut buffer).await {
            Ok(copied) => copied,
            Err(e) => {
                // The read error is the one worth reporting.
                if let Err(release_err) = buffer.release().await {
                    warn!(error = %release_err, "failed to release staging buffer");
                }
                return Err(BlobStoreError::Read(e));
            }
        };
        buffer.rewind().await?;
        debug!(bytes = copied, "staged source");
        Ok(buffer)
    }

    /// Flush pending writes and seek back to the start.
    pub async fn rewind(&mut self) -> Result<()> {
        self.file.flush().await?;
        self.file.seek(SeekFrom::Start(0)).await?;
        Ok(())
    }

    /// Close the handle and remove the backing file.
    ///
    /// The buffer is gone afterwards even if this returns an error. When both
    /// steps fail, both errors are reported.
    pub async fn release(self) -> Result<()> {
        let Self { mut file, path } = self;
        let shown = path.display().to_string();

        let closed = file.flush().await;
        drop(file.into_std().await);
        let removed = path.close();

        match (closed, removed) {
            (Ok(()), Ok(())) => {
                debug!(path = %shown, "released staging buffer");
                Ok(())
            }
            (Err(e), Ok(())) => Err(BlobStoreError::Resource(format!(
                "failed to close {}: {}",
                shown, e
            ))),
            (Ok(()), Err(e)) => Err(BlobStoreError::Resource(format!(
                "failed to remove {}: {}",
                shown, e
            ))),
            (Err(close), Err(remove)) => Err(BlobStoreError::Resource(format!(
                "failed to close {}: {}; failed to remove: {}",
                shown, close, remove
            ))),
        }
    }

    #[cfg(test)]
    pub(crate) fn backing_path(&self) -> &Path {
        &self.path
    }
}

impl AsyncRead for StagingBuffer {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_read(cx, buf)
    }
}

impl AsyncWrite for StagingBuffer {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.get_mut().file).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().file).poll_shutdown(cx)
    }
}

impl AsyncSeek for StagingBuffer {
    fn start_seek(self: Pin<&mut Self>, position: SeekFrom) -> io::Result<()> {
        Pin::new(&mut self.get_mut().file).start_seek(position)
    }

    fn poll_complete(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<u64>> {
        Pin::new(&mut self.get_mut().file).poll_complete(cx)
    }
}
