//! BlobStore - content-addressed files on disk, indexed in SQLite.
//!
//! `new_file` keeps the file and its row in step with a fixed ordering:
//! hash, reserve the row inside an open transaction, write the file with an
//! exclusive create, commit. Every failure before the commit rolls the
//! transaction back and removes what this call wrote. There is no two-phase
//! commit across the filesystem and the database, so the ordering is the
//! consistency mechanism; do not reorder it.

use std::fmt;
use std::io::{self, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Sqlite, Transaction};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeek, AsyncSeekExt, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::config::{BlobStoreConfig, DatabaseConfig};
use crate::database::{Database, FileRow, NewFile};
use crate::digest::{ContentDigest, DigestEngine};
use crate::error::{BlobStoreError, Result};
use crate::path::{build_path, resolve_path, sanitize_base, validate_extension};
use crate::staging::StagingBuffer;

/// Smallest blob the store accepts, in bytes.
pub const MIN_BLOB_SIZE: u64 = 16;

/// Copy chunk size for writing blobs.
const COPY_CHUNK_SIZE: usize = 64 * 1024;

/// Surrogate identifier of a stored file, assigned by the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileId(i64);

impl FileId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl From<i64> for FileId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata of a stored blob, with its path resolved under the base directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobRecord {
    pub id: FileId,
    /// `<shard>/<sha256>.<extension>`, relative to the base directory
    pub relative_path: String,
    /// Advisory: the store does not check that the file is still there
    pub absolute_path: PathBuf,
    pub extension: String,
    pub size: u64,
    pub digest: ContentDigest,
    pub created_at: DateTime<Utc>,
}

/// Outcome of re-hashing a stored blob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    /// File present, digest and size match the record
    Intact,
    /// Record exists but its file does not
    Missing,
    /// File present but its content differs from the record
    Mismatch { size: u64, digest: ContentDigest },
}

/// How writing the blob file failed.
enum WriteFailure {
    /// Another writer already owns the target path; leave it alone.
    Exists,
    /// Any other failure. A target this call created is already gone.
    Failed(BlobStoreError),
}

/// A blob file created by the current `new_file` call.
///
/// Removed on drop unless [`keep`](Self::keep) is called after the index
/// commit, so an error return and a dropped (cancelled) future clean up the
/// same way.
struct CreatedBlob {
    path: PathBuf,
    keep: bool,
}

impl CreatedBlob {
    fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            keep: false,
        }
    }

    fn keep(mut self) {
        self.keep = true;
    }
}

impl Drop for CreatedBlob {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        // Drop cannot await.
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed partial blob"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "failed to remove partial blob")
            }
        }
    }
}

/// Content-addressed blob store.
///
/// Cheap to clone; clones share the index pool and the digest engine and
/// may be used from concurrent tasks.
#[derive(Debug, Clone)]
pub struct BlobStore {
    db: Database,
    digests: Arc<DigestEngine>,
    base_dir: PathBuf,
    scratch_dir: PathBuf,
}

impl BlobStore {
    /// Create a store from configuration, creating the base directory and
    /// running index migrations.
    pub async fn new(config: BlobStoreConfig) -> Result<Self> {
        let base_dir = sanitize_base(&config.base_dir)?;
        tokio::fs::create_dir_all(&base_dir).await?;

        let db = match &config.database {
            DatabaseConfig::Memory => Database::in_memory(config.lock_timeout()).await?,
            DatabaseConfig::Sqlite { path } => Database::new(path, config.lock_timeout()).await?,
        };

        info!(base_dir = %base_dir.display(), "initialized blob store");
        Ok(Self {
            db,
            digests: Arc::new(DigestEngine::new()),
            base_dir,
            scratch_dir: config.scratch_dir(),
        })
    }

    /// Create a store with its index at `data_dir/files.db` and blobs under
    /// `data_dir/blobs`.
    pub async fn new_local(data_dir: &Path) -> Result<Self> {
        Self::new(BlobStoreConfig::local(data_dir)).await
    }

    /// Create a store with an in-memory index and blobs under `base_dir`.
    pub async fn new_ephemeral(base_dir: &Path) -> Result<Self> {
        Self::new(BlobStoreConfig::ephemeral(base_dir)).await
    }

    /// Directory all blob paths are resolved under.
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Create a staging buffer in the configured scratch directory.
    pub fn new_staging_buffer(&self) -> Result<StagingBuffer> {
        StagingBuffer::new_in(&self.scratch_dir)
    }

    /// Stage a read-once source so it can be handed to [`Self::new_file`].
    pub async fn stage<R>(&self, reader: &mut R) -> Result<StagingBuffer>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        StagingBuffer::from_reader(&self.scratch_dir, reader).await
    }

    /// Store the content of `source` and return its new identifier.
    ///
    /// `source` is rewound, hashed, rewound again and copied, so it must
    /// support seeking to the start. Content shorter than [`MIN_BLOB_SIZE`] is
    /// rejected before the index is touched. Content that is already stored
    /// with the same extension is rejected with
    /// [`BlobStoreError::DuplicateContent`]; the existing identifier is not
    /// returned.
    pub async fn new_file<S>(&self, source: &mut S, extension: &str) -> Result<FileId>
    where
        S: AsyncRead + AsyncSeek + Unpin + ?Sized,
    {
        validate_extension(extension)?;

        rewind(source).await?;
        let (digest, size) = self.digests.compute_digest(source).await?;
        if size < MIN_BLOB_SIZE {
            return Err(BlobStoreError::InvalidInput(format!(
                "read {} bytes, blobs must be at least {} bytes",
                size, MIN_BLOB_SIZE
            )));
        }

        let relative_path = build_path(&digest.sha256, extension);
        let absolute_path = resolve_path(&self.base_dir, &relative_path)?;
        debug!(path = %relative_path, size = size, "computed blob identity");

        // The exclusive create in `write_blob` is the duplicate check.
        // Hashing happens before the transaction so it never holds the index.
        let mut tx = self.db.begin().await?;
        let id = Database::insert_file(
            &mut tx,
            NewFile {
                path: &relative_path,
                extension,
                digest: &digest,
                size: to_db_size(size)?,
            },
        )
        .await?;

        if let Err(e) = rewind(source).await {
            rollback(tx, &relative_path).await;
            return Err(e);
        }

        let created = match write_blob(source, &absolute_path, size).await {
            Ok(created) => created,
            Err(WriteFailure::Exists) => {
                rollback(tx, &relative_path).await;
                return Err(BlobStoreError::DuplicateContent(relative_path));
            }
            Err(WriteFailure::Failed(e)) => {
                rollback(tx, &relative_path).await;
                return Err(e);
            }
        };

        if let Err(e) = tx.commit().await {
            warn!(path = %relative_path, error = %e, "commit failed, removing written blob");
            return Err(e.into());
        }
        created.keep();

        let id = FileId(id);
        info!(id = %id, path = %relative_path, size = size, "blob stored");
        Ok(id)
    }

    /// Look up a stored file.
    ///
    /// The returned absolute path is not checked against the filesystem.
    pub async fn get_file(&self, id: FileId) -> Result<BlobRecord> {
        let row = self
            .db
            .get_file(id.0)
            .await?
            .ok_or(BlobStoreError::NotFound(id))?;
        self.record(row)
    }

    /// Remove a stored file, then its record.
    ///
    /// If the file cannot be removed the record is kept. A file that is
    /// already gone counts as removed. If the record delete fails after the
    /// file was removed, the record is left dangling and the error returned.
    pub async fn delete_file(&self, id: FileId) -> Result<()> {
        let record = self.get_file(id).await?;

        match tokio::fs::remove_file(&record.absolute_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(id = %id, path = %record.relative_path, "blob file already missing");
            }
            Err(e) => return Err(e.into()),
        }

        if !self.db.delete_file(id.0).await? {
            return Err(BlobStoreError::NotFound(id));
        }

        info!(id = %id, path = %record.relative_path, "blob deleted");
        Ok(())
    }

    /// Open a stored file for reading.
    pub async fn open_file(&self, id: FileId) -> Result<(BlobRecord, File)> {
        let record = self.get_file(id).await?;
        let file = File::open(&record.absolute_path).await?;
        Ok((record, file))
    }

    /// List all stored files, oldest first.
    pub async fn list_files(&self) -> Result<Vec<BlobRecord>> {
        let rows = self.db.list_files().await?;
        rows.into_iter().map(|row| self.record(row)).collect()
    }

    /// Re-hash a stored file and compare it with its record.
    pub async fn verify_file(&self, id: FileId) -> Result<Integrity> {
        let record = self.get_file(id).await?;

        let mut file = match File::open(&record.absolute_path).await {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(id = %id, path = %record.relative_path, "record has no blob file");
                return Ok(Integrity::Missing);
            }
            Err(e) => return Err(e.into()),
        };

        let (digest, size) = self.digests.compute_digest(&mut file).await?;
        if digest == record.digest && size == record.size {
            Ok(Integrity::Intact)
        } else {
            warn!(id = %id, path = %record.relative_path, "blob content does not match record");
            Ok(Integrity::Mismatch { size, digest })
        }
    }

    /// Number of indexed files.
    pub async fn count(&self) -> Result<u64> {
        let count = self.db.count_files().await?;
        Ok(count as u64)
    }

    /// Sum of the sizes of all indexed files.
    pub async fn total_size(&self) -> Result<u64> {
        let size = self.db.total_size().await?;
        Ok(size as u64)
    }

    fn record(&self, row: FileRow) -> Result<BlobRecord> {
        let absolute_path = resolve_path(&self.base_dir, &row.path)?;
        let size = u64::try_from(row.size)
            .map_err(|_| BlobStoreError::CorruptRecord(format!("negative size {}", row.size)))?;
        let created_at = DateTime::from_timestamp(row.created_at, 0).ok_or_else(|| {
            BlobStoreError::CorruptRecord(format!("bad timestamp {}", row.created_at))
        })?;

        Ok(BlobRecord {
            id: FileId(row.id),
            relative_path: row.path,
            absolute_path,
            extension: row.extension,
            size,
            digest: row.digest,
            created_at,
        })
    }
}

fn to_db_size(size: u64) -> Result<i64> {
    i64::try_from(size)
        .map_err(|_| BlobStoreError::InvalidInput(format!("blob too large: {} bytes", size)))
}

async fn rewind<S>(source: &mut S) -> Result<()>
where
    S: AsyncSeek + Unpin + ?Sized,
{
    source
        .seek(SeekFrom::Start(0))
        .await
        .map_err(BlobStoreError::Read)?;
    Ok(())
}

async fn rollback(tx: Transaction<'static, Sqlite>, path: &str) {
    if let Err(e) = tx.rollback().await {
        warn!(path = %path, error = %e, "failed to roll back file insert");
    }
}

/// Copy `source` into a newly created file at `target`.
///
/// The returned guard owns the new file; dropping it removes the file.
async fn write_blob<S>(
    source: &mut S,
    target: &Path,
    expected: u64,
) -> std::result::Result<CreatedBlob, WriteFailure>
where
    S: AsyncRead + Unpin + ?Sized,
{
    let failed = |e: BlobStoreError| WriteFailure::Failed(e);

    if let Some(parent) = target.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| failed(BlobStoreError::StorageWrite(e)))?;
    }

    let mut file = match OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target)
        .await
    {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => return Err(WriteFailure::Exists),
        Err(e) => return Err(failed(BlobStoreError::StorageWrite(e))),
    };
    // From here on every exit, including cancellation, removes the target.
    let created = CreatedBlob::new(target);

    let mut buf = vec![0u8; COPY_CHUNK_SIZE];
    let mut copied: u64 = 0;

    loop {
        let n = source
            .read(&mut buf)
            .await
            .map_err(|e| failed(BlobStoreError::Read(e)))?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])
            .await
            .map_err(|e| failed(BlobStoreError::StorageWrite(e)))?;
        copied += n as u64;
    }

    if copied != expected {
        return Err(failed(BlobStoreError::Read(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "source changed between hashing and copy: hashed {} bytes, copied {}",
                expected, copied
            ),
        ))));
    }

    file.flush()
        .await
        .map_err(|e| failed(BlobStoreError::StorageWrite(e)))?;
    file.sync_all()
        .await
        .map_err(|e| failed(BlobStoreError::StorageWrite(e)))?;
    Ok(created)
}
