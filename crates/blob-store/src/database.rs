//! SQLite metadata index for stored blobs.

use std::path::Path;
use std::time::Duration;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow},
    Row, Sqlite, Transaction,
};

use crate::digest::ContentDigest;
use crate::error::{BlobStoreError, Result};

/// A row of the `files` table.
#[derive(Debug, Clone)]
pub(crate) struct FileRow {
    pub id: i64,
    pub path: String,
    pub extension: String,
    pub digest: ContentDigest,
    pub size: i64,
    pub created_at: i64,
}

impl FileRow {
    fn from_row(row: &SqliteRow) -> Result<Self> {
        let md5: Vec<u8> = row.try_get("md5")?;
        let sha1: Vec<u8> = row.try_get("sha1")?;
        let sha256: Vec<u8> = row.try_get("sha256")?;

        Ok(Self {
            id: row.try_get("id")?,
            path: row.try_get("path")?,
            extension: row.try_get("extension")?,
            digest: ContentDigest::from_slices(&md5, &sha1, &sha256)?,
            size: row.try_get("size")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Fields of a record about to be inserted.
pub(crate) struct NewFile<'a> {
    pub path: &'a str,
    pub extension: &'a str,
    pub digest: &'a ContentDigest,
    pub size: i64,
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    ///
    /// `lock_timeout` bounds both the wait for a pooled connection and the
    /// SQLite busy wait on another connection's write transaction.
    pub async fn new(path: &Path, lock_timeout: Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(lock_timeout);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .acquire_timeout(lock_timeout)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    ///
    /// Every SQLite connection to `:memory:` is its own database, so the pool
    /// holds a single connection. A `new_file` transaction therefore
    /// serializes all other index access until it commits or rolls back.
    /// The connection is never retired, or the data would go with it.
    pub async fn in_memory(lock_timeout: Duration) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .acquire_timeout(lock_timeout)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Open a transaction for a pending insert.
    pub async fn begin(&self) -> Result<Transaction<'static, Sqlite>> {
        Ok(self.pool.begin().await?)
    }

    /// Insert a file record inside `tx` and return its identifier.
    ///
    /// A unique-path violation means the same content is already indexed.
    pub async fn insert_file(
        tx: &mut Transaction<'static, Sqlite>,
        file: NewFile<'_>,
    ) -> Result<i64> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            INSERT INTO files (path, extension, md5, sha1, sha256, size, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(file.path)
        .bind(file.extension)
        .bind(file.digest.md5.to_vec())
        .bind(file.digest.sha1.to_vec())
        .bind(file.digest.sha256.to_vec())
        .bind(file.size)
        .bind(now)
        .fetch_one(&mut **tx)
        .await;

        match result {
            Ok(row) => Ok(row.try_get("id")?),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(BlobStoreError::DuplicateContent(file.path.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Get a file record by identifier.
    pub async fn get_file(&self, id: i64) -> Result<Option<FileRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, path, extension, md5, sha1, sha256, size, created_at
            FROM files
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(FileRow::from_row).transpose()
    }

    /// Delete a file record. Returns false if no row matched.
    pub async fn delete_file(&self, id: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM files WHERE id = ?
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List all file records, oldest first.
    pub async fn list_files(&self) -> Result<Vec<FileRow>> {
        let rows = sqlx::query(
            r#"
            SELECT id, path, extension, md5, sha1, sha256, size, created_at
            FROM files
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(FileRow::from_row).collect()
    }

    /// Count file records.
    pub async fn count_files(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("count"))
    }

    /// Get total size of all files.
    pub async fn total_size(&self) -> Result<i64> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(size), 0) as total FROM files
            "#,
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("total"))
    }
}
