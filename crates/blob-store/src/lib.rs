//! Content-addressed blob store with a SQLite metadata index.
//!
//! Blobs (video files, mostly) are stored under a path derived from their
//! SHA-256 digest while a row describing them is kept in SQLite. The two are
//! kept in step without a distributed transaction: the row is inserted inside
//! an open transaction, the file is written, and only then is the
//! transaction committed. Any failure before the commit rolls the row back
//! and removes whatever was written.
//!
//! # Layout
//!
//! ```text
//! <base_dir>/
//!   6b/
//!     6bebd6bfc85e9840e6bb47e1f329b5453afd184fa7fe2d52da3cd46200062ddc.mkv
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use blob_store::BlobStore;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), blob_store::BlobStoreError> {
//! let store = BlobStore::new_local(Path::new("/srv/archive")).await?;
//!
//! let mut staging = store.new_staging_buffer()?;
//! // ... a producer writes into `staging` ...
//! let id = store.new_file(&mut staging, "mkv").await?;
//! staging.release().await?;
//!
//! let record = store.get_file(id).await?;
//! println!("{} -> {}", id, record.absolute_path.display());
//! # Ok(())
//! # }
//! ```

mod config;
mod database;
mod digest;
mod error;
mod path;
mod staging;
mod store;

pub use config::{BlobStoreConfig, DatabaseConfig, DEFAULT_LOCK_TIMEOUT_SECS};
pub use digest::{ContentDigest, DigestEngine};
pub use error::{BlobStoreError, Result};
pub use path::{build_path, resolve_path, sanitize_base, validate_extension};
pub use staging::StagingBuffer;
pub use store::{BlobRecord, BlobStore, FileId, Integrity, MIN_BLOB_SIZE};
