//! Configuration for the blob store.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default for [`BlobStoreConfig::lock_timeout_secs`].
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 30 * 60;

/// Where the metadata index lives.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    /// In-memory SQLite (for testing)
    #[default]
    Memory,

    /// File-backed SQLite database
    Sqlite {
        /// Path to the database file, created if missing
        path: PathBuf,
    },
}

/// Configuration for a [`BlobStore`](crate::BlobStore).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlobStoreConfig {
    /// Absolute directory all blob paths are joined under
    pub base_dir: PathBuf,

    /// Metadata index backend
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Directory staging buffers are created in (defaults to the system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    /// How long an index write waits for another writer, in seconds.
    ///
    /// `new_file` holds the index write lock while it copies the blob, so
    /// concurrent stores queue behind each other for up to this long.
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_lock_timeout_secs() -> u64 {
    DEFAULT_LOCK_TIMEOUT_SECS
}

impl BlobStoreConfig {
    /// Local layout: index at `data_dir/files.db`, blobs under `data_dir/blobs`.
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            base_dir: data_dir.join("blobs"),
            database: DatabaseConfig::Sqlite {
                path: data_dir.join("files.db"),
            },
            scratch_dir: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    /// Blobs under `base_dir`, index in memory.
    pub fn ephemeral(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            database: DatabaseConfig::Memory,
            scratch_dir: None,
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        }
    }

    pub(crate) fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }

    pub(crate) fn scratch_dir(&self) -> PathBuf {
        self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_layout() {
        let config = BlobStoreConfig::local("/srv/archive");
        assert_eq!(config.base_dir, PathBuf::from("/srv/archive/blobs"));
        assert_eq!(
            config.database,
            DatabaseConfig::Sqlite {
                path: PathBuf::from("/srv/archive/files.db")
            }
        );
        assert_eq!(config.scratch_dir(), std::env::temp_dir());
    }

    #[test]
    fn test_database_config_tagging() {
        let config: BlobStoreConfig = serde_json::from_str(
            r#"{"base_dir": "/srv/blobs", "database": {"type": "sqlite", "path": "/srv/files.db"}}"#,
        )
        .unwrap();
        assert_eq!(
            config.database,
            DatabaseConfig::Sqlite {
                path: PathBuf::from("/srv/files.db")
            }
        );
        assert!(config.scratch_dir.is_none());
        assert_eq!(config.lock_timeout_secs, DEFAULT_LOCK_TIMEOUT_SECS);

        let config: BlobStoreConfig = serde_json::from_str(r#"{"base_dir": "/srv/blobs"}"#).unwrap();
        assert_eq!(config.database, DatabaseConfig::Memory);
    }
}
