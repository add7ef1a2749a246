use std::{fs, path::PathBuf};

use blob_store::{BlobStore, BlobStoreConfig, DatabaseConfig, DEFAULT_LOCK_TIMEOUT_SECS};
use serde::{Deserialize, Serialize};

pub const APP_NAME: &str = "wc-archive";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "files.db";
pub const BLOBS_DIR_NAME: &str = "blobs";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppConfig {
    /// Default log level, overridden by RUST_LOG
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolled log files (stderr only if not set)
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    /// Where staging buffers are created (defaults to the system temp dir)
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_dir: None,
            scratch_dir: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the archive directory (~/.wc-archive)
    pub archive_dir: PathBuf,
    /// Path to the SQLite database
    pub db_path: PathBuf,
    /// Path to the blobs directory
    pub blobs_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: AppConfig,
}

impl AppState {
    /// Get the archive directory path (custom or default ~/.wc-archive)
    pub fn archive_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Initialize a new archive directory
    pub fn init(custom_path: Option<PathBuf>, config: Option<AppConfig>) -> Result<Self, StateError> {
        let archive_dir = Self::archive_dir(custom_path)?;

        if archive_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&archive_dir)?;

        let blobs_path = archive_dir.join(BLOBS_DIR_NAME);
        fs::create_dir_all(&blobs_path)?;

        let config = config.unwrap_or_default();
        let config_path = archive_dir.join(CONFIG_FILE_NAME);
        let config_toml = toml::to_string_pretty(&config)?;
        fs::write(&config_path, config_toml)?;

        // The schema is created by the store on first open
        let db_path = archive_dir.join(DB_FILE_NAME);

        Ok(Self {
            archive_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the archive directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let archive_dir = Self::archive_dir(custom_path)?;

        if !archive_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = archive_dir.join(DB_FILE_NAME);
        let blobs_path = archive_dir.join(BLOBS_DIR_NAME);
        let config_path = archive_dir.join(CONFIG_FILE_NAME);

        if !blobs_path.exists() {
            return Err(StateError::MissingFile("blobs/".to_string()));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile("config.toml".to_string()));
        }

        let config_toml = fs::read_to_string(&config_path)?;
        let config: AppConfig = toml::from_str(&config_toml)?;

        Ok(Self {
            archive_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }

    /// Blob store configuration for this archive directory
    pub fn store_config(&self) -> Result<BlobStoreConfig, StateError> {
        let base_dir = std::path::absolute(&self.blobs_path)?;
        Ok(BlobStoreConfig {
            base_dir,
            database: DatabaseConfig::Sqlite {
                path: self.db_path.clone(),
            },
            scratch_dir: self.config.scratch_dir.clone(),
            lock_timeout_secs: DEFAULT_LOCK_TIMEOUT_SECS,
        })
    }

    /// Open the blob store for this archive directory
    pub async fn open_store(&self) -> Result<BlobStore, StateError> {
        Ok(BlobStore::new(self.store_config()?).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("archive directory not initialized. Run 'wca init' first")]
    NotInitialized,

    #[error("archive directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("blob store error: {0}")]
    Store(#[from] blob_store::BlobStoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("TOML deserialization error: {0}")]
    TomlDe(#[from] toml::de::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path().join("archive");

        let state = AppState::init(Some(dir.clone()), None).unwrap();
        assert!(state.blobs_path.exists());
        assert!(state.config_path.exists());

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config, AppConfig::default());
        assert_eq!(loaded.db_path, dir.join(DB_FILE_NAME));

        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_uninitialized() {
        let temp_dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(temp_dir.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: AppConfig = toml::from_str(r#"log_dir = "/var/log/wca""#).unwrap();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/wca")));
        assert!(config.scratch_dir.is_none());
    }

    #[tokio::test]
    async fn test_open_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let state = AppState::init(Some(temp_dir.path().join("archive")), None).unwrap();

        let store = state.open_store().await.unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        assert!(state.db_path.exists());
    }
}
