// # JSON File Persistence
//
// Shared crash-safe persistence for the file-backed store and pairing table.
//
// ## Crash Recovery
//
// - Atomic writes: Uses write-then-rename for atomicity
// - Corruption detection: Validates JSON on load
// - Automatic backup: Keeps .backup of the last committed state
// - Recovery: Falls back to backup if corruption detected, fails if none
//   is usable
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   ...content fields...
// }
// ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::Error;

/// File format version
/// Used for future migration if format changes
const FILE_FORMAT_VERSION: &str = "1.0";

/// Serializable envelope around the content of a file
#[derive(Debug, Serialize, Deserialize)]
struct Envelope<C> {
    version: String,
    #[serde(flatten)]
    content: C,
}

/// Why a load failed
enum LoadError {
    /// The file exists but could not be read
    Io(Error),
    /// The file was read but is not valid JSON for this format
    Corrupt(Error),
}

/// A JSON file written atomically with a rolling backup
#[derive(Debug, Clone)]
pub(crate) struct JsonFile {
    path: PathBuf,
}

impl JsonFile {
    /// Prepare a file at `path`, creating parent directories if needed
    pub(crate) async fn prepare(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        Ok(Self { path })
    }

    /// Path of the main file
    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Load content with automatic recovery
    ///
    /// Recovery strategy:
    /// 1. Try to load main file
    /// 2. If it is corrupted, try loading backup (and restore it)
    /// 3. If backup is missing or unusable, fail
    ///
    /// A file that does not exist yet loads as empty content. A file that
    /// exists but cannot be read never does: callers would take it for an
    /// empty collection.
    pub(crate) async fn load_with_recovery<C>(&self) -> Result<C, Error>
    where
        C: DeserializeOwned + Default,
    {
        let main_err = match Self::load(&self.path).await {
            Ok(content) => return Ok(content),
            Err(LoadError::Io(e)) => return Err(e),
            Err(LoadError::Corrupt(e)) => e,
        };

        tracing::warn!(
            "File {} appears corrupted: {}. Attempting recovery from backup.",
            self.path.display(),
            main_err
        );

        let backup_path = Self::backup_path(&self.path);
        if !backup_path.exists() {
            tracing::error!("No backup file found for {}", self.path.display());
            return Err(Error::store(format!(
                "{} is corrupted and has no backup; refusing to load it as empty: {}",
                self.path.display(),
                main_err
            )));
        }

        match Self::load(&backup_path).await {
            Ok(content) => {
                tracing::info!("Recovered {} from backup", self.path.display());
                if let Err(restore_err) = fs::copy(&backup_path, &self.path).await {
                    tracing::error!(
                        "Failed to restore {} from backup: {}",
                        self.path.display(),
                        restore_err
                    );
                }
                Ok(content)
            }
            Err(LoadError::Io(backup_err)) | Err(LoadError::Corrupt(backup_err)) => {
                tracing::error!("Backup of {} also unusable: {}", self.path.display(), backup_err);
                Err(Error::store(format!(
                    "{} and its backup are both unusable: {}; {}",
                    self.path.display(),
                    main_err,
                    backup_err
                )))
            }
        }
    }

    /// Load content from one file
    async fn load<C>(path: &Path) -> Result<C, LoadError>
    where
        C: DeserializeOwned + Default,
    {
        if !path.exists() {
            tracing::debug!("File does not exist yet: {}", path.display());
            return Ok(C::default());
        }

        let raw = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Io(Error::store(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )))
        })?;

        let envelope: Envelope<C> = serde_json::from_str(&raw).map_err(|e| {
            LoadError::Corrupt(Error::store(format!(
                "Failed to parse {}: {}",
                path.display(),
                e
            )))
        })?;

        if envelope.version != FILE_FORMAT_VERSION {
            tracing::warn!(
                "File version mismatch for {}: expected {}, got {}. Attempting to load anyway.",
                path.display(),
                FILE_FORMAT_VERSION,
                envelope.version
            );
        }

        Ok(envelope.content)
    }

    /// Write content atomically
    ///
    /// The backup is refreshed from the main file once the rename has
    /// committed, so it always matches the latest write.
    pub(crate) async fn write<C>(&self, content: &C) -> Result<(), Error>
    where
        C: Serialize,
    {
        let envelope = Envelope {
            version: FILE_FORMAT_VERSION.to_string(),
            content,
        };

        let json = serde_json::to_string_pretty(&envelope)
            .map_err(|e| Error::store(format!("Failed to serialize: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write to temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;

            file.sync_all().await.map_err(|e| {
                Error::store(format!(
                    "Failed to sync temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        let backup_path = Self::backup_path(&self.path);
        if let Err(e) = fs::copy(&self.path, &backup_path).await {
            tracing::warn!("Failed to refresh backup {}: {}", backup_path.display(), e);
        }

        tracing::trace!("Written {}", self.path.display());
        Ok(())
    }

    /// Get path to temporary file for atomic writes
    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    /// Get path to backup file
    pub(crate) fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}
