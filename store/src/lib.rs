//! Disk persistence for anchor bindings.
//!
//! ## Layout
//!
//! ```text
//! ~/.local/share/pcf-anchor/bindings/
//!   {url-encoded key}.json   BindingRecord
//! ```
//!
//! Writes go through a `.tmp` sibling and a rename, so a crash mid-write
//! leaves either the old record or the new one, never a torn file.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use pcf_core::{BindingLibrary, CompositeBinding, LibraryError, LibraryHandle, StoreConfig};
use serde::{Deserialize, Serialize};

/// Current on-disk record version.
pub const SCHEMA_VERSION: u32 = 1;

const RECORD_EXTENSION: &str = "json";

/// One stored binding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindingRecord {
    pub schema_version: u32,
    pub key: String,
    pub saved_at: DateTime<Utc>,
    pub binding: CompositeBinding,
}

impl BindingRecord {
    pub fn new(key: impl Into<String>, binding: CompositeBinding) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            key: key.into(),
            saved_at: Utc::now(),
            binding,
        }
    }
}

fn serde_error(err: serde_json::Error) -> LibraryError {
    LibraryError::Serde {
        message: err.to_string(),
    }
}

/// [`BindingLibrary`] keeping one JSON file per anchor identifier.
#[derive(Debug)]
pub struct JsonFileLibrary {
    base_dir: PathBuf,
}

impl JsonFileLibrary {
    /// Open the library at the XDG data directory
    /// (`~/.local/share/pcf-anchor/bindings/`).
    pub fn new() -> Result<Self, LibraryError> {
        let base_dir = StoreConfig::default().resolved_dir().ok_or_else(|| {
            LibraryError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "could not determine XDG_DATA_HOME",
            ))
        })?;
        Self::with_base_dir(base_dir)
    }

    /// Open the library at a custom directory, creating it if needed.
    pub fn with_base_dir(base_dir: PathBuf) -> Result<Self, LibraryError> {
        std::fs::create_dir_all(&base_dir)?;
        Ok(Self { base_dir })
    }

    /// Open the library configured by `[store]`.
    pub fn from_config(config: &StoreConfig) -> Result<Self, LibraryError> {
        match config.resolved_dir() {
            Some(dir) => Self::with_base_dir(dir),
            None => Self::new(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn into_handle(self) -> LibraryHandle {
        Arc::new(self)
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.base_dir
            .join(format!("{}.{RECORD_EXTENSION}", urlencoding::encode(key)))
    }

    fn atomic_write(&self, path: &Path, data: &[u8]) -> Result<(), LibraryError> {
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Full record for `key`, including when it was saved.
    pub fn read_record(&self, key: &str) -> Result<Option<BindingRecord>, LibraryError> {
        let path = self.record_path(key);
        let data = match std::fs::read_to_string(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let record: BindingRecord = serde_json::from_str(&data).map_err(serde_error)?;
        if record.schema_version > SCHEMA_VERSION {
            return Err(LibraryError::Serde {
                message: format!(
                    "{} has schema version {}, newest supported is {SCHEMA_VERSION}",
                    path.display(),
                    record.schema_version
                ),
            });
        }
        if record.key != key {
            tracing::warn!(
                key,
                stored_key = %record.key,
                path = %path.display(),
                "binding record key does not match its file name"
            );
        }
        Ok(Some(record))
    }

    pub fn write_record(&self, record: &BindingRecord) -> Result<(), LibraryError> {
        let json = serde_json::to_string_pretty(record).map_err(serde_error)?;
        self.atomic_write(&self.record_path(&record.key), json.as_bytes())?;
        tracing::debug!(key = %record.key, bindings = record.binding.len(), "binding saved");
        Ok(())
    }
}

impl BindingLibrary for JsonFileLibrary {
    fn get(&self, key: &str) -> Result<Option<CompositeBinding>, LibraryError> {
        Ok(self.read_record(key)?.map(|record| record.binding))
    }

    fn set(&self, key: &str, binding: &CompositeBinding) -> Result<(), LibraryError> {
        self.write_record(&BindingRecord::new(key, binding.clone()))
    }

    fn remove(&self, key: &str) -> Result<(), LibraryError> {
        match std::fs::remove_file(self.record_path(key)) {
            Ok(()) => {
                tracing::debug!(key, "binding removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn keys(&self) -> Result<Vec<String>, LibraryError> {
        let mut keys = Vec::new();

        let entries = match std::fs::read_dir(&self.base_dir) {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => return Err(e.into()),
        };

        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            let Some(encoded) = name.strip_suffix(".json") else {
                continue;
            };
            match urlencoding::decode(encoded) {
                Ok(key) => keys.push(key.into_owned()),
                Err(err) => {
                    tracing::warn!(file = %name, error = %err, "skipping undecodable record name");
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
