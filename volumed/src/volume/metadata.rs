//! Durable per-volume metadata.
//!
//! Every live volume directory holds small JSON documents next to its content
//! root. Writes go to a temp file first and are renamed into place, so a
//! reader never observes a half-written document.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::types::{Handle, Properties, Ttl};

pub(crate) const PROPERTIES_FILE: &str = "properties.json";
pub(crate) const TTL_FILE: &str = "ttl.json";
pub(crate) const PARENT_FILE: &str = "parent.json";

/// Errors reading or writing metadata documents.
#[derive(Debug, Error)]
pub enum MetadataError {
    /// File I/O failed.
    #[error("metadata I/O on {path}: {source}")]
    Io {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// The document could not be encoded or decoded.
    #[error("metadata encoding for {path}: {source}")]
    Json {
        /// Document path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: serde_json::Error,
    },
}

/// TTL and its derived expiry as persisted in `ttl.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpiryRecord {
    /// Seconds to live, zero for forever.
    pub ttl: Ttl,
    /// Absolute expiry, absent when `ttl` is zero.
    pub expires_at: Option<DateTime<Utc>>,
}

impl ExpiryRecord {
    /// Starts the TTL clock at `now`.
    #[must_use]
    pub fn starting_at(ttl: Ttl, now: DateTime<Utc>) -> Self {
        Self {
            ttl,
            expires_at: ttl.expires_at(now),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ParentRecord {
    handle: Handle,
}

/// Reads and writes the metadata documents of one volume directory.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    dir: PathBuf,
}

impl MetadataStore {
    /// Store rooted at a volume directory.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Persists the full property map.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be written.
    pub fn store_properties(&self, properties: &Properties) -> Result<(), MetadataError> {
        write_json_atomic(&self.dir.join(PROPERTIES_FILE), properties)
    }

    /// Loads the property map.
    ///
    /// # Errors
    ///
    /// Fails if the document is missing or malformed.
    pub fn load_properties(&self) -> Result<Properties, MetadataError> {
        read_json(&self.dir.join(PROPERTIES_FILE))
    }

    /// Persists TTL and expiry.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be written.
    pub fn store_expiry(&self, expiry: &ExpiryRecord) -> Result<(), MetadataError> {
        write_json_atomic(&self.dir.join(TTL_FILE), expiry)
    }

    /// Loads TTL and expiry.
    ///
    /// # Errors
    ///
    /// Fails if the document is missing or malformed.
    pub fn load_expiry(&self) -> Result<ExpiryRecord, MetadataError> {
        read_json(&self.dir.join(TTL_FILE))
    }

    /// Records the copy-on-write parent.
    ///
    /// # Errors
    ///
    /// Fails if the document cannot be written.
    pub fn store_parent(&self, parent: &Handle) -> Result<(), MetadataError> {
        write_json_atomic(
            &self.dir.join(PARENT_FILE),
            &ParentRecord {
                handle: parent.clone(),
            },
        )
    }

    /// Loads the copy-on-write parent, `None` for root volumes.
    ///
    /// # Errors
    ///
    /// Fails if the document exists but cannot be read.
    pub fn load_parent(&self) -> Result<Option<Handle>, MetadataError> {
        let path = self.dir.join(PARENT_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json::<ParentRecord>(&path).map(|record| Some(record.handle))
    }
}

fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), MetadataError> {
    let io_err = |source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    };

    let bytes = serde_json::to_vec(value).map_err(|source| MetadataError::Json {
        path: path.to_path_buf(),
        source,
    })?;

    let temp_path = path.with_extension("json.tmp");
    let mut file = fs::File::create(&temp_path).map_err(io_err)?;
    file.write_all(&bytes).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    // Rename to final path (atomic on the same filesystem)
    fs::rename(&temp_path, path).map_err(io_err)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, MetadataError> {
    let bytes = fs::read(path).map_err(|source| MetadataError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| MetadataError::Json {
        path: path.to_path_buf(),
        source,
    })
}
