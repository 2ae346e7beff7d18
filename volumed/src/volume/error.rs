//! Error taxonomy for volume operations.

use std::path::PathBuf;
use thiserror::Error;

use super::driver::DriverError;
use super::metadata::MetadataError;
use super::namespacer::NamespaceError;
use super::types::Handle;

/// Errors returned by the repository and the layers beneath it.
#[derive(Debug, Error)]
pub enum VolumeError {
    /// The creation request named no strategy, an unknown one, or omitted a
    /// field the strategy requires.
    #[error("invalid strategy: {0}")]
    InvalidStrategy(String),
    /// The copy-on-write parent does not exist or is being destroyed.
    #[error("parent volume not found: {0}")]
    ParentNotFound(Handle),
    /// No live volume has this handle.
    #[error("volume not found: {0}")]
    VolumeNotFound(Handle),
    /// Destroy was refused because other live volumes were copied from this one.
    #[error("volume {handle} has {} live dependent(s)", dependents.len())]
    HasDependents {
        /// Volume that was asked to be destroyed.
        handle: Handle,
        /// Live children blocking the destroy.
        dependents: Vec<Handle>,
    },
    /// The import source tree is missing or not a directory.
    #[error("import source {path} is unavailable: {source}")]
    ImportSourceUnavailable {
        /// Path that was requested.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// A freshly generated handle already exists on disk.
    #[error("handle collision: {0}")]
    HandleCollision(Handle),
    /// The backend driver failed.
    #[error(transparent)]
    Driver(#[from] DriverError),
    /// Reading or writing durable metadata failed.
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    /// Rewriting ownership of an imported tree failed.
    #[error(transparent)]
    Namespace(#[from] NamespaceError),
}

impl VolumeError {
    /// Whether the caller supplied a request that can never succeed as given.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::InvalidStrategy(_) | Self::ParentNotFound(_))
    }

    /// Whether the failure is a live-dependent conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::HasDependents { .. })
    }
}
