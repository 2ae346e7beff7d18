//! Backend drivers that own a volume's on-disk data.
//!
//! A driver only knows about content roots. Handle-to-path mapping and the
//! init/live/dead staging layout belong to [`crate::volume::Filesystem`].

mod naive;
mod reflink;

pub use naive::NaiveDriver;
pub use reflink::ReflinkDriver;

use serde::Deserialize;
use std::fs;
use std::os::unix::fs::{lchown, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use walkdir::WalkDir;

/// Errors raised by a driver.
#[derive(Debug, Error)]
pub enum DriverError {
    /// An I/O call against `path` failed.
    #[error("{op} {path}: {source}")]
    Io {
        /// Operation being attempted.
        op: &'static str,
        /// Path the operation targeted.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
    /// Walking the source tree failed.
    #[error("walking {path}: {source}")]
    Walk {
        /// Root of the walk.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: walkdir::Error,
    },
}

impl DriverError {
    pub(crate) fn io<'a>(op: &'static str, path: &'a Path) -> impl FnOnce(std::io::Error) -> Self + 'a {
        move |source| Self::Io {
            op,
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Primitive operations a storage backend provides.
pub trait Driver: Send + Sync + std::fmt::Debug {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Creates an empty, writable content root at `path`.
    ///
    /// # Errors
    ///
    /// Fails if `path` already exists or cannot be created.
    fn create_empty(&self, path: &Path) -> Result<(), DriverError>;

    /// Produces an independent, writable copy of `from` at `to`.
    ///
    /// # Errors
    ///
    /// Fails if `to` already exists or any entry cannot be copied.
    fn duplicate(&self, from: &Path, to: &Path) -> Result<(), DriverError>;

    /// Removes all data at `path`. Absent paths are not an error.
    ///
    /// # Errors
    ///
    /// Fails if existing data cannot be removed.
    fn destroy(&self, path: &Path) -> Result<(), DriverError>;
}

/// Driver selection as it appears in configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DriverKind {
    /// Recursive copy, works on any filesystem.
    #[default]
    Naive,
    /// Reflink-based copy-on-write where the filesystem supports it.
    Reflink,
}

impl DriverKind {
    /// Instantiates the selected driver.
    #[must_use]
    pub fn build(self) -> Arc<dyn Driver> {
        match self {
            Self::Naive => Arc::new(NaiveDriver),
            Self::Reflink => Arc::new(ReflinkDriver),
        }
    }
}

pub(crate) fn create_dir(path: &Path) -> Result<(), DriverError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(DriverError::io("create parent of", path))?;
    }
    fs::create_dir(path).map_err(DriverError::io("create", path))
}

pub(crate) fn remove_tree(path: &Path) -> Result<(), DriverError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).map_err(DriverError::io("remove", path))
        }
        Ok(_) => fs::remove_file(path).map_err(DriverError::io("remove", path)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(DriverError::io("stat", path)(e)),
    }
}

/// Recreates the tree at `src` under `dst`, delegating regular files to
/// `copy_file`. Directories keep their mode, symlinks are recreated as links,
/// and ownership is carried over whenever it differs from the new entry's.
pub(crate) fn copy_tree<F>(src: &Path, dst: &Path, copy_file: F) -> Result<(), DriverError>
where
    F: Fn(&Path, &Path) -> std::io::Result<()>,
{
    create_dir(dst)?;
    let mut directories = Vec::new();

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|source| DriverError::Walk {
            path: src.to_path_buf(),
            source,
        })?;
        let path = entry.path();

        let Ok(relative_path) = path.strip_prefix(src) else {
            continue;
        };
        let target = if relative_path.as_os_str().is_empty() {
            dst.to_path_buf()
        } else {
            dst.join(relative_path)
        };

        let meta = fs::symlink_metadata(path).map_err(DriverError::io("stat", path))?;
        let file_type = meta.file_type();

        if file_type.is_dir() {
            if target != dst {
                fs::create_dir(&target).map_err(DriverError::io("create", &target))?;
            }
            // Modes are applied after the walk so read-only directories
            // can still be populated.
            directories.push((target, meta));
            continue;
        } else if file_type.is_symlink() {
            let link = fs::read_link(path).map_err(DriverError::io("readlink", path))?;
            std::os::unix::fs::symlink(&link, &target)
                .map_err(DriverError::io("symlink", &target))?;
        } else {
            copy_file(path, &target).map_err(DriverError::io("copy to", &target))?;
        }

        preserve_ownership(&meta, &target)?;
    }

    for (target, meta) in directories.into_iter().rev() {
        preserve_ownership(&meta, &target)?;
        fs::set_permissions(&target, meta.permissions())
            .map_err(DriverError::io("chmod", &target))?;
    }

    Ok(())
}

fn preserve_ownership(source: &fs::Metadata, target: &Path) -> Result<(), DriverError> {
    let copied = fs::symlink_metadata(target).map_err(DriverError::io("stat", target))?;
    if copied.uid() == source.uid() && copied.gid() == source.gid() {
        return Ok(());
    }
    lchown(target, Some(source.uid()), Some(source.gid()))
        .map_err(DriverError::io("chown", target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn populate(root: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(root.join("a/b/c"))?;
        fs::write(root.join("root.txt"), "root")?;
        fs::write(root.join("a/level1.txt"), "level1")?;
        fs::write(root.join("a/b/c/level3.txt"), "level3")?;
        std::os::unix::fs::symlink("a/level1.txt", root.join("link"))?;
        Ok(())
    }

    fn assert_duplicates(driver: &dyn Driver) -> anyhow::Result<()> {
        let temp = tempdir()?;
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        populate(&src)?;

        driver.duplicate(&src, &dst)?;

        assert_eq!(fs::read_to_string(dst.join("root.txt"))?, "root");
        assert_eq!(fs::read_to_string(dst.join("a/b/c/level3.txt"))?, "level3");
        assert_eq!(fs::read_link(dst.join("link"))?, Path::new("a/level1.txt"));

        fs::write(dst.join("root.txt"), "changed")?;
        assert_eq!(fs::read_to_string(src.join("root.txt"))?, "root");
        Ok(())
    }

    #[test]
    fn test_naive_duplicate_is_independent() -> anyhow::Result<()> {
        assert_duplicates(&NaiveDriver)
    }

    #[test]
    fn test_reflink_duplicate_is_independent() -> anyhow::Result<()> {
        assert_duplicates(&ReflinkDriver)
    }

    #[test]
    fn test_duplicate_refuses_existing_target() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let src = temp.path().join("src");
        let dst = temp.path().join("dst");
        fs::create_dir(&src)?;
        fs::create_dir(&dst)?;

        assert!(NaiveDriver.duplicate(&src, &dst).is_err());
        Ok(())
    }

    #[test]
    fn test_destroy_is_idempotent() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let path = temp.path().join("volume");
        NaiveDriver.create_empty(&path)?;
        fs::write(path.join("file"), "data")?;

        NaiveDriver.destroy(&path)?;
        assert!(!path.exists());
        NaiveDriver.destroy(&path)?;
        Ok(())
    }

    #[test]
    fn test_io_error_names_operation_and_path() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let missing = temp.path().join("missing");

        let err = fs::read_dir(&missing)
            .map(|_| ())
            .map_err(DriverError::io("read", &missing))
            .expect_err("reading a missing directory must fail");

        let message = err.to_string();
        assert!(message.starts_with("read "));
        assert!(message.contains("missing"));
        assert!(matches!(err, DriverError::Io { op: "read", .. }));
        Ok(())
    }

    #[test]
    fn test_driver_kind_deserializes_lowercase() -> anyhow::Result<()> {
        let kind: DriverKind = serde_json::from_str("\"reflink\"")?;
        assert_eq!(kind, DriverKind::Reflink);
        assert_eq!(kind.build().name(), "reflink");
        Ok(())
    }
}
