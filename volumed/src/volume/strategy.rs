//! How a new volume's initial content is produced.
//!
//! Requests arrive as a tagged JSON object (`{"type": "cow", "volume": ...}`)
//! and are validated into the closed [`Strategy`] enum before anything
//! touches the disk.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::error::VolumeError;
use super::filesystem::{Filesystem, InitVolume};
use super::namespacer::{NamespaceCache, Namespacer};
use super::types::Handle;

/// Collaborators a strategy may use while materialising.
#[derive(Debug, Clone, Copy)]
pub struct MaterializeContext<'a> {
    /// Where volumes live.
    pub filesystem: &'a Filesystem,
    /// Ownership rewrite policy for imports.
    pub namespacer: &'a dyn Namespacer,
    /// Trees already namespaced.
    pub namespace_cache: &'a NamespaceCache,
}

/// Content source for a new volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Strategy {
    /// Start with an empty directory.
    Empty,
    /// Start from a snapshot of an existing volume.
    CopyOnWrite {
        /// Volume to copy from.
        parent: Handle,
    },
    /// Start from a namespaced copy of a tree outside the repository.
    Import {
        /// Source tree.
        path: PathBuf,
    },
}

#[derive(Debug, Deserialize)]
struct StrategyRequest {
    #[serde(rename = "type")]
    kind: Option<String>,
    volume: Option<String>,
    path: Option<PathBuf>,
}

impl Strategy {
    /// Validates a tagged strategy request.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::InvalidStrategy`] when the request is not an
    /// object, names no type or an unknown one, or omits a required field.
    pub fn from_request(raw: &serde_json::Value) -> Result<Self, VolumeError> {
        let request = StrategyRequest::deserialize(raw)
            .map_err(|e| VolumeError::InvalidStrategy(e.to_string()))?;

        match request.kind.as_deref() {
            None => Err(VolumeError::InvalidStrategy("missing type".to_string())),
            Some("empty") => Ok(Self::Empty),
            Some("cow") => {
                let raw_parent = request.volume.ok_or_else(|| {
                    VolumeError::InvalidStrategy("cow strategy requires a volume".to_string())
                })?;
                let parent = Handle::parse(&raw_parent).ok_or_else(|| {
                    VolumeError::InvalidStrategy(format!("invalid parent handle: {raw_parent}"))
                })?;
                Ok(Self::CopyOnWrite { parent })
            }
            Some("import") => {
                let path = request.path.filter(|p| !p.as_os_str().is_empty()).ok_or_else(|| {
                    VolumeError::InvalidStrategy("import strategy requires a path".to_string())
                })?;
                Ok(Self::Import { path })
            }
            Some(other) => Err(VolumeError::InvalidStrategy(format!(
                "unknown strategy type: {other}"
            ))),
        }
    }

    /// The copy-on-write parent, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Handle> {
        match self {
            Self::CopyOnWrite { parent } => Some(parent),
            Self::Empty | Self::Import { .. } => None,
        }
    }

    /// Produces the staged content for `handle`.
    ///
    /// # Errors
    ///
    /// Fails if the parent or import source is unavailable, namespacing
    /// fails, or the filesystem fails. Nothing is left staged on failure.
    pub fn materialize(
        &self,
        handle: &Handle,
        ctx: &MaterializeContext<'_>,
    ) -> Result<InitVolume, VolumeError> {
        match self {
            Self::Empty => Ok(ctx.filesystem.new_volume(handle)?),
            Self::CopyOnWrite { parent } => {
                let source = ctx
                    .filesystem
                    .live_volume(parent)
                    .ok_or_else(|| VolumeError::ParentNotFound(parent.clone()))?;
                let init = ctx.filesystem.new_volume_from(handle, &source.data_path())?;
                if let Err(e) = init.metadata().store_parent(parent) {
                    init.discard();
                    return Err(e.into());
                }
                debug!("Materialized {} from parent {}", handle, parent);
                Ok(init)
            }
            Self::Import { path } => {
                let source = import_source(path, ctx.filesystem.root())?;
                ctx.namespace_cache
                    .ensure_namespaced(ctx.namespacer, &source)?;
                Ok(ctx.filesystem.new_volume_from(handle, &source)?)
            }
        }
    }
}

/// Resolves an import source to a canonical directory outside `volume_root`.
///
/// # Errors
///
/// Returns [`VolumeError::ImportSourceUnavailable`] when the path is missing
/// or is not a directory, and [`VolumeError::InvalidStrategy`] when it lies
/// inside the volume root or contains it.
pub fn import_source(path: &Path, volume_root: &Path) -> Result<PathBuf, VolumeError> {
    let unavailable = |source| VolumeError::ImportSourceUnavailable {
        path: path.to_path_buf(),
        source,
    };
    let canonical = dunce::canonicalize(path).map_err(unavailable)?;
    if !canonical.is_dir() {
        return Err(unavailable(std::io::Error::other("not a directory")));
    }
    if canonical.starts_with(volume_root) || volume_root.starts_with(&canonical) {
        return Err(VolumeError::InvalidStrategy(format!(
            "import source {} overlaps the volume root",
            canonical.display()
        )));
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::driver::{Driver, DriverError, NaiveDriver};
    use crate::volume::namespacer::NoopNamespacer;
    use serde_json::json;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Driver whose every operation fails.
    #[derive(Debug)]
    struct BrokenDriver;

    impl Driver for BrokenDriver {
        fn name(&self) -> &'static str {
            "broken"
        }

        fn create_empty(&self, path: &Path) -> Result<(), DriverError> {
            Err(DriverError::io("create", path)(std::io::Error::other("nope")))
        }

        fn duplicate(&self, _from: &Path, to: &Path) -> Result<(), DriverError> {
            self.create_empty(to)
        }

        fn destroy(&self, _path: &Path) -> Result<(), DriverError> {
            Ok(())
        }
    }

    fn context<'a>(fs: &'a Filesystem, cache: &'a NamespaceCache) -> MaterializeContext<'a> {
        MaterializeContext {
            filesystem: fs,
            namespacer: &NoopNamespacer,
            namespace_cache: cache,
        }
    }

    #[test]
    fn test_parses_known_strategies() -> anyhow::Result<()> {
        assert_eq!(Strategy::from_request(&json!({"type": "empty"}))?, Strategy::Empty);
        assert_eq!(
            Strategy::from_request(&json!({"type": "cow", "volume": "abc"}))?,
            Strategy::CopyOnWrite {
                parent: Handle::parse("abc").ok_or_else(|| anyhow::anyhow!("handle"))?
            }
        );
        assert_eq!(
            Strategy::from_request(&json!({"type": "import", "path": "/srv/rootfs"}))?,
            Strategy::Import {
                path: PathBuf::from("/srv/rootfs")
            }
        );
        Ok(())
    }

    #[test]
    fn test_rejects_invalid_requests() {
        for raw in [
            json!({}),
            json!("empty"),
            json!({"type": "grime"}),
            json!({"type": "cow"}),
            json!({"type": "cow", "volume": "../escape"}),
            json!({"type": "import"}),
            json!({"type": "import", "path": ""}),
        ] {
            let err = Strategy::from_request(&raw).expect_err("request must be rejected");
            assert!(err.is_validation(), "{raw} gave {err}");
        }
    }

    #[test]
    fn test_empty_materializes_staged_volume() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path())?;
        let cache = NamespaceCache::new();
        let handle = Handle::generate();

        let init = Strategy::Empty.materialize(&handle, &context(&fs, &cache))?;

        assert_eq!(init.handle(), &handle);
        assert!(init.data_path().is_dir());
        Ok(())
    }

    #[test]
    fn test_empty_returns_driver_failure() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(BrokenDriver), temp.path())?;
        let cache = NamespaceCache::new();
        let handle = Handle::generate();

        let err = Strategy::Empty
            .materialize(&handle, &context(&fs, &cache))
            .expect_err("driver failure must surface");

        assert!(matches!(err, VolumeError::Driver(_)));
        assert!(err.to_string().contains("nope"));
        assert!(!fs.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_cow_copies_parent_and_records_lineage() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path().join("root"))?;
        let cache = NamespaceCache::new();
        let parent = fs.new_volume(&Handle::generate())?.publish()?;
        std::fs::write(parent.data_path().join("file"), "from parent")?;

        let strategy = Strategy::CopyOnWrite {
            parent: parent.handle().clone(),
        };
        let init = strategy.materialize(&Handle::generate(), &context(&fs, &cache))?;

        assert_eq!(
            std::fs::read_to_string(init.data_path().join("file"))?,
            "from parent"
        );
        assert_eq!(init.metadata().load_parent()?, Some(parent.handle().clone()));
        Ok(())
    }

    #[test]
    fn test_cow_with_missing_parent_fails() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path())?;
        let cache = NamespaceCache::new();
        let handle = Handle::generate();

        let strategy = Strategy::CopyOnWrite {
            parent: Handle::generate(),
        };
        let err = strategy
            .materialize(&handle, &context(&fs, &cache))
            .expect_err("missing parent must fail");

        assert!(matches!(err, VolumeError::ParentNotFound(_)));
        assert!(!fs.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_import_copies_source_tree() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path().join("root"))?;
        let cache = NamespaceCache::new();
        let source = temp.path().join("rootfs");
        std::fs::create_dir_all(source.join("etc"))?;
        std::fs::write(source.join("etc/hostname"), "sandbox")?;

        let strategy = Strategy::Import {
            path: source.clone(),
        };
        let init = strategy.materialize(&Handle::generate(), &context(&fs, &cache))?;

        assert_eq!(
            std::fs::read_to_string(init.data_path().join("etc/hostname"))?,
            "sandbox"
        );
        assert_eq!(cache.len(), 1);
        Ok(())
    }

    #[test]
    fn test_import_of_missing_source_fails() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path().join("root"))?;
        let cache = NamespaceCache::new();

        let strategy = Strategy::Import {
            path: temp.path().join("missing"),
        };
        let err = strategy
            .materialize(&Handle::generate(), &context(&fs, &cache))
            .expect_err("missing source must fail");

        assert!(matches!(err, VolumeError::ImportSourceUnavailable { .. }));
        assert!(cache.is_empty());
        Ok(())
    }

    #[test]
    fn test_import_rejects_sources_overlapping_the_root() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = Filesystem::new(Arc::new(NaiveDriver), temp.path().join("root"))?;
        let cache = NamespaceCache::new();
        let live = fs.new_volume(&Handle::generate())?.publish()?;

        for source in [live.data_path(), fs.root().to_path_buf(), temp.path().to_path_buf()] {
            let handle = Handle::generate();
            let err = Strategy::Import { path: source }
                .materialize(&handle, &context(&fs, &cache))
                .expect_err("overlapping source must be rejected");

            assert!(err.is_validation(), "{err}");
            assert!(!fs.contains(&handle));
        }
        assert!(cache.is_empty());
        Ok(())
    }
}
