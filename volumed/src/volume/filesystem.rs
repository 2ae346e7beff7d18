//! Handle-to-path management on top of a [`Driver`].
//!
//! Volumes move through three sibling directories under the root:
//!
//! - `init/<handle>`: staging while a strategy fills the content root
//! - `live/<handle>`: published and visible to the repository
//! - `dead/<handle>`: tombstoned while its data is being destroyed
//!
//! Moves between them are single renames, so a volume is either fully
//! published or not published at all.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::driver::{remove_tree, Driver, DriverError};
use super::metadata::MetadataStore;
use super::types::Handle;

const INIT_DIR: &str = "init";
const LIVE_DIR: &str = "live";
const DEAD_DIR: &str = "dead";
const CONTENT_DIR: &str = "volume";

/// Volume storage rooted at a single directory.
#[derive(Debug, Clone)]
pub struct Filesystem {
    root: PathBuf,
    driver: Arc<dyn Driver>,
}

impl Filesystem {
    /// Prepares the staging layout under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the layout directories cannot be created.
    pub fn new(driver: Arc<dyn Driver>, root: impl AsRef<Path>) -> Result<Self, DriverError> {
        let root = root.as_ref();
        for dir in [INIT_DIR, LIVE_DIR, DEAD_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path).map_err(DriverError::io("create", &path))?;
        }
        let root = dunce::canonicalize(root).map_err(DriverError::io("canonicalize", root))?;
        info!(driver = driver.name(), "Volume root at {:?}", root);
        Ok(Self { root, driver })
    }

    /// The configured root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Starts a new volume with an empty content root.
    ///
    /// # Errors
    ///
    /// Fails if the staging directory already exists or the driver fails.
    pub fn new_volume(&self, handle: &Handle) -> Result<InitVolume, DriverError> {
        let init = self.stage(handle)?;
        if let Err(e) = self.driver.create_empty(&init.data_path()) {
            init.discard();
            return Err(e);
        }
        Ok(init)
    }

    /// Starts a new volume whose content root is a copy of `source`.
    ///
    /// # Errors
    ///
    /// Fails if the staging directory already exists or the driver fails.
    pub fn new_volume_from(&self, handle: &Handle, source: &Path) -> Result<InitVolume, DriverError> {
        let init = self.stage(handle)?;
        if let Err(e) = self.driver.duplicate(source, &init.data_path()) {
            init.discard();
            return Err(e);
        }
        Ok(init)
    }

    /// Looks up a published volume.
    #[must_use]
    pub fn live_volume(&self, handle: &Handle) -> Option<LiveVolume> {
        let dir = self.root.join(LIVE_DIR).join(handle.as_str());
        dir.is_dir().then(|| LiveVolume {
            handle: handle.clone(),
            dir,
            filesystem: self.clone(),
        })
    }

    /// All published volumes found on disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the live directory cannot be read.
    pub fn live_volumes(&self) -> Result<Vec<LiveVolume>, DriverError> {
        let live = self.root.join(LIVE_DIR);
        let mut volumes = Vec::new();
        for entry in fs::read_dir(&live).map_err(DriverError::io("read", &live))? {
            let entry = entry.map_err(DriverError::io("read", &live))?;
            let name = entry.file_name();
            let Some(handle) = name.to_str().and_then(Handle::parse) else {
                warn!("Ignoring unexpected entry in live directory: {:?}", name);
                continue;
            };
            if let Some(volume) = self.live_volume(&handle) {
                volumes.push(volume);
            }
        }
        Ok(volumes)
    }

    /// Whether `handle` is in use anywhere in the layout.
    #[must_use]
    pub fn contains(&self, handle: &Handle) -> bool {
        [INIT_DIR, LIVE_DIR, DEAD_DIR]
            .iter()
            .any(|dir| self.root.join(dir).join(handle.as_str()).exists())
    }

    /// Destroys staging and tombstoned directories left behind by a crash.
    ///
    /// # Errors
    ///
    /// Returns an error if a leftover directory cannot be removed.
    pub fn cleanup_orphaned(&self) -> Result<usize, DriverError> {
        let mut cleaned = 0;
        for dir in [INIT_DIR, DEAD_DIR] {
            let parent = self.root.join(dir);
            for entry in fs::read_dir(&parent).map_err(DriverError::io("read", &parent))? {
                let path = entry.map_err(DriverError::io("read", &parent))?.path();
                info!("Cleaning up orphaned volume directory: {:?}", path);
                self.driver.destroy(&path.join(CONTENT_DIR))?;
                remove_tree(&path)?;
                cleaned += 1;
            }
        }
        if cleaned > 0 {
            info!("Cleaned up {} orphaned volume directories", cleaned);
        }
        Ok(cleaned)
    }

    fn stage(&self, handle: &Handle) -> Result<InitVolume, DriverError> {
        let dir = self.root.join(INIT_DIR).join(handle.as_str());
        fs::create_dir(&dir).map_err(DriverError::io("create", &dir))?;
        Ok(InitVolume {
            handle: handle.clone(),
            dir,
            filesystem: self.clone(),
        })
    }
}

/// A volume being materialised; invisible to readers until [`publish`]ed.
///
/// [`publish`]: InitVolume::publish
#[derive(Debug)]
pub struct InitVolume {
    handle: Handle,
    dir: PathBuf,
    filesystem: Filesystem,
}

impl InitVolume {
    /// Handle this volume will be published under.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Content root while staging.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(CONTENT_DIR)
    }

    /// Metadata documents written before publishing.
    #[must_use]
    pub fn metadata(&self) -> MetadataStore {
        MetadataStore::new(&self.dir)
    }

    /// Atomically moves the volume into the live set.
    ///
    /// # Errors
    ///
    /// Fails if the rename fails; the staged data is then destroyed.
    pub fn publish(self) -> Result<LiveVolume, DriverError> {
        let live_dir = self
            .filesystem
            .root
            .join(LIVE_DIR)
            .join(self.handle.as_str());
        if let Err(e) = fs::rename(&self.dir, &live_dir) {
            let err = DriverError::io("publish", &live_dir)(e);
            self.discard();
            return Err(err);
        }
        debug!("Published volume {}", self.handle);
        Ok(LiveVolume {
            handle: self.handle,
            dir: live_dir,
            filesystem: self.filesystem,
        })
    }

    /// Throws away a staged volume after a failed materialisation.
    pub fn discard(self) {
        let result = self
            .filesystem
            .driver
            .destroy(&self.data_path())
            .and_then(|()| remove_tree(&self.dir));
        if let Err(e) = result {
            // Left for cleanup_orphaned on the next start.
            warn!("Failed to discard staged volume {}: {}", self.handle, e);
        }
    }
}

/// A published volume on disk.
#[derive(Debug, Clone)]
pub struct LiveVolume {
    handle: Handle,
    dir: PathBuf,
    filesystem: Filesystem,
}

impl LiveVolume {
    /// The volume's handle.
    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// The volume's content root.
    #[must_use]
    pub fn data_path(&self) -> PathBuf {
        self.dir.join(CONTENT_DIR)
    }

    /// The volume's metadata documents.
    #[must_use]
    pub fn metadata(&self) -> MetadataStore {
        MetadataStore::new(&self.dir)
    }

    /// Removes the volume from the live set and destroys its data.
    ///
    /// # Errors
    ///
    /// Fails if the tombstone rename or the driver fails. Once the rename has
    /// happened the volume is no longer live, and leftovers are reclaimed by
    /// [`Filesystem::cleanup_orphaned`].
    pub fn destroy(self) -> Result<(), DriverError> {
        let dead_dir = self
            .filesystem
            .root
            .join(DEAD_DIR)
            .join(self.handle.as_str());
        fs::rename(&self.dir, &dead_dir).map_err(DriverError::io("tombstone", &self.dir))?;
        self.filesystem
            .driver
            .destroy(&dead_dir.join(CONTENT_DIR))?;
        remove_tree(&dead_dir)?;
        debug!("Destroyed volume {}", self.handle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::driver::NaiveDriver;
    use tempfile::tempdir;

    fn filesystem(root: &Path) -> anyhow::Result<Filesystem> {
        Ok(Filesystem::new(Arc::new(NaiveDriver), root)?)
    }

    #[test]
    fn test_new_volume_is_staged_until_published() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = filesystem(temp.path())?;
        let handle = Handle::generate();

        let init = fs.new_volume(&handle)?;
        assert!(init.data_path().is_dir());
        assert!(fs.live_volume(&handle).is_none());

        let live = init.publish()?;
        assert!(live.data_path().is_dir());
        assert_eq!(
            live.data_path(),
            fs.root().join("live").join(handle.as_str()).join("volume")
        );
        assert!(fs.live_volume(&handle).is_some());
        Ok(())
    }

    #[test]
    fn test_staging_same_handle_twice_fails() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = filesystem(temp.path())?;
        let handle = Handle::generate();

        let _first = fs.new_volume(&handle)?;
        assert!(fs.new_volume(&handle).is_err());
        assert!(fs.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_failed_copy_leaves_nothing_staged() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = filesystem(temp.path())?;
        let handle = Handle::generate();

        let result = fs.new_volume_from(&handle, &temp.path().join("missing"));
        assert!(result.is_err());
        assert!(!fs.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_destroy_removes_live_volume() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = filesystem(temp.path())?;
        let handle = Handle::generate();
        let live = fs.new_volume(&handle)?.publish()?;
        std::fs::write(live.data_path().join("file"), "data")?;

        live.destroy()?;

        assert!(fs.live_volume(&handle).is_none());
        assert!(!fs.contains(&handle));
        Ok(())
    }

    #[test]
    fn test_cleanup_orphaned_removes_init_and_dead() -> anyhow::Result<()> {
        let temp = tempdir()?;
        let fs = filesystem(temp.path())?;
        let _staged = fs.new_volume(&Handle::generate())?;
        std::fs::create_dir_all(fs.root().join("dead/leftover/volume"))?;
        let kept = fs.new_volume(&Handle::generate())?.publish()?;

        assert_eq!(fs.cleanup_orphaned()?, 2);
        assert_eq!(fs.live_volumes()?.len(), 1);
        assert!(kept.data_path().is_dir());
        Ok(())
    }
}
