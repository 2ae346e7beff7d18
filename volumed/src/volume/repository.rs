//! The authority over every volume on this host.
//!
//! All mutations take the per-volume lock from [`LockManager`], write durable
//! metadata, and only then update the in-memory index, so callers never see
//! a change that is not on disk.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use super::error::VolumeError;
use super::filesystem::{Filesystem, LiveVolume};
use super::locks::{LockGuard, LockIdentity, LockManager};
use super::metadata::ExpiryRecord;
use super::namespacer::{NamespaceCache, Namespacer};
use super::strategy::{import_source, MaterializeContext, Strategy};
use super::types::{Handle, Properties, Ttl, Volume, VolumeSpec};

/// Volume index, durable store and lock table.
#[derive(Debug)]
pub struct Repository {
    filesystem: Filesystem,
    locks: LockManager,
    index: RwLock<HashMap<Handle, Volume>>,
    namespacer: Arc<dyn Namespacer>,
    namespace_cache: NamespaceCache,
}

impl Repository {
    /// Opens the repository, recovering every live volume found on disk and
    /// discarding anything a previous process left half-created or
    /// half-destroyed.
    ///
    /// # Errors
    ///
    /// Returns an error if leftovers cannot be removed or a live volume's
    /// metadata cannot be read.
    pub fn open(
        filesystem: Filesystem,
        namespacer: Arc<dyn Namespacer>,
    ) -> Result<Self, VolumeError> {
        filesystem.cleanup_orphaned()?;

        let mut index = HashMap::new();
        for live in filesystem.live_volumes()? {
            let volume = load_volume(&live)?;
            index.insert(volume.handle.clone(), volume);
        }
        info!("Recovered {} volumes from {:?}", index.len(), filesystem.root());
        record_live_count(index.len());

        Ok(Self {
            filesystem,
            locks: LockManager::new(),
            index: RwLock::new(index),
            namespacer,
            namespace_cache: NamespaceCache::new(),
        })
    }

    /// The underlying filesystem.
    #[must_use]
    pub fn filesystem(&self) -> &Filesystem {
        &self.filesystem
    }

    /// Creates and publishes a new volume.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a missing copy-on-write parent, or any
    /// failure from materialising or persisting the volume. On error nothing
    /// is published and no metadata remains.
    #[instrument(skip(self, spec), fields(strategy = ?spec.strategy))]
    pub fn create(&self, spec: VolumeSpec) -> Result<Volume, VolumeError> {
        // Held across materialise and publish so the parent cannot be
        // destroyed mid-copy and one import tree is namespaced at a time.
        let _source_guard = self.lock_source(&spec.strategy)?;

        let (handle, _guard) = self.allocate_handle()?;

        let ctx = MaterializeContext {
            filesystem: &self.filesystem,
            namespacer: self.namespacer.as_ref(),
            namespace_cache: &self.namespace_cache,
        };
        let init = spec.strategy.materialize(&handle, &ctx)?;

        let expiry = ExpiryRecord::starting_at(spec.ttl, Utc::now());
        let metadata = init.metadata();
        let stored = metadata
            .store_properties(&spec.properties)
            .and_then(|()| metadata.store_expiry(&expiry));
        if let Err(e) = stored {
            init.discard();
            return Err(e.into());
        }

        let live = init.publish()?;

        let volume = Volume {
            handle: handle.clone(),
            path: live.data_path(),
            properties: spec.properties,
            ttl: expiry.ttl,
            expires_at: expiry.expires_at,
            parent: spec.strategy.parent().cloned(),
        };

        let live_count = {
            let mut index = self.index.write();
            index.insert(handle.clone(), volume.clone());
            index.len()
        };
        metrics::counter!("volumes_created_total").increment(1);
        record_live_count(live_count);

        info!("Created volume {} at {:?}", handle, volume.path);
        Ok(volume)
    }

    /// Every volume whose properties include all pairs in `filter`.
    #[must_use]
    pub fn list(&self, filter: &Properties) -> Vec<Volume> {
        let mut volumes: Vec<Volume> = self
            .index
            .read()
            .values()
            .filter(|volume| volume.matches(filter))
            .cloned()
            .collect();
        volumes.sort_by(|a, b| a.handle.cmp(&b.handle));
        volumes
    }

    /// Looks up one volume.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::VolumeNotFound`] for unknown handles.
    pub fn get(&self, handle: &Handle) -> Result<Volume, VolumeError> {
        self.index
            .read()
            .get(handle)
            .cloned()
            .ok_or_else(|| VolumeError::VolumeNotFound(handle.clone()))
    }

    /// Sets one property, replacing any previous value for `key`.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume does not exist or persisting fails.
    #[instrument(skip(self, value))]
    pub fn set_property(
        &self,
        handle: &Handle,
        key: String,
        value: String,
    ) -> Result<(), VolumeError> {
        let _guard = self.locks.acquire(LockIdentity::Volume(handle.clone()));

        let mut properties = self.get(handle)?.properties;
        properties.insert(key, value);
        self.live(handle)?.metadata().store_properties(&properties)?;

        if let Some(volume) = self.index.write().get_mut(handle) {
            volume.properties = properties;
        }
        Ok(())
    }

    /// Replaces the TTL and restarts the expiry clock. Zero disables expiry.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume does not exist or persisting fails.
    #[instrument(skip(self))]
    pub fn set_ttl(&self, handle: &Handle, ttl: Ttl) -> Result<(), VolumeError> {
        let _guard = self.locks.acquire(LockIdentity::Volume(handle.clone()));

        self.get(handle)?;
        let expiry = ExpiryRecord::starting_at(ttl, Utc::now());
        self.live(handle)?.metadata().store_expiry(&expiry)?;

        if let Some(volume) = self.index.write().get_mut(handle) {
            volume.ttl = expiry.ttl;
            volume.expires_at = expiry.expires_at;
        }
        Ok(())
    }

    /// Destroys a volume and its data.
    ///
    /// # Errors
    ///
    /// Returns [`VolumeError::HasDependents`] while copy-on-write children
    /// are live, [`VolumeError::VolumeNotFound`] for unknown handles, or the
    /// driver failure.
    #[instrument(skip(self))]
    pub fn destroy(&self, handle: &Handle) -> Result<(), VolumeError> {
        let _guard = self.locks.acquire(LockIdentity::Volume(handle.clone()));
        self.get(handle)?;
        self.destroy_locked(handle)
    }

    /// Destroys a volume only if it is still expired at `now` once its lock
    /// is held. Returns `false` when the volume is gone or no longer
    /// expired, e.g. because its TTL was cleared after the caller looked.
    ///
    /// # Errors
    ///
    /// Same as [`Repository::destroy`], except that a missing volume is not
    /// an error.
    #[instrument(skip(self))]
    pub fn destroy_if_expired(
        &self,
        handle: &Handle,
        now: DateTime<Utc>,
    ) -> Result<bool, VolumeError> {
        let _guard = self.locks.acquire(LockIdentity::Volume(handle.clone()));
        match self.index.read().get(handle) {
            Some(volume) if volume.is_expired(now) => {}
            _ => return Ok(false),
        }
        self.destroy_locked(handle)?;
        Ok(true)
    }

    /// Caller holds the volume lock and has seen the volume in the index.
    fn destroy_locked(&self, handle: &Handle) -> Result<(), VolumeError> {
        let dependents = self.dependents(handle);
        if !dependents.is_empty() {
            debug!("Refusing to destroy {}: {} live dependents", handle, dependents.len());
            return Err(VolumeError::HasDependents {
                handle: handle.clone(),
                dependents,
            });
        }

        let result = self.live(handle)?.destroy();

        // Once the tombstone rename succeeds the volume is gone even if its
        // data removal failed.
        if result.is_ok() || self.filesystem.live_volume(handle).is_none() {
            let live_count = {
                let mut index = self.index.write();
                index.remove(handle);
                index.len()
            };
            metrics::counter!("volumes_destroyed_total").increment(1);
            record_live_count(live_count);
        }

        result?;
        info!("Destroyed volume {}", handle);
        Ok(())
    }

    /// Live volumes created copy-on-write from `handle`.
    #[must_use]
    pub fn dependents(&self, handle: &Handle) -> Vec<Handle> {
        self.index
            .read()
            .values()
            .filter(|volume| volume.parent.as_ref() == Some(handle))
            .map(|volume| volume.handle.clone())
            .collect()
    }

    fn lock_source(&self, strategy: &Strategy) -> Result<Option<LockGuard>, VolumeError> {
        match strategy {
            Strategy::Empty => Ok(None),
            Strategy::CopyOnWrite { parent } => {
                let guard = self.locks.acquire(LockIdentity::Volume(parent.clone()));
                if !self.index.read().contains_key(parent) {
                    return Err(VolumeError::ParentNotFound(parent.clone()));
                }
                Ok(Some(guard))
            }
            Strategy::Import { path } => {
                let source = import_source(path, self.filesystem.root())?;
                Ok(Some(self.locks.acquire(LockIdentity::ImportSource(source))))
            }
        }
    }

    fn allocate_handle(&self) -> Result<(Handle, LockGuard), VolumeError> {
        let handle = Handle::generate();
        let guard = self.locks.acquire(LockIdentity::Volume(handle.clone()));
        if self.index.read().contains_key(&handle) || self.filesystem.contains(&handle) {
            warn!("Generated handle {} is already in use", handle);
            return Err(VolumeError::HandleCollision(handle));
        }
        Ok((handle, guard))
    }

    fn live(&self, handle: &Handle) -> Result<LiveVolume, VolumeError> {
        self.filesystem
            .live_volume(handle)
            .ok_or_else(|| VolumeError::VolumeNotFound(handle.clone()))
    }
}

fn load_volume(live: &LiveVolume) -> Result<Volume, VolumeError> {
    let metadata = live.metadata();
    let expiry = metadata.load_expiry()?;
    Ok(Volume {
        handle: live.handle().clone(),
        path: live.data_path(),
        properties: metadata.load_properties()?,
        ttl: expiry.ttl,
        expires_at: expiry.expires_at,
        parent: metadata.load_parent()?,
    })
}

#[allow(clippy::cast_precision_loss)]
fn record_live_count(count: usize) {
    metrics::gauge!("volumes_live").set(count as f64);
}
