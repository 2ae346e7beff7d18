//! Volume lifecycle: staging, publishing, duplication, expiry.
//!
//! A volume lives under `<root>/live/<handle>/` with its data in `volume/`
//! and its metadata in JSON files beside it. New volumes are staged under
//! `<root>/init/` and become visible only when renamed into `live/`.

pub mod driver;
pub mod error;
pub mod filesystem;
pub mod locks;
pub mod metadata;
pub mod namespacer;
pub mod reaper;
pub mod repository;
pub mod strategy;
pub mod types;

pub use driver::{Driver, DriverError, DriverKind, NaiveDriver, ReflinkDriver};
pub use error::VolumeError;
pub use filesystem::{Filesystem, InitVolume, LiveVolume};
pub use locks::{LockGuard, LockIdentity, LockManager};
pub use metadata::{ExpiryRecord, MetadataError, MetadataStore};
pub use namespacer::{IdRange, NamespaceCache, NamespaceError, Namespacer, NoopNamespacer, UidNamespacer};
pub use reaper::{reap_once, ReapReport, Reaper};
pub use repository::Repository;
pub use strategy::Strategy;
pub use types::{Handle, Properties, Ttl, Volume, VolumeSpec};
