//! Domain types for volumes.
//!
//! A volume is identified by its [`Handle`], lives at a fixed content root,
//! and carries mutable [`Properties`] and a [`Ttl`].

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

use super::strategy::Strategy;

/// Owner-supplied key/value labels attached to a volume.
pub type Properties = BTreeMap<String, String>;

/// Opaque, globally unique volume identifier.
///
/// Also used verbatim as the volume's on-disk directory name, so it must
/// never contain path separators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Handle(String);

impl Handle {
    /// Generates a fresh random handle.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Wraps an externally supplied handle.
    ///
    /// Returns `None` for values that could escape the volume root when used
    /// as a directory name.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let valid = !raw.is_empty()
            && raw != "."
            && raw != ".."
            && !raw.contains('/')
            && !raw.contains('\0');
        valid.then(|| Self(raw.to_string()))
    }

    /// Get the string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Time-to-live in seconds. Zero means the volume never expires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ttl(u64);

impl Ttl {
    /// A TTL that never expires.
    pub const FOREVER: Ttl = Ttl(0);

    /// Creates a TTL from a number of seconds.
    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs)
    }

    /// Number of seconds.
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0
    }

    /// Whether this TTL disables expiry.
    #[must_use]
    pub const fn is_forever(self) -> bool {
        self.0 == 0
    }

    /// Absolute expiry instant when the TTL starts counting at `now`.
    #[must_use]
    pub fn expires_at(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if self.is_forever() {
            return None;
        }
        let secs = i64::try_from(self.0).unwrap_or(i64::MAX);
        Duration::try_seconds(secs)
            .and_then(|d| now.checked_add_signed(d))
            .or(Some(DateTime::<Utc>::MAX_UTC))
    }
}

/// A published volume as seen by callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Volume {
    /// Unique identifier.
    pub handle: Handle,
    /// Absolute path of the volume's content root.
    pub path: PathBuf,
    /// Owner-supplied labels.
    pub properties: Properties,
    /// Time-to-live; zero disables expiry.
    pub ttl: Ttl,
    /// When the volume becomes eligible for reaping.
    pub expires_at: Option<DateTime<Utc>>,
    /// Volume this one was copied from, if created copy-on-write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<Handle>,
}

impl Volume {
    /// Whether every key/value pair in `filter` is present on this volume.
    #[must_use]
    pub fn matches(&self, filter: &Properties) -> bool {
        filter
            .iter()
            .all(|(key, value)| self.properties.get(key) == Some(value))
    }

    /// Whether the volume has a TTL and it has elapsed at `now`.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.ttl.is_forever() && self.expires_at.is_some_and(|at| at <= now)
    }
}

/// Everything needed to create a volume.
#[derive(Debug, Clone)]
pub struct VolumeSpec {
    /// How the initial content is produced.
    pub strategy: Strategy,
    /// Initial properties.
    pub properties: Properties,
    /// Initial TTL.
    pub ttl: Ttl,
}

impl VolumeSpec {
    /// A spec with no properties that never expires.
    #[must_use]
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            properties: Properties::new(),
            ttl: Ttl::FOREVER,
        }
    }

    /// Sets the initial properties.
    #[must_use]
    pub fn with_properties(mut self, properties: Properties) -> Self {
        self.properties = properties;
        self
    }

    /// Sets the initial TTL.
    #[must_use]
    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }
}
