//! Import namespacing configuration.
//!
//! Imported trees have their owners remapped into
//! `[uid_base, uid_base + range_size)` and the matching gid range.

use serde::Deserialize;
use std::sync::Arc;

use crate::volume::{IdRange, Namespacer, NoopNamespacer, UidNamespacer};

/// Id ranges imported trees are remapped into.
#[derive(Debug, Deserialize, Clone)]
pub struct NamespaceSettings {
    /// Disable to import trees with their ownership untouched.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// First uid of the reserved range.
    #[serde(default = "default_base")]
    pub uid_base: u32,
    /// First gid of the reserved range.
    #[serde(default = "default_base")]
    pub gid_base: u32,
    /// Size of both ranges.
    #[serde(default = "default_range_size")]
    pub range_size: u32,
}

impl Default for NamespaceSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            uid_base: default_base(),
            gid_base: default_base(),
            range_size: default_range_size(),
        }
    }
}

impl NamespaceSettings {
    /// The namespacer these settings describe.
    #[must_use]
    pub fn namespacer(&self) -> Arc<dyn Namespacer> {
        if self.enabled {
            Arc::new(UidNamespacer::new(
                IdRange::new(self.uid_base, self.range_size),
                IdRange::new(self.gid_base, self.range_size),
            ))
        } else {
            Arc::new(NoopNamespacer)
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_base() -> u32 {
    100_000
}

fn default_range_size() -> u32 {
    65_536
}
