//! Expiry reaper configuration.

use serde::Deserialize;
use std::time::Duration;

/// How often expired volumes are collected.
#[derive(Debug, Deserialize, Clone)]
pub struct ReaperSettings {
    /// Seconds between reaper passes (default: 10).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

impl ReaperSettings {
    /// Interval between passes, never shorter than one second.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

fn default_interval_secs() -> u64 {
    10
}
