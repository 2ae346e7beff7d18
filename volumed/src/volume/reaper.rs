//! Periodic destruction of expired volumes.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::repository::Repository;
use super::types::{Handle, Properties, Volume};
use crate::infrastructure::audit::{log_audit, AuditEvent};

/// Outcome of one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Volumes destroyed this pass.
    pub destroyed: Vec<Handle>,
    /// Expired volumes kept alive by live dependents; retried next pass.
    pub deferred: Vec<Handle>,
    /// Expired volumes whose destruction failed.
    pub failed: Vec<Handle>,
    /// Volumes renewed or removed between the snapshot and their turn.
    pub skipped: Vec<Handle>,
}

impl ReapReport {
    /// True when the pass touched nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.destroyed.is_empty()
            && self.deferred.is_empty()
            && self.failed.is_empty()
            && self.skipped.is_empty()
    }
}

/// Destroys every volume expired at `now`, children before parents, so an
/// expired parent whose children expired too goes in the same pass.
pub fn reap_once(repository: &Repository, now: DateTime<Utc>) -> ReapReport {
    let snapshot = repository.list(&Properties::new());
    let depths = lineage_depths(&snapshot);

    let mut expired: Vec<&Volume> = snapshot.iter().filter(|v| v.is_expired(now)).collect();
    expired.sort_by_key(|v| std::cmp::Reverse(depths.get(&v.handle).copied().unwrap_or(0)));

    let mut report = ReapReport::default();
    for volume in expired {
        let handle = &volume.handle;
        match repository.destroy_if_expired(handle, now) {
            Ok(false) => {
                debug!("Volume {} no longer expired, skipping", handle);
                report.skipped.push(handle.clone());
            }
            Ok(true) => {
                metrics::counter!("volumes_reaped_total").increment(1);
                log_audit(&AuditEvent::VolumeDestroyed {
                    handle: handle.to_string(),
                    reason: "expired".to_string(),
                });
                report.destroyed.push(handle.clone());
            }
            Err(e) if e.is_conflict() => {
                debug!("Deferring expired volume {}: {}", handle, e);
                report.deferred.push(handle.clone());
            }
            Err(e) => {
                warn!("Failed to reap volume {}: {}", handle, e);
                metrics::counter!("volume_reap_failures_total").increment(1);
                report.failed.push(handle.clone());
            }
        }
    }
    report
}

/// Number of ancestors each volume has within `volumes`.
fn lineage_depths(volumes: &[Volume]) -> HashMap<Handle, usize> {
    let parents: HashMap<&Handle, &Handle> = volumes
        .iter()
        .filter_map(|v| v.parent.as_ref().map(|p| (&v.handle, p)))
        .collect();

    volumes
        .iter()
        .map(|v| {
            let mut depth = 0;
            let mut current = &v.handle;
            while let Some(parent) = parents.get(current) {
                depth += 1;
                current = parent;
                if depth > volumes.len() {
                    break;
                }
            }
            (v.handle.clone(), depth)
        })
        .collect()
}

/// Background task running [`reap_once`] on a fixed interval.
#[derive(Debug)]
pub struct Reaper {
    repository: Arc<Repository>,
    interval: Duration,
}

impl Reaper {
    /// Reaper over `repository` ticking every `interval`.
    #[must_use]
    pub fn new(repository: Arc<Repository>, interval: Duration) -> Self {
        Self {
            repository,
            interval,
        }
    }

    /// Starts the reaper on the current runtime.
    #[must_use]
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Runs forever. Each pass runs on the blocking pool.
    pub async fn run(self) {
        info!("Reaper started (interval {:?})", self.interval);
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let repository = Arc::clone(&self.repository);
            match tokio::task::spawn_blocking(move || reap_once(&repository, Utc::now())).await {
                Ok(report) if !report.is_empty() => {
                    info!(
                        destroyed = report.destroyed.len(),
                        deferred = report.deferred.len(),
                        failed = report.failed.len(),
                        skipped = report.skipped.len(),
                        "Reaper pass complete"
                    );
                }
                Ok(_) => {}
                Err(e) => error!("Reaper pass panicked: {}", e),
            }
        }
    }
}
