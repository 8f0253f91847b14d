//! Background reconciliation
//!
//! Periodically diffs the vector index's contents against the tracked
//! mappings, applies the difference, then runs the graph integrity pass. A
//! second loop removes vectors no mapping can ever claim. Both loops only
//! read snapshots and go through the tracker's public operations, so they
//! never hold the mutation lock across a cycle.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::adapter::untag;
use crate::error::{Result, TrackerError};
use crate::integrity::{GraphConsistencyChecker, IntegritySummary};
use crate::mapping::Metadata;
use crate::tracker::IdentityTracker;
use crate::vector::VectorIndex;

/// Default mapping sync period (5 minutes)
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(300);

/// Default orphan-vector cleanup period (10 minutes)
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(600);

/// Reason recorded on mappings removed by a sync cycle
const ABSENT_REASON: &str = "absent from vector index";

/// External id to (vector id, untagged metadata) as found in the index
type KnownEntities = BTreeMap<String, (String, Metadata)>;

/// Outcome of one sync cycle
#[derive(Debug, Clone, Default, Serialize)]
pub struct CycleReport {
    /// False when the index cannot enumerate its ids and the diff was skipped
    pub listing_supported: bool,
    pub known: usize,
    pub tracked: usize,
    pub added: usize,
    pub removed: usize,
    /// Sub-steps attempted (each add, each removal, the integrity pass)
    pub attempted: usize,
    pub failed: usize,
    pub integrity: Option<IntegritySummary>,
}

impl CycleReport {
    /// `PartialSyncFailure` if any sub-step failed
    pub fn failure(&self) -> Option<TrackerError> {
        (self.failed > 0).then(|| TrackerError::PartialSyncFailure {
            failed: self.failed,
            total: self.attempted,
        })
    }
}

/// Outcome of one orphan-vector cleanup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub listing_supported: bool,
    pub scanned: usize,
    pub orphans: usize,
    pub deleted: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    Sync,
    Cleanup,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "mapping sync"),
            Self::Cleanup => write!(f, "orphan vector cleanup"),
        }
    }
}

/// Drives periodic reconciliation of the tracker against the vector index
pub struct ReconciliationScheduler {
    tracker: Arc<IdentityTracker>,
    index: Arc<dyn VectorIndex>,
    checker: Arc<GraphConsistencyChecker>,
    sync_interval: Duration,
    cleanup_interval: Duration,
}

impl ReconciliationScheduler {
    pub fn new(
        tracker: Arc<IdentityTracker>,
        index: Arc<dyn VectorIndex>,
        checker: Arc<GraphConsistencyChecker>,
    ) -> Self {
        Self {
            tracker,
            index,
            checker,
            sync_interval: DEFAULT_SYNC_INTERVAL,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
        }
    }

    pub fn with_intervals(mut self, sync: Duration, cleanup: Duration) -> Self {
        self.sync_interval = sync;
        self.cleanup_interval = cleanup;
        self
    }

    pub fn sync_interval(&self) -> Duration {
        self.sync_interval
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    // ==========================================
    // Sync cycle
    // ==========================================

    /// Run one reconciliation cycle
    ///
    /// Never fails: every sub-step error is logged and counted in the report.
    pub fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.snapshot() {
            Ok(Some((tracked, known))) => {
                report.listing_supported = true;
                report.known = known.len();
                report.tracked = tracked.len();
                self.apply_diff(tracked, known, &mut report);
            }
            Ok(None) => {
                log::info!(
                    "Vector index cannot enumerate ids; mapping sync is inactive this cycle"
                );
            }
            Err(e) => {
                log::error!("Failed to snapshot stores during sync: {}", e);
                report.attempted += 1;
                report.failed += 1;
            }
        }

        report.attempted += 1;
        match self.checker.ensure_integrity() {
            Ok(summary) => {
                report.failed += summary.failures();
                report.integrity = Some(summary);
            }
            Err(e) => {
                log::error!("Graph integrity pass failed: {}", e);
                report.failed += 1;
            }
        }

        match report.failure() {
            Some(e) => log::warn!("Sync cycle finished with errors: {}", e),
            None => log::info!(
                "Sync cycle complete: {} added, {} removed",
                report.added,
                report.removed
            ),
        }
        report
    }

    /// Tracked external ids, then the index contents
    ///
    /// The tracked set is read first: a mapping recorded between the two reads
    /// then looks untracked (and its re-add is a no-op) instead of looking
    /// absent from the index.
    fn snapshot(&self) -> Result<Option<(HashSet<String>, KnownEntities)>> {
        let tracked = self
            .tracker
            .list_all()?
            .into_iter()
            .map(|m| m.external_id)
            .collect();
        Ok(self.known_entities()?.map(|known| (tracked, known)))
    }

    /// External ids the index holds, with their vector id and untagged metadata
    fn known_entities(&self) -> Result<Option<KnownEntities>> {
        let Some(mut ids) = self.index.list_ids()? else {
            return Ok(None);
        };
        ids.sort();

        let mut known = BTreeMap::new();
        for vector_id in ids {
            let Some(record) = self.index.fetch(&vector_id)? else {
                // Deleted between listing and fetch
                continue;
            };
            let (external_id, metadata) = untag(record.metadata);
            let Some(external_id) = external_id else {
                log::debug!("Vector '{}' carries no external ID tag", vector_id);
                continue;
            };
            if let Some((first, _)) = known.get(&external_id) {
                log::warn!(
                    "External ID '{}' is tagged on vectors '{}' and '{}'; keeping the first",
                    external_id,
                    first,
                    vector_id
                );
                continue;
            }
            known.insert(external_id, (vector_id, metadata));
        }
        Ok(Some(known))
    }

    fn apply_diff(
        &self,
        tracked: HashSet<String>,
        known: KnownEntities,
        report: &mut CycleReport,
    ) {
        let mut to_remove: Vec<&String> = tracked
            .iter()
            .filter(|id| !known.contains_key(id.as_str()))
            .collect();
        to_remove.sort();

        for (external_id, (vector_id, metadata)) in known {
            if tracked.contains(&external_id) {
                continue;
            }
            report.attempted += 1;
            match self.tracker.add_mapping(&external_id, &vector_id, metadata) {
                Ok(_) => {
                    report.added += 1;
                    log::info!(
                        "Sync: adopted untracked vector '{}' for '{}'",
                        vector_id,
                        external_id
                    );
                }
                // Indexed by the application since the snapshot
                Err(e) if e.is_already_exists() && self.maps_to(&external_id, &vector_id) => {
                    log::debug!("Sync: '{}' was mapped since the snapshot", external_id);
                }
                Err(e) => {
                    report.failed += 1;
                    log::error!("Sync: failed to add mapping for '{}': {}", external_id, e);
                }
            }
        }

        for external_id in to_remove {
            report.attempted += 1;
            match self.tracker.remove_mapping_because(external_id, ABSENT_REASON) {
                Ok(_) => report.removed += 1,
                // Removed by someone else since the snapshot
                Err(e) if e.is_not_found() => {}
                Err(e) => {
                    report.failed += 1;
                    log::error!("Sync: failed to remove mapping for '{}': {}", external_id, e);
                }
            }
        }
    }

    fn maps_to(&self, external_id: &str, vector_id: &str) -> bool {
        matches!(
            self.tracker.get_vector_id(external_id),
            Ok(Some(current)) if current == vector_id
        )
    }

    // ==========================================
    // Orphan vector cleanup
    // ==========================================

    /// Delete vectors no mapping references and reconciliation cannot adopt
    ///
    /// A vector is an orphan when its record has no external id tag, or when
    /// the tagged external id is already mapped to a different vector.
    /// Untracked vectors with an unmapped tag are left for the sync cycle.
    pub fn cleanup_orphan_vectors(&self) -> CleanupReport {
        let mut report = CleanupReport::default();

        let ids = match self.index.list_ids() {
            Ok(Some(ids)) => ids,
            Ok(None) => {
                log::info!("Vector index cannot enumerate ids; orphan cleanup is inactive");
                return report;
            }
            Err(e) => {
                log::error!("Failed to list vector ids for orphan cleanup: {}", e);
                report.failed += 1;
                return report;
            }
        };
        report.listing_supported = true;
        report.scanned = ids.len();

        let mapped: HashMap<String, String> = match self.tracker.list_all() {
            Ok(all) => all
                .into_iter()
                .map(|m| (m.external_id, m.vector_id))
                .collect(),
            Err(e) => {
                log::error!("Failed to snapshot tracked mappings for orphan cleanup: {}", e);
                report.failed += 1;
                return report;
            }
        };
        let referenced: HashSet<&str> = mapped.values().map(String::as_str).collect();

        let mut orphans = Vec::new();
        for vector_id in ids {
            if referenced.contains(vector_id.as_str()) {
                continue;
            }
            let record = match self.index.fetch(&vector_id) {
                Ok(Some(record)) => record,
                Ok(None) => continue,
                Err(e) => {
                    log::error!("Failed to fetch vector '{}': {}", vector_id, e);
                    report.failed += 1;
                    continue;
                }
            };
            let orphan = match untag(record.metadata).0 {
                None => true,
                Some(external_id) => mapped
                    .get(&external_id)
                    .is_some_and(|owner| *owner != vector_id),
            };
            if orphan {
                orphans.push(vector_id);
            }
        }

        report.orphans = orphans.len();
        if orphans.is_empty() {
            log::debug!("No orphan vectors found ({} scanned)", report.scanned);
            return report;
        }

        match self.index.delete(&orphans) {
            Ok(()) => {
                report.deleted = orphans.len();
                log::info!("Deleted {} orphan vector(s)", orphans.len());
            }
            Err(e) => {
                report.failed += orphans.len();
                log::error!("Failed to delete {} orphan vector(s): {}", orphans.len(), e);
            }
        }
        report
    }

    // ==========================================
    // Background tasks
    // ==========================================

    /// Spawn the sync and cleanup loops on the current tokio runtime
    ///
    /// The first cycle of each loop runs one full interval after start.
    pub fn start(self: &Arc<Self>) -> SchedulerHandle {
        let token = CancellationToken::new();
        let tasks = vec![
            tokio::spawn(Arc::clone(self).run_periodic(
                Job::Sync,
                self.sync_interval,
                token.clone(),
            )),
            tokio::spawn(Arc::clone(self).run_periodic(
                Job::Cleanup,
                self.cleanup_interval,
                token.clone(),
            )),
        ];
        log::info!(
            "Reconciliation started (sync every {:?}, cleanup every {:?})",
            self.sync_interval,
            self.cleanup_interval
        );
        SchedulerHandle { token, tasks }
    }

    async fn run_periodic(self: Arc<Self>, job: Job, period: Duration, token: CancellationToken) {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let this = Arc::clone(&self);
            let outcome = tokio::task::spawn_blocking(move || match job {
                Job::Sync => {
                    this.run_cycle();
                }
                Job::Cleanup => {
                    this.cleanup_orphan_vectors();
                }
            })
            .await;

            if let Err(e) = outcome {
                log::error!("{} task failed: {}", job, e);
            }
        }
        log::debug!("{} loop stopped", job);
    }
}

/// Handle to the running background loops
pub struct SchedulerHandle {
    token: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Stop both loops, waiting for an in-flight cycle to finish
    pub async fn shutdown(mut self) {
        self.token.cancel();
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                log::error!("Reconciliation task ended abnormally: {}", e);
            }
        }
        log::info!("Reconciliation stopped");
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled() && self.tasks.iter().any(|t| !t.is_finished())
    }
}

impl Drop for SchedulerHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
