//! Tracking service
//!
//! Owns every tracking component and the three backing stores. Built once at
//! process start and passed around by reference; `close()` is the single
//! shutdown entry point.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::adapter::VectorIndexAdapter;
use crate::cache::SharedCache;
use crate::config::TrackerConfig;
use crate::error::{CloseError, Result, TrackerError};
use crate::events::EventLog;
use crate::graph::{GraphStore, MemoryGraphStore};
use crate::integrity::GraphConsistencyChecker;
use crate::reconcile::{CleanupReport, CycleReport, ReconciliationScheduler, SchedulerHandle};
use crate::secrets::SecretProvider;
use crate::store::{MappingStore, RocksMappingStore};
use crate::tracker::IdentityTracker;
use crate::vector::{HnswVectorIndex, VectorIndex};

/// Handles to the external stores a service runs against
pub struct Backends {
    pub store: Arc<dyn MappingStore>,
    pub index: Arc<dyn VectorIndex>,
    pub graph: Arc<dyn GraphStore>,
}

/// Identity tracking service
pub struct TrackingService {
    config: TrackerConfig,
    index: Arc<dyn VectorIndex>,
    graph: Arc<dyn GraphStore>,
    tracker: Arc<IdentityTracker>,
    adapter: Arc<VectorIndexAdapter>,
    checker: Arc<GraphConsistencyChecker>,
    scheduler: Arc<ReconciliationScheduler>,
    background: Mutex<Option<SchedulerHandle>>,
    closed: AtomicBool,
}

impl TrackingService {
    /// Wire the tracking components over the given backends
    pub fn new(config: TrackerConfig, backends: Backends) -> Result<Self> {
        config.validate()?;
        if backends.index.dimension() != config.vector_dimension {
            return Err(TrackerError::config(format!(
                "vector index dimension {} does not match configured {}",
                backends.index.dimension(),
                config.vector_dimension
            )));
        }

        let tracker = Arc::new(IdentityTracker::new(
            backends.store,
            Arc::new(SharedCache::new(config.cache_bytes)),
            Arc::new(EventLog::with_capacity(config.event_capacity)),
        ));
        let adapter = Arc::new(VectorIndexAdapter::new(
            Arc::clone(&backends.index),
            Arc::clone(&tracker),
            config.vector_id_strategy,
        ));
        let checker = Arc::new(GraphConsistencyChecker::new(
            Arc::clone(&backends.graph),
            Arc::clone(&tracker),
            config.graph_labels.clone(),
        ));
        let scheduler = Arc::new(
            ReconciliationScheduler::new(
                Arc::clone(&tracker),
                Arc::clone(&backends.index),
                Arc::clone(&checker),
            )
            .with_intervals(config.sync_interval(), config.cleanup_interval()),
        );

        Ok(Self {
            config,
            index: backends.index,
            graph: backends.graph,
            tracker,
            adapter,
            checker,
            scheduler,
            background: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Open the bundled local backends at the locations named by `secrets`
    ///
    /// The graph store is in-process and starts empty.
    pub fn open_local(config: TrackerConfig, secrets: &dyn SecretProvider) -> Result<Self> {
        let relational_path = secrets.get(&config.relational_path_key)?;
        let vector_path = secrets.get(&config.vector_path_key)?;

        let store = Arc::new(RocksMappingStore::open(&relational_path)?);
        let index = Arc::new(HnswVectorIndex::open(&vector_path, config.vector_dimension)?);

        Self::new(
            config,
            Backends {
                store,
                index,
                graph: Arc::new(MemoryGraphStore::new()),
            },
        )
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &Arc<IdentityTracker> {
        &self.tracker
    }

    pub fn adapter(&self) -> &Arc<VectorIndexAdapter> {
        &self.adapter
    }

    pub fn checker(&self) -> &Arc<GraphConsistencyChecker> {
        &self.checker
    }

    pub fn scheduler(&self) -> &Arc<ReconciliationScheduler> {
        &self.scheduler
    }

    pub fn events(&self) -> &Arc<EventLog> {
        self.tracker.events()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Start the background loops; a no-op if they are already running
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_background(&self) -> Result<()> {
        if self.is_closed() {
            return Err(TrackerError::connection("tracking service is closed"));
        }
        let mut background = self.background.lock();
        if background.is_none() {
            *background = Some(self.scheduler.start());
        }
        Ok(())
    }

    pub fn is_background_running(&self) -> bool {
        self.background
            .lock()
            .as_ref()
            .is_some_and(SchedulerHandle::is_running)
    }

    /// Run one sync cycle and one orphan cleanup in the calling thread
    pub fn run_once(&self) -> Result<(CycleReport, CleanupReport)> {
        if self.is_closed() {
            return Err(TrackerError::connection("tracking service is closed"));
        }
        Ok((
            self.scheduler.run_cycle(),
            self.scheduler.cleanup_orphan_vectors(),
        ))
    }

    /// Stop background work and close every store
    ///
    /// Each store is closed even if an earlier one failed; all failures are
    /// returned together. Closing twice is a no-op.
    pub async fn close(&self) -> std::result::Result<(), CloseError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let background = self.background.lock().take();
        if let Some(handle) = background {
            handle.shutdown().await;
        }

        let mut failures = Vec::new();
        let mut collect = |component: &'static str, result: Result<()>| {
            if let Err(e) = result {
                log::error!("Failed to close {}: {}", component, e);
                failures.push((component, e));
            }
        };
        collect("relational store", self.tracker.close());
        collect("vector index", self.index.close());
        collect("graph store", self.graph.close());

        if failures.is_empty() {
            log::info!("Tracking service closed");
            Ok(())
        } else {
            Err(CloseError { failures })
        }
    }
}
