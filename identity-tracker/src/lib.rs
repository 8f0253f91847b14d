//! Identity Tracker
//!
//! Keeps one canonical mapping between application-level entity ids and the
//! ids assigned by a vector similarity index, and reconciles that mapping
//! (plus denormalized copies in a graph store) against the relational record.
//!
//! ## Features
//!
//! - **Bijective mapping** - Each external id maps to exactly one vector id, enforced under concurrency
//! - **Shared cache** - Byte-budgeted LRU mirror of the mapping for low-latency lookups
//! - **Background reconciliation** - Periodic diff against the vector index plus orphan cleanup
//! - **Graph integrity** - Removes graph nodes whose relational record is gone
//! - **RocksDB persistence** - Local mapping table and HNSW vector index backends
//!
//! ## Example
//!
//! ```ignore
//! use identity_tracker::{EnvSecrets, TrackerConfig, TrackingService};
//!
//! let service = TrackingService::open_local(TrackerConfig::default(), &EnvSecrets)?;
//! service.start_background()?;
//!
//! // Index an entity and search by similarity
//! service.adapter().index("bug_report_42", &embedding, metadata)?;
//! let hits = service.adapter().search(&query, 5)?;
//!
//! service.close().await?;
//! ```

pub mod adapter;
pub mod cache;
pub mod config;
pub mod error;
pub mod events;
pub mod graph;
pub mod integrity;
pub mod mapping;
pub mod reconcile;
pub mod secrets;
pub mod service;
pub mod store;
pub mod tracker;
pub mod vector;

// Re-exports for convenience
pub use adapter::{SearchHit, VectorIdStrategy, VectorIndexAdapter};
pub use cache::{CacheStats, SharedCache};
pub use config::TrackerConfig;
pub use error::{CloseError, Result, TrackerError};
pub use events::{EventAction, EventLog, EventQuery, ReconciliationEvent};
pub use graph::{GraphStore, MemoryGraphStore};
pub use integrity::{GraphConsistencyChecker, IntegritySummary, LabelSummary};
pub use mapping::{IdentityMapping, Metadata};
pub use reconcile::{CleanupReport, CycleReport, ReconciliationScheduler, SchedulerHandle};
pub use secrets::{EnvSecrets, SecretProvider, StaticSecrets};
pub use service::{Backends, TrackingService};
pub use store::{MappingStore, MemoryMappingStore, RocksMappingStore};
pub use tracker::IdentityTracker;
pub use vector::{HnswVectorIndex, VectorIndex, VectorMatch, VectorRecord};
