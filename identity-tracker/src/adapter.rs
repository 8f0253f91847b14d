//! Vector index adapter
//!
//! Application-facing entry point for indexing and searching entities. Every
//! vector written here is paired with a tracker mapping, and search results are
//! translated back to external ids.

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Result, TrackerError};
use crate::mapping::{validate_id, validate_metadata, IdentityMapping, Metadata, EXTERNAL_ID_KEY};
use crate::tracker::IdentityTracker;
use crate::vector::VectorIndex;

/// How vector ids are assigned to new entities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VectorIdStrategy {
    /// Fresh UUID v4 per entity
    #[default]
    Uuid,
    /// Reuse the external id
    External,
}

impl VectorIdStrategy {
    fn assign(&self, external_id: &str) -> String {
        match self {
            Self::Uuid => Uuid::new_v4().to_string(),
            Self::External => external_id.to_string(),
        }
    }
}

/// Search hit translated to the application's id space
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub external_id: String,
    pub score: f32,
    pub metadata: Metadata,
}

/// Adapter pairing vector index writes with tracker mappings
pub struct VectorIndexAdapter {
    index: Arc<dyn VectorIndex>,
    tracker: Arc<IdentityTracker>,
    strategy: VectorIdStrategy,
    /// External ids with an `index` call between pre-check and mapping insert
    in_flight: DashSet<String>,
}

/// Exclusive right to index one external id, released on drop
struct Claim<'a> {
    in_flight: &'a DashSet<String>,
    external_id: String,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.remove(&self.external_id);
    }
}

impl VectorIndexAdapter {
    pub fn new(
        index: Arc<dyn VectorIndex>,
        tracker: Arc<IdentityTracker>,
        strategy: VectorIdStrategy,
    ) -> Self {
        Self {
            index,
            tracker,
            strategy,
            in_flight: DashSet::new(),
        }
    }

    pub fn index_handle(&self) -> &Arc<dyn VectorIndex> {
        &self.index
    }

    /// Index a new entity
    ///
    /// Fails with `AlreadyExists` if the external id (or the assigned vector id)
    /// is already mapped, or if another `index` call for the same external id
    /// is in progress. If the mapping loses a race after the upsert, a freshly
    /// generated vector is deleted again.
    pub fn index(
        &self,
        external_id: &str,
        embedding: &[f32],
        metadata: Metadata,
    ) -> Result<IdentityMapping> {
        validate_id("external id", external_id)?;
        validate_metadata(&metadata)?;
        self.check_dimension(embedding)?;
        let _claim = self.claim(external_id)?;

        if self.tracker.get_vector_id(external_id)?.is_some() {
            return Err(TrackerError::already_exists(format!(
                "external id '{}'",
                external_id
            )));
        }

        let vector_id = self.strategy.assign(external_id);
        if let Some(owner) = self.tracker.get_external_id(&vector_id)? {
            return Err(TrackerError::already_exists(format!(
                "vector id '{}' (mapped to '{}')",
                vector_id, owner
            )));
        }

        self.index
            .upsert(&vector_id, embedding, &tagged(external_id, &metadata))
            .map_err(|e| {
                log::error!(
                    "Vector index error while indexing '{}' as '{}': {}",
                    external_id,
                    vector_id,
                    e
                );
                e
            })?;

        match self.tracker.add_mapping(external_id, &vector_id, metadata) {
            Ok(mapping) => {
                log::info!("Indexed '{}' as vector '{}'", external_id, vector_id);
                Ok(mapping)
            }
            Err(e) => {
                // Concurrent calls are claimed out, so only a sync cycle can
                // have recorded this vector between upsert and insert
                if e.is_already_exists() {
                    if let Some(adopted) = self.tracker.get_mapping(external_id)? {
                        if adopted.vector_id == vector_id {
                            log::info!("Indexed '{}' as vector '{}' (adopted)", external_id, vector_id);
                            return Ok(adopted);
                        }
                    }
                }
                self.discard_vector(external_id, &vector_id, &e);
                Err(e)
            }
        }
    }

    fn claim(&self, external_id: &str) -> Result<Claim<'_>> {
        if !self.in_flight.insert(external_id.to_string()) {
            log::warn!("Index of '{}' is already in progress", external_id);
            return Err(TrackerError::already_exists(format!(
                "external id '{}' (index in progress)",
                external_id
            )));
        }
        Ok(Claim {
            in_flight: &self.in_flight,
            external_id: external_id.to_string(),
        })
    }

    /// Undo an upsert whose mapping could not be recorded
    fn discard_vector(&self, external_id: &str, vector_id: &str, cause: &TrackerError) {
        if self.strategy == VectorIdStrategy::Uuid {
            if let Err(cleanup) = self.index.delete(&[vector_id.to_string()]) {
                log::error!(
                    "Failed to roll back vector '{}' for '{}': {}",
                    vector_id,
                    external_id,
                    cleanup
                );
            }
        } else {
            log::warn!(
                "Vector '{}' was written but mapping for '{}' failed: {}",
                vector_id,
                external_id,
                cause
            );
        }
    }

    /// Re-index an already mapped entity under its existing vector id
    pub fn reindex(
        &self,
        external_id: &str,
        embedding: &[f32],
        metadata: Metadata,
    ) -> Result<IdentityMapping> {
        validate_metadata(&metadata)?;
        self.check_dimension(embedding)?;

        let vector_id = self
            .tracker
            .get_vector_id(external_id)?
            .ok_or_else(|| TrackerError::not_found(format!("mapping for '{}'", external_id)))?;

        self.index
            .upsert(&vector_id, embedding, &tagged(external_id, &metadata))?;
        self.tracker.update_metadata(external_id, metadata)
    }

    /// Remove an entity from the index and the tracker
    pub fn delete(&self, external_id: &str) -> Result<()> {
        let vector_id = match self.tracker.get_vector_id(external_id)? {
            Some(id) => id,
            None => {
                log::warn!("No vector ID found for external ID '{}'", external_id);
                return Err(TrackerError::not_found(format!(
                    "mapping for '{}'",
                    external_id
                )));
            }
        };

        self.index.delete(&[vector_id.clone()]).map_err(|e| {
            log::error!("Vector index error while deleting '{}': {}", vector_id, e);
            e
        })?;
        self.tracker.remove_mapping_because(external_id, "deleted")?;

        log::info!("Deleted vector '{}' for '{}'", vector_id, external_id);
        Ok(())
    }

    /// Nearest entities to the query embedding, best first
    ///
    /// Hits whose vector id has no mapping are dropped and logged.
    pub fn search(&self, query_embedding: &[f32], top_k: usize) -> Result<Vec<SearchHit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }
        self.check_dimension(query_embedding)?;

        let matches = self.index.query(query_embedding, top_k)?;
        let mut hits = Vec::with_capacity(matches.len());

        for m in matches {
            match self.tracker.get_mapping_by_vector(&m.id)? {
                Some(mapping) => hits.push(SearchHit {
                    external_id: mapping.external_id,
                    score: m.score,
                    metadata: mapping.metadata,
                }),
                None => {
                    log::warn!(
                        "Inconsistency: vector '{}' has no external ID mapping. Skipping.",
                        m.id
                    );
                }
            }
        }

        log::debug!("Search (top_k={}) returned {} results", top_k, hits.len());
        Ok(hits)
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        let expected = self.index.dimension();
        if embedding.len() != expected {
            return Err(TrackerError::integrity(format!(
                "embedding has dimension {}, index expects {}",
                embedding.len(),
                expected
            )));
        }
        Ok(())
    }
}

/// Metadata as written to the index: caller metadata plus the external id tag
fn tagged(external_id: &str, metadata: &Metadata) -> Metadata {
    let mut tagged = metadata.clone();
    tagged.insert(
        EXTERNAL_ID_KEY.to_string(),
        Value::String(external_id.to_string()),
    );
    tagged
}

/// Split an index record's metadata into its external id tag and the rest
pub fn untag(mut metadata: Metadata) -> (Option<String>, Metadata) {
    let external_id = match metadata.remove(EXTERNAL_ID_KEY) {
        Some(Value::String(id)) if !id.is_empty() => Some(id),
        _ => None,
    };
    (external_id, metadata)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SharedCache;
    use crate::events::EventLog;
    use crate::mapping::metadata_from_value;
    use crate::store::MemoryMappingStore;
    use crate::vector::HnswVectorIndex;
    use crate::vector::{VectorMatch, VectorRecord};
    use serde_json::json;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Barrier;
    use std::thread;

    struct Fixture {
        index: Arc<HnswVectorIndex>,
        tracker: Arc<IdentityTracker>,
        adapter: VectorIndexAdapter,
    }

    fn fixture(strategy: VectorIdStrategy) -> Fixture {
        let index = Arc::new(HnswVectorIndex::in_memory(3));
        let tracker = Arc::new(IdentityTracker::new(
            Arc::new(MemoryMappingStore::new()),
            Arc::new(SharedCache::default()),
            Arc::new(EventLog::new()),
        ));
        let adapter = VectorIndexAdapter::new(index.clone(), tracker.clone(), strategy);
        Fixture {
            index,
            tracker,
            adapter,
        }
    }

    fn meta(value: Value) -> Metadata {
        metadata_from_value(value).unwrap()
    }

    #[test]
    fn test_index_creates_vector_and_mapping() {
        let f = fixture(VectorIdStrategy::Uuid);
        let mapping = f
            .adapter
            .index("user_1", &[1.0, 0.0, 0.0], meta(json!({"type": "user"})))
            .unwrap();

        assert!(Uuid::parse_str(&mapping.vector_id).is_ok());
        let record = f.index.fetch(&mapping.vector_id).unwrap().unwrap();
        assert_eq!(record.metadata[EXTERNAL_ID_KEY], "user_1");
        assert_eq!(
            f.tracker.get_external_id(&mapping.vector_id).unwrap().as_deref(),
            Some("user_1")
        );
    }

    #[test]
    fn test_index_with_external_strategy() {
        let f = fixture(VectorIdStrategy::External);
        let mapping = f
            .adapter
            .index("user_1", &[1.0, 0.0, 0.0], Metadata::new())
            .unwrap();
        assert_eq!(mapping.vector_id, "user_1");
    }

    #[test]
    fn test_index_twice_is_already_exists() {
        let f = fixture(VectorIdStrategy::Uuid);
        f.adapter.index("user_1", &[1.0, 0.0, 0.0], Metadata::new()).unwrap();
        let err = f
            .adapter
            .index("user_1", &[0.0, 1.0, 0.0], Metadata::new())
            .unwrap_err();

        assert!(err.is_already_exists());
        // No stray vector was written for the rejected call
        assert_eq!(f.index.len(), 1);
    }

    #[test]
    fn test_index_rejects_wrong_dimension() {
        let f = fixture(VectorIdStrategy::Uuid);
        let err = f.adapter.index("user_1", &[1.0], Metadata::new()).unwrap_err();
        assert!(matches!(err, TrackerError::IntegrityViolation(_)));
        assert!(f.index.is_empty());
    }

    #[test]
    fn test_index_rejects_reserved_metadata_key() {
        let f = fixture(VectorIdStrategy::Uuid);
        let err = f
            .adapter
            .index("user_1", &[1.0, 0.0, 0.0], meta(json!({"external_id": "x"})))
            .unwrap_err();
        assert!(matches!(err, TrackerError::IntegrityViolation(_)));
        assert!(f.index.is_empty());
        assert!(f.tracker.is_empty().unwrap());
    }

    #[test]
    fn test_reindex_updates_vector_and_metadata() {
        let f = fixture(VectorIdStrategy::Uuid);
        let first = f
            .adapter
            .index("doc_1", &[1.0, 0.0, 0.0], meta(json!({"rev": 1})))
            .unwrap();
        let second = f
            .adapter
            .reindex("doc_1", &[0.0, 1.0, 0.0], meta(json!({"rev": 2})))
            .unwrap();

        assert_eq!(first.vector_id, second.vector_id);
        assert_eq!(second.metadata["rev"], 2);
        let record = f.index.fetch(&first.vector_id).unwrap().unwrap();
        assert_eq!(record.embedding, vec![0.0, 1.0, 0.0]);
        assert!(f
            .adapter
            .reindex("ghost", &[0.0, 1.0, 0.0], Metadata::new())
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn test_delete_removes_vector_and_mapping() {
        let f = fixture(VectorIdStrategy::Uuid);
        let mapping = f
            .adapter
            .index("user_1", &[1.0, 0.0, 0.0], Metadata::new())
            .unwrap();

        f.adapter.delete("user_1").unwrap();
        assert!(f.index.fetch(&mapping.vector_id).unwrap().is_none());
        assert!(f.tracker.get_vector_id("user_1").unwrap().is_none());
        assert!(f.adapter.delete("user_1").unwrap_err().is_not_found());
    }

    #[test]
    fn test_search_translates_to_external_ids() {
        let f = fixture(VectorIdStrategy::Uuid);
        f.adapter
            .index("user_1", &[1.0, 0.0, 0.0], meta(json!({"type": "user"})))
            .unwrap();
        f.adapter
            .index("bug_report_1", &[0.0, 1.0, 0.0], meta(json!({"type": "bug_report"})))
            .unwrap();

        let hits = f.adapter.search(&[0.9, 0.1, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].external_id, "user_1");
        assert_eq!(hits[0].metadata["type"], "user");
        assert!(!hits[0].metadata.contains_key(EXTERNAL_ID_KEY));
        assert!(hits[0].score >= hits[1].score);
        assert!(f.adapter.search(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_search_drops_unmapped_vectors() {
        let f = fixture(VectorIdStrategy::Uuid);
        f.adapter.index("user_1", &[1.0, 0.0, 0.0], Metadata::new()).unwrap();
        // Written behind the tracker's back
        f.index
            .upsert("stray", &[1.0, 0.0, 0.0], &Metadata::new())
            .unwrap();

        let hits = f.adapter.search(&[1.0, 0.0, 0.0], 5).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].external_id, "user_1");
    }

    /// Index whose first upsert parks until the test releases it
    struct StallingIndex {
        inner: HnswVectorIndex,
        stalled: AtomicBool,
        entered: Barrier,
        release: Barrier,
    }

    impl VectorIndex for StallingIndex {
        fn dimension(&self) -> usize {
            self.inner.dimension()
        }
        fn upsert(&self, id: &str, embedding: &[f32], metadata: &Metadata) -> Result<()> {
            if !self.stalled.swap(true, Ordering::SeqCst) {
                self.entered.wait();
                self.release.wait();
            }
            self.inner.upsert(id, embedding, metadata)
        }
        fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
            self.inner.query(embedding, top_k)
        }
        fn delete(&self, ids: &[String]) -> Result<()> {
            self.inner.delete(ids)
        }
        fn fetch(&self, id: &str) -> Result<Option<VectorRecord>> {
            self.inner.fetch(id)
        }
        fn list_ids(&self) -> Result<Option<Vec<String>>> {
            self.inner.list_ids()
        }
    }

    fn concurrent_index_admits_one(strategy: VectorIdStrategy) {
        let index = Arc::new(StallingIndex {
            inner: HnswVectorIndex::in_memory(3),
            stalled: AtomicBool::new(false),
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });
        let tracker = Arc::new(IdentityTracker::new(
            Arc::new(MemoryMappingStore::new()),
            Arc::new(SharedCache::default()),
            Arc::new(EventLog::new()),
        ));
        let adapter = Arc::new(VectorIndexAdapter::new(index.clone(), tracker.clone(), strategy));

        let first = {
            let adapter = Arc::clone(&adapter);
            thread::spawn(move || adapter.index("e", &[1.0, 0.0, 0.0], meta(json!({"who": 1}))))
        };
        // The first call is now parked inside its upsert
        index.entered.wait();
        let second = adapter.index("e", &[0.0, 1.0, 0.0], meta(json!({"who": 2})));
        index.release.wait();
        let first = first.join().unwrap();

        assert!(second.unwrap_err().is_already_exists());
        let mapping = first.unwrap();
        assert_eq!(tracker.len().unwrap(), 1);
        assert_eq!(index.inner.len(), 1);

        // Index record and tracked metadata come from the same caller
        let record = index.inner.fetch(&mapping.vector_id).unwrap().unwrap();
        assert_eq!(record.embedding, vec![1.0, 0.0, 0.0]);
        assert_eq!(record.metadata["who"], 1);
        assert_eq!(mapping.metadata["who"], 1);

        // The claim is released once the call returns
        assert!(adapter
            .index("e", &[1.0, 0.0, 0.0], Metadata::new())
            .unwrap_err()
            .is_already_exists());
        adapter.delete("e").unwrap();
        assert!(adapter.index("e", &[1.0, 0.0, 0.0], Metadata::new()).is_ok());
    }

    #[test]
    fn test_concurrent_index_external_strategy() {
        concurrent_index_admits_one(VectorIdStrategy::External);
    }

    #[test]
    fn test_concurrent_index_uuid_strategy() {
        concurrent_index_admits_one(VectorIdStrategy::Uuid);
    }

    #[test]
    fn test_untag() {
        let (id, rest) = untag(meta(json!({"external_id": "user_1", "k": 1})));
        assert_eq!(id.as_deref(), Some("user_1"));
        assert!(!rest.contains_key(EXTERNAL_ID_KEY));

        let (id, _) = untag(meta(json!({"external_id": 5})));
        assert!(id.is_none());
    }
}
