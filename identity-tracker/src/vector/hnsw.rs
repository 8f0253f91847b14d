//! Local vector index with HNSW search
//!
//! Records are kept in memory and optionally persisted to RocksDB under
//! `vec:<id>`. The HNSW graph is rebuilt lazily on the first query after a
//! mutation; small collections are scanned linearly instead.

use dashmap::DashMap;
use instant_distance::{Builder, HnswMap, Point, Search};
use parking_lot::RwLock;
use rocksdb::{Direction, IteratorMode, Options, DB};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use super::{cosine_similarity, VectorIndex, VectorMatch, VectorRecord};
use crate::error::{Result, TrackerError};
use crate::mapping::Metadata;

const RECORD_PREFIX: &str = "vec:";

/// Below this many points a linear scan is exact and cheaper than a rebuild
const HNSW_MIN_POINTS: usize = 64;

/// HNSW point wrapper for semantic search
#[derive(Clone)]
struct IndexPoint {
    vector: Vec<f32>,
}

impl Point for IndexPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Cosine distance = 1 - similarity (HNSW finds minimum)
        1.0 - cosine_similarity(&self.vector, &other.vector)
    }
}

/// Local vector index
pub struct HnswVectorIndex {
    dimension: usize,
    records: DashMap<String, VectorRecord>,
    hnsw: RwLock<Option<HnswMap<IndexPoint, String>>>,
    dirty: AtomicBool,
    db: RwLock<Option<DB>>,
    persistent: bool,
    closed: AtomicBool,
}

impl HnswVectorIndex {
    /// Create an index that lives only in memory
    pub fn in_memory(dimension: usize) -> Self {
        Self {
            dimension,
            records: DashMap::new(),
            hnsw: RwLock::new(None),
            dirty: AtomicBool::new(false),
            db: RwLock::new(None),
            persistent: false,
            closed: AtomicBool::new(false),
        }
    }

    /// Open a persistent index at the given path, loading stored records
    pub fn open(path: impl AsRef<Path>, dimension: usize) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        let db = DB::open(&opts, path)?;

        let mut index = Self::in_memory(dimension);
        index.load_records(&db)?;
        *index.db.get_mut() = Some(db);
        index.persistent = true;

        log::info!(
            "HnswVectorIndex opened at: {} ({} vectors, {}d)",
            path.display(),
            index.records.len(),
            dimension
        );
        Ok(index)
    }

    fn load_records(&mut self, db: &DB) -> Result<()> {
        let mut skipped = 0;
        let iter = db.iterator(IteratorMode::From(RECORD_PREFIX.as_bytes(), Direction::Forward));
        for item in iter {
            let (key, value) = item?;
            if !key.starts_with(RECORD_PREFIX.as_bytes()) {
                break;
            }
            match serde_json::from_slice::<VectorRecord>(&value) {
                Ok(record) if record.embedding.len() == self.dimension => {
                    self.records.insert(record.id.clone(), record);
                }
                Ok(record) => {
                    log::warn!(
                        "Vector {} has dimension {}, expected {}. Skipping.",
                        record.id,
                        record.embedding.len(),
                        self.dimension
                    );
                    skipped += 1;
                }
                Err(e) => {
                    log::warn!(
                        "Failed to deserialize vector {}: {}. Skipping.",
                        String::from_utf8_lossy(&key),
                        e
                    );
                    skipped += 1;
                }
            }
        }
        if skipped > 0 {
            log::warn!("Skipped {} vectors while loading", skipped);
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TrackerError::connection("vector index is closed"));
        }
        Ok(())
    }

    fn check_dimension(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimension {
            return Err(TrackerError::integrity(format!(
                "embedding has dimension {}, index expects {}",
                embedding.len(),
                self.dimension
            )));
        }
        Ok(())
    }

    fn persist(&self, record: &VectorRecord) -> Result<()> {
        if !self.persistent {
            return Ok(());
        }
        let guard = self.db.read();
        let db = guard
            .as_ref()
            .ok_or_else(|| TrackerError::connection("vector index is closed"))?;
        let key = format!("{}{}", RECORD_PREFIX, record.id);
        db.put(key.as_bytes(), serde_json::to_vec(record)?)?;
        Ok(())
    }

    /// Rebuild HNSW index if a mutation happened since the last build
    fn refresh_hnsw(&self) {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return;
        }
        if self.records.len() < HNSW_MIN_POINTS {
            *self.hnsw.write() = None;
            return;
        }

        let (points, ids): (Vec<IndexPoint>, Vec<String>) = self
            .records
            .iter()
            .map(|entry| {
                (
                    IndexPoint {
                        vector: entry.value().embedding.clone(),
                    },
                    entry.key().clone(),
                )
            })
            .unzip();

        let hnsw = Builder::default().ef_construction(100).build(points, ids);
        *self.hnsw.write() = Some(hnsw);
    }

    /// Linear search fallback
    fn linear_search(&self, query: &[f32], top_k: usize) -> Vec<(String, f32)> {
        let mut results: Vec<(String, f32)> = self
            .records
            .iter()
            .map(|entry| {
                (
                    entry.key().clone(),
                    cosine_similarity(query, &entry.value().embedding),
                )
            })
            .collect();

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(top_k);
        results
    }

    fn hnsw_search(&self, query: &[f32], top_k: usize) -> Option<Vec<(String, f32)>> {
        let guard = self.hnsw.read();
        let hnsw = guard.as_ref()?;

        let query_point = IndexPoint {
            vector: query.to_vec(),
        };
        let mut search = Search::default();
        let results = hnsw
            .search(&query_point, &mut search)
            .take(top_k)
            .map(|item| (item.value.clone(), 1.0 - item.distance))
            .collect();
        Some(results)
    }
}

impl VectorIndex for HnswVectorIndex {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn upsert(&self, id: &str, embedding: &[f32], metadata: &Metadata) -> Result<()> {
        self.ensure_open()?;
        self.check_dimension(embedding)?;

        let record = VectorRecord {
            id: id.to_string(),
            embedding: embedding.to_vec(),
            metadata: metadata.clone(),
        };
        self.persist(&record)?;
        self.records.insert(record.id.clone(), record);
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn query(&self, embedding: &[f32], top_k: usize) -> Result<Vec<VectorMatch>> {
        self.ensure_open()?;
        self.check_dimension(embedding)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        self.refresh_hnsw();
        let ranked = self
            .hnsw_search(embedding, top_k)
            .unwrap_or_else(|| self.linear_search(embedding, top_k));

        // Records deleted since the last rebuild are skipped here
        Ok(ranked
            .into_iter()
            .filter_map(|(id, score)| {
                self.records.get(&id).map(|record| VectorMatch {
                    id,
                    score,
                    metadata: record.metadata.clone(),
                })
            })
            .collect())
    }

    fn delete(&self, ids: &[String]) -> Result<()> {
        self.ensure_open()?;
        if self.persistent {
            let guard = self.db.read();
            let db = guard
                .as_ref()
                .ok_or_else(|| TrackerError::connection("vector index is closed"))?;
            for id in ids {
                db.delete(format!("{}{}", RECORD_PREFIX, id).as_bytes())?;
            }
        }
        for id in ids {
            self.records.remove(id);
        }
        self.dirty.store(true, Ordering::Release);
        Ok(())
    }

    fn fetch(&self, id: &str) -> Result<Option<VectorRecord>> {
        self.ensure_open()?;
        Ok(self.records.get(id).map(|r| r.value().clone()))
    }

    fn list_ids(&self) -> Result<Option<Vec<String>>> {
        self.ensure_open()?;
        Ok(Some(self.records.iter().map(|e| e.key().clone()).collect()))
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        if let Some(db) = self.db.write().take() {
            db.flush()?;
            log::info!("HnswVectorIndex closed");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn unit(dim: usize, hot: usize) -> Vec<f32> {
        let mut v = vec![0.0; dim];
        v[hot % dim] = 1.0;
        v
    }

    #[test]
    fn test_upsert_fetch_delete() {
        let index = HnswVectorIndex::in_memory(4);
        let meta = crate::mapping::metadata_from_value(json!({"type": "user"})).unwrap();
        index.upsert("v1", &unit(4, 0), &meta).unwrap();

        let record = index.fetch("v1").unwrap().unwrap();
        assert_eq!(record.metadata, meta);

        index.delete(&["v1".to_string(), "missing".to_string()]).unwrap();
        assert!(index.fetch("v1").unwrap().is_none());
    }

    #[test]
    fn test_dimension_mismatch_is_integrity_violation() {
        let index = HnswVectorIndex::in_memory(4);
        let err = index.upsert("v1", &[1.0, 0.0], &Metadata::new()).unwrap_err();
        assert!(matches!(err, TrackerError::IntegrityViolation(_)));
        assert!(index.query(&[1.0], 3).is_err());
    }

    #[test]
    fn test_linear_query_ranks_by_similarity() {
        let index = HnswVectorIndex::in_memory(3);
        index.upsert("x", &[1.0, 0.0, 0.0], &Metadata::new()).unwrap();
        index.upsert("xy", &[1.0, 1.0, 0.0], &Metadata::new()).unwrap();
        index.upsert("z", &[0.0, 0.0, 1.0], &Metadata::new()).unwrap();

        let hits = index.query(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "x");
        assert_eq!(hits[1].id, "xy");
        assert!(hits[0].score > hits[1].score);
        assert!(index.query(&[1.0, 0.0, 0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn test_hnsw_query_finds_exact_match() {
        let dim = 16;
        let index = HnswVectorIndex::in_memory(dim);
        for i in 0..(HNSW_MIN_POINTS * 2) {
            let mut v = unit(dim, i);
            v[(i + 1) % dim] = (i as f32) / 1000.0;
            index.upsert(&format!("v{i}"), &v, &Metadata::new()).unwrap();
        }

        let mut query = unit(dim, 5);
        query[6] = 5.0 / 1000.0;
        let hits = index.query(&query, 1).unwrap();
        assert_eq!(hits[0].id, "v5");
        assert!((hits[0].score - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_deleted_records_never_returned() {
        let dim = 8;
        let index = HnswVectorIndex::in_memory(dim);
        for i in 0..HNSW_MIN_POINTS {
            index.upsert(&format!("v{i}"), &unit(dim, i), &Metadata::new()).unwrap();
        }
        index.query(&unit(dim, 0), 5).unwrap();
        index.delete(&["v0".to_string()]).unwrap();

        let hits = index.query(&unit(dim, 0), 100).unwrap();
        assert!(hits.iter().all(|h| h.id != "v0"));
    }

    #[test]
    fn test_list_ids() {
        let index = HnswVectorIndex::in_memory(2);
        index.upsert("a", &[1.0, 0.0], &Metadata::new()).unwrap();
        index.upsert("b", &[0.0, 1.0], &Metadata::new()).unwrap();
        let mut ids = index.list_ids().unwrap().unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn test_persistent_records_survive_reopen() {
        let dir = TempDir::new().unwrap();
        let meta = crate::mapping::metadata_from_value(json!({"nested": {"k": [1, 2]}})).unwrap();
        {
            let index = HnswVectorIndex::open(dir.path(), 2).unwrap();
            index.upsert("a", &[1.0, 0.0], &meta).unwrap();
            index.upsert("b", &[0.0, 1.0], &Metadata::new()).unwrap();
            index.delete(&["b".to_string()]).unwrap();
            index.close().unwrap();
        }

        let index = HnswVectorIndex::open(dir.path(), 2).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.fetch("a").unwrap().unwrap().metadata, meta);
    }

    #[test]
    fn test_closed_index_refuses() {
        let index = HnswVectorIndex::in_memory(2);
        index.close().unwrap();
        assert!(matches!(
            index.upsert("a", &[1.0, 0.0], &Metadata::new()),
            Err(TrackerError::Connection(_))
        ));
    }
}
