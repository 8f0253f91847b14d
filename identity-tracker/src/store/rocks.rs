//! RocksDB mapping table
//!
//! Rows live under `map:<external_id>` as bincode-encoded [`MappingRow`]s.
//! The unique constraint on vector ids is a reverse index under
//! `vid:<vector_id>`; a row and its index key are always written in one batch.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use rocksdb::{Direction, IteratorMode, Options, WriteBatch, DB};
use std::path::Path;

use super::schema;
use super::MappingStore;
use crate::error::{Result, TrackerError};
use crate::mapping::{IdentityMapping, MappingRow, Metadata};

pub(crate) const ROW_PREFIX: &str = "map:";
pub(crate) const VECTOR_PREFIX: &str = "vid:";

pub(crate) fn row_key(external_id: &str) -> String {
    format!("{}{}", ROW_PREFIX, external_id)
}

pub(crate) fn vector_key(vector_id: &str) -> String {
    format!("{}{}", VECTOR_PREFIX, vector_id)
}

/// Persistent mapping table backed by RocksDB
pub struct RocksMappingStore {
    db: RwLock<Option<DB>>,
    /// Serializes read-check-write sequences on both unique columns
    write_lock: Mutex<()>,
}

impl RocksMappingStore {
    /// Open (or create) the table at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_max_background_jobs(2);
        opts.set_bytes_per_sync(1048576); // 1MB
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);

        let db = DB::open(&opts, path)?;
        schema::migrate_if_needed(&db)?;

        log::info!("RocksMappingStore opened at: {}", path.display());

        Ok(Self {
            db: RwLock::new(Some(db)),
            write_lock: Mutex::new(()),
        })
    }

    fn with_db<T>(&self, f: impl FnOnce(&DB) -> Result<T>) -> Result<T> {
        let guard = self.db.read();
        let db = guard
            .as_ref()
            .ok_or_else(|| TrackerError::connection("mapping store is closed"))?;
        f(db)
    }

    fn read_row(db: &DB, external_id: &str) -> Result<Option<MappingRow>> {
        match db.get(row_key(external_id).as_bytes())? {
            Some(bytes) => Ok(Some(bincode::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }
}

impl MappingStore for RocksMappingStore {
    fn insert(&self, mapping: &IdentityMapping) -> Result<()> {
        let row = MappingRow::encode(mapping)?;
        let _guard = self.write_lock.lock();
        self.with_db(|db| {
            if db.get(row_key(&row.external_id).as_bytes())?.is_some() {
                return Err(TrackerError::already_exists(format!(
                    "external id '{}'",
                    row.external_id
                )));
            }
            if db.get(vector_key(&row.vector_id).as_bytes())?.is_some() {
                return Err(TrackerError::already_exists(format!(
                    "vector id '{}'",
                    row.vector_id
                )));
            }

            let mut batch = WriteBatch::default();
            batch.put(row_key(&row.external_id).as_bytes(), bincode::serialize(&row)?);
            batch.put(
                vector_key(&row.vector_id).as_bytes(),
                row.external_id.as_bytes(),
            );
            db.write(batch)?;
            Ok(())
        })
    }

    fn get_by_external(&self, external_id: &str) -> Result<Option<IdentityMapping>> {
        self.with_db(|db| Self::read_row(db, external_id)?.map(MappingRow::decode).transpose())
    }

    fn get_by_vector(&self, vector_id: &str) -> Result<Option<IdentityMapping>> {
        self.with_db(|db| {
            let external_id = match db.get(vector_key(vector_id).as_bytes())? {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => return Ok(None),
            };
            match Self::read_row(db, &external_id)? {
                // The reverse key can outlive its row only if a write was torn
                Some(row) if row.vector_id == vector_id => row.decode().map(Some),
                _ => {
                    log::warn!(
                        "Dangling vector index key for '{}' -> '{}'",
                        vector_id,
                        external_id
                    );
                    Ok(None)
                }
            }
        })
    }

    fn update_metadata(
        &self,
        external_id: &str,
        metadata: &Metadata,
        updated_at: DateTime<Utc>,
    ) -> Result<IdentityMapping> {
        let text = serde_json::to_string(metadata)?;
        let _guard = self.write_lock.lock();
        self.with_db(|db| {
            let mut row = Self::read_row(db, external_id)?.ok_or_else(|| {
                TrackerError::not_found(format!("mapping for '{}'", external_id))
            })?;
            row.metadata = text;
            row.updated_at = updated_at;
            db.put(row_key(external_id).as_bytes(), bincode::serialize(&row)?)?;
            row.decode()
        })
    }

    fn delete(&self, external_id: &str) -> Result<IdentityMapping> {
        let _guard = self.write_lock.lock();
        self.with_db(|db| {
            let row = Self::read_row(db, external_id)?.ok_or_else(|| {
                TrackerError::not_found(format!("mapping for '{}'", external_id))
            })?;

            let mut batch = WriteBatch::default();
            batch.delete(row_key(external_id).as_bytes());
            batch.delete(vector_key(&row.vector_id).as_bytes());
            db.write(batch)?;
            row.decode()
        })
    }

    fn list_all(&self) -> Result<Vec<IdentityMapping>> {
        self.with_db(|db| {
            let mut mappings = Vec::new();
            let iter = db.iterator(IteratorMode::From(ROW_PREFIX.as_bytes(), Direction::Forward));
            for item in iter {
                let (key, value) = item?;
                if !key.starts_with(ROW_PREFIX.as_bytes()) {
                    break;
                }
                let row: MappingRow = bincode::deserialize(&value).map_err(|e| {
                    log::error!(
                        "Failed to deserialize row {}: {}",
                        String::from_utf8_lossy(&key),
                        e
                    );
                    e
                })?;
                mappings.push(row.decode()?);
            }
            Ok(mappings)
        })
    }

    fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        if let Some(db) = self.db.write().take() {
            db.flush()?;
            log::info!("RocksMappingStore closed");
        }
        Ok(())
    }
}
