//! Relational mapping table
//!
//! The system of record for identity mappings. Two backends share the
//! [`MappingStore`] contract: an in-process table and a RocksDB table.

mod memory;
mod rocks;
mod schema;

pub use memory::MemoryMappingStore;
pub use rocks::RocksMappingStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::mapping::{IdentityMapping, Metadata};

/// Contract the tracker requires from the relational store
///
/// `external_id` is the primary key and `vector_id` carries a unique
/// constraint. Implementations must reject an insert that collides on either
/// column with `AlreadyExists`, and report absent rows as `NotFound`.
/// After [`close`](MappingStore::close) every call fails with `Connection`.
pub trait MappingStore: Send + Sync {
    fn insert(&self, mapping: &IdentityMapping) -> Result<()>;

    fn get_by_external(&self, external_id: &str) -> Result<Option<IdentityMapping>>;

    fn get_by_vector(&self, vector_id: &str) -> Result<Option<IdentityMapping>>;

    /// Overwrite metadata, returning the updated row
    fn update_metadata(
        &self,
        external_id: &str,
        metadata: &Metadata,
        updated_at: DateTime<Utc>,
    ) -> Result<IdentityMapping>;

    /// Delete by primary key, returning the removed row
    fn delete(&self, external_id: &str) -> Result<IdentityMapping>;

    fn list_all(&self) -> Result<Vec<IdentityMapping>>;

    fn len(&self) -> Result<usize> {
        Ok(self.list_all()?.len())
    }

    fn close(&self) -> Result<()>;
}
