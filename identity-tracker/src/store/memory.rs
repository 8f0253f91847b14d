//! In-process mapping table

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use super::MappingStore;
use crate::error::{Result, TrackerError};
use crate::mapping::{IdentityMapping, MappingRow, Metadata};

#[derive(Default)]
struct Tables {
    rows: HashMap<String, MappingRow>,
    vector_index: HashMap<String, String>,
}

/// Mapping table held in memory
///
/// Rows keep metadata as JSON text, exactly like the persistent backend, so
/// callers observe the same serialization boundary.
#[derive(Default)]
pub struct MemoryMappingStore {
    tables: RwLock<Tables>,
    closed: AtomicBool,
}

impl MemoryMappingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TrackerError::connection("mapping store is closed"));
        }
        Ok(())
    }
}

impl MappingStore for MemoryMappingStore {
    fn insert(&self, mapping: &IdentityMapping) -> Result<()> {
        self.ensure_open()?;
        let row = MappingRow::encode(mapping)?;
        let mut tables = self.tables.write();

        if tables.rows.contains_key(&row.external_id) {
            return Err(TrackerError::already_exists(format!(
                "external id '{}'",
                row.external_id
            )));
        }
        if tables.vector_index.contains_key(&row.vector_id) {
            return Err(TrackerError::already_exists(format!(
                "vector id '{}'",
                row.vector_id
            )));
        }

        tables
            .vector_index
            .insert(row.vector_id.clone(), row.external_id.clone());
        tables.rows.insert(row.external_id.clone(), row);
        Ok(())
    }

    fn get_by_external(&self, external_id: &str) -> Result<Option<IdentityMapping>> {
        self.ensure_open()?;
        let row = self.tables.read().rows.get(external_id).cloned();
        row.map(MappingRow::decode).transpose()
    }

    fn get_by_vector(&self, vector_id: &str) -> Result<Option<IdentityMapping>> {
        self.ensure_open()?;
        let tables = self.tables.read();
        let row = tables
            .vector_index
            .get(vector_id)
            .and_then(|external_id| tables.rows.get(external_id))
            .cloned();
        drop(tables);
        row.map(MappingRow::decode).transpose()
    }

    fn update_metadata(
        &self,
        external_id: &str,
        metadata: &Metadata,
        updated_at: DateTime<Utc>,
    ) -> Result<IdentityMapping> {
        self.ensure_open()?;
        let text = serde_json::to_string(metadata)?;
        let mut tables = self.tables.write();
        let row = tables
            .rows
            .get_mut(external_id)
            .ok_or_else(|| TrackerError::not_found(format!("mapping for '{}'", external_id)))?;
        row.metadata = text;
        row.updated_at = updated_at;
        row.clone().decode()
    }

    fn delete(&self, external_id: &str) -> Result<IdentityMapping> {
        self.ensure_open()?;
        let mut tables = self.tables.write();
        let row = tables
            .rows
            .remove(external_id)
            .ok_or_else(|| TrackerError::not_found(format!("mapping for '{}'", external_id)))?;
        tables.vector_index.remove(&row.vector_id);
        drop(tables);
        row.decode()
    }

    fn list_all(&self) -> Result<Vec<IdentityMapping>> {
        self.ensure_open()?;
        let rows: Vec<MappingRow> = self.tables.read().rows.values().cloned().collect();
        rows.into_iter().map(MappingRow::decode).collect()
    }

    fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.tables.read().rows.len())
    }

    fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::contract;

    #[test]
    fn test_insert_and_get() {
        contract::insert_and_get(&MemoryMappingStore::new());
    }

    #[test]
    fn test_unique_constraints() {
        contract::unique_constraints(&MemoryMappingStore::new());
    }

    #[test]
    fn test_update_and_delete() {
        contract::update_and_delete(&MemoryMappingStore::new());
    }

    #[test]
    fn test_list_all() {
        contract::list_all(&MemoryMappingStore::new());
    }

    #[test]
    fn test_closed_store_refuses() {
        contract::closed_store_refuses(&MemoryMappingStore::new());
    }
}
