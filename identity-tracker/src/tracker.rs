//! Canonical identity tracker
//!
//! Owns the bijection between external ids and vector ids. Mutations are
//! serialized through one lock so concurrent callers can never create two
//! mappings for the same id; reads go through the shared cache first.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::cache::SharedCache;
use crate::error::{Result, TrackerError};
use crate::events::{EventAction, EventLog};
use crate::mapping::{validate_id, validate_metadata, IdentityMapping, Metadata};
use crate::store::MappingStore;

/// Identity tracker over a relational mapping store
pub struct IdentityTracker {
    store: Arc<dyn MappingStore>,
    cache: Arc<SharedCache>,
    events: Arc<EventLog>,
    write_lock: Mutex<()>,
    /// Guards the epoch bump plus cache update of a mutation, and the check
    /// plus cache set of a read-through fill. Never held across store I/O.
    cache_lock: Mutex<()>,
    /// Bumped by every mutation; a cache fill is dropped if it changed
    epoch: AtomicU64,
}

impl IdentityTracker {
    pub fn new(
        store: Arc<dyn MappingStore>,
        cache: Arc<SharedCache>,
        events: Arc<EventLog>,
    ) -> Self {
        Self {
            store,
            cache,
            events,
            write_lock: Mutex::new(()),
            cache_lock: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    // ==========================================
    // Mutations
    // ==========================================

    /// Record a new mapping
    ///
    /// Fails with `AlreadyExists` if either id is mapped already. The check and
    /// the insert happen under the mutation lock, and the store re-checks both
    /// unique columns on insert.
    pub fn add_mapping(
        &self,
        external_id: &str,
        vector_id: &str,
        metadata: Metadata,
    ) -> Result<IdentityMapping> {
        validate_id("external id", external_id)?;
        validate_id("vector id", vector_id)?;
        validate_metadata(&metadata)?;

        let _guard = self.write_lock.lock();

        if let Some(existing) = self.store_call("add_mapping", external_id, |s| {
            s.get_by_external(external_id)
        })? {
            log::warn!(
                "Mapping for external ID '{}' already exists (vector ID '{}')",
                external_id,
                existing.vector_id
            );
            return Err(TrackerError::already_exists(format!(
                "external id '{}'",
                external_id
            )));
        }
        if let Some(existing) = self.store_call("add_mapping", external_id, |s| {
            s.get_by_vector(vector_id)
        })? {
            log::warn!(
                "Vector ID '{}' is already mapped to external ID '{}'",
                vector_id,
                existing.external_id
            );
            return Err(TrackerError::already_exists(format!(
                "vector id '{}'",
                vector_id
            )));
        }

        let mapping = IdentityMapping::new(external_id, vector_id, metadata);
        self.store_call("add_mapping", external_id, |s| s.insert(&mapping))?;
        self.publish(|cache| {
            cache.set(mapping.clone());
        });
        self.events.record(
            EventAction::Added,
            external_id,
            vector_id,
            json!({ "metadata": Value::Object(mapping.metadata.clone()) }),
        );
        log::debug!(
            "Added mapping: External ID '{}' <-> Vector ID '{}'",
            external_id,
            vector_id
        );
        Ok(mapping)
    }

    /// Delete a mapping, invalidating both cache keys
    pub fn remove_mapping(&self, external_id: &str) -> Result<IdentityMapping> {
        self.remove_mapping_because(external_id, "unlinked")
    }

    /// Delete a mapping, recording why in the event detail
    pub fn remove_mapping_because(
        &self,
        external_id: &str,
        reason: &str,
    ) -> Result<IdentityMapping> {
        let _guard = self.write_lock.lock();

        let removed = self.store_call("remove_mapping", external_id, |s| s.delete(external_id))?;
        self.publish(|cache| cache.invalidate(external_id, Some(&removed.vector_id)));
        self.events.record(
            EventAction::Removed,
            external_id,
            &removed.vector_id,
            json!({ "reason": reason }),
        );
        log::debug!(
            "Removed mapping for External ID '{}' and Vector ID '{}'",
            external_id,
            removed.vector_id
        );
        Ok(removed)
    }

    /// Overwrite the metadata of an existing mapping
    pub fn update_metadata(&self, external_id: &str, metadata: Metadata) -> Result<IdentityMapping> {
        validate_metadata(&metadata)?;

        let _guard = self.write_lock.lock();

        let updated = self.store_call("update_metadata", external_id, |s| {
            s.update_metadata(external_id, &metadata, Utc::now())
        })?;
        self.publish(|cache| {
            cache.set(updated.clone());
        });
        self.events.record(
            EventAction::Updated,
            external_id,
            &updated.vector_id,
            json!({ "metadata": Value::Object(metadata) }),
        );
        Ok(updated)
    }

    // ==========================================
    // Read-through lookups
    // ==========================================

    pub fn get_vector_id(&self, external_id: &str) -> Result<Option<String>> {
        Ok(self.get_mapping(external_id)?.map(|m| m.vector_id))
    }

    pub fn get_external_id(&self, vector_id: &str) -> Result<Option<String>> {
        Ok(self.get_mapping_by_vector(vector_id)?.map(|m| m.external_id))
    }

    /// Full mapping by external id, consulting the cache first
    pub fn get_mapping(&self, external_id: &str) -> Result<Option<IdentityMapping>> {
        if let Some(hit) = self.cache.get_by_external(external_id) {
            return Ok(Some(hit));
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let found = self.store_call("get_mapping", external_id, |s| {
            s.get_by_external(external_id)
        })?;
        if let Some(mapping) = &found {
            self.fill_cache(epoch, mapping);
        }
        Ok(found)
    }

    /// Full mapping by vector id, consulting the cache first
    pub fn get_mapping_by_vector(&self, vector_id: &str) -> Result<Option<IdentityMapping>> {
        if let Some(hit) = self.cache.get_by_vector(vector_id) {
            return Ok(Some(hit));
        }
        let epoch = self.epoch.load(Ordering::Acquire);
        let found = self.store_call("get_mapping_by_vector", vector_id, |s| {
            s.get_by_vector(vector_id)
        })?;
        if let Some(mapping) = &found {
            self.fill_cache(epoch, mapping);
        }
        Ok(found)
    }

    /// Snapshot of every mapping
    pub fn list_all(&self) -> Result<Vec<IdentityMapping>> {
        self.store_call("list_all", "*", |s| s.list_all())
    }

    pub fn len(&self) -> Result<usize> {
        self.store_call("len", "*", |s| s.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ==========================================
    // Accessors
    // ==========================================

    pub fn events(&self) -> &Arc<EventLog> {
        &self.events
    }

    pub fn cache(&self) -> &Arc<SharedCache> {
        &self.cache
    }

    /// Close the backing store
    pub fn close(&self) -> Result<()> {
        let _guard = self.write_lock.lock();
        self.publish(|cache| cache.clear());
        self.store.close()
    }

    /// Apply a committed mutation to the cache and retire in-flight fills
    fn publish(&self, update: impl FnOnce(&SharedCache)) {
        let _guard = self.cache_lock.lock();
        self.epoch.fetch_add(1, Ordering::AcqRel);
        update(&self.cache);
    }

    /// Cache a store read unless a mutation landed since the read began
    fn fill_cache(&self, epoch: u64, mapping: &IdentityMapping) {
        let _guard = self.cache_lock.lock();
        if self.epoch.load(Ordering::Acquire) == epoch {
            self.cache.set(mapping.clone());
        }
    }

    /// Run a store call, logging failures with the operation and id
    fn store_call<T>(
        &self,
        operation: &str,
        id: &str,
        f: impl FnOnce(&dyn MappingStore) -> Result<T>,
    ) -> Result<T> {
        f(self.store.as_ref()).map_err(|e| {
            match &e {
                TrackerError::AlreadyExists(_) | TrackerError::NotFound(_) => {
                    log::warn!("{} for '{}': {}", operation, id, e)
                }
                _ => log::error!("Store error during {} for '{}': {}", operation, id, e),
            }
            e
        })
    }
}
