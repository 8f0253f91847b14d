//! Mapping table schema versioning
//!
//! Version 1 tables held rows only. Version 2 added the `vid:` reverse index
//! that enforces vector id uniqueness; upgrading rebuilds it from the rows.

use rocksdb::{Direction, IteratorMode, WriteBatch, DB};

use super::rocks::{vector_key, ROW_PREFIX};
use crate::error::{Result, TrackerError};
use crate::mapping::MappingRow;

/// Schema version stored in metadata
const SCHEMA_VERSION_KEY: &[u8] = b"_schema_version";
const CURRENT_VERSION: u32 = 2;

/// Check the table version and upgrade it if needed
pub fn migrate_if_needed(db: &DB) -> Result<()> {
    let version = match db.get(SCHEMA_VERSION_KEY)? {
        Some(bytes) => {
            let bytes_slice: &[u8] = bytes.as_ref();
            let version_bytes: [u8; 4] = bytes_slice
                .try_into()
                .map_err(|_| TrackerError::config("invalid schema version format"))?;
            u32::from_le_bytes(version_bytes)
        }
        None if has_rows(db)? => 1, // Version 1 didn't have version key
        None => CURRENT_VERSION,
    };

    if version > CURRENT_VERSION {
        return Err(TrackerError::config(format!(
            "mapping table schema v{} is newer than supported v{}",
            version, CURRENT_VERSION
        )));
    }

    if version < CURRENT_VERSION {
        log::warn!(
            "Mapping table needs migration from v{} to v{}",
            version,
            CURRENT_VERSION
        );
        rebuild_vector_index(db)?;
        log::info!("Migration completed successfully");
    }

    db.put(SCHEMA_VERSION_KEY, CURRENT_VERSION.to_le_bytes())?;
    Ok(())
}

fn has_rows(db: &DB) -> Result<bool> {
    let mut iter = db.iterator(IteratorMode::From(ROW_PREFIX.as_bytes(), Direction::Forward));
    match iter.next() {
        Some(item) => {
            let (key, _) = item?;
            Ok(key.starts_with(ROW_PREFIX.as_bytes()))
        }
        None => Ok(false),
    }
}

/// Rebuild `vid:` keys from rows; the first row claiming a vector id wins
fn rebuild_vector_index(db: &DB) -> Result<()> {
    let mut batch = WriteBatch::default();
    let mut seen = std::collections::HashSet::new();
    let mut rebuilt = 0usize;

    let iter = db.iterator(IteratorMode::From(ROW_PREFIX.as_bytes(), Direction::Forward));
    for item in iter {
        let (key, value) = item?;
        if !key.starts_with(ROW_PREFIX.as_bytes()) {
            break;
        }
        let row: MappingRow = match bincode::deserialize(&value) {
            Ok(row) => row,
            Err(e) => {
                log::error!(
                    "Failed to deserialize row {}: {}. Skipping.",
                    String::from_utf8_lossy(&key),
                    e
                );
                continue;
            }
        };

        if !seen.insert(row.vector_id.clone()) {
            log::error!(
                "Vector id '{}' claimed by more than one row; '{}' left without reverse key",
                row.vector_id,
                row.external_id
            );
            continue;
        }
        batch.put(vector_key(&row.vector_id).as_bytes(), row.external_id.as_bytes());
        rebuilt += 1;
    }

    db.write(batch)?;
    log::info!("Rebuilt {} vector index keys", rebuilt);
    Ok(())
}
